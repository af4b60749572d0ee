use std::collections::VecDeque;
use std::sync::Arc;

use arrow::array::{Array, Int32Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;
use weft_error::Result;

use crate::plan::connector::{
    ConnectorInsertTableHandle, ConnectorTableHandle, ConnectorWriter, DataSource,
    InsertTableHandle,
};
use crate::plan::{PlanNode, PlanNodeId};
use crate::task::OutputBuffer;

use super::exchange::{ExchangeClient, ExchangePoll};
use super::sink::BatchConsumer;

pub(crate) fn test_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]))
}

pub(crate) fn int32_batch(values: Vec<i32>) -> RecordBatch {
    RecordBatch::try_new(test_schema(), vec![Arc::new(Int32Array::from(values))]).unwrap()
}

pub(crate) fn int32_column(batch: &RecordBatch, idx: usize) -> Vec<i32> {
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<Int32Array>()
        .unwrap()
        .values()
        .to_vec()
}

#[derive(Debug)]
pub(crate) struct TestDataSource {
    batches: VecDeque<RecordBatch>,
}

impl DataSource for TestDataSource {
    fn next_batch(&mut self) -> Result<Option<RecordBatch>> {
        Ok(self.batches.pop_front())
    }
}

/// Table handle serving fixed batches.
#[derive(Debug)]
pub(crate) struct TestTableHandle {
    pub batches: Vec<RecordBatch>,
}

impl ConnectorTableHandle for TestTableHandle {
    fn create_data_source(&self) -> Result<Box<dyn DataSource>> {
        Ok(Box::new(TestDataSource {
            batches: self.batches.iter().cloned().collect(),
        }))
    }
}

pub(crate) fn scan_node(id: impl Into<PlanNodeId>, batches: Vec<RecordBatch>) -> Arc<PlanNode> {
    PlanNode::table_scan(id, test_schema(), Arc::new(TestTableHandle { batches }))
}

#[derive(Debug, Default)]
pub(crate) struct TestWriter {
    rows: u64,
}

impl ConnectorWriter for TestWriter {
    fn append(&mut self, batch: RecordBatch) -> Result<()> {
        self.rows += batch.num_rows() as u64;
        Ok(())
    }

    fn finish(&mut self) -> Result<u64> {
        Ok(self.rows)
    }
}

#[derive(Debug)]
pub(crate) struct TestInsertHandle {
    pub multi_threading: bool,
}

impl ConnectorInsertTableHandle for TestInsertHandle {
    fn supports_multi_threading(&self) -> bool {
        self.multi_threading
    }

    fn create_writer(&self) -> Result<Box<dyn ConnectorWriter>> {
        Ok(Box::<TestWriter>::default())
    }
}

pub(crate) fn insert_handle(multi_threading: bool) -> InsertTableHandle {
    InsertTableHandle::new(Arc::new(TestInsertHandle { multi_threading }))
}

/// Final consumer collecting everything it receives.
#[derive(Debug, Default)]
pub(crate) struct CollectingConsumer {
    pub batches: Mutex<Vec<RecordBatch>>,
    pub finished: Mutex<bool>,
}

impl BatchConsumer for CollectingConsumer {
    fn consume(&self, batch: RecordBatch) -> Result<()> {
        self.batches.lock().push(batch);
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        *self.finished.lock() = true;
        Ok(())
    }
}

/// Exchange client serving queued batches, then finishing.
#[derive(Debug)]
pub(crate) struct QueueExchangeClient {
    batches: Mutex<VecDeque<RecordBatch>>,
}

impl QueueExchangeClient {
    pub fn new(batches: Vec<RecordBatch>) -> Self {
        QueueExchangeClient {
            batches: Mutex::new(batches.into_iter().collect()),
        }
    }
}

impl ExchangeClient for QueueExchangeClient {
    fn poll_batch(&self) -> Result<ExchangePoll> {
        match self.batches.lock().pop_front() {
            Some(batch) => Ok(ExchangePoll::Batch(batch)),
            None => Ok(ExchangePoll::Finished),
        }
    }
}

/// Output buffer recording enqueued batches per partition.
#[derive(Debug)]
pub(crate) struct TestOutputBuffer {
    partitions: usize,
    pub received: Mutex<Vec<(usize, RecordBatch)>>,
    pub done: Mutex<bool>,
}

impl TestOutputBuffer {
    pub fn new(partitions: usize) -> Self {
        TestOutputBuffer {
            partitions,
            received: Mutex::new(Vec::new()),
            done: Mutex::new(false),
        }
    }
}

impl OutputBuffer for TestOutputBuffer {
    fn num_partitions(&self) -> usize {
        self.partitions
    }

    fn enqueue(&self, partition: usize, batch: RecordBatch) -> Result<()> {
        self.received.lock().push((partition, batch));
        Ok(())
    }

    fn no_more_data(&self) -> Result<()> {
        *self.done.lock() = true;
        Ok(())
    }
}
