use std::fmt::Debug;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use weft_error::{Result, WeftError};

use crate::plan::nodes::{PartitionedOutputNode, Partitioning, SortField};
use crate::task::OutputBuffer;

use super::util::hash_partition;
use super::{BlockedReason, Operator};

/// Result of polling an exchange client for the next batch.
#[derive(Debug)]
pub enum ExchangePoll {
    /// A batch is ready.
    Batch(RecordBatch),

    /// Nothing ready right now; poll again later.
    Pending,

    /// All remote producers are exhausted.
    Finished,
}

/// Transport pulling shuffled batches from other workers.
///
/// The implementation (buffering, flow control, serialization) lives outside
/// this crate.
pub trait ExchangeClient: Debug + Send + Sync {
    fn poll_batch(&self) -> Result<ExchangePoll>;
}

/// Source operator reading from an exchange client.
#[derive(Debug)]
pub struct ExchangeOperator {
    operator_id: usize,
    client: Arc<dyn ExchangeClient>,
    pending: bool,
    finished: bool,
}

impl ExchangeOperator {
    pub fn new(operator_id: usize, client: Arc<dyn ExchangeClient>) -> Self {
        ExchangeOperator {
            operator_id,
            client,
            pending: false,
            finished: false,
        }
    }
}

impl Operator for ExchangeOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "Exchange"
    }

    fn needs_input(&self) -> bool {
        false
    }

    fn add_input(&mut self, _input: RecordBatch) -> Result<()> {
        Err(WeftError::new("Cannot push input to an Exchange operator"))
    }

    fn no_more_input(&mut self) -> Result<()> {
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<RecordBatch>> {
        match self.client.poll_batch()? {
            ExchangePoll::Batch(batch) => {
                self.pending = false;
                Ok(Some(batch))
            }
            ExchangePoll::Pending => {
                self.pending = true;
                Ok(None)
            }
            ExchangePoll::Finished => {
                self.pending = false;
                self.finished = true;
                Ok(None)
            }
        }
    }

    fn blocked(&self) -> Option<BlockedReason> {
        if self.pending {
            Some(BlockedReason::WaitForExchange)
        } else {
            None
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Source operator reading sorted streams from an exchange client.
///
/// The client is responsible for merging its remote streams on the sort
/// fields; batches arrive here already in order.
#[derive(Debug)]
pub struct MergeExchangeOperator {
    operator_id: usize,
    fields: Vec<SortField>,
    client: Arc<dyn ExchangeClient>,
    pending: bool,
    finished: bool,
}

impl MergeExchangeOperator {
    pub fn new(operator_id: usize, fields: Vec<SortField>, client: Arc<dyn ExchangeClient>) -> Self {
        MergeExchangeOperator {
            operator_id,
            fields,
            client,
            pending: false,
            finished: false,
        }
    }

    pub fn sort_fields(&self) -> &[SortField] {
        &self.fields
    }
}

impl Operator for MergeExchangeOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "MergeExchange"
    }

    fn needs_input(&self) -> bool {
        false
    }

    fn add_input(&mut self, _input: RecordBatch) -> Result<()> {
        Err(WeftError::new("Cannot push input to a MergeExchange operator"))
    }

    fn no_more_input(&mut self) -> Result<()> {
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<RecordBatch>> {
        match self.client.poll_batch()? {
            ExchangePoll::Batch(batch) => {
                self.pending = false;
                Ok(Some(batch))
            }
            ExchangePoll::Pending => {
                self.pending = true;
                Ok(None)
            }
            ExchangePoll::Finished => {
                self.pending = false;
                self.finished = true;
                Ok(None)
            }
        }
    }

    fn blocked(&self) -> Option<BlockedReason> {
        if self.pending {
            Some(BlockedReason::WaitForExchange)
        } else {
            None
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Sink routing output batches into the task's output buffer, partitioned
/// for remote consumers.
#[derive(Debug)]
pub struct PartitionedOutputOperator {
    operator_id: usize,
    buffer: Arc<dyn OutputBuffer>,
    partitioning: Partitioning,
    next_partition: usize,
    finished: bool,
}

impl PartitionedOutputOperator {
    pub fn new(
        operator_id: usize,
        node: &PartitionedOutputNode,
        buffer: Arc<dyn OutputBuffer>,
    ) -> Self {
        PartitionedOutputOperator {
            operator_id,
            buffer,
            partitioning: node.partitioning.clone(),
            next_partition: 0,
            finished: false,
        }
    }
}

impl Operator for PartitionedOutputOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "PartitionedOutput"
    }

    fn needs_input(&self) -> bool {
        !self.finished
    }

    fn add_input(&mut self, input: RecordBatch) -> Result<()> {
        match &self.partitioning {
            Partitioning::RoundRobin => {
                self.buffer.enqueue(self.next_partition, input)?;
                self.next_partition = (self.next_partition + 1) % self.buffer.num_partitions();
            }
            Partitioning::Hash(keys) => {
                for (partition, batch) in
                    hash_partition(&input, keys, self.buffer.num_partitions())?
                {
                    self.buffer.enqueue(partition, batch)?;
                }
            }
        }
        Ok(())
    }

    fn no_more_input(&mut self) -> Result<()> {
        self.buffer.no_more_data()?;
        self.finished = true;
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<RecordBatch>> {
        Ok(None)
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}
