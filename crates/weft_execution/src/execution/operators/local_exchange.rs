use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use weft_error::{Result, WeftError};

use crate::plan::nodes::{LocalPartitionNode, Partitioning};
use crate::task::LocalExchange;

use super::util::hash_partition;
use super::{BlockedReason, Operator};

/// Sink side of a local partition: routes batches into the exchange queues
/// read by the consuming pipeline's drivers.
#[derive(Debug)]
pub struct LocalPartitionSinkOperator {
    operator_id: usize,
    exchange: Arc<LocalExchange>,
    partitioning: Partitioning,
    finished: bool,
}

impl LocalPartitionSinkOperator {
    pub fn new(operator_id: usize, node: &LocalPartitionNode, exchange: Arc<LocalExchange>) -> Self {
        exchange.register_producer();
        LocalPartitionSinkOperator {
            operator_id,
            exchange,
            partitioning: node.partitioning.clone(),
            finished: false,
        }
    }
}

impl Operator for LocalPartitionSinkOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "LocalPartitionSink"
    }

    fn needs_input(&self) -> bool {
        !self.finished
    }

    fn add_input(&mut self, input: RecordBatch) -> Result<()> {
        match &self.partitioning {
            Partitioning::RoundRobin => self.exchange.push(None, input),
            Partitioning::Hash(keys) => {
                let num_queues = self.exchange.num_queues();
                if num_queues == 0 {
                    return Err(WeftError::new(
                        "Local exchange has not been sized for its consumers",
                    ));
                }
                for (queue, batch) in hash_partition(&input, keys, num_queues)? {
                    self.exchange.push(Some(queue), batch)?;
                }
                Ok(())
            }
        }
    }

    fn no_more_input(&mut self) -> Result<()> {
        self.exchange.finish_producer();
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

/// Source side of a local partition: reads this driver's queue of the
/// exchange.
#[derive(Debug)]
pub struct LocalExchangeSourceOperator {
    operator_id: usize,
    exchange: Arc<LocalExchange>,
    consumer: usize,
    schema: SchemaRef,
    finished: bool,
}

impl LocalExchangeSourceOperator {
    pub fn new(
        operator_id: usize,
        node: &LocalPartitionNode,
        exchange: Arc<LocalExchange>,
        consumer: usize,
    ) -> Self {
        LocalExchangeSourceOperator {
            operator_id,
            exchange,
            consumer,
            schema: node.schema.clone(),
            finished: false,
        }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }
}

impl Operator for LocalExchangeSourceOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "LocalExchangeSource"
    }

    fn needs_input(&self) -> bool {
        false
    }

    fn add_input(&mut self, _input: RecordBatch) -> Result<()> {
        Err(WeftError::new(
            "Cannot push input to a LocalExchangeSource operator",
        ))
    }

    fn no_more_input(&mut self) -> Result<()> {
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<RecordBatch>> {
        if let Some(batch) = self.exchange.poll_batch(self.consumer)? {
            return Ok(Some(batch));
        }
        if self.exchange.is_finished(self.consumer) {
            self.finished = true;
        }
        Ok(None)
    }

    fn blocked(&self) -> Option<BlockedReason> {
        if !self.finished
            && !self.exchange.has_pending(self.consumer)
            && !self.exchange.is_finished(self.consumer)
        {
            Some(BlockedReason::WaitForProducers)
        } else {
            None
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, Schema};

    use crate::plan::PlanNodeId;
    use crate::task::Task;

    use super::*;

    fn test_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]))
    }

    fn test_batch(values: Vec<i32>) -> RecordBatch {
        RecordBatch::try_new(test_schema(), vec![Arc::new(Int32Array::from(values))]).unwrap()
    }

    fn partition_node(partitioning: Partitioning) -> LocalPartitionNode {
        LocalPartitionNode {
            partitioning,
            schema: test_schema(),
        }
    }

    #[test]
    fn round_trip_through_exchange() {
        let task = Task::new();
        let exchange = task.local_exchange(&PlanNodeId::from("1"));
        exchange.ensure_queues(2).unwrap();

        let node = partition_node(Partitioning::RoundRobin);
        let mut sink = LocalPartitionSinkOperator::new(2, &node, exchange.clone());
        let mut source_a = LocalExchangeSourceOperator::new(0, &node, exchange.clone(), 0);
        let mut source_b = LocalExchangeSourceOperator::new(0, &node, exchange, 1);

        assert_eq!(Some(BlockedReason::WaitForProducers), source_a.blocked());

        sink.add_input(test_batch(vec![1, 2])).unwrap();
        sink.add_input(test_batch(vec![3])).unwrap();
        sink.no_more_input().unwrap();

        assert!(source_a.blocked().is_none());
        assert_eq!(2, source_a.get_output().unwrap().unwrap().num_rows());
        assert_eq!(1, source_b.get_output().unwrap().unwrap().num_rows());

        assert!(source_a.get_output().unwrap().is_none());
        assert!(source_a.is_finished());
        assert!(source_b.get_output().unwrap().is_none());
        assert!(source_b.is_finished());
    }

    #[test]
    fn hash_partitioning_routes_equal_keys_together() {
        let task = Task::new();
        let exchange = task.local_exchange(&PlanNodeId::from("1"));
        exchange.ensure_queues(2).unwrap();

        let node = partition_node(Partitioning::Hash(vec![0]));
        let mut sink = LocalPartitionSinkOperator::new(2, &node, exchange.clone());
        sink.add_input(test_batch(vec![7, 7, 7])).unwrap();
        sink.no_more_input().unwrap();

        let counts: Vec<usize> = (0..2)
            .map(|consumer| {
                let mut rows = 0;
                while let Some(batch) = exchange.poll_batch(consumer).unwrap() {
                    rows += batch.num_rows();
                }
                rows
            })
            .collect();
        assert!(counts.contains(&3), "{counts:?}");
        assert!(counts.contains(&0), "{counts:?}");
    }
}
