use std::fmt::Debug;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use weft_error::Result;

use super::Operator;

/// Receiver for batches leaving a pipeline.
///
/// Implemented by the task-side handoff structures (local-merge sources,
/// merge-join sources) and by whatever the caller supplies as the query's
/// final consumer.
pub trait BatchConsumer: Debug + Send + Sync {
    fn consume(&self, batch: RecordBatch) -> Result<()>;

    /// Called once, after the last batch.
    fn finish(&self) -> Result<()> {
        Ok(())
    }
}

/// Terminal sink forwarding every input batch to a consumer.
#[derive(Debug)]
pub struct CallbackSinkOperator {
    operator_id: usize,
    consumer: Arc<dyn BatchConsumer>,
    finished: bool,
}

impl CallbackSinkOperator {
    pub fn new(operator_id: usize, consumer: Arc<dyn BatchConsumer>) -> Self {
        CallbackSinkOperator {
            operator_id,
            consumer,
            finished: false,
        }
    }
}

impl Operator for CallbackSinkOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "CallbackSink"
    }

    fn needs_input(&self) -> bool {
        !self.finished
    }

    fn add_input(&mut self, input: RecordBatch) -> Result<()> {
        self.consumer.consume(input)
    }

    fn no_more_input(&mut self) -> Result<()> {
        self.consumer.finish()?;
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

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Default)]
    struct Collector {
        batches: Mutex<Vec<RecordBatch>>,
        finished: Mutex<bool>,
    }

    impl BatchConsumer for Collector {
        fn consume(&self, batch: RecordBatch) -> Result<()> {
            self.batches.lock().push(batch);
            Ok(())
        }

        fn finish(&self) -> Result<()> {
            *self.finished.lock() = true;
            Ok(())
        }
    }

    #[test]
    fn forwards_batches_and_finish() {
        use arrow::array::Int32Array;
        use arrow::datatypes::{DataType, Field, Schema};
        use std::sync::Arc;

        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(vec![1]))]).unwrap();

        let collector = Arc::new(Collector::default());
        let mut sink = CallbackSinkOperator::new(3, collector.clone());

        assert_eq!(3, sink.operator_id());
        assert!(sink.needs_input());

        sink.add_input(batch).unwrap();
        assert!(sink.get_output().unwrap().is_none());
        assert!(!sink.is_finished());

        sink.no_more_input().unwrap();
        assert!(sink.is_finished());
        assert_eq!(1, collector.batches.lock().len());
        assert!(*collector.finished.lock());
    }
}
