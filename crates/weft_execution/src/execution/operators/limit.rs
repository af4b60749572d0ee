use arrow::record_batch::RecordBatch;
use weft_error::Result;

use crate::plan::nodes::LimitNode;

use super::Operator;

/// Operator for LIMIT and OFFSET.
///
/// Limit and offset apply per driver. A global limit is obtained by capping
/// the pipeline to a single driver, which the planner does for non-partial
/// limits.
#[derive(Debug)]
pub struct LimitOperator {
    operator_id: usize,

    /// Remaining offset before rows start flowing.
    remaining_offset: usize,

    /// Remaining number of rows before output stops.
    remaining_count: usize,

    buffer: Option<RecordBatch>,

    input_done: bool,
}

impl LimitOperator {
    pub fn new(operator_id: usize, node: &LimitNode) -> Self {
        LimitOperator {
            operator_id,
            remaining_offset: node.offset,
            remaining_count: node.count,
            buffer: None,
            input_done: false,
        }
    }
}

impl Operator for LimitOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "Limit"
    }

    fn needs_input(&self) -> bool {
        self.buffer.is_none() && !self.input_done && self.remaining_count > 0
    }

    fn add_input(&mut self, batch: RecordBatch) -> Result<()> {
        if self.remaining_count == 0 {
            return Ok(());
        }

        let batch = if self.remaining_offset >= batch.num_rows() {
            // Discard the whole batch and keep asking for more input.
            self.remaining_offset -= batch.num_rows();
            return Ok(());
        } else if self.remaining_offset > 0 {
            let len = std::cmp::min(
                batch.num_rows() - self.remaining_offset,
                self.remaining_count,
            );
            let batch = batch.slice(self.remaining_offset, len);
            self.remaining_offset = 0;
            batch
        } else if self.remaining_count < batch.num_rows() {
            batch.slice(0, self.remaining_count)
        } else {
            batch
        };

        self.remaining_count -= batch.num_rows();
        self.buffer = Some(batch);
        Ok(())
    }

    fn no_more_input(&mut self) -> Result<()> {
        self.input_done = true;
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<RecordBatch>> {
        Ok(self.buffer.take())
    }

    fn is_finished(&self) -> bool {
        self.buffer.is_none() && (self.input_done || self.remaining_count == 0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Array, Int32Array};
    use arrow::datatypes::{DataType, Field, Schema};

    use super::*;

    fn test_batch(values: Vec<i32>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values))]).unwrap()
    }

    fn limit_node(offset: usize, count: usize) -> LimitNode {
        LimitNode {
            count,
            offset,
            partial: false,
        }
    }

    #[test]
    fn limit_truncates_batch() {
        let mut op = LimitOperator::new(0, &limit_node(0, 2));
        op.add_input(test_batch(vec![1, 2, 3, 4])).unwrap();

        let out = op.get_output().unwrap().unwrap();
        assert_eq!(2, out.num_rows());
        assert!(op.is_finished());
    }

    #[test]
    fn offset_skips_whole_batch() {
        let mut op = LimitOperator::new(0, &limit_node(4, 2));
        op.add_input(test_batch(vec![1, 2, 3])).unwrap();
        assert!(op.get_output().unwrap().is_none());
        assert!(op.needs_input());

        op.add_input(test_batch(vec![4, 5, 6])).unwrap();
        let out = op.get_output().unwrap().unwrap();
        assert_eq!(2, out.num_rows());
        let expected: Int32Array = vec![5, 6].into();
        assert_eq!(
            &expected,
            out.column(0).as_any().downcast_ref::<Int32Array>().unwrap()
        );
    }

    #[test]
    fn offset_splits_batch() {
        let mut op = LimitOperator::new(0, &limit_node(1, 10));
        op.add_input(test_batch(vec![1, 2, 3])).unwrap();

        let out = op.get_output().unwrap().unwrap();
        assert_eq!(2, out.num_rows());
        assert!(!op.is_finished());

        op.no_more_input().unwrap();
        assert!(op.is_finished());
    }
}
