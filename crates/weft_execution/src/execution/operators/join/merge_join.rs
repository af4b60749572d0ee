use std::cmp::Ordering;
use std::sync::Arc;

use arrow::array::UInt32Array;
use arrow::record_batch::RecordBatch;
use weft_error::{not_implemented, Result, ResultExt};

use crate::execution::operators::util::{
    concat_record_batches, concat_schemas, key_columns, row_converter_for, take_record_batch,
};
use crate::execution::operators::{BlockedReason, Operator};
use crate::plan::nodes::{JoinType, MergeJoinNode};
use crate::task::MergeJoinSource;

/// Merge join over two inputs sorted on their join keys.
///
/// The primary side arrives through the pipeline; the secondary side is
/// drained from the task's merge-join source, fed by the sink of its own
/// pipeline.
#[derive(Debug)]
pub struct MergeJoinOperator {
    operator_id: usize,
    left_keys: Vec<usize>,
    right_keys: Vec<usize>,
    source: Arc<MergeJoinSource>,
    left_batches: Vec<RecordBatch>,
    right_batches: Vec<RecordBatch>,
    output: Option<RecordBatch>,
    input_done: bool,
    merged: bool,
}

impl MergeJoinOperator {
    pub fn try_new(
        operator_id: usize,
        node: &MergeJoinNode,
        source: Arc<MergeJoinSource>,
    ) -> Result<Self> {
        if node.join_type != JoinType::Inner {
            not_implemented!("{} merge join", node.join_type);
        }
        Ok(MergeJoinOperator {
            operator_id,
            left_keys: node.left_keys.clone(),
            right_keys: node.right_keys.clone(),
            source,
            left_batches: Vec::new(),
            right_batches: Vec::new(),
            output: None,
            input_done: false,
            merged: false,
        })
    }

    fn drain_source(&mut self) {
        while let Some(batch) = self.source.poll_batch() {
            self.right_batches.push(batch);
        }
    }

    /// Inner merge over the fully buffered sides. Both inputs are sorted on
    /// their keys by contract.
    fn merge(&mut self) -> Result<Option<RecordBatch>> {
        if self.left_batches.is_empty() || self.right_batches.is_empty() {
            return Ok(None);
        }

        let left_schema = self.left_batches[0].schema();
        let left = concat_record_batches(&left_schema, &self.left_batches)?;
        let right_schema = self.right_batches[0].schema();
        let right = concat_record_batches(&right_schema, &self.right_batches)?;
        self.left_batches.clear();
        self.right_batches.clear();

        let left_columns = key_columns(&left, &self.left_keys, "Left")?;
        let right_columns = key_columns(&right, &self.right_keys, "Right")?;

        // One converter for both sides so the row encodings compare.
        let converter = row_converter_for(&left_columns)?;
        let left_rows = converter
            .convert_columns(&left_columns)
            .context("failed to convert left keys to rows")?;
        let right_rows = converter
            .convert_columns(&right_columns)
            .context("failed to convert right keys to rows")?;

        let mut left_indices = Vec::new();
        let mut right_indices = Vec::new();

        let (mut li, mut ri) = (0, 0);
        while li < left_rows.num_rows() && ri < right_rows.num_rows() {
            match left_rows.row(li).cmp(&right_rows.row(ri)) {
                Ordering::Less => li += 1,
                Ordering::Greater => ri += 1,
                Ordering::Equal => {
                    let mut left_end = li + 1;
                    while left_end < left_rows.num_rows()
                        && left_rows.row(left_end) == left_rows.row(li)
                    {
                        left_end += 1;
                    }
                    let mut right_end = ri + 1;
                    while right_end < right_rows.num_rows()
                        && right_rows.row(right_end) == right_rows.row(ri)
                    {
                        right_end += 1;
                    }
                    for l in li..left_end {
                        for r in ri..right_end {
                            left_indices.push(l as u32);
                            right_indices.push(r as u32);
                        }
                    }
                    li = left_end;
                    ri = right_end;
                }
            }
        }

        if left_indices.is_empty() {
            return Ok(None);
        }

        let left_side = take_record_batch(&left, &UInt32Array::from(left_indices))?;
        let right_side = take_record_batch(&right, &UInt32Array::from(right_indices))?;

        let schema = concat_schemas(&left_side.schema(), &right_side.schema());
        let columns = left_side
            .columns()
            .iter()
            .chain(right_side.columns().iter())
            .cloned()
            .collect();
        let joined =
            RecordBatch::try_new(schema, columns).context("failed to build joined batch")?;
        Ok(Some(joined))
    }
}

impl Operator for MergeJoinOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "MergeJoin"
    }

    fn needs_input(&self) -> bool {
        !self.input_done
    }

    fn add_input(&mut self, input: RecordBatch) -> Result<()> {
        self.left_batches.push(input);
        Ok(())
    }

    fn no_more_input(&mut self) -> Result<()> {
        self.input_done = true;
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<RecordBatch>> {
        if let Some(batch) = self.output.take() {
            return Ok(Some(batch));
        }
        self.drain_source();
        if self.input_done && self.source.producer_finished() && !self.merged {
            self.drain_source();
            self.merged = true;
            return self.merge();
        }
        Ok(None)
    }

    fn blocked(&self) -> Option<BlockedReason> {
        if self.input_done && !self.source.producer_finished() {
            Some(BlockedReason::WaitForProducers)
        } else {
            None
        }
    }

    fn is_finished(&self) -> bool {
        self.merged && self.output.is_none()
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::{Array, Int32Array};
    use arrow::datatypes::{DataType, Field, Schema};

    use super::*;

    fn test_batch(name: &str, values: Vec<i32>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new(name, DataType::Int32, true)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values))]).unwrap()
    }

    fn join_node() -> MergeJoinNode {
        MergeJoinNode {
            join_type: JoinType::Inner,
            left_keys: vec![0],
            right_keys: vec![0],
        }
    }

    #[test]
    fn merges_sorted_inputs() {
        let source = Arc::new(MergeJoinSource::default());
        let mut op = MergeJoinOperator::try_new(1, &join_node(), source.clone()).unwrap();

        op.add_input(test_batch("a", vec![1, 2, 2, 5])).unwrap();
        op.no_more_input().unwrap();
        assert_eq!(Some(BlockedReason::WaitForProducers), op.blocked());

        source.enqueue(test_batch("b", vec![2, 3, 5])).unwrap();
        source.finish();
        assert!(op.blocked().is_none());

        let out = op.get_output().unwrap().unwrap();
        // 2 matches twice on the left, 5 matches once.
        assert_eq!(3, out.num_rows());
        let left_col: Int32Array = vec![2, 2, 5].into();
        assert_eq!(
            &left_col,
            out.column(0).as_any().downcast_ref::<Int32Array>().unwrap()
        );

        assert!(op.get_output().unwrap().is_none());
        assert!(op.is_finished());
    }

    #[test]
    fn no_matches_finishes_empty() {
        let source = Arc::new(MergeJoinSource::default());
        let mut op = MergeJoinOperator::try_new(1, &join_node(), source.clone()).unwrap();

        op.add_input(test_batch("a", vec![1, 2])).unwrap();
        op.no_more_input().unwrap();
        source.enqueue(test_batch("b", vec![3, 4])).unwrap();
        source.finish();

        assert!(op.get_output().unwrap().is_none());
        assert!(op.is_finished());
    }
}
