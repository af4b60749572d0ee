use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arrow::array::UInt64Array;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use weft_error::{Result, ResultExt, WeftError};

use crate::plan::nodes::AssignUniqueIdNode;

use super::Operator;

/// Bits of the unique id reserved for the per-task row number; the task
/// unique id occupies the bits above.
const ROW_NUMBER_BITS: u32 = 40;
const MAX_ROW_NUMBER: u64 = (1 << ROW_NUMBER_BITS) - 1;
const MAX_TASK_UNIQUE_ID: u64 = (1 << 24) - 1;

/// Appends a unique id column composed of the task unique id and a counter
/// shared by all drivers of the plan.
#[derive(Debug)]
pub struct AssignUniqueIdOperator {
    operator_id: usize,
    task_unique_id: u64,
    counter: Arc<AtomicU64>,
    buffered: Option<RecordBatch>,
    input_done: bool,
}

impl AssignUniqueIdOperator {
    pub fn try_new(operator_id: usize, node: &AssignUniqueIdNode) -> Result<Self> {
        if node.task_unique_id > MAX_TASK_UNIQUE_ID {
            return Err(WeftError::new(format!(
                "Task unique id {} exceeds {MAX_TASK_UNIQUE_ID}",
                node.task_unique_id
            )));
        }
        Ok(AssignUniqueIdOperator {
            operator_id,
            task_unique_id: node.task_unique_id,
            counter: node.unique_id_counter.clone(),
            buffered: None,
            input_done: false,
        })
    }
}

impl Operator for AssignUniqueIdOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "AssignUniqueId"
    }

    fn needs_input(&self) -> bool {
        self.buffered.is_none() && !self.input_done
    }

    fn add_input(&mut self, input: RecordBatch) -> Result<()> {
        let rows = input.num_rows() as u64;
        let start = self.counter.fetch_add(rows, Ordering::Relaxed);
        if start + rows > MAX_ROW_NUMBER {
            return Err(WeftError::new("Ran out of unique row ids for task"));
        }

        let ids: UInt64Array = (0..rows)
            .map(|i| (self.task_unique_id << ROW_NUMBER_BITS) | (start + i))
            .collect::<Vec<_>>()
            .into();

        let mut fields: Vec<Field> = input
            .schema()
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect();
        fields.push(Field::new("unique_id", DataType::UInt64, false));
        let mut columns = input.columns().to_vec();
        columns.push(Arc::new(ids));

        self.buffered = Some(
            RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
                .context("failed to append unique id column")?,
        );
        Ok(())
    }

    fn no_more_input(&mut self) -> Result<()> {
        self.input_done = true;
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<RecordBatch>> {
        Ok(self.buffered.take())
    }

    fn is_finished(&self) -> bool {
        self.input_done && self.buffered.is_none()
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::{Array, Int32Array};

    use super::*;

    fn test_batch(values: Vec<i32>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values))]).unwrap()
    }

    fn test_node(task_unique_id: u64) -> AssignUniqueIdNode {
        AssignUniqueIdNode {
            task_unique_id,
            unique_id_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    #[test]
    fn ids_are_dense_and_prefixed() {
        let node = test_node(3);
        let mut op = AssignUniqueIdOperator::try_new(0, &node).unwrap();

        op.add_input(test_batch(vec![10, 20])).unwrap();
        let out = op.get_output().unwrap().unwrap();
        let ids = out.column(1).as_any().downcast_ref::<UInt64Array>().unwrap();
        assert_eq!((3 << ROW_NUMBER_BITS), ids.value(0));
        assert_eq!((3 << ROW_NUMBER_BITS) | 1, ids.value(1));

        // Counter is shared across batches.
        op.add_input(test_batch(vec![30])).unwrap();
        let out = op.get_output().unwrap().unwrap();
        let ids = out.column(1).as_any().downcast_ref::<UInt64Array>().unwrap();
        assert_eq!((3 << ROW_NUMBER_BITS) | 2, ids.value(0));
    }

    #[test]
    fn rejects_oversized_task_unique_id() {
        let node = test_node(MAX_TASK_UNIQUE_ID + 1);
        AssignUniqueIdOperator::try_new(0, &node).unwrap_err();
    }
}
