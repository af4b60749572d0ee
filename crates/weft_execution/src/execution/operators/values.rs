use std::collections::VecDeque;

use arrow::record_batch::RecordBatch;
use weft_error::{Result, WeftError};

use crate::plan::nodes::ValuesNode;

use super::Operator;

/// Source operator emitting literal batches from the plan.
#[derive(Debug)]
pub struct ValuesOperator {
    operator_id: usize,
    batches: VecDeque<RecordBatch>,
}

impl ValuesOperator {
    pub fn new(operator_id: usize, node: &ValuesNode) -> Self {
        ValuesOperator {
            operator_id,
            batches: node.batches.iter().cloned().collect(),
        }
    }
}

impl Operator for ValuesOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "Values"
    }

    fn needs_input(&self) -> bool {
        false
    }

    fn add_input(&mut self, _input: RecordBatch) -> Result<()> {
        Err(WeftError::new("Cannot push input to a Values operator"))
    }

    fn no_more_input(&mut self) -> Result<()> {
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<RecordBatch>> {
        Ok(self.batches.pop_front())
    }

    fn is_finished(&self) -> bool {
        self.batches.is_empty()
    }
}
