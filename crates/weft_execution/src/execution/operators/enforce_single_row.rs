use arrow::array::new_null_array;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use weft_error::{Result, ResultExt, WeftError};

use crate::plan::nodes::EnforceSingleRowNode;

use super::Operator;

/// Enforces scalar-subquery semantics: at most one input row.
///
/// More than one row is an error. No rows yields a single all-null row so
/// downstream expressions still see a value. The null row is built from the
/// node's output schema; the upstream may finish without ever producing a
/// batch.
#[derive(Debug)]
pub struct EnforceSingleRowOperator {
    operator_id: usize,
    schema: SchemaRef,
    buffered: Option<RecordBatch>,
    rows_seen: usize,
    input_done: bool,
}

impl EnforceSingleRowOperator {
    pub fn new(operator_id: usize, node: &EnforceSingleRowNode) -> Self {
        EnforceSingleRowOperator {
            operator_id,
            schema: node.schema.clone(),
            buffered: None,
            rows_seen: 0,
            input_done: false,
        }
    }

    fn null_row(&self) -> Result<RecordBatch> {
        let columns = self
            .schema
            .fields()
            .iter()
            .map(|f| new_null_array(f.data_type(), 1))
            .collect();
        RecordBatch::try_new_with_options(
            self.schema.clone(),
            columns,
            &RecordBatchOptions::new().with_row_count(Some(1)),
        )
        .context("failed to build null row")
    }
}

impl Operator for EnforceSingleRowOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "EnforceSingleRow"
    }

    fn needs_input(&self) -> bool {
        !self.input_done
    }

    fn add_input(&mut self, input: RecordBatch) -> Result<()> {
        self.rows_seen += input.num_rows();
        if self.rows_seen > 1 {
            return Err(WeftError::new(format!(
                "Expected single row of input, received {} rows",
                self.rows_seen
            )));
        }
        if input.num_rows() == 1 {
            self.buffered = Some(input);
        }
        Ok(())
    }

    fn no_more_input(&mut self) -> Result<()> {
        self.input_done = true;
        if self.buffered.is_none() {
            self.buffered = Some(self.null_row()?);
        }
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<RecordBatch>> {
        Ok(self.buffered.take())
    }

    fn is_finished(&self) -> bool {
        self.input_done && self.buffered.is_none()
    }
}
