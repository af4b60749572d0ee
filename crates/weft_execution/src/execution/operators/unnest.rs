use std::sync::Arc;

use arrow::array::{Array, ListArray, UInt32Array};
use arrow::compute::take;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use weft_error::{Result, ResultExt, WeftError};

use crate::plan::nodes::UnnestNode;

use super::Operator;

/// Expands a list column into one row per element, replicating the
/// configured columns onto every produced row. Null and empty lists produce
/// no rows.
#[derive(Debug)]
pub struct UnnestOperator {
    operator_id: usize,
    replicated_columns: Vec<usize>,
    list_column: usize,
    buffered: Option<RecordBatch>,
    input_done: bool,
}

impl UnnestOperator {
    pub fn new(operator_id: usize, node: &UnnestNode) -> Self {
        UnnestOperator {
            operator_id,
            replicated_columns: node.replicated_columns.clone(),
            list_column: node.list_column,
            buffered: None,
            input_done: false,
        }
    }

    fn apply(&self, batch: &RecordBatch) -> Result<Option<RecordBatch>> {
        if self.list_column >= batch.num_columns() {
            return Err(WeftError::new(format!(
                "Unnest column @{} out of bounds for batch with {} columns",
                self.list_column,
                batch.num_columns()
            )));
        }
        let list = batch
            .column(self.list_column)
            .as_any()
            .downcast_ref::<ListArray>()
            .ok_or_else(|| {
                WeftError::new(format!(
                    "Unnest column @{} is not a list array",
                    self.list_column
                ))
            })?;

        let offsets = list.value_offsets();
        let mut replicate_indices = Vec::new();
        let mut value_indices = Vec::new();
        for row in 0..batch.num_rows() {
            if list.is_null(row) {
                continue;
            }
            for value in offsets[row]..offsets[row + 1] {
                replicate_indices.push(row as u32);
                value_indices.push(value as u32);
            }
        }

        if value_indices.is_empty() {
            return Ok(None);
        }
        let replicate_indices = UInt32Array::from(replicate_indices);
        let value_indices = UInt32Array::from(value_indices);

        let element_field = match batch.schema().field(self.list_column).data_type() {
            DataType::List(field) => field.as_ref().clone(),
            other => {
                return Err(WeftError::new(format!(
                    "Unnest column @{} has unexpected type {other}",
                    self.list_column
                )))
            }
        };

        let mut fields = Vec::with_capacity(self.replicated_columns.len() + 1);
        let mut columns = Vec::with_capacity(self.replicated_columns.len() + 1);
        for &idx in &self.replicated_columns {
            if idx >= batch.num_columns() {
                return Err(WeftError::new(format!(
                    "Replicated column @{idx} out of bounds for batch with {} columns",
                    batch.num_columns()
                )));
            }
            fields.push(batch.schema().field(idx).clone());
            columns.push(
                take(batch.column(idx).as_ref(), &replicate_indices, None)
                    .context("failed to replicate columns")?,
            );
        }
        fields.push(element_field);
        columns.push(
            take(list.values().as_ref(), &value_indices, None)
                .context("failed to flatten list values")?,
        );

        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
            .context("failed to build unnested batch")?;
        Ok(Some(batch))
    }
}

impl Operator for UnnestOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "Unnest"
    }

    fn needs_input(&self) -> bool {
        self.buffered.is_none() && !self.input_done
    }

    fn add_input(&mut self, input: RecordBatch) -> Result<()> {
        self.buffered = self.apply(&input)?;
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
