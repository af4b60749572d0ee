use arrow::compute::{lexsort_to_indices, SortColumn};
use arrow::record_batch::RecordBatch;
use weft_error::{Result, ResultExt, WeftError};

use crate::plan::nodes::{OrderByNode, SortField, TopNNode};

use super::util::{concat_record_batches, take_record_batch};
use super::Operator;

/// Sort a batch by the given fields, optionally keeping only the first
/// `limit` rows.
pub(crate) fn sort_batch(
    batch: &RecordBatch,
    fields: &[SortField],
    limit: Option<usize>,
) -> Result<RecordBatch> {
    let columns = fields
        .iter()
        .map(|field| {
            if field.column >= batch.num_columns() {
                return Err(WeftError::new(format!(
                    "Sort column @{} out of bounds for batch with {} columns",
                    field.column,
                    batch.num_columns()
                )));
            }
            Ok(SortColumn {
                values: batch.column(field.column).clone(),
                options: Some(field.sort_options()),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let indices = lexsort_to_indices(&columns, limit).context("failed to sort batch")?;
    take_record_batch(batch, &indices)
}

/// Accumulates all input, emits it sorted.
#[derive(Debug)]
pub struct OrderByOperator {
    operator_id: usize,
    fields: Vec<SortField>,
    buffered: Vec<RecordBatch>,
    output: Option<RecordBatch>,
    input_done: bool,
}

impl OrderByOperator {
    pub fn new(operator_id: usize, node: &OrderByNode) -> Self {
        OrderByOperator {
            operator_id,
            fields: node.fields.clone(),
            buffered: Vec::new(),
            output: None,
            input_done: false,
        }
    }
}

impl Operator for OrderByOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "OrderBy"
    }

    fn needs_input(&self) -> bool {
        !self.input_done
    }

    fn add_input(&mut self, input: RecordBatch) -> Result<()> {
        self.buffered.push(input);
        Ok(())
    }

    fn no_more_input(&mut self) -> Result<()> {
        self.input_done = true;
        if !self.buffered.is_empty() {
            let schema = self.buffered[0].schema();
            let all = concat_record_batches(&schema, &self.buffered)?;
            self.buffered.clear();
            self.output = Some(sort_batch(&all, &self.fields, None)?);
        }
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<RecordBatch>> {
        Ok(self.output.take())
    }

    fn is_finished(&self) -> bool {
        self.input_done && self.output.is_none()
    }
}

/// Accumulates all input, emits the top `count` rows by sort order.
#[derive(Debug)]
pub struct TopNOperator {
    operator_id: usize,
    fields: Vec<SortField>,
    count: usize,
    buffered: Vec<RecordBatch>,
    output: Option<RecordBatch>,
    input_done: bool,
}

impl TopNOperator {
    pub fn new(operator_id: usize, node: &TopNNode) -> Self {
        TopNOperator {
            operator_id,
            fields: node.fields.clone(),
            count: node.count,
            buffered: Vec::new(),
            output: None,
            input_done: false,
        }
    }
}

impl Operator for TopNOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "TopN"
    }

    fn needs_input(&self) -> bool {
        !self.input_done
    }

    fn add_input(&mut self, input: RecordBatch) -> Result<()> {
        self.buffered.push(input);
        Ok(())
    }

    fn no_more_input(&mut self) -> Result<()> {
        self.input_done = true;
        if !self.buffered.is_empty() {
            let schema = self.buffered[0].schema();
            let all = concat_record_batches(&schema, &self.buffered)?;
            self.buffered.clear();
            self.output = Some(sort_batch(&all, &self.fields, Some(self.count))?);
        }
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<RecordBatch>> {
        Ok(self.output.take())
    }

    fn is_finished(&self) -> bool {
        self.input_done && self.output.is_none()
    }
}
