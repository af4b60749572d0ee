use arrow::record_batch::RecordBatch;
use weft_error::{Result, WeftError};

use crate::plan::connector::DataSource;

use super::Operator;

/// Source operator reading from a connector data source.
#[derive(Debug)]
pub struct TableScanOperator {
    operator_id: usize,
    source: Box<dyn DataSource>,
    finished: bool,
}

impl TableScanOperator {
    pub fn new(operator_id: usize, source: Box<dyn DataSource>) -> Self {
        TableScanOperator {
            operator_id,
            source,
            finished: false,
        }
    }
}

impl Operator for TableScanOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "TableScan"
    }

    fn needs_input(&self) -> bool {
        false
    }

    fn add_input(&mut self, _input: RecordBatch) -> Result<()> {
        Err(WeftError::new("Cannot push input to a TableScan operator"))
    }

    fn no_more_input(&mut self) -> Result<()> {
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<RecordBatch>> {
        if self.finished {
            return Ok(None);
        }
        match self.source.next_batch()? {
            Some(batch) => Ok(Some(batch)),
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}
