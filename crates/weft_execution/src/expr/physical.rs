use std::fmt::{self, Debug};

use arrow::array::ArrayRef;
use arrow::record_batch::RecordBatch;
use weft_error::{Result, WeftError};

/// A physical scalar expression evaluated against record batches.
///
/// Expression planning happens in the engine front-end; operators only need
/// to evaluate.
pub trait PhysicalExpr: Debug + fmt::Display + Send + Sync {
    fn eval(&self, batch: &RecordBatch) -> Result<ArrayRef>;
}

/// Expression picking a column out of a batch.
#[derive(Debug, Clone)]
pub struct PhysicalColumnExpr {
    pub idx: usize,
}

impl PhysicalColumnExpr {
    pub fn new(idx: usize) -> Self {
        PhysicalColumnExpr { idx }
    }
}

impl PhysicalExpr for PhysicalColumnExpr {
    fn eval(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        if self.idx >= batch.num_columns() {
            return Err(WeftError::new(format!(
                "Tried to get column at index {} in a batch with {} columns",
                self.idx,
                batch.num_columns()
            )));
        }
        Ok(batch.column(self.idx).clone())
    }
}

impl fmt::Display for PhysicalColumnExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.idx)
    }
}
