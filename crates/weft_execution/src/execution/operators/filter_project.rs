use std::sync::Arc;

use arrow::array::{Array, BooleanArray};
use arrow::compute::filter_record_batch;
use arrow::datatypes::{Field, Schema};
use arrow::record_batch::RecordBatch;
use weft_error::{Result, ResultExt, WeftError};

use crate::expr::physical::PhysicalExpr;

use super::Operator;

/// Combined filter and projection.
///
/// A filter immediately followed by a projection in the plan fuses into one
/// instance carrying both. A lone filter or lone projection gets an instance
/// with the other part absent; at least one part is always present.
#[derive(Debug)]
pub struct FilterProjectOperator {
    operator_id: usize,
    filter: Option<Arc<dyn PhysicalExpr>>,
    projections: Option<Vec<Arc<dyn PhysicalExpr>>>,
    buffered: Option<RecordBatch>,
    input_done: bool,
}

impl FilterProjectOperator {
    pub fn try_new(
        operator_id: usize,
        filter: Option<Arc<dyn PhysicalExpr>>,
        projections: Option<Vec<Arc<dyn PhysicalExpr>>>,
    ) -> Result<Self> {
        if filter.is_none() && projections.is_none() {
            return Err(WeftError::new(
                "Filter project operator requires a filter, projections, or both",
            ));
        }
        Ok(FilterProjectOperator {
            operator_id,
            filter,
            projections,
            buffered: None,
            input_done: false,
        })
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    pub fn has_projections(&self) -> bool {
        self.projections.is_some()
    }

    fn apply(&self, batch: RecordBatch) -> Result<Option<RecordBatch>> {
        let batch = match &self.filter {
            Some(predicate) => {
                let selection = predicate.eval(&batch)?;
                let selection = selection
                    .as_any()
                    .downcast_ref::<BooleanArray>()
                    .ok_or_else(|| {
                        WeftError::new(format!(
                            "Filter predicate {predicate} did not evaluate to a boolean array"
                        ))
                    })?;
                filter_record_batch(&batch, selection).context("failed to apply filter")?
            }
            None => batch,
        };

        if batch.num_rows() == 0 {
            return Ok(None);
        }

        match &self.projections {
            Some(exprs) => {
                let mut fields = Vec::with_capacity(exprs.len());
                let mut columns = Vec::with_capacity(exprs.len());
                for expr in exprs {
                    let column = expr.eval(&batch)?;
                    fields.push(Field::new(
                        expr.to_string(),
                        column.data_type().clone(),
                        true,
                    ));
                    columns.push(column);
                }
                let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
                    .context("failed to build projected batch")?;
                Ok(Some(batch))
            }
            None => Ok(Some(batch)),
        }
    }
}

impl Operator for FilterProjectOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "FilterProject"
    }

    fn needs_input(&self) -> bool {
        self.buffered.is_none() && !self.input_done
    }

    fn add_input(&mut self, input: RecordBatch) -> Result<()> {
        if self.buffered.is_some() {
            return Err(WeftError::new(
                "Filter project operator already buffering output",
            ));
        }
        self.buffered = self.apply(input)?;
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
    use arrow::array::{BooleanArray, Int32Array};
    use arrow::datatypes::DataType;

    use crate::expr::physical::PhysicalColumnExpr;

    use super::*;

    fn test_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int32, true),
            Field::new("keep", DataType::Boolean, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![1, 2, 3, 4])),
                Arc::new(BooleanArray::from(vec![true, false, true, false])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn requires_filter_or_projections() {
        FilterProjectOperator::try_new(0, None, None).unwrap_err();
    }

    #[test]
    fn filter_only() {
        let mut op =
            FilterProjectOperator::try_new(0, Some(Arc::new(PhysicalColumnExpr::new(1))), None)
                .unwrap();
        op.add_input(test_batch()).unwrap();

        let out = op.get_output().unwrap().unwrap();
        assert_eq!(2, out.num_rows());
        let expected: Int32Array = vec![1, 3].into();
        assert_eq!(
            &expected,
            out.column(0).as_any().downcast_ref::<Int32Array>().unwrap()
        );
    }

    #[test]
    fn filter_and_project() {
        let projections: Vec<Arc<dyn PhysicalExpr>> = vec![Arc::new(PhysicalColumnExpr::new(0))];
        let mut op = FilterProjectOperator::try_new(
            0,
            Some(Arc::new(PhysicalColumnExpr::new(1))),
            Some(projections),
        )
        .unwrap();
        op.add_input(test_batch()).unwrap();

        let out = op.get_output().unwrap().unwrap();
        assert_eq!(2, out.num_rows());
        assert_eq!(1, out.num_columns());
        assert_eq!("@0", out.schema().field(0).name());
    }

    #[test]
    fn fully_filtered_batch_produces_nothing() {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "keep",
            DataType::Boolean,
            true,
        )]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(BooleanArray::from(vec![false, false]))],
        )
        .unwrap();

        let mut op =
            FilterProjectOperator::try_new(0, Some(Arc::new(PhysicalColumnExpr::new(0))), None)
                .unwrap();
        op.add_input(batch).unwrap();

        assert!(op.get_output().unwrap().is_none());
        assert!(op.needs_input());

        op.no_more_input().unwrap();
        assert!(op.is_finished());
    }
}
