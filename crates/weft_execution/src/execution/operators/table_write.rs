use std::sync::Arc;

use arrow::array::UInt64Array;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use weft_error::{Result, ResultExt};

use crate::plan::connector::ConnectorWriter;

use super::Operator;

/// Appends input to a connector writer, emitting a single row-count batch
/// once the write commits.
#[derive(Debug)]
pub struct TableWriterOperator {
    operator_id: usize,
    columns: Vec<usize>,
    writer: Box<dyn ConnectorWriter>,
    output: Option<RecordBatch>,
    input_done: bool,
}

impl TableWriterOperator {
    pub fn new(operator_id: usize, columns: Vec<usize>, writer: Box<dyn ConnectorWriter>) -> Self {
        TableWriterOperator {
            operator_id,
            columns,
            writer,
            output: None,
            input_done: false,
        }
    }
}

impl Operator for TableWriterOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "TableWriter"
    }

    fn needs_input(&self) -> bool {
        !self.input_done
    }

    fn add_input(&mut self, input: RecordBatch) -> Result<()> {
        let batch = input
            .project(&self.columns)
            .context("failed to project write columns")?;
        self.writer.append(batch)
    }

    fn no_more_input(&mut self) -> Result<()> {
        self.input_done = true;
        let rows = self.writer.finish()?;

        let schema = Arc::new(Schema::new(vec![Field::new(
            "rows",
            DataType::UInt64,
            false,
        )]));
        self.output = Some(
            RecordBatch::try_new(schema, vec![Arc::new(UInt64Array::from(vec![rows]))])
                .context("failed to build row count batch")?,
        );
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<RecordBatch>> {
        Ok(self.output.take())
    }

    fn is_finished(&self) -> bool {
        self.input_done && self.output.is_none()
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::{Array, Int32Array};
    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Default)]
    struct CountingWriter {
        rows: Mutex<u64>,
    }

    impl ConnectorWriter for CountingWriter {
        fn append(&mut self, batch: RecordBatch) -> Result<()> {
            *self.rows.lock() += batch.num_rows() as u64;
            Ok(())
        }

        fn finish(&mut self) -> Result<u64> {
            Ok(*self.rows.lock())
        }
    }

    #[test]
    fn writes_and_reports_row_count() {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int32Array::from(vec![1, 2, 3]))],
        )
        .unwrap();

        let mut op = TableWriterOperator::new(0, vec![0], Box::<CountingWriter>::default());
        op.add_input(batch).unwrap();
        op.no_more_input().unwrap();

        let out = op.get_output().unwrap().unwrap();
        assert_eq!(1, out.num_rows());
        let rows: UInt64Array = vec![3].into();
        assert_eq!(
            &rows,
            out.column(0).as_any().downcast_ref::<UInt64Array>().unwrap()
        );
        assert!(op.is_finished());
    }
}
