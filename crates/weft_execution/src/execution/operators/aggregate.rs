use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::UInt32Array;
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use arrow::row::{OwnedRow, RowConverter};
use weft_error::{Result, ResultExt};

use crate::plan::nodes::{AggregationNode, StreamingAggregationNode};

use super::util::{key_columns, row_converter_for, take_record_batch};
use super::Operator;

/// Schema of the grouping-key output columns.
fn group_schema(input: &SchemaRef, grouping_keys: &[usize]) -> SchemaRef {
    let fields: Vec<Field> = grouping_keys
        .iter()
        .map(|&key| input.field(key).clone())
        .collect();
    Arc::new(Schema::new(fields))
}

/// Single-row batch with no columns, the shape of a global aggregation's
/// output.
fn global_output() -> Result<RecordBatch> {
    use arrow::record_batch::RecordBatchOptions;
    RecordBatch::try_new_with_options(
        Arc::new(Schema::empty()),
        Vec::new(),
        &RecordBatchOptions::new().with_row_count(Some(1)),
    )
    .context("failed to build global aggregation output")
}

/// Hash aggregation over the grouping keys.
///
/// Grouping uses the normalized row encoding of the key columns. Aggregate
/// function evaluation is an expression-layer concern and plugs in above this
/// operator; the operator itself produces one output row per distinct group.
#[derive(Debug)]
pub struct HashAggregateOperator {
    operator_id: usize,
    grouping_keys: Vec<usize>,
    converter: Option<RowConverter>,
    seen: HashSet<Box<[u8]>>,
    groups: Vec<OwnedRow>,
    schema: Option<SchemaRef>,
    output: Option<RecordBatch>,
    input_done: bool,
}

impl HashAggregateOperator {
    pub fn new(operator_id: usize, node: &AggregationNode) -> Self {
        Self::with_keys(operator_id, node.grouping_keys.clone())
    }

    fn with_keys(operator_id: usize, grouping_keys: Vec<usize>) -> Self {
        HashAggregateOperator {
            operator_id,
            grouping_keys,
            converter: None,
            seen: HashSet::new(),
            groups: Vec::new(),
            schema: None,
            output: None,
            input_done: false,
        }
    }
}

impl Operator for HashAggregateOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "HashAggregate"
    }

    fn needs_input(&self) -> bool {
        !self.input_done
    }

    fn add_input(&mut self, input: RecordBatch) -> Result<()> {
        if self.grouping_keys.is_empty() {
            return Ok(());
        }

        let columns = key_columns(&input, &self.grouping_keys, "Grouping")?;
        if self.converter.is_none() {
            self.converter = Some(row_converter_for(&columns)?);
            self.schema = Some(group_schema(&input.schema(), &self.grouping_keys));
        }
        let converter = self.converter.as_ref().unwrap();

        let rows = converter
            .convert_columns(&columns)
            .context("failed to convert grouping keys to rows")?;
        for row in rows.iter() {
            if self.seen.insert(row.as_ref().into()) {
                self.groups.push(row.owned());
            }
        }
        Ok(())
    }

    fn no_more_input(&mut self) -> Result<()> {
        self.input_done = true;

        if self.grouping_keys.is_empty() {
            self.output = Some(global_output()?);
            return Ok(());
        }

        if let (Some(converter), Some(schema)) = (&self.converter, &self.schema) {
            let columns = converter
                .convert_rows(self.groups.iter().map(|r| r.row()))
                .context("failed to convert group rows back to columns")?;
            self.output = Some(
                RecordBatch::try_new(schema.clone(), columns)
                    .context("failed to build aggregation output")?,
            );
            self.groups.clear();
            self.seen.clear();
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

/// Aggregation over input clustered on the grouping keys.
///
/// Emits a group as soon as the key changes, so it holds at most one key's
/// worth of state instead of the whole table.
#[derive(Debug)]
pub struct StreamingAggregateOperator {
    operator_id: usize,
    grouping_keys: Vec<usize>,
    converter: Option<RowConverter>,
    last_key: Option<Box<[u8]>>,
    output: Option<RecordBatch>,
    input_done: bool,
}

impl StreamingAggregateOperator {
    pub fn new(operator_id: usize, node: &StreamingAggregationNode) -> Self {
        StreamingAggregateOperator {
            operator_id,
            grouping_keys: node.grouping_keys.clone(),
            converter: None,
            last_key: None,
            output: None,
            input_done: false,
        }
    }
}

impl Operator for StreamingAggregateOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "StreamingAggregate"
    }

    fn needs_input(&self) -> bool {
        self.output.is_none() && !self.input_done
    }

    fn add_input(&mut self, input: RecordBatch) -> Result<()> {
        if self.grouping_keys.is_empty() {
            return Ok(());
        }

        let columns = key_columns(&input, &self.grouping_keys, "Grouping")?;
        if self.converter.is_none() {
            self.converter = Some(row_converter_for(&columns)?);
        }
        let converter = self.converter.as_ref().unwrap();
        let rows = converter
            .convert_columns(&columns)
            .context("failed to convert grouping keys to rows")?;

        let mut boundaries = Vec::new();
        for (idx, row) in rows.iter().enumerate() {
            let changed = match &self.last_key {
                Some(last) => last.as_ref() != row.as_ref(),
                None => true,
            };
            if changed {
                boundaries.push(idx as u32);
                self.last_key = Some(row.as_ref().into());
            }
        }

        if !boundaries.is_empty() {
            let indices = UInt32Array::from(boundaries);
            let keys = take_record_batch(
                &input.project(&self.grouping_keys).context("failed to project grouping keys")?,
                &indices,
            )?;
            self.output = Some(keys);
        }
        Ok(())
    }

    fn no_more_input(&mut self) -> Result<()> {
        self.input_done = true;
        if self.grouping_keys.is_empty() {
            self.output = Some(global_output()?);
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

#[cfg(test)]
mod tests {
    use arrow::array::{Array, Int32Array};
    use arrow::datatypes::DataType;

    use crate::plan::nodes::AggregationStep;

    use super::*;

    fn test_batch(values: Vec<i32>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values))]).unwrap()
    }

    #[test]
    fn hash_aggregate_distinct_groups() {
        let node = AggregationNode {
            step: AggregationStep::Single,
            grouping_keys: vec![0],
        };
        let mut op = HashAggregateOperator::new(0, &node);

        op.add_input(test_batch(vec![1, 2, 1])).unwrap();
        op.add_input(test_batch(vec![2, 3])).unwrap();
        op.no_more_input().unwrap();

        let out = op.get_output().unwrap().unwrap();
        assert_eq!(3, out.num_rows());
        let expected: Int32Array = vec![1, 2, 3].into();
        assert_eq!(
            &expected,
            out.column(0).as_any().downcast_ref::<Int32Array>().unwrap()
        );
        assert!(op.is_finished());
    }

    #[test]
    fn global_aggregation_emits_one_row() {
        let node = AggregationNode {
            step: AggregationStep::Single,
            grouping_keys: Vec::new(),
        };
        let mut op = HashAggregateOperator::new(0, &node);
        op.no_more_input().unwrap();

        let out = op.get_output().unwrap().unwrap();
        assert_eq!(1, out.num_rows());
        assert_eq!(0, out.num_columns());
    }

    #[test]
    fn streaming_aggregate_emits_group_boundaries() {
        let node = StreamingAggregationNode {
            grouping_keys: vec![0],
        };
        let mut op = StreamingAggregateOperator::new(0, &node);

        op.add_input(test_batch(vec![1, 1, 2, 2, 2, 3])).unwrap();
        let out = op.get_output().unwrap().unwrap();
        let expected: Int32Array = vec![1, 2, 3].into();
        assert_eq!(
            &expected,
            out.column(0).as_any().downcast_ref::<Int32Array>().unwrap()
        );

        // A run continuing into the next batch is not re-emitted.
        op.add_input(test_batch(vec![3, 4])).unwrap();
        let out = op.get_output().unwrap().unwrap();
        let expected: Int32Array = vec![4].into();
        assert_eq!(
            &expected,
            out.column(0).as_any().downcast_ref::<Int32Array>().unwrap()
        );

        op.no_more_input().unwrap();
        assert!(op.is_finished());
    }
}
