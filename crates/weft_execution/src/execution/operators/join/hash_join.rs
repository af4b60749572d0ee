use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::UInt32Array;
use arrow::record_batch::RecordBatch;
use arrow::row::RowConverter;
use smallvec::SmallVec;
use weft_error::{not_implemented, Result, ResultExt, WeftError};

use crate::execution::operators::util::{
    concat_record_batches, concat_schemas, key_columns, row_converter_for, take_record_batch,
};
use crate::execution::operators::{BlockedReason, Operator};
use crate::plan::nodes::{HashJoinNode, JoinType};
use crate::task::JoinBridge;

/// Sink collecting the build side of a hash join and publishing it through
/// the task's join bridge.
#[derive(Debug)]
pub struct HashBuildOperator {
    operator_id: usize,
    bridge: Arc<JoinBridge>,
    batches: Vec<RecordBatch>,
    finished: bool,
}

impl HashBuildOperator {
    pub fn new(operator_id: usize, bridge: Arc<JoinBridge>) -> Self {
        bridge.register_producer();
        HashBuildOperator {
            operator_id,
            bridge,
            batches: Vec::new(),
            finished: false,
        }
    }
}

impl Operator for HashBuildOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "HashBuild"
    }

    fn needs_input(&self) -> bool {
        !self.finished
    }

    fn add_input(&mut self, input: RecordBatch) -> Result<()> {
        self.batches.push(input);
        Ok(())
    }

    fn no_more_input(&mut self) -> Result<()> {
        self.bridge.publish(std::mem::take(&mut self.batches))?;
        self.finished = true;
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<RecordBatch>> {
        Ok(None)
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Key-indexed build side, materialized once the bridge resolves.
#[derive(Debug)]
enum BuildTable {
    /// Build side had no rows; an inner join emits nothing.
    Empty,
    Table {
        batch: RecordBatch,
        converter: RowConverter,
        index: HashMap<Box<[u8]>, SmallVec<[u32; 2]>, ahash::RandomState>,
    },
}

/// Probe side of a hash join.
///
/// Blocks until the build pipeline has published through the join bridge,
/// then streams probe batches, emitting probe columns followed by build
/// columns for every match.
#[derive(Debug)]
pub struct HashProbeOperator {
    operator_id: usize,
    left_keys: Vec<usize>,
    right_keys: Vec<usize>,
    bridge: Arc<JoinBridge>,
    table: Option<BuildTable>,
    output: Option<RecordBatch>,
    input_done: bool,
}

impl HashProbeOperator {
    pub fn try_new(
        operator_id: usize,
        node: &HashJoinNode,
        bridge: Arc<JoinBridge>,
    ) -> Result<Self> {
        if node.join_type != JoinType::Inner {
            not_implemented!("{} hash join", node.join_type);
        }
        if node.left_keys.is_empty() || node.left_keys.len() != node.right_keys.len() {
            return Err(WeftError::new(format!(
                "Mismatched hash join keys: {} probe side, {} build side",
                node.left_keys.len(),
                node.right_keys.len()
            )));
        }
        Ok(HashProbeOperator {
            operator_id,
            left_keys: node.left_keys.clone(),
            right_keys: node.right_keys.clone(),
            bridge,
            table: None,
            output: None,
            input_done: false,
        })
    }

    fn ensure_table(&mut self) -> Result<&BuildTable> {
        if self.table.is_none() {
            let batches = self
                .bridge
                .build_side()
                .ok_or_else(|| WeftError::new("Hash join build side not yet published"))?;

            let table = if batches.is_empty() || batches.iter().all(|b| b.num_rows() == 0) {
                BuildTable::Empty
            } else {
                let schema = batches[0].schema();
                let batch = concat_record_batches(&schema, &batches)?;
                let columns = key_columns(&batch, &self.right_keys, "Build")?;
                let converter = row_converter_for(&columns)?;
                let rows = converter
                    .convert_columns(&columns)
                    .context("failed to convert build keys to rows")?;

                let mut index: HashMap<Box<[u8]>, SmallVec<[u32; 2]>, ahash::RandomState> =
                    HashMap::default();
                for (row_idx, row) in rows.iter().enumerate() {
                    index.entry(row.as_ref().into()).or_default().push(row_idx as u32);
                }
                BuildTable::Table {
                    batch,
                    converter,
                    index,
                }
            };
            self.table = Some(table);
        }
        Ok(self.table.as_ref().unwrap())
    }

    fn probe(&mut self, input: RecordBatch) -> Result<Option<RecordBatch>> {
        let left_keys = self.left_keys.clone();
        let (build_batch, probe_indices, build_indices) = match self.ensure_table()? {
            BuildTable::Empty => return Ok(None),
            BuildTable::Table {
                batch,
                converter,
                index,
            } => {
                let columns = key_columns(&input, &left_keys, "Probe")?;
                let rows = converter
                    .convert_columns(&columns)
                    .context("failed to convert probe keys to rows")?;

                let mut probe_indices = Vec::new();
                let mut build_indices = Vec::new();
                for (probe_idx, row) in rows.iter().enumerate() {
                    if let Some(matches) = index.get(row.as_ref()) {
                        for &build_idx in matches {
                            probe_indices.push(probe_idx as u32);
                            build_indices.push(build_idx);
                        }
                    }
                }
                (batch.clone(), probe_indices, build_indices)
            }
        };

        if probe_indices.is_empty() {
            return Ok(None);
        }

        let probe_side = take_record_batch(&input, &UInt32Array::from(probe_indices))?;
        let build_side = take_record_batch(&build_batch, &UInt32Array::from(build_indices))?;

        let schema = concat_schemas(&probe_side.schema(), &build_side.schema());
        let columns = probe_side
            .columns()
            .iter()
            .chain(build_side.columns().iter())
            .cloned()
            .collect();
        let joined =
            RecordBatch::try_new(schema, columns).context("failed to build joined batch")?;
        Ok(Some(joined))
    }
}

impl Operator for HashProbeOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "HashProbe"
    }

    fn needs_input(&self) -> bool {
        self.output.is_none()
            && !self.input_done
            && (self.table.is_some() || self.bridge.build_side().is_some())
    }

    fn add_input(&mut self, input: RecordBatch) -> Result<()> {
        self.output = self.probe(input)?;
        Ok(())
    }

    fn no_more_input(&mut self) -> Result<()> {
        self.input_done = true;
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<RecordBatch>> {
        Ok(self.output.take())
    }

    fn blocked(&self) -> Option<BlockedReason> {
        if self.table.is_none() && self.bridge.build_side().is_none() {
            Some(BlockedReason::WaitForJoinBuild)
        } else {
            None
        }
    }

    fn is_finished(&self) -> bool {
        self.input_done && self.output.is_none()
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::{Array, Int32Array};
    use arrow::datatypes::{DataType, Field, Schema};

    use super::*;

    fn test_batch(name: &str, values: Vec<i32>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new(name, DataType::Int32, true)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values))]).unwrap()
    }

    fn join_node() -> HashJoinNode {
        HashJoinNode {
            join_type: JoinType::Inner,
            left_keys: vec![0],
            right_keys: vec![0],
        }
    }

    #[test]
    fn inner_join_matches() {
        let bridge = Arc::new(JoinBridge::default());

        let mut build = HashBuildOperator::new(1, bridge.clone());
        build.add_input(test_batch("b", vec![2, 3, 3])).unwrap();
        build.no_more_input().unwrap();
        assert!(build.is_finished());

        let mut probe = HashProbeOperator::try_new(1, &join_node(), bridge).unwrap();
        assert!(probe.blocked().is_none());
        probe.add_input(test_batch("a", vec![1, 2, 3])).unwrap();

        let out = probe.get_output().unwrap().unwrap();
        // 2 matches once, 3 matches twice.
        assert_eq!(3, out.num_rows());
        assert_eq!(2, out.num_columns());
        let probe_col: Int32Array = vec![2, 3, 3].into();
        assert_eq!(
            &probe_col,
            out.column(0).as_any().downcast_ref::<Int32Array>().unwrap()
        );
    }

    #[test]
    fn probe_blocks_until_build_published() {
        let bridge = Arc::new(JoinBridge::default());
        bridge.register_producer();

        let probe = HashProbeOperator::try_new(1, &join_node(), bridge.clone()).unwrap();
        assert_eq!(Some(BlockedReason::WaitForJoinBuild), probe.blocked());
        assert!(!probe.needs_input());

        bridge.publish(vec![test_batch("b", vec![1])]).unwrap();
        assert!(probe.blocked().is_none());
        assert!(probe.needs_input());
    }

    #[test]
    fn empty_build_side_emits_nothing() {
        let bridge = Arc::new(JoinBridge::default());
        let mut build = HashBuildOperator::new(1, bridge.clone());
        build.no_more_input().unwrap();

        let mut probe = HashProbeOperator::try_new(1, &join_node(), bridge).unwrap();
        probe.add_input(test_batch("a", vec![1, 2])).unwrap();
        assert!(probe.get_output().unwrap().is_none());

        probe.no_more_input().unwrap();
        assert!(probe.is_finished());
    }

    #[test]
    fn unsupported_join_type() {
        let node = HashJoinNode {
            join_type: JoinType::Left,
            left_keys: vec![0],
            right_keys: vec![0],
        };
        let err =
            HashProbeOperator::try_new(0, &node, Arc::new(JoinBridge::default())).unwrap_err();
        assert!(err.to_string().contains("Not yet implemented"), "{err}");
    }
}
