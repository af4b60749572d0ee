use std::collections::VecDeque;
use std::sync::Arc;

use arrow::array::UInt32Array;
use arrow::record_batch::RecordBatch;
use weft_error::{Result, ResultExt, WeftError};

use crate::execution::operators::util::{concat_schemas, take_record_batch};
use crate::execution::operators::{BlockedReason, Operator};
use crate::task::JoinBridge;

/// Sink collecting the build side of a cross join.
#[derive(Debug)]
pub struct CrossJoinBuildOperator {
    operator_id: usize,
    bridge: Arc<JoinBridge>,
    batches: Vec<RecordBatch>,
    finished: bool,
}

impl CrossJoinBuildOperator {
    pub fn new(operator_id: usize, bridge: Arc<JoinBridge>) -> Self {
        bridge.register_producer();
        CrossJoinBuildOperator {
            operator_id,
            bridge,
            batches: Vec::new(),
            finished: false,
        }
    }
}

impl Operator for CrossJoinBuildOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "CrossJoinBuild"
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

/// Probe side of a cross join: every probe row against every build row.
#[derive(Debug)]
pub struct CrossJoinOperator {
    operator_id: usize,
    bridge: Arc<JoinBridge>,
    build: Option<Vec<RecordBatch>>,
    output: VecDeque<RecordBatch>,
    input_done: bool,
}

impl CrossJoinOperator {
    pub fn new(operator_id: usize, bridge: Arc<JoinBridge>) -> Self {
        CrossJoinOperator {
            operator_id,
            bridge,
            build: None,
            output: VecDeque::new(),
            input_done: false,
        }
    }

    fn cross_product(probe: &RecordBatch, build: &RecordBatch) -> Result<Option<RecordBatch>> {
        let probe_rows = probe.num_rows();
        let build_rows = build.num_rows();
        if probe_rows == 0 || build_rows == 0 {
            return Ok(None);
        }

        // Each probe row repeated per build row; build rows tiled per probe
        // row.
        let probe_indices: UInt32Array = (0..probe_rows)
            .flat_map(|p| std::iter::repeat(p as u32).take(build_rows))
            .collect::<Vec<_>>()
            .into();
        let build_indices: UInt32Array = (0..probe_rows)
            .flat_map(|_| (0..build_rows as u32))
            .collect::<Vec<_>>()
            .into();

        let probe_side = take_record_batch(probe, &probe_indices)?;
        let build_side = take_record_batch(build, &build_indices)?;

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

impl Operator for CrossJoinOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "CrossJoin"
    }

    fn needs_input(&self) -> bool {
        self.output.is_empty()
            && !self.input_done
            && (self.build.is_some() || self.bridge.build_side().is_some())
    }

    fn add_input(&mut self, input: RecordBatch) -> Result<()> {
        if self.build.is_none() {
            self.build = Some(self.bridge.build_side().ok_or_else(|| {
                WeftError::new("Cross join build side not yet published")
            })?);
        }
        for build_batch in self.build.as_ref().unwrap() {
            if let Some(joined) = Self::cross_product(&input, build_batch)? {
                self.output.push_back(joined);
            }
        }
        Ok(())
    }

    fn no_more_input(&mut self) -> Result<()> {
        self.input_done = true;
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<RecordBatch>> {
        Ok(self.output.pop_front())
    }

    fn blocked(&self) -> Option<BlockedReason> {
        if self.build.is_none() && self.bridge.build_side().is_none() {
            Some(BlockedReason::WaitForJoinBuild)
        } else {
            None
        }
    }

    fn is_finished(&self) -> bool {
        self.input_done && self.output.is_empty()
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

    #[test]
    fn cross_product_of_batches() {
        let bridge = Arc::new(JoinBridge::default());
        let mut build = CrossJoinBuildOperator::new(1, bridge.clone());
        build.add_input(test_batch("b", vec![10, 20])).unwrap();
        build.no_more_input().unwrap();

        let mut probe = CrossJoinOperator::new(1, bridge);
        probe.add_input(test_batch("a", vec![1, 2, 3])).unwrap();

        let out = probe.get_output().unwrap().unwrap();
        assert_eq!(6, out.num_rows());
        let probe_col: Int32Array = vec![1, 1, 2, 2, 3, 3].into();
        let build_col: Int32Array = vec![10, 20, 10, 20, 10, 20].into();
        assert_eq!(
            &probe_col,
            out.column(0).as_any().downcast_ref::<Int32Array>().unwrap()
        );
        assert_eq!(
            &build_col,
            out.column(1).as_any().downcast_ref::<Int32Array>().unwrap()
        );
    }

    #[test]
    fn blocks_until_build_resolves() {
        let bridge = Arc::new(JoinBridge::default());
        bridge.register_producer();

        let probe = CrossJoinOperator::new(1, bridge.clone());
        assert_eq!(Some(BlockedReason::WaitForJoinBuild), probe.blocked());

        bridge.publish(Vec::new()).unwrap();
        assert!(probe.blocked().is_none());
    }
}
