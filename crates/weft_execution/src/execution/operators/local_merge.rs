use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use weft_error::{Result, WeftError};

use crate::plan::nodes::{LocalMergeNode, SortField};
use crate::task::LocalMergeSource;

use super::sort::sort_batch;
use super::util::concat_record_batches;
use super::{BlockedReason, Operator};

/// Merges the sorted streams of its upstream drivers into one sorted stream.
///
/// One merge source per upstream driver; the operator waits for all
/// producers to finish, then merges. Single-threaded by construction: the
/// planner caps its pipeline at one driver.
#[derive(Debug)]
pub struct LocalMergeOperator {
    operator_id: usize,
    fields: Vec<SortField>,
    sources: Vec<Arc<LocalMergeSource>>,
    output: Option<RecordBatch>,
    done: bool,
}

impl LocalMergeOperator {
    pub fn new(
        operator_id: usize,
        node: &LocalMergeNode,
        sources: Vec<Arc<LocalMergeSource>>,
    ) -> Self {
        LocalMergeOperator {
            operator_id,
            fields: node.fields.clone(),
            sources,
            output: None,
            done: false,
        }
    }

    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }
}

impl Operator for LocalMergeOperator {
    fn operator_id(&self) -> usize {
        self.operator_id
    }

    fn name(&self) -> &str {
        "LocalMerge"
    }

    fn needs_input(&self) -> bool {
        false
    }

    fn add_input(&mut self, _input: RecordBatch) -> Result<()> {
        Err(WeftError::new("Cannot push input to a LocalMerge operator"))
    }

    fn no_more_input(&mut self) -> Result<()> {
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<RecordBatch>> {
        if let Some(batch) = self.output.take() {
            return Ok(Some(batch));
        }
        if self.done || self.sources.iter().any(|s| !s.producer_finished()) {
            return Ok(None);
        }

        let mut batches = Vec::new();
        for source in &self.sources {
            while let Some(batch) = source.poll_batch() {
                batches.push(batch);
            }
        }
        self.done = true;

        if batches.is_empty() {
            return Ok(None);
        }
        let schema = batches[0].schema();
        let all = concat_record_batches(&schema, &batches)?;
        Ok(Some(sort_batch(&all, &self.fields, None)?))
    }

    fn blocked(&self) -> Option<BlockedReason> {
        if !self.done && self.sources.iter().any(|s| !s.producer_finished()) {
            Some(BlockedReason::WaitForProducers)
        } else {
            None
        }
    }

    fn is_finished(&self) -> bool {
        self.done && self.output.is_none()
    }
}
