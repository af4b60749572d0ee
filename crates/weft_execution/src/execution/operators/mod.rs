//! Implementations of physical operators in an execution pipeline.

pub mod aggregate;
pub mod assign_unique_id;
pub mod enforce_single_row;
pub mod exchange;
pub mod filter_project;
pub mod join;
pub mod limit;
pub mod local_exchange;
pub mod local_merge;
pub mod registry;
pub mod scan;
pub mod sink;
pub mod sort;
pub mod table_write;
pub mod unnest;
pub mod values;

pub(crate) mod util;

#[cfg(test)]
pub(crate) mod test_util;

use std::fmt::{self, Debug};

use arrow::record_batch::RecordBatch;
use weft_error::Result;

use aggregate::{HashAggregateOperator, StreamingAggregateOperator};
use assign_unique_id::AssignUniqueIdOperator;
use enforce_single_row::EnforceSingleRowOperator;
use exchange::{ExchangeOperator, MergeExchangeOperator, PartitionedOutputOperator};
use filter_project::FilterProjectOperator;
use join::cross_join::{CrossJoinBuildOperator, CrossJoinOperator};
use join::hash_join::{HashBuildOperator, HashProbeOperator};
use join::merge_join::MergeJoinOperator;
use limit::LimitOperator;
use local_exchange::{LocalExchangeSourceOperator, LocalPartitionSinkOperator};
use local_merge::LocalMergeOperator;
use scan::TableScanOperator;
use sink::CallbackSinkOperator;
use sort::{OrderByOperator, TopNOperator};
use table_write::TableWriterOperator;
use unnest::UnnestOperator;
use values::ValuesOperator;

/// Why an operator cannot make progress right now.
///
/// A blocked driver is parked by the scheduler and retried once the blocking
/// condition can have changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedReason {
    /// Waiting for the build side of a join to be published.
    WaitForJoinBuild,
    /// Waiting for upstream pipeline drivers to produce or finish.
    WaitForProducers,
    /// Waiting for the exchange transport to deliver a batch.
    WaitForExchange,
}

impl fmt::Display for BlockedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitForJoinBuild => write!(f, "wait for join build"),
            Self::WaitForProducers => write!(f, "wait for producers"),
            Self::WaitForExchange => write!(f, "wait for exchange"),
        }
    }
}

/// Contract between a driver and the operators it runs.
///
/// A driver moves batches through its operator chain by alternating
/// `get_output` on an operator with `add_input` on the next. Once an
/// operator's upstream is exhausted the driver calls `no_more_input`, after
/// which the operator drains whatever it has accumulated.
pub trait Operator: Debug + Send {
    fn operator_id(&self) -> usize;

    /// Operator type name for diagnostics and tests.
    fn name(&self) -> &str;

    /// Whether the operator can accept a batch right now.
    fn needs_input(&self) -> bool;

    fn add_input(&mut self, input: RecordBatch) -> Result<()>;

    /// Upstream is exhausted; no further `add_input` calls will happen.
    fn no_more_input(&mut self) -> Result<()>;

    fn get_output(&mut self) -> Result<Option<RecordBatch>>;

    /// Reason the operator cannot currently produce or consume, if any.
    fn blocked(&self) -> Option<BlockedReason> {
        None
    }

    /// True once the operator will neither accept input nor produce output.
    fn is_finished(&self) -> bool;
}

#[derive(Debug)]
pub enum PhysicalOperator {
    Values(ValuesOperator),
    TableScan(TableScanOperator),
    TableWriter(TableWriterOperator),
    FilterProject(FilterProjectOperator),
    HashAggregate(HashAggregateOperator),
    StreamingAggregate(StreamingAggregateOperator),
    TopN(TopNOperator),
    Limit(LimitOperator),
    OrderBy(OrderByOperator),
    LocalMerge(LocalMergeOperator),
    LocalExchangeSource(LocalExchangeSourceOperator),
    LocalPartitionSink(LocalPartitionSinkOperator),
    Exchange(ExchangeOperator),
    MergeExchange(MergeExchangeOperator),
    PartitionedOutput(PartitionedOutputOperator),
    HashBuild(HashBuildOperator),
    HashProbe(HashProbeOperator),
    CrossJoinBuild(CrossJoinBuildOperator),
    CrossJoin(CrossJoinOperator),
    MergeJoin(MergeJoinOperator),
    Unnest(UnnestOperator),
    EnforceSingleRow(EnforceSingleRowOperator),
    AssignUniqueId(AssignUniqueIdOperator),
    CallbackSink(CallbackSinkOperator),
    Extension(Box<dyn Operator>),
}

impl Operator for PhysicalOperator {
    fn operator_id(&self) -> usize {
        match self {
            Self::Values(op) => op.operator_id(),
            Self::TableScan(op) => op.operator_id(),
            Self::TableWriter(op) => op.operator_id(),
            Self::FilterProject(op) => op.operator_id(),
            Self::HashAggregate(op) => op.operator_id(),
            Self::StreamingAggregate(op) => op.operator_id(),
            Self::TopN(op) => op.operator_id(),
            Self::Limit(op) => op.operator_id(),
            Self::OrderBy(op) => op.operator_id(),
            Self::LocalMerge(op) => op.operator_id(),
            Self::LocalExchangeSource(op) => op.operator_id(),
            Self::LocalPartitionSink(op) => op.operator_id(),
            Self::Exchange(op) => op.operator_id(),
            Self::MergeExchange(op) => op.operator_id(),
            Self::PartitionedOutput(op) => op.operator_id(),
            Self::HashBuild(op) => op.operator_id(),
            Self::HashProbe(op) => op.operator_id(),
            Self::CrossJoinBuild(op) => op.operator_id(),
            Self::CrossJoin(op) => op.operator_id(),
            Self::MergeJoin(op) => op.operator_id(),
            Self::Unnest(op) => op.operator_id(),
            Self::EnforceSingleRow(op) => op.operator_id(),
            Self::AssignUniqueId(op) => op.operator_id(),
            Self::CallbackSink(op) => op.operator_id(),
            Self::Extension(op) => op.operator_id(),
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Values(op) => op.name(),
            Self::TableScan(op) => op.name(),
            Self::TableWriter(op) => op.name(),
            Self::FilterProject(op) => op.name(),
            Self::HashAggregate(op) => op.name(),
            Self::StreamingAggregate(op) => op.name(),
            Self::TopN(op) => op.name(),
            Self::Limit(op) => op.name(),
            Self::OrderBy(op) => op.name(),
            Self::LocalMerge(op) => op.name(),
            Self::LocalExchangeSource(op) => op.name(),
            Self::LocalPartitionSink(op) => op.name(),
            Self::Exchange(op) => op.name(),
            Self::MergeExchange(op) => op.name(),
            Self::PartitionedOutput(op) => op.name(),
            Self::HashBuild(op) => op.name(),
            Self::HashProbe(op) => op.name(),
            Self::CrossJoinBuild(op) => op.name(),
            Self::CrossJoin(op) => op.name(),
            Self::MergeJoin(op) => op.name(),
            Self::Unnest(op) => op.name(),
            Self::EnforceSingleRow(op) => op.name(),
            Self::AssignUniqueId(op) => op.name(),
            Self::CallbackSink(op) => op.name(),
            Self::Extension(op) => op.name(),
        }
    }

    fn needs_input(&self) -> bool {
        match self {
            Self::Values(op) => op.needs_input(),
            Self::TableScan(op) => op.needs_input(),
            Self::TableWriter(op) => op.needs_input(),
            Self::FilterProject(op) => op.needs_input(),
            Self::HashAggregate(op) => op.needs_input(),
            Self::StreamingAggregate(op) => op.needs_input(),
            Self::TopN(op) => op.needs_input(),
            Self::Limit(op) => op.needs_input(),
            Self::OrderBy(op) => op.needs_input(),
            Self::LocalMerge(op) => op.needs_input(),
            Self::LocalExchangeSource(op) => op.needs_input(),
            Self::LocalPartitionSink(op) => op.needs_input(),
            Self::Exchange(op) => op.needs_input(),
            Self::MergeExchange(op) => op.needs_input(),
            Self::PartitionedOutput(op) => op.needs_input(),
            Self::HashBuild(op) => op.needs_input(),
            Self::HashProbe(op) => op.needs_input(),
            Self::CrossJoinBuild(op) => op.needs_input(),
            Self::CrossJoin(op) => op.needs_input(),
            Self::MergeJoin(op) => op.needs_input(),
            Self::Unnest(op) => op.needs_input(),
            Self::EnforceSingleRow(op) => op.needs_input(),
            Self::AssignUniqueId(op) => op.needs_input(),
            Self::CallbackSink(op) => op.needs_input(),
            Self::Extension(op) => op.needs_input(),
        }
    }

    fn add_input(&mut self, input: RecordBatch) -> Result<()> {
        match self {
            Self::Values(op) => op.add_input(input),
            Self::TableScan(op) => op.add_input(input),
            Self::TableWriter(op) => op.add_input(input),
            Self::FilterProject(op) => op.add_input(input),
            Self::HashAggregate(op) => op.add_input(input),
            Self::StreamingAggregate(op) => op.add_input(input),
            Self::TopN(op) => op.add_input(input),
            Self::Limit(op) => op.add_input(input),
            Self::OrderBy(op) => op.add_input(input),
            Self::LocalMerge(op) => op.add_input(input),
            Self::LocalExchangeSource(op) => op.add_input(input),
            Self::LocalPartitionSink(op) => op.add_input(input),
            Self::Exchange(op) => op.add_input(input),
            Self::MergeExchange(op) => op.add_input(input),
            Self::PartitionedOutput(op) => op.add_input(input),
            Self::HashBuild(op) => op.add_input(input),
            Self::HashProbe(op) => op.add_input(input),
            Self::CrossJoinBuild(op) => op.add_input(input),
            Self::CrossJoin(op) => op.add_input(input),
            Self::MergeJoin(op) => op.add_input(input),
            Self::Unnest(op) => op.add_input(input),
            Self::EnforceSingleRow(op) => op.add_input(input),
            Self::AssignUniqueId(op) => op.add_input(input),
            Self::CallbackSink(op) => op.add_input(input),
            Self::Extension(op) => op.add_input(input),
        }
    }

    fn no_more_input(&mut self) -> Result<()> {
        match self {
            Self::Values(op) => op.no_more_input(),
            Self::TableScan(op) => op.no_more_input(),
            Self::TableWriter(op) => op.no_more_input(),
            Self::FilterProject(op) => op.no_more_input(),
            Self::HashAggregate(op) => op.no_more_input(),
            Self::StreamingAggregate(op) => op.no_more_input(),
            Self::TopN(op) => op.no_more_input(),
            Self::Limit(op) => op.no_more_input(),
            Self::OrderBy(op) => op.no_more_input(),
            Self::LocalMerge(op) => op.no_more_input(),
            Self::LocalExchangeSource(op) => op.no_more_input(),
            Self::LocalPartitionSink(op) => op.no_more_input(),
            Self::Exchange(op) => op.no_more_input(),
            Self::MergeExchange(op) => op.no_more_input(),
            Self::PartitionedOutput(op) => op.no_more_input(),
            Self::HashBuild(op) => op.no_more_input(),
            Self::HashProbe(op) => op.no_more_input(),
            Self::CrossJoinBuild(op) => op.no_more_input(),
            Self::CrossJoin(op) => op.no_more_input(),
            Self::MergeJoin(op) => op.no_more_input(),
            Self::Unnest(op) => op.no_more_input(),
            Self::EnforceSingleRow(op) => op.no_more_input(),
            Self::AssignUniqueId(op) => op.no_more_input(),
            Self::CallbackSink(op) => op.no_more_input(),
            Self::Extension(op) => op.no_more_input(),
        }
    }

    fn get_output(&mut self) -> Result<Option<RecordBatch>> {
        match self {
            Self::Values(op) => op.get_output(),
            Self::TableScan(op) => op.get_output(),
            Self::TableWriter(op) => op.get_output(),
            Self::FilterProject(op) => op.get_output(),
            Self::HashAggregate(op) => op.get_output(),
            Self::StreamingAggregate(op) => op.get_output(),
            Self::TopN(op) => op.get_output(),
            Self::Limit(op) => op.get_output(),
            Self::OrderBy(op) => op.get_output(),
            Self::LocalMerge(op) => op.get_output(),
            Self::LocalExchangeSource(op) => op.get_output(),
            Self::LocalPartitionSink(op) => op.get_output(),
            Self::Exchange(op) => op.get_output(),
            Self::MergeExchange(op) => op.get_output(),
            Self::PartitionedOutput(op) => op.get_output(),
            Self::HashBuild(op) => op.get_output(),
            Self::HashProbe(op) => op.get_output(),
            Self::CrossJoinBuild(op) => op.get_output(),
            Self::CrossJoin(op) => op.get_output(),
            Self::MergeJoin(op) => op.get_output(),
            Self::Unnest(op) => op.get_output(),
            Self::EnforceSingleRow(op) => op.get_output(),
            Self::AssignUniqueId(op) => op.get_output(),
            Self::CallbackSink(op) => op.get_output(),
            Self::Extension(op) => op.get_output(),
        }
    }

    fn blocked(&self) -> Option<BlockedReason> {
        match self {
            Self::Values(op) => op.blocked(),
            Self::TableScan(op) => op.blocked(),
            Self::TableWriter(op) => op.blocked(),
            Self::FilterProject(op) => op.blocked(),
            Self::HashAggregate(op) => op.blocked(),
            Self::StreamingAggregate(op) => op.blocked(),
            Self::TopN(op) => op.blocked(),
            Self::Limit(op) => op.blocked(),
            Self::OrderBy(op) => op.blocked(),
            Self::LocalMerge(op) => op.blocked(),
            Self::LocalExchangeSource(op) => op.blocked(),
            Self::LocalPartitionSink(op) => op.blocked(),
            Self::Exchange(op) => op.blocked(),
            Self::MergeExchange(op) => op.blocked(),
            Self::PartitionedOutput(op) => op.blocked(),
            Self::HashBuild(op) => op.blocked(),
            Self::HashProbe(op) => op.blocked(),
            Self::CrossJoinBuild(op) => op.blocked(),
            Self::CrossJoin(op) => op.blocked(),
            Self::MergeJoin(op) => op.blocked(),
            Self::Unnest(op) => op.blocked(),
            Self::EnforceSingleRow(op) => op.blocked(),
            Self::AssignUniqueId(op) => op.blocked(),
            Self::CallbackSink(op) => op.blocked(),
            Self::Extension(op) => op.blocked(),
        }
    }

    fn is_finished(&self) -> bool {
        match self {
            Self::Values(op) => op.is_finished(),
            Self::TableScan(op) => op.is_finished(),
            Self::TableWriter(op) => op.is_finished(),
            Self::FilterProject(op) => op.is_finished(),
            Self::HashAggregate(op) => op.is_finished(),
            Self::StreamingAggregate(op) => op.is_finished(),
            Self::TopN(op) => op.is_finished(),
            Self::Limit(op) => op.is_finished(),
            Self::OrderBy(op) => op.is_finished(),
            Self::LocalMerge(op) => op.is_finished(),
            Self::LocalExchangeSource(op) => op.is_finished(),
            Self::LocalPartitionSink(op) => op.is_finished(),
            Self::Exchange(op) => op.is_finished(),
            Self::MergeExchange(op) => op.is_finished(),
            Self::PartitionedOutput(op) => op.is_finished(),
            Self::HashBuild(op) => op.is_finished(),
            Self::HashProbe(op) => op.is_finished(),
            Self::CrossJoinBuild(op) => op.is_finished(),
            Self::CrossJoin(op) => op.is_finished(),
            Self::MergeJoin(op) => op.is_finished(),
            Self::Unnest(op) => op.is_finished(),
            Self::EnforceSingleRow(op) => op.is_finished(),
            Self::AssignUniqueId(op) => op.is_finished(),
            Self::CallbackSink(op) => op.is_finished(),
            Self::Extension(op) => op.is_finished(),
        }
    }
}
