use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use arrow::compute::SortOptions;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::expr::physical::PhysicalExpr;

use super::connector::{ConnectorTableHandle, InsertTableHandle};

/// Which stage of a multi-stage aggregation a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationStep {
    /// Per-driver pre-aggregation over raw input.
    Partial,
    /// Combines partial results with other partial results.
    Intermediate,
    /// Combines partial results into final output.
    Final,
    /// Raw input to final output in one step.
    Single,
}

impl AggregationStep {
    /// Final and single aggregations see all rows for a group and must run in
    /// a single driver.
    pub fn is_single_threaded(&self) -> bool {
        matches!(self, AggregationStep::Final | AggregationStep::Single)
    }
}

impl fmt::Display for AggregationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Partial => write!(f, "PARTIAL"),
            Self::Intermediate => write!(f, "INTERMEDIATE"),
            Self::Final => write!(f, "FINAL"),
            Self::Single => write!(f, "SINGLE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    LeftSemi,
    LeftAnti,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner => write!(f, "INNER"),
            Self::Left => write!(f, "LEFT"),
            Self::Right => write!(f, "RIGHT"),
            Self::Full => write!(f, "FULL"),
            Self::LeftSemi => write!(f, "LEFT SEMI"),
            Self::LeftAnti => write!(f, "LEFT ANTI"),
        }
    }
}

/// A single sort key: column index plus ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortField {
    pub column: usize,
    pub descending: bool,
    pub nulls_first: bool,
}

impl SortField {
    pub fn asc(column: usize) -> Self {
        SortField {
            column,
            descending: false,
            nulls_first: false,
        }
    }

    pub fn desc(column: usize) -> Self {
        SortField {
            column,
            descending: true,
            nulls_first: false,
        }
    }

    pub fn sort_options(&self) -> SortOptions {
        SortOptions {
            descending: self.descending,
            nulls_first: self.nulls_first,
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@{} {}",
            self.column,
            if self.descending { "DESC" } else { "ASC" }
        )
    }
}

/// How rows are routed across partitions of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Partitioning {
    /// Rows go to partitions in turn, batch at a time.
    RoundRobin,
    /// Rows are routed by a hash of the given key columns.
    Hash(Vec<usize>),
}

impl fmt::Display for Partitioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoundRobin => write!(f, "ROUND ROBIN"),
            Self::Hash(keys) => {
                write!(f, "HASH(")?;
                for (idx, key) in keys.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "@{key}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Literal rows embedded in the plan.
#[derive(Debug, Clone)]
pub struct ValuesNode {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
    pub parallelizable: bool,
}

#[derive(Debug, Clone)]
pub struct TableScanNode {
    pub schema: SchemaRef,
    pub table_handle: Arc<dyn ConnectorTableHandle>,
}

#[derive(Debug, Clone)]
pub struct TableWriteNode {
    /// Input columns to write, in table column order.
    pub columns: Vec<usize>,
    pub insert_table_handle: InsertTableHandle,
}

#[derive(Debug, Clone)]
pub struct FilterNode {
    pub predicate: Arc<dyn PhysicalExpr>,
}

#[derive(Debug, Clone)]
pub struct ProjectNode {
    pub exprs: Vec<Arc<dyn PhysicalExpr>>,
}

#[derive(Debug, Clone)]
pub struct AggregationNode {
    pub step: AggregationStep,
    pub grouping_keys: Vec<usize>,
}

/// Aggregation over input already clustered on the grouping keys.
#[derive(Debug, Clone)]
pub struct StreamingAggregationNode {
    pub grouping_keys: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct TopNNode {
    pub fields: Vec<SortField>,
    pub count: usize,
    pub partial: bool,
}

#[derive(Debug, Clone)]
pub struct LimitNode {
    pub count: usize,
    pub offset: usize,
    pub partial: bool,
}

#[derive(Debug, Clone)]
pub struct OrderByNode {
    pub fields: Vec<SortField>,
    pub partial: bool,
}

/// Merges sorted streams produced by the drivers of its source pipeline.
#[derive(Debug, Clone)]
pub struct LocalMergeNode {
    pub fields: Vec<SortField>,
    pub schema: SchemaRef,
}

/// In-process exchange: repartitions rows between the drivers of two
/// pipelines within the same task.
#[derive(Debug, Clone)]
pub struct LocalPartitionNode {
    pub partitioning: Partitioning,
    pub schema: SchemaRef,
}

/// Reads batches shuffled in from other workers.
#[derive(Debug, Clone)]
pub struct ExchangeNode {
    pub schema: SchemaRef,
}

/// Reads sorted streams from other workers, merged on the sort keys.
#[derive(Debug, Clone)]
pub struct MergeExchangeNode {
    pub schema: SchemaRef,
    pub fields: Vec<SortField>,
}

/// Routes output batches to remote consumers.
#[derive(Debug, Clone)]
pub struct PartitionedOutputNode {
    pub partitioning: Partitioning,
}

#[derive(Debug, Clone)]
pub struct HashJoinNode {
    pub join_type: JoinType,
    /// Key columns on the probe (first) source.
    pub left_keys: Vec<usize>,
    /// Key columns on the build (second) source.
    pub right_keys: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct MergeJoinNode {
    pub join_type: JoinType,
    pub left_keys: Vec<usize>,
    pub right_keys: Vec<usize>,
}

/// Expands a list column into one output row per element.
#[derive(Debug, Clone)]
pub struct UnnestNode {
    /// Input columns replicated onto every produced row.
    pub replicated_columns: Vec<usize>,
    /// The list column being flattened.
    pub list_column: usize,
}

/// At most one input row may pass; empty input turns into a null row.
#[derive(Debug, Clone)]
pub struct EnforceSingleRowNode {
    pub schema: SchemaRef,
}

#[derive(Debug, Clone)]
pub struct AssignUniqueIdNode {
    pub task_unique_id: u64,
    pub unique_id_counter: Arc<AtomicU64>,
}
