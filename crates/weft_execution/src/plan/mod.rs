pub mod connector;
pub mod extension;
pub mod nodes;

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use crate::explain::explainable::{ExplainConfig, ExplainEntry, Explainable};
use crate::expr::physical::PhysicalExpr;

use self::connector::{ConnectorTableHandle, InsertTableHandle};
use self::extension::ExtensionPlanNode;
use self::nodes::{
    AggregationNode, AggregationStep, AssignUniqueIdNode, EnforceSingleRowNode, ExchangeNode,
    FilterNode, HashJoinNode, JoinType, LimitNode, LocalMergeNode, LocalPartitionNode,
    MergeExchangeNode, MergeJoinNode, OrderByNode, Partitioning, PartitionedOutputNode,
    ProjectNode, SortField, StreamingAggregationNode, TableScanNode, TableWriteNode, TopNNode,
    UnnestNode, ValuesNode,
};

/// Stable identifier of a node within a plan.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlanNodeId(pub String);

impl fmt::Display for PlanNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PlanNodeId {
    fn from(value: &str) -> Self {
        PlanNodeId(value.to_string())
    }
}

impl From<String> for PlanNodeId {
    fn from(value: String) -> Self {
        PlanNodeId(value)
    }
}

/// A node in the logical plan handed to the local planner.
///
/// The tree is immutable and shared: driver factories keep references to the
/// nodes assigned to their pipeline for as long as they live.
#[derive(Debug)]
pub struct PlanNode {
    pub id: PlanNodeId,
    pub sources: Vec<Arc<PlanNode>>,
    pub kind: PlanNodeKind,
}

/// Closed set of node kinds the planner understands, plus an open arm for
/// engine extensions.
#[derive(Debug)]
pub enum PlanNodeKind {
    Values(ValuesNode),
    TableScan(TableScanNode),
    TableWrite(TableWriteNode),
    Filter(FilterNode),
    Project(ProjectNode),
    Aggregation(AggregationNode),
    StreamingAggregation(StreamingAggregationNode),
    TopN(TopNNode),
    Limit(LimitNode),
    OrderBy(OrderByNode),
    LocalMerge(LocalMergeNode),
    LocalPartition(LocalPartitionNode),
    Exchange(ExchangeNode),
    MergeExchange(MergeExchangeNode),
    PartitionedOutput(PartitionedOutputNode),
    HashJoin(HashJoinNode),
    CrossJoin,
    MergeJoin(MergeJoinNode),
    Unnest(UnnestNode),
    EnforceSingleRow(EnforceSingleRowNode),
    AssignUniqueId(AssignUniqueIdNode),
    Extension(Arc<dyn ExtensionPlanNode>),
}

impl PlanNode {
    pub fn id(&self) -> &PlanNodeId {
        &self.id
    }

    pub fn sources(&self) -> &[Arc<PlanNode>] {
        &self.sources
    }

    /// Whether sources of this node must run in their own pipelines.
    pub fn is_pipeline_barrier(&self) -> bool {
        matches!(
            self.kind,
            PlanNodeKind::LocalMerge(_) | PlanNodeKind::LocalPartition(_)
        )
    }

    pub fn new(
        id: impl Into<PlanNodeId>,
        kind: PlanNodeKind,
        sources: Vec<Arc<PlanNode>>,
    ) -> Arc<Self> {
        Arc::new(PlanNode {
            id: id.into(),
            sources,
            kind,
        })
    }

    pub fn values(
        id: impl Into<PlanNodeId>,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
        parallelizable: bool,
    ) -> Arc<Self> {
        Self::new(
            id,
            PlanNodeKind::Values(ValuesNode {
                schema,
                batches,
                parallelizable,
            }),
            Vec::new(),
        )
    }

    pub fn table_scan(
        id: impl Into<PlanNodeId>,
        schema: SchemaRef,
        table_handle: Arc<dyn ConnectorTableHandle>,
    ) -> Arc<Self> {
        Self::new(
            id,
            PlanNodeKind::TableScan(TableScanNode {
                schema,
                table_handle,
            }),
            Vec::new(),
        )
    }

    pub fn table_write(
        id: impl Into<PlanNodeId>,
        columns: Vec<usize>,
        insert_table_handle: InsertTableHandle,
        source: Arc<PlanNode>,
    ) -> Arc<Self> {
        Self::new(
            id,
            PlanNodeKind::TableWrite(TableWriteNode {
                columns,
                insert_table_handle,
            }),
            vec![source],
        )
    }

    pub fn filter(
        id: impl Into<PlanNodeId>,
        predicate: Arc<dyn PhysicalExpr>,
        source: Arc<PlanNode>,
    ) -> Arc<Self> {
        Self::new(
            id,
            PlanNodeKind::Filter(FilterNode { predicate }),
            vec![source],
        )
    }

    pub fn project(
        id: impl Into<PlanNodeId>,
        exprs: Vec<Arc<dyn PhysicalExpr>>,
        source: Arc<PlanNode>,
    ) -> Arc<Self> {
        Self::new(id, PlanNodeKind::Project(ProjectNode { exprs }), vec![source])
    }

    pub fn aggregation(
        id: impl Into<PlanNodeId>,
        step: AggregationStep,
        grouping_keys: Vec<usize>,
        source: Arc<PlanNode>,
    ) -> Arc<Self> {
        Self::new(
            id,
            PlanNodeKind::Aggregation(AggregationNode {
                step,
                grouping_keys,
            }),
            vec![source],
        )
    }

    pub fn streaming_aggregation(
        id: impl Into<PlanNodeId>,
        grouping_keys: Vec<usize>,
        source: Arc<PlanNode>,
    ) -> Arc<Self> {
        Self::new(
            id,
            PlanNodeKind::StreamingAggregation(StreamingAggregationNode { grouping_keys }),
            vec![source],
        )
    }

    pub fn top_n(
        id: impl Into<PlanNodeId>,
        fields: Vec<SortField>,
        count: usize,
        partial: bool,
        source: Arc<PlanNode>,
    ) -> Arc<Self> {
        Self::new(
            id,
            PlanNodeKind::TopN(TopNNode {
                fields,
                count,
                partial,
            }),
            vec![source],
        )
    }

    pub fn limit(
        id: impl Into<PlanNodeId>,
        offset: usize,
        count: usize,
        partial: bool,
        source: Arc<PlanNode>,
    ) -> Arc<Self> {
        Self::new(
            id,
            PlanNodeKind::Limit(LimitNode {
                count,
                offset,
                partial,
            }),
            vec![source],
        )
    }

    pub fn order_by(
        id: impl Into<PlanNodeId>,
        fields: Vec<SortField>,
        partial: bool,
        source: Arc<PlanNode>,
    ) -> Arc<Self> {
        Self::new(
            id,
            PlanNodeKind::OrderBy(OrderByNode { fields, partial }),
            vec![source],
        )
    }

    pub fn local_merge(
        id: impl Into<PlanNodeId>,
        fields: Vec<SortField>,
        schema: SchemaRef,
        source: Arc<PlanNode>,
    ) -> Arc<Self> {
        Self::new(
            id,
            PlanNodeKind::LocalMerge(LocalMergeNode { fields, schema }),
            vec![source],
        )
    }

    pub fn local_partition(
        id: impl Into<PlanNodeId>,
        partitioning: Partitioning,
        schema: SchemaRef,
        sources: Vec<Arc<PlanNode>>,
    ) -> Arc<Self> {
        Self::new(
            id,
            PlanNodeKind::LocalPartition(LocalPartitionNode {
                partitioning,
                schema,
            }),
            sources,
        )
    }

    pub fn exchange(id: impl Into<PlanNodeId>, schema: SchemaRef) -> Arc<Self> {
        Self::new(id, PlanNodeKind::Exchange(ExchangeNode { schema }), Vec::new())
    }

    pub fn merge_exchange(
        id: impl Into<PlanNodeId>,
        schema: SchemaRef,
        fields: Vec<SortField>,
    ) -> Arc<Self> {
        Self::new(
            id,
            PlanNodeKind::MergeExchange(MergeExchangeNode { schema, fields }),
            Vec::new(),
        )
    }

    pub fn partitioned_output(
        id: impl Into<PlanNodeId>,
        partitioning: Partitioning,
        source: Arc<PlanNode>,
    ) -> Arc<Self> {
        Self::new(
            id,
            PlanNodeKind::PartitionedOutput(PartitionedOutputNode { partitioning }),
            vec![source],
        )
    }

    pub fn hash_join(
        id: impl Into<PlanNodeId>,
        join_type: JoinType,
        left_keys: Vec<usize>,
        right_keys: Vec<usize>,
        left: Arc<PlanNode>,
        right: Arc<PlanNode>,
    ) -> Arc<Self> {
        Self::new(
            id,
            PlanNodeKind::HashJoin(HashJoinNode {
                join_type,
                left_keys,
                right_keys,
            }),
            vec![left, right],
        )
    }

    pub fn cross_join(
        id: impl Into<PlanNodeId>,
        left: Arc<PlanNode>,
        right: Arc<PlanNode>,
    ) -> Arc<Self> {
        Self::new(id, PlanNodeKind::CrossJoin, vec![left, right])
    }

    pub fn merge_join(
        id: impl Into<PlanNodeId>,
        join_type: JoinType,
        left_keys: Vec<usize>,
        right_keys: Vec<usize>,
        left: Arc<PlanNode>,
        right: Arc<PlanNode>,
    ) -> Arc<Self> {
        Self::new(
            id,
            PlanNodeKind::MergeJoin(MergeJoinNode {
                join_type,
                left_keys,
                right_keys,
            }),
            vec![left, right],
        )
    }

    pub fn unnest(
        id: impl Into<PlanNodeId>,
        replicated_columns: Vec<usize>,
        list_column: usize,
        source: Arc<PlanNode>,
    ) -> Arc<Self> {
        Self::new(
            id,
            PlanNodeKind::Unnest(UnnestNode {
                replicated_columns,
                list_column,
            }),
            vec![source],
        )
    }

    pub fn enforce_single_row(
        id: impl Into<PlanNodeId>,
        schema: SchemaRef,
        source: Arc<PlanNode>,
    ) -> Arc<Self> {
        Self::new(
            id,
            PlanNodeKind::EnforceSingleRow(EnforceSingleRowNode { schema }),
            vec![source],
        )
    }

    pub fn assign_unique_id(
        id: impl Into<PlanNodeId>,
        task_unique_id: u64,
        source: Arc<PlanNode>,
    ) -> Arc<Self> {
        Self::new(
            id,
            PlanNodeKind::AssignUniqueId(AssignUniqueIdNode {
                task_unique_id,
                unique_id_counter: Arc::new(AtomicU64::new(0)),
            }),
            vec![source],
        )
    }

    pub fn extension(
        id: impl Into<PlanNodeId>,
        node: Arc<dyn ExtensionPlanNode>,
        sources: Vec<Arc<PlanNode>>,
    ) -> Arc<Self> {
        Self::new(id, PlanNodeKind::Extension(node), sources)
    }
}

impl Explainable for PlanNode {
    fn explain_entry(&self, _conf: ExplainConfig) -> ExplainEntry {
        match &self.kind {
            PlanNodeKind::Values(n) => ExplainEntry::new("Values")
                .with_value("batches", n.batches.len())
                .with_value("parallelizable", n.parallelizable),
            PlanNodeKind::TableScan(_) => ExplainEntry::new("TableScan"),
            PlanNodeKind::TableWrite(_) => ExplainEntry::new("TableWrite"),
            PlanNodeKind::Filter(n) => {
                ExplainEntry::new("Filter").with_value("predicate", &n.predicate)
            }
            PlanNodeKind::Project(n) => {
                ExplainEntry::new("Project").with_values("exprs", n.exprs.iter())
            }
            PlanNodeKind::Aggregation(n) => ExplainEntry::new("Aggregation")
                .with_value("step", n.step)
                .with_values("keys", n.grouping_keys.iter()),
            PlanNodeKind::StreamingAggregation(n) => ExplainEntry::new("StreamingAggregation")
                .with_values("keys", n.grouping_keys.iter()),
            PlanNodeKind::TopN(n) => ExplainEntry::new("TopN")
                .with_value("count", n.count)
                .with_value("partial", n.partial),
            PlanNodeKind::Limit(n) => ExplainEntry::new("Limit")
                .with_value("count", n.count)
                .with_value("partial", n.partial),
            PlanNodeKind::OrderBy(n) => ExplainEntry::new("OrderBy")
                .with_values("fields", n.fields.iter())
                .with_value("partial", n.partial),
            PlanNodeKind::LocalMerge(n) => {
                ExplainEntry::new("LocalMerge").with_values("fields", n.fields.iter())
            }
            PlanNodeKind::LocalPartition(n) => {
                ExplainEntry::new("LocalPartition").with_value("partitioning", &n.partitioning)
            }
            PlanNodeKind::Exchange(_) => ExplainEntry::new("Exchange"),
            PlanNodeKind::MergeExchange(n) => {
                ExplainEntry::new("MergeExchange").with_values("fields", n.fields.iter())
            }
            PlanNodeKind::PartitionedOutput(n) => ExplainEntry::new("PartitionedOutput")
                .with_value("partitioning", &n.partitioning),
            PlanNodeKind::HashJoin(n) => {
                ExplainEntry::new("HashJoin").with_value("type", n.join_type)
            }
            PlanNodeKind::CrossJoin => ExplainEntry::new("CrossJoin"),
            PlanNodeKind::MergeJoin(n) => {
                ExplainEntry::new("MergeJoin").with_value("type", n.join_type)
            }
            PlanNodeKind::Unnest(n) => {
                ExplainEntry::new("Unnest").with_value("list_column", n.list_column)
            }
            PlanNodeKind::EnforceSingleRow(_) => ExplainEntry::new("EnforceSingleRow"),
            PlanNodeKind::AssignUniqueId(n) => {
                ExplainEntry::new("AssignUniqueId").with_value("task_unique_id", n.task_unique_id)
            }
            PlanNodeKind::Extension(n) => ExplainEntry::new(n.name().to_string()),
        }
    }
}

impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [id = {}]",
            self.explain_entry(ExplainConfig::default()),
            self.id
        )
    }
}
