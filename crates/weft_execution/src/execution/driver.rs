use std::fmt;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use tracing::debug;
use weft_error::{OptionExt, Result, WeftError};

use crate::plan::{PlanNode, PlanNodeKind};
use crate::task::Task;

use super::operators::aggregate::{HashAggregateOperator, StreamingAggregateOperator};
use super::operators::assign_unique_id::AssignUniqueIdOperator;
use super::operators::enforce_single_row::EnforceSingleRowOperator;
use super::operators::exchange::{
    ExchangeClient, ExchangeOperator, MergeExchangeOperator, PartitionedOutputOperator,
};
use super::operators::filter_project::FilterProjectOperator;
use super::operators::join::cross_join::CrossJoinOperator;
use super::operators::join::hash_join::HashProbeOperator;
use super::operators::join::merge_join::MergeJoinOperator;
use super::operators::limit::LimitOperator;
use super::operators::local_exchange::LocalExchangeSourceOperator;
use super::operators::local_merge::LocalMergeOperator;
use super::operators::registry;
use super::operators::scan::TableScanOperator;
use super::operators::sort::{OrderByOperator, TopNOperator};
use super::operators::table_write::TableWriterOperator;
use super::operators::unnest::UnnestOperator;
use super::operators::values::ValuesOperator;
use super::operators::{BlockedReason, Operator, PhysicalOperator};

/// Deferred operator construction: invoked with the operator id and the
/// driver's context once per driver instance.
pub type OperatorSupplier =
    Box<dyn Fn(usize, &DriverContext) -> Result<PhysicalOperator> + Send + Sync>;

/// Context a driver runs in: which pipeline it belongs to, which of that
/// pipeline's parallel instances it is, and the task runtime state.
#[derive(Debug, Clone)]
pub struct DriverContext {
    pipeline_id: usize,
    driver_id: usize,
    task: Arc<Task>,
}

impl DriverContext {
    pub fn new(pipeline_id: usize, driver_id: usize, task: Arc<Task>) -> Self {
        DriverContext {
            pipeline_id,
            driver_id,
            task,
        }
    }

    pub fn pipeline_id(&self) -> usize {
        self.pipeline_id
    }

    pub fn driver_id(&self) -> usize {
        self.driver_id
    }

    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }
}

/// Blueprint for one pipeline of the plan.
///
/// Holds the plan nodes assigned to the pipeline bottom-up, the optional
/// sink terminating it, and the parallelism cap. `create_driver` is invoked
/// once per parallel driver instance.
pub struct DriverFactory {
    /// Nodes of this pipeline, source-most first.
    pub plan_nodes: Vec<Arc<PlanNode>>,

    /// Builds the terminating sink operator. Present on every factory except
    /// possibly the root.
    pub consumer_supplier: Option<OperatorSupplier>,

    /// True iff the pipeline reads external input (its first node has no
    /// sources).
    pub input_driver: bool,

    /// True only for the factory driving the plan root.
    pub output_driver: bool,

    /// Maximum number of parallel drivers this pipeline admits.
    pub max_drivers: usize,
}

impl fmt::Debug for DriverFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverFactory")
            .field(
                "plan_nodes",
                &self.plan_nodes.iter().map(|n| n.id()).collect::<Vec<_>>(),
            )
            .field("has_consumer", &self.consumer_supplier.is_some())
            .field("input_driver", &self.input_driver)
            .field("output_driver", &self.output_driver)
            .field("max_drivers", &self.max_drivers)
            .finish()
    }
}

impl DriverFactory {
    pub(crate) fn new(consumer_supplier: Option<OperatorSupplier>) -> Self {
        DriverFactory {
            plan_nodes: Vec::new(),
            consumer_supplier,
            input_driver: false,
            output_driver: false,
            max_drivers: 1,
        }
    }

    /// Materialize one driver for this pipeline.
    ///
    /// `num_drivers` reports the runtime's resolved driver count for a
    /// pipeline id; it sizes the local-merge sources fed by the next
    /// pipeline and the local exchange queues read by this one.
    pub fn create_driver(
        &self,
        ctx: DriverContext,
        exchange_client: Option<Arc<dyn ExchangeClient>>,
        num_drivers: &dyn Fn(usize) -> usize,
    ) -> Result<Driver> {
        let mut operators = Vec::with_capacity(self.plan_nodes.len() + 1);
        let mut operator_id = 0;
        let mut idx = 0;

        while idx < self.plan_nodes.len() {
            let node = &self.plan_nodes[idx];
            let op = match &node.kind {
                PlanNodeKind::Filter(filter) => {
                    // A filter immediately followed by a projection fuses
                    // into one operator under a single id.
                    let projections = match self.plan_nodes.get(idx + 1).map(|n| &n.kind) {
                        Some(PlanNodeKind::Project(project)) => {
                            idx += 1;
                            Some(project.exprs.clone())
                        }
                        _ => None,
                    };
                    PhysicalOperator::FilterProject(FilterProjectOperator::try_new(
                        operator_id,
                        Some(filter.predicate.clone()),
                        projections,
                    )?)
                }
                PlanNodeKind::Project(project) => {
                    PhysicalOperator::FilterProject(FilterProjectOperator::try_new(
                        operator_id,
                        None,
                        Some(project.exprs.clone()),
                    )?)
                }
                PlanNodeKind::Values(values) => {
                    PhysicalOperator::Values(ValuesOperator::new(operator_id, values))
                }
                PlanNodeKind::TableScan(scan) => PhysicalOperator::TableScan(
                    TableScanOperator::new(operator_id, scan.table_handle.create_data_source()?),
                ),
                PlanNodeKind::TableWrite(write) => {
                    let writer = write
                        .insert_table_handle
                        .connector_insert_table_handle()
                        .create_writer()?;
                    PhysicalOperator::TableWriter(TableWriterOperator::new(
                        operator_id,
                        write.columns.clone(),
                        writer,
                    ))
                }
                PlanNodeKind::MergeExchange(merge) => {
                    let client = exchange_client.clone().required("exchange client")?;
                    // Keeps the plan-node position as its operator id.
                    PhysicalOperator::MergeExchange(MergeExchangeOperator::new(
                        idx,
                        merge.fields.clone(),
                        client,
                    ))
                }
                PlanNodeKind::Exchange(_) => {
                    let client = exchange_client.clone().required("exchange client")?;
                    PhysicalOperator::Exchange(ExchangeOperator::new(operator_id, client))
                }
                PlanNodeKind::PartitionedOutput(output) => {
                    PhysicalOperator::PartitionedOutput(PartitionedOutputOperator::new(
                        operator_id,
                        output,
                        ctx.task().output_buffer()?,
                    ))
                }
                PlanNodeKind::HashJoin(join) => {
                    let bridge = ctx.task().get_or_create_join_bridge(node.id());
                    PhysicalOperator::HashProbe(HashProbeOperator::try_new(
                        operator_id,
                        join,
                        bridge,
                    )?)
                }
                PlanNodeKind::CrossJoin => {
                    let bridge = ctx.task().get_or_create_join_bridge(node.id());
                    PhysicalOperator::CrossJoin(CrossJoinOperator::new(operator_id, bridge))
                }
                PlanNodeKind::StreamingAggregation(agg) => PhysicalOperator::StreamingAggregate(
                    StreamingAggregateOperator::new(operator_id, agg),
                ),
                PlanNodeKind::Aggregation(agg) => {
                    PhysicalOperator::HashAggregate(HashAggregateOperator::new(operator_id, agg))
                }
                PlanNodeKind::TopN(top_n) => {
                    PhysicalOperator::TopN(TopNOperator::new(operator_id, top_n))
                }
                PlanNodeKind::Limit(limit) => {
                    PhysicalOperator::Limit(LimitOperator::new(operator_id, limit))
                }
                PlanNodeKind::OrderBy(order_by) => {
                    PhysicalOperator::OrderBy(OrderByOperator::new(operator_id, order_by))
                }
                PlanNodeKind::LocalMerge(merge) => {
                    // One merge source per driver of the upstream pipeline,
                    // which by construction is the next one planned.
                    let upstream_drivers = num_drivers(ctx.pipeline_id() + 1);
                    let sources = ctx.task().create_local_merge_sources(
                        upstream_drivers,
                        merge.schema.clone(),
                        ctx.task().memory_pool().clone(),
                    )?;
                    PhysicalOperator::LocalMerge(LocalMergeOperator::new(
                        operator_id,
                        merge,
                        sources,
                    ))
                }
                PlanNodeKind::MergeJoin(join) => {
                    let source = ctx.task().create_merge_join_source(node.id())?;
                    PhysicalOperator::MergeJoin(MergeJoinOperator::try_new(
                        operator_id,
                        join,
                        source,
                    )?)
                }
                PlanNodeKind::LocalPartition(partition) => {
                    let exchange = ctx.task().local_exchange(node.id());
                    exchange.ensure_queues(num_drivers(ctx.pipeline_id()))?;
                    PhysicalOperator::LocalExchangeSource(LocalExchangeSourceOperator::new(
                        operator_id,
                        partition,
                        exchange,
                        ctx.driver_id(),
                    ))
                }
                PlanNodeKind::Unnest(unnest) => {
                    PhysicalOperator::Unnest(UnnestOperator::new(operator_id, unnest))
                }
                PlanNodeKind::EnforceSingleRow(enforce) => PhysicalOperator::EnforceSingleRow(
                    EnforceSingleRowOperator::new(operator_id, enforce),
                ),
                PlanNodeKind::AssignUniqueId(assign) => PhysicalOperator::AssignUniqueId(
                    AssignUniqueIdOperator::try_new(operator_id, assign)?,
                ),
                PlanNodeKind::Extension(_) => {
                    registry::create_extension_operator(&ctx, operator_id, node)?
                }
            };

            operators.push(op);
            operator_id += 1;
            idx += 1;
        }

        if let Some(supplier) = &self.consumer_supplier {
            operators.push(supplier(operator_id, &ctx)?);
        }

        debug!(
            pipeline_id = ctx.pipeline_id(),
            driver_id = ctx.driver_id(),
            operators = operators.len(),
            "created driver"
        );
        Ok(Driver::new(ctx, operators))
    }
}

/// Driver progress after a `run` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Cannot proceed until the blocking condition clears; run again later.
    Blocked(BlockedReason),
    /// All operators finished.
    Finished,
}

enum StepResult {
    Progressed,
    Blocked(BlockedReason),
    Finished,
}

/// One running instance of a pipeline.
///
/// Operators execute cooperatively: the driver moves batches from each
/// operator into the next, draining from the sink end first. Thread
/// placement is the scheduler's concern, not the driver's.
#[derive(Debug)]
pub struct Driver {
    ctx: DriverContext,
    operators: Vec<PhysicalOperator>,
    /// Whether `no_more_input` has been delivered to each operator.
    upstream_done: Vec<bool>,
    /// Output of the terminal operator when no sink is attached.
    output: Vec<RecordBatch>,
}

impl Driver {
    fn new(ctx: DriverContext, operators: Vec<PhysicalOperator>) -> Self {
        let upstream_done = vec![false; operators.len()];
        Driver {
            ctx,
            operators,
            upstream_done,
            output: Vec::new(),
        }
    }

    pub fn ctx(&self) -> &DriverContext {
        &self.ctx
    }

    pub fn operators(&self) -> &[PhysicalOperator] {
        &self.operators
    }

    /// Batches the terminal operator produced, for drivers without a sink.
    pub fn take_output(&mut self) -> Vec<RecordBatch> {
        std::mem::take(&mut self.output)
    }

    /// Run until the driver finishes or blocks.
    pub fn run(&mut self) -> Result<DriverState> {
        loop {
            match self.step()? {
                StepResult::Progressed => continue,
                StepResult::Blocked(reason) => return Ok(DriverState::Blocked(reason)),
                StepResult::Finished => return Ok(DriverState::Finished),
            }
        }
    }

    fn step(&mut self) -> Result<StepResult> {
        let num_operators = self.operators.len();
        let mut progressed = false;

        // Move batches between adjacent operators, sink end first so
        // downstream buffers drain before upstream refills them.
        for idx in (0..num_operators.saturating_sub(1)).rev() {
            let (upstream, downstream) = self.operators.split_at_mut(idx + 1);
            let op = &mut upstream[idx];
            let next = &mut downstream[0];

            if !next.needs_input() {
                continue;
            }
            if let Some(batch) = op.get_output()? {
                next.add_input(batch)?;
                progressed = true;
            } else if op.is_finished() && !self.upstream_done[idx + 1] {
                next.no_more_input()?;
                self.upstream_done[idx + 1] = true;
                progressed = true;
            }
        }

        if let Some(last) = self.operators.last_mut() {
            if let Some(batch) = last.get_output()? {
                self.output.push(batch);
                progressed = true;
            }
        }

        // The pipeline is done when its terminal operator is done; upstream
        // operators with undrained input (e.g. above a satisfied limit) are
        // abandoned.
        if self
            .operators
            .last()
            .map(|op| op.is_finished())
            .unwrap_or(true)
        {
            return Ok(StepResult::Finished);
        }
        if progressed {
            return Ok(StepResult::Progressed);
        }
        match self.operators.iter().find_map(|op| op.blocked()) {
            Some(reason) => Ok(StepResult::Blocked(reason)),
            None => Err(WeftError::new("Driver made no progress and is not blocked")),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::execution::operators::test_util::{
        int32_batch, int32_column, scan_node, test_schema, CollectingConsumer,
    };
    use crate::execution::operators::sink::CallbackSinkOperator;
    use crate::expr::physical::{PhysicalColumnExpr, PhysicalExpr};
    use crate::plan::PlanNode;

    use super::*;

    fn single_driver(factory: &DriverFactory, task: Arc<Task>) -> Driver {
        factory
            .create_driver(DriverContext::new(0, 0, task), None, &|_| 1)
            .unwrap()
    }

    fn column_exprs(indices: &[usize]) -> Vec<Arc<dyn PhysicalExpr>> {
        indices
            .iter()
            .map(|&idx| Arc::new(PhysicalColumnExpr::new(idx)) as Arc<dyn PhysicalExpr>)
            .collect()
    }

    #[test]
    fn fuses_filter_followed_by_project() {
        let scan = scan_node("0", Vec::new());
        let filter = PlanNode::filter("1", Arc::new(PhysicalColumnExpr::new(0)), scan);
        let project = PlanNode::project("2", column_exprs(&[0]), filter);

        let mut factory = DriverFactory::new(None);
        factory.plan_nodes = vec![
            project.sources()[0].sources()[0].clone(),
            project.sources()[0].clone(),
            project.clone(),
        ];

        let driver = single_driver(&factory, Task::new());
        let names: Vec<&str> = driver.operators().iter().map(|op| op.name()).collect();
        assert_eq!(vec!["TableScan", "FilterProject"], names);

        let ids: Vec<usize> = driver.operators().iter().map(|op| op.operator_id()).collect();
        assert_eq!(vec![0, 1], ids);
    }

    #[test]
    fn lone_filter_and_lone_project_stay_separate() {
        let scan = scan_node("0", Vec::new());
        let filter = PlanNode::filter("1", Arc::new(PhysicalColumnExpr::new(0)), scan);
        let limit = PlanNode::limit("2", 0, 10, false, filter);
        let project = PlanNode::project("3", column_exprs(&[0]), limit);

        let mut factory = DriverFactory::new(None);
        let mut nodes = Vec::new();
        let mut node = project.clone();
        loop {
            nodes.push(node.clone());
            match node.sources().first() {
                Some(source) => node = source.clone(),
                None => break,
            }
        }
        nodes.reverse();
        factory.plan_nodes = nodes;

        let driver = single_driver(&factory, Task::new());
        let names: Vec<&str> = driver.operators().iter().map(|op| op.name()).collect();
        assert_eq!(
            vec!["TableScan", "FilterProject", "Limit", "FilterProject"],
            names
        );
        let ids: Vec<usize> = driver.operators().iter().map(|op| op.operator_id()).collect();
        assert_eq!(vec![0, 1, 2, 3], ids);
    }

    #[test]
    fn sink_gets_next_operator_id() {
        let scan = scan_node("0", Vec::new());
        let consumer = Arc::new(CollectingConsumer::default());

        let mut factory = DriverFactory::new(Some(Box::new(move |operator_id, _ctx| {
            Ok(PhysicalOperator::CallbackSink(CallbackSinkOperator::new(
                operator_id,
                consumer.clone(),
            )))
        })));
        factory.plan_nodes = vec![scan];

        let driver = single_driver(&factory, Task::new());
        assert_eq!(2, driver.operators().len());
        assert_eq!("CallbackSink", driver.operators()[1].name());
        assert_eq!(1, driver.operators()[1].operator_id());
    }

    #[test]
    fn run_moves_batches_through_pipeline() {
        let scan = scan_node("0", vec![int32_batch(vec![1, 2, 3, 4, 5])]);
        let limit = PlanNode::limit("1", 1, 3, false, scan.clone());

        let mut factory = DriverFactory::new(None);
        factory.plan_nodes = vec![scan, limit];

        let mut driver = single_driver(&factory, Task::new());
        assert_eq!(DriverState::Finished, driver.run().unwrap());

        let output = driver.take_output();
        assert_eq!(1, output.len());
        assert_eq!(vec![2, 3, 4], int32_column(&output[0], 0));
    }

    #[test]
    fn run_delivers_to_consumer_sink() {
        let scan = scan_node("0", vec![int32_batch(vec![7]), int32_batch(vec![8])]);
        let consumer = Arc::new(CollectingConsumer::default());
        let sink_consumer = consumer.clone();

        let mut factory = DriverFactory::new(Some(Box::new(move |operator_id, _ctx| {
            Ok(PhysicalOperator::CallbackSink(CallbackSinkOperator::new(
                operator_id,
                sink_consumer.clone(),
            )))
        })));
        factory.plan_nodes = vec![scan];

        let mut driver = single_driver(&factory, Task::new());
        assert_eq!(DriverState::Finished, driver.run().unwrap());

        assert!(driver.take_output().is_empty());
        assert_eq!(2, consumer.batches.lock().len());
        assert!(*consumer.finished.lock());
    }

    #[test]
    fn merge_exchange_id_is_plan_node_position() {
        use crate::execution::operators::test_util::QueueExchangeClient;
        use crate::plan::nodes::SortField;

        // After a fusion the operator counter falls behind the plan-node
        // position; merge exchange keeps the position.
        let scan = scan_node("0", Vec::new());
        let filter = PlanNode::filter("1", Arc::new(PhysicalColumnExpr::new(0)), scan);
        let project = PlanNode::project("2", column_exprs(&[0]), filter);
        let merge_exchange = PlanNode::merge_exchange("3", test_schema(), vec![SortField::asc(0)]);

        let mut factory = DriverFactory::new(None);
        factory.plan_nodes = vec![
            project.sources()[0].clone(),
            project.clone(),
            merge_exchange,
        ];

        let client: Arc<dyn ExchangeClient> = Arc::new(QueueExchangeClient::new(Vec::new()));
        let driver = factory
            .create_driver(DriverContext::new(0, 0, Task::new()), Some(client), &|_| 1)
            .unwrap();

        let names: Vec<&str> = driver.operators().iter().map(|op| op.name()).collect();
        assert_eq!(vec!["FilterProject", "MergeExchange"], names);
        let ids: Vec<usize> = driver.operators().iter().map(|op| op.operator_id()).collect();
        assert_eq!(vec![0, 2], ids);
    }

    #[test]
    fn missing_exchange_client_is_an_error() {
        let exchange = PlanNode::exchange("0", test_schema());
        let mut factory = DriverFactory::new(None);
        factory.plan_nodes = vec![exchange];

        let err = factory
            .create_driver(DriverContext::new(0, 0, Task::new()), None, &|_| 1)
            .unwrap_err();
        assert_eq!("Missing required field: exchange client", err.to_string());
    }
}
