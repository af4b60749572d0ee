use std::sync::Arc;

use tracing::debug;
use weft_error::{Result, WeftError};

use crate::plan::{PlanNode, PlanNodeKind};

use super::driver::{DriverContext, DriverFactory, OperatorSupplier};
use super::operators::join::cross_join::CrossJoinBuildOperator;
use super::operators::join::hash_join::HashBuildOperator;
use super::operators::local_exchange::LocalPartitionSinkOperator;
use super::operators::registry;
use super::operators::sink::{BatchConsumer, CallbackSinkOperator};
use super::operators::PhysicalOperator;

/// Translates a plan-node tree into driver factories, one per pipeline.
///
/// Factory 0 drives the plan root and produces the query output; every other
/// factory feeds an earlier one through the sink its `consumer_supplier`
/// builds. Factories are emitted in an order where consumers precede their
/// producers.
#[derive(Debug)]
pub struct LocalPlanner;

impl LocalPlanner {
    pub fn plan(
        root: &Arc<PlanNode>,
        final_consumer: Option<Arc<dyn BatchConsumer>>,
    ) -> Result<Vec<DriverFactory>> {
        let mut factories = Vec::new();

        let initial_sink = final_consumer.map(|consumer| -> OperatorSupplier {
            Box::new(move |operator_id, _ctx: &DriverContext| {
                Ok(PhysicalOperator::CallbackSink(CallbackSinkOperator::new(
                    operator_id,
                    consumer.clone(),
                )))
            })
        });

        Self::plan_node(root, None, initial_sink, &mut factories)?;
        factories[0].output_driver = true;

        for factory in factories.iter_mut() {
            factory.max_drivers = pipeline_max_drivers(&factory.plan_nodes)?;
        }

        debug!(pipelines = factories.len(), "planned driver factories");
        Ok(factories)
    }

    /// Recursive slice: sources are planned before the node itself, so each
    /// factory's `plan_nodes` ends up bottom-up.
    fn plan_node(
        node: &Arc<PlanNode>,
        current: Option<usize>,
        sink: Option<OperatorSupplier>,
        factories: &mut Vec<DriverFactory>,
    ) -> Result<()> {
        let current = match current {
            Some(idx) => idx,
            None => {
                factories.push(DriverFactory::new(sink));
                factories.len() - 1
            }
        };

        let sources = node.sources();
        if sources.is_empty() {
            factories[current].input_driver = true;
        } else {
            for (source_idx, source) in sources.iter().enumerate() {
                // A source runs in its own pipeline when its parent is a
                // barrier, or when it is any source past the first.
                let starts_new_pipeline = node.is_pipeline_barrier() || source_idx > 0;
                if starts_new_pipeline {
                    let child_sink = consumer_supplier_for(node).ok_or_else(|| {
                        WeftError::new(format!(
                            "Plan node requires a consumer for its source pipelines: {node}"
                        ))
                    })?;
                    Self::plan_node(source, None, Some(child_sink), factories)?;
                } else {
                    Self::plan_node(source, Some(current), None, factories)?;
                }
            }
        }

        factories[current].plan_nodes.push(node.clone());
        Ok(())
    }
}

/// Sink terminating a pipeline that feeds `parent`, chosen by the parent's
/// kind. `None` for parents whose sources fuse into the same pipeline.
fn consumer_supplier_for(parent: &Arc<PlanNode>) -> Option<OperatorSupplier> {
    match &parent.kind {
        PlanNodeKind::LocalMerge(_) => Some(Box::new(
            move |operator_id, ctx: &DriverContext| {
                let source = ctx.task().get_local_merge_source(ctx.driver_id())?;
                Ok(PhysicalOperator::CallbackSink(CallbackSinkOperator::new(
                    operator_id,
                    source,
                )))
            },
        )),
        PlanNodeKind::LocalPartition(partition) => {
            let node_id = parent.id.clone();
            let partition = partition.clone();
            Some(Box::new(move |operator_id, ctx: &DriverContext| {
                let exchange = ctx.task().local_exchange(&node_id);
                Ok(PhysicalOperator::LocalPartitionSink(
                    LocalPartitionSinkOperator::new(operator_id, &partition, exchange),
                ))
            }))
        }
        PlanNodeKind::HashJoin(_) => {
            let node_id = parent.id.clone();
            Some(Box::new(move |operator_id, ctx: &DriverContext| {
                let bridge = ctx.task().get_or_create_join_bridge(&node_id);
                Ok(PhysicalOperator::HashBuild(HashBuildOperator::new(
                    operator_id,
                    bridge,
                )))
            }))
        }
        PlanNodeKind::CrossJoin => {
            let node_id = parent.id.clone();
            Some(Box::new(move |operator_id, ctx: &DriverContext| {
                let bridge = ctx.task().get_or_create_join_bridge(&node_id);
                Ok(PhysicalOperator::CrossJoinBuild(
                    CrossJoinBuildOperator::new(operator_id, bridge),
                ))
            }))
        }
        PlanNodeKind::MergeJoin(_) => {
            let node_id = parent.id.clone();
            Some(Box::new(move |operator_id, ctx: &DriverContext| {
                let source = ctx.task().get_merge_join_source(&node_id)?;
                Ok(PhysicalOperator::CallbackSink(CallbackSinkOperator::new(
                    operator_id,
                    source,
                )))
            }))
        }
        _ => None,
    }
}

/// Driver cap for one pipeline: the intersection of its nodes' constraints.
///
/// `usize::MAX` means unconstrained; interpreting and clamping that is the
/// runtime's call.
fn pipeline_max_drivers(plan_nodes: &[Arc<PlanNode>]) -> Result<usize> {
    let mut count = usize::MAX;
    for node in plan_nodes {
        let declared = match &node.kind {
            // Final and single aggregations must see all rows of a group.
            PlanNodeKind::Aggregation(agg) if agg.step.is_single_threaded() => return Ok(1),
            PlanNodeKind::TopN(top_n) if !top_n.partial => return Ok(1),
            PlanNodeKind::Values(values) if !values.parallelizable => return Ok(1),
            PlanNodeKind::Limit(limit) if !limit.partial => return Ok(1),
            PlanNodeKind::OrderBy(order_by) if !order_by.partial => return Ok(1),
            PlanNodeKind::LocalMerge(_) => return Ok(1),
            PlanNodeKind::MergeExchange(_) => return Ok(1),
            PlanNodeKind::TableWrite(write)
                if !write
                    .insert_table_handle
                    .connector_insert_table_handle()
                    .supports_multi_threading() =>
            {
                return Ok(1)
            }
            PlanNodeKind::Extension(_) => registry::extension_max_drivers(node),
            _ => None,
        };
        if let Some(declared) = declared {
            if declared == 0 {
                return Err(WeftError::new(format!(
                    "Invalid driver cap 0 declared for plan node: {node}"
                )));
            }
            if declared == 1 {
                return Ok(1);
            }
            count = count.min(declared);
        }
    }
    Ok(count)
}
