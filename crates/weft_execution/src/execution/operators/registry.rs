use std::fmt::Debug;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use weft_error::{Result, WeftError};

use crate::execution::driver::DriverContext;
use crate::plan::PlanNode;

use super::PhysicalOperator;

/// Factory turning extension plan nodes into operators.
///
/// Registered factories are consulted in registration order; the first one
/// that returns an operator wins. A factory that does not recognize a node
/// returns `Ok(None)`.
pub trait ExtensionOperatorFactory: Debug + Send + Sync {
    fn create(
        &self,
        ctx: &DriverContext,
        operator_id: usize,
        node: &Arc<PlanNode>,
    ) -> Result<Option<PhysicalOperator>>;

    /// Driver cap declared for a recognized node, if any.
    fn max_drivers(&self, _node: &Arc<PlanNode>) -> Option<usize> {
        None
    }
}

static FACTORIES: Lazy<RwLock<Vec<Arc<dyn ExtensionOperatorFactory>>>> =
    Lazy::new(|| RwLock::new(Vec::new()));

/// Register a factory for extension plan nodes. Registration is global and
/// additive.
pub fn register_extension_operator_factory(factory: Arc<dyn ExtensionOperatorFactory>) {
    FACTORIES.write().push(factory);
}

pub(crate) fn create_extension_operator(
    ctx: &DriverContext,
    operator_id: usize,
    node: &Arc<PlanNode>,
) -> Result<PhysicalOperator> {
    for factory in FACTORIES.read().iter() {
        if let Some(op) = factory.create(ctx, operator_id, node)? {
            return Ok(op);
        }
    }
    Err(WeftError::new(format!("Unsupported plan node: {node}")))
}

pub(crate) fn extension_max_drivers(node: &Arc<PlanNode>) -> Option<usize> {
    FACTORIES.read().iter().find_map(|f| f.max_drivers(node))
}
