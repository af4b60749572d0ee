use std::any::Any;
use std::fmt::Debug;

/// A plan node defined outside the core engine.
///
/// Extension nodes ride in the plan tree like any other node; the id and
/// sources live on the enclosing [`PlanNode`](super::PlanNode). Turning an
/// extension node into an operator goes through the registry in
/// `execution::operators::registry`.
pub trait ExtensionPlanNode: Debug + Send + Sync {
    /// Name used in explain output and diagnostics.
    fn name(&self) -> &str;

    /// Downcast hook for registered operator factories.
    fn as_any(&self) -> &dyn Any;
}
