//! The flow runtime collaborator boundary.
//!
//! The flow graph engine — the component wiring, message passing, and
//! per-component transform logic — lives outside this crate. The orchestrator
//! talks to it through `FlowRuntime`, and the engine reports lifecycle
//! progress back through the `FlowObserver` callbacks (see `tracker`).

use std::sync::Arc;

use async_trait::async_trait;

use cascade_types::Deployment;

use crate::error::Result;
use crate::tracker::ExecutionTracker;

/// Identity of one component instance within a flow graph, as passed to
/// tracker callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepContext {
    pub flow_step_id: String,
    pub component_name: String,
}

impl StepContext {
    pub fn new(flow_step_id: impl Into<String>, component_name: impl Into<String>) -> Self {
        Self {
            flow_step_id: flow_step_id.into(),
            component_name: component_name.into(),
        }
    }
}

/// Snapshot of a component's counters at a callback point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepStatistics {
    pub entities_processed: u64,
    pub messages_received: u64,
    pub messages_produced: u64,
}

/// One deployment's live flow graph engine.
///
/// A deployment has at most one live `FlowRuntime` at a time; the
/// orchestrator constructs it at arming time and stops it at undeploy or
/// agent shutdown.
#[async_trait]
pub trait FlowRuntime: Send + Sync {
    /// The deployment this runtime executes.
    fn deployment(&self) -> &Deployment;

    /// Begin executing the flow under the given run identifier.
    async fn start(&self, execution_id: &str) -> Result<()>;

    /// Block until the in-progress run completes.
    async fn wait_for_completion(&self) -> Result<()>;

    /// Request the runtime stop; running steps observe cancellation and
    /// report themselves `CANCELLED` through the normal callbacks.
    async fn stop(&self) -> Result<()>;
}

/// Builds a `FlowRuntime` for a deployment, bound to the tracker that will
/// observe its lifecycle. The seam at which a concrete flow engine plugs in.
#[async_trait]
pub trait FlowRuntimeFactory: Send + Sync {
    async fn create(
        &self,
        deployment: Deployment,
        tracker: Arc<ExecutionTracker>,
    ) -> Result<Arc<dyn FlowRuntime>>;
}
