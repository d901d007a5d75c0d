//! Persistence collaborator traits.
//!
//! Two traits split the storage surface the way the runtime consumes it:
//! configuration (agents, deployments, flow versions — written synchronously
//! by the orchestrator on every state transition) and execution records
//! (written only by the recorder queue's single consumer).

use crate::model::{Agent, Deployment, Execution, ExecutionStep, ExecutionStepLog, FlowVersion};
use crate::Result;

/// Storage for agent and deployment configuration.
///
/// All writes are upserts keyed by entity id.
pub trait ConfigurationStore: Send + Sync {
    /// Persist an agent's current state.
    fn save_agent(&self, agent: &Agent) -> Result<()>;

    /// Persist a deployment's current state.
    fn save_deployment(&self, deployment: &Deployment) -> Result<()>;

    /// Remove a deployment's persisted record.
    fn delete_deployment(&self, deployment: &Deployment) -> Result<()>;

    /// Reload the latest configuration for a flow version.
    ///
    /// Returns the stored configuration when one exists, otherwise the
    /// given value unchanged (a version that has never been persisted).
    fn refresh(&self, flow_version: &FlowVersion) -> Result<FlowVersion>;
}

/// Sink for execution lifecycle records.
///
/// Upsert-by-id semantics; called only from the recorder queue's consumer,
/// so implementations may assume single-threaded write access.
pub trait ExecutionSink: Send + Sync {
    fn save_execution(&self, execution: &Execution) -> Result<()>;

    fn save_step(&self, step: &ExecutionStep) -> Result<()>;

    fn save_step_log(&self, log: &ExecutionStepLog) -> Result<()>;
}
