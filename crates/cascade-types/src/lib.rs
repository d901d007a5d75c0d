//! Shared types for the Cascade flow orchestrator.
//!
//! Defines the domain model (agents, deployments, flow versions, executions,
//! steps, step logs), the status and start-type enums, and the persistence
//! collaborator traits implemented by storage backends.

pub mod error;
pub mod model;
pub mod persist;

pub use error::{Error, Result};
pub use model::{
    Agent, AgentStatus, Deployment, DeploymentStatus, Execution, ExecutionStatus, ExecutionStep,
    ExecutionStepLog, FlowVersion, LogLevel, StartType,
};
pub use persist::{ConfigurationStore, ExecutionSink};

use chrono::{DateTime, Utc};

/// Timestamp type used across entities.
pub type Timestamp = DateTime<Utc>;

/// Generate a fresh entity identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current time, as stamped on entities.
pub fn now() -> Timestamp {
    Utc::now()
}
