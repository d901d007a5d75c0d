//! Domain entities for agents, deployments, and execution tracking.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Timestamp, new_id, now};

/// Running state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Stopped,
    Running,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Stopped => "STOPPED",
            AgentStatus::Running => "RUNNING",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "STOPPED" => Ok(AgentStatus::Stopped),
            "RUNNING" => Ok(AgentStatus::Running),
            other => Err(format!("unknown agent status: {other}")),
        }
    }
}

/// State of a deployment on an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Stopped,
    Error,
    Running,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Stopped => "STOPPED",
            DeploymentStatus::Error => "ERROR",
            DeploymentStatus::Running => "RUNNING",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "STOPPED" => Ok(DeploymentStatus::Stopped),
            "ERROR" => Ok(DeploymentStatus::Error),
            "RUNNING" => Ok(DeploymentStatus::Running),
            other => Err(format!("unknown deployment status: {other}")),
        }
    }
}

/// Lifecycle status shared by executions and execution steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Ready,
    Running,
    Done,
    Error,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Ready => "READY",
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Done => "DONE",
            ExecutionStatus::Error => "ERROR",
            ExecutionStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "READY" => Ok(ExecutionStatus::Ready),
            "RUNNING" => Ok(ExecutionStatus::Running),
            "DONE" => Ok(ExecutionStatus::Done),
            "ERROR" => Ok(ExecutionStatus::Error),
            "CANCELLED" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// How a deployment's runs are initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartType {
    /// Run once, immediately after the deployment is armed.
    OnDeploy,
    /// Run on a recurring cron schedule.
    ScheduledCron,
    /// Run only on an explicit trigger.
    Manual,
}

impl StartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartType::OnDeploy => "ON_DEPLOY",
            StartType::ScheduledCron => "SCHEDULED_CRON",
            StartType::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for StartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StartType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ON_DEPLOY" => Ok(StartType::OnDeploy),
            "SCHEDULED_CRON" => Ok(StartType::ScheduledCron),
            "MANUAL" => Ok(StartType::Manual),
            other => Err(format!("unknown start type: {other}")),
        }
    }
}

/// Minimum severity a deployment admits into its execution step logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Whether a message at `level` passes this configured minimum.
    pub fn admits(&self, level: LogLevel) -> bool {
        level >= *self
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// A versioned pipeline flow that can be deployed to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowVersion {
    pub id: String,
    pub flow_id: String,
    pub name: String,
    pub version: String,
    pub start_type: StartType,
    /// Cron expression, required when `start_type` is `ScheduledCron`.
    pub start_expression: Option<String>,
}

impl FlowVersion {
    pub fn new(
        flow_id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        start_type: StartType,
    ) -> Self {
        Self {
            id: new_id(),
            flow_id: flow_id.into(),
            name: name.into(),
            version: version.into(),
            start_type,
            start_expression: None,
        }
    }

    pub fn with_start_expression(mut self, expression: impl Into<String>) -> Self {
        self.start_expression = Some(expression.into());
        self
    }
}

impl fmt::Display for FlowVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.name, self.version)
    }
}

/// The binding of one flow version to one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub agent_id: String,
    pub flow_version: FlowVersion,
    pub status: DeploymentStatus,
    /// Last arming or failure message; empty when healthy.
    pub message: String,
    /// Minimum level admitted into execution step logs for this deployment.
    pub log_level: LogLevel,
}

impl Deployment {
    pub fn new(agent_id: impl Into<String>, flow_version: FlowVersion) -> Self {
        Self {
            id: new_id(),
            agent_id: agent_id.into(),
            flow_version,
            status: DeploymentStatus::Stopped,
            message: String::new(),
            log_level: LogLevel::Info,
        }
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_version.flow_id
    }

    pub fn flow_name(&self) -> &str {
        &self.flow_version.name
    }
}

/// A named runtime host for deployments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub status: AgentStatus,
    pub deployments: Vec<Deployment>,
}

impl Agent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            status: AgentStatus::Stopped,
            deployments: Vec::new(),
        }
    }

    /// The deployment bound to `flow_version_id`, if any.
    pub fn deployment_for(&self, flow_version_id: &str) -> Option<&Deployment> {
        self.deployments
            .iter()
            .find(|d| d.flow_version.id == flow_version_id)
    }
}

/// One run of a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub agent_id: String,
    pub flow_id: String,
    pub agent_name: String,
    pub flow_name: String,
    pub status: ExecutionStatus,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    pub last_update_time: Option<Timestamp>,
}

impl Execution {
    /// A new execution in `RUNNING` state, stamped with the current time.
    pub fn begin(
        id: impl Into<String>,
        agent_id: impl Into<String>,
        flow_id: impl Into<String>,
        agent_name: impl Into<String>,
        flow_name: impl Into<String>,
    ) -> Self {
        let started = now();
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            flow_id: flow_id.into(),
            agent_name: agent_name.into(),
            flow_name: flow_name.into(),
            status: ExecutionStatus::Running,
            start_time: Some(started),
            end_time: None,
            last_update_time: Some(started),
        }
    }
}

/// Per-stage status within one execution, keyed by flow step identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub id: String,
    pub execution_id: String,
    pub flow_step_id: String,
    pub component_name: String,
    pub status: ExecutionStatus,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    pub entities_processed: u64,
    pub messages_received: u64,
    pub messages_produced: u64,
}

impl ExecutionStep {
    pub fn new(
        execution_id: impl Into<String>,
        flow_step_id: impl Into<String>,
        component_name: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            execution_id: execution_id.into(),
            flow_step_id: flow_step_id.into(),
            component_name: component_name.into(),
            status: ExecutionStatus::Ready,
            start_time: None,
            end_time: None,
            entities_processed: 0,
            messages_received: 0,
            messages_produced: 0,
        }
    }
}

/// One log line attributed to an execution step. Never mutated once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStepLog {
    pub id: String,
    pub execution_step_id: String,
    pub level: LogLevel,
    pub message: String,
    pub create_time: Timestamp,
}

impl ExecutionStepLog {
    pub fn new(
        execution_step_id: impl Into<String>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            execution_step_id: execution_step_id.into(),
            level,
            message: message.into(),
            create_time: now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_admits_at_or_above_minimum() {
        assert!(LogLevel::Info.admits(LogLevel::Info));
        assert!(LogLevel::Info.admits(LogLevel::Warn));
        assert!(LogLevel::Info.admits(LogLevel::Error));
        assert!(!LogLevel::Info.admits(LogLevel::Debug));
        assert!(LogLevel::Debug.admits(LogLevel::Debug));
        assert!(!LogLevel::Error.admits(LogLevel::Warn));
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in [
            ExecutionStatus::Ready,
            ExecutionStatus::Running,
            ExecutionStatus::Done,
            ExecutionStatus::Error,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>().unwrap(), status);
        }
        for start_type in [StartType::OnDeploy, StartType::ScheduledCron, StartType::Manual] {
            assert_eq!(start_type.as_str().parse::<StartType>().unwrap(), start_type);
        }
    }

    #[test]
    fn test_deployment_for_matches_flow_version_id() {
        let flow_version = FlowVersion::new("flow-1", "extract", "1.0", StartType::Manual);
        let version_id = flow_version.id.clone();
        let mut agent = Agent::new("edge-agent");
        agent
            .deployments
            .push(Deployment::new(agent.id.clone(), flow_version));

        assert!(agent.deployment_for(&version_id).is_some());
        assert!(agent.deployment_for("missing").is_none());
    }

    #[test]
    fn test_execution_begins_running_with_start_time() {
        let execution = Execution::begin("run-1", "agent-1", "flow-1", "edge", "extract");
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert!(execution.start_time.is_some());
        assert!(execution.end_time.is_none());
    }
}
