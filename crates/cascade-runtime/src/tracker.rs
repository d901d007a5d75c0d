//! Execution lifecycle tracking.
//!
//! The flow engine reports progress through the `FlowObserver` callbacks.
//! `ExecutionTracker` fans each callback out to an ordered list of
//! observers; adding an observer (say, a metrics emitter) is additive and
//! touches nothing else. Two observers ship here: `LoggingObserver` traces
//! lifecycle points, `RecordingObserver` derives entity state and enqueues
//! it on the recorder queue.
//!
//! Callbacks for different steps of the same execution arrive concurrently
//! from different worker tasks; callbacks for a single step arrive serially.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use cascade_types::{
    Agent, Deployment, Execution, ExecutionStatus, ExecutionStep, ExecutionStepLog, LogLevel, now,
};

use crate::flow::{StepContext, StepStatistics};
use crate::recorder::{ExecutionRecord, RecorderHandle};

/// Observer of flow lifecycle callbacks.
///
/// Implementations must be safe to invoke from multiple worker tasks at
/// once for different steps.
pub trait FlowObserver: Send + Sync {
    /// The flow is about to run under `execution_id`.
    fn before_flow(&self, execution_id: &str);

    /// A step's component has been wired into the graph.
    fn flow_step_started(&self, execution_id: &str, step: &StepContext);

    /// A step is about to handle a unit of work.
    fn before_handle(&self, execution_id: &str, step: &StepContext);

    /// A step finished handling a unit of work.
    fn after_handle(
        &self,
        execution_id: &str,
        step: &StepContext,
        error: Option<&str>,
        stats: Option<StepStatistics>,
    );

    /// A step will receive no further work.
    fn flow_step_finished(
        &self,
        execution_id: &str,
        step: &StepContext,
        error: Option<&str>,
        cancelled: bool,
        stats: Option<StepStatistics>,
    );

    /// A step failed strictly in post-processing, after normal completion.
    fn flow_step_failed_on_complete(&self, execution_id: &str, step: &StepContext, error: &str);

    /// The flow has finished; all step callbacks have been delivered.
    fn after_flow(&self, execution_id: &str);

    /// A component emitted a log line.
    fn log(&self, execution_id: &str, level: LogLevel, step: &StepContext, message: &str);
}

/// Ordered fan-out over a list of observers.
pub struct ExecutionTracker {
    observers: Vec<Arc<dyn FlowObserver>>,
}

impl ExecutionTracker {
    pub fn new(observers: Vec<Arc<dyn FlowObserver>>) -> Self {
        Self { observers }
    }

    /// Append an observer; it is invoked after all existing ones.
    pub fn with_observer(mut self, observer: Arc<dyn FlowObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl FlowObserver for ExecutionTracker {
    fn before_flow(&self, execution_id: &str) {
        for observer in &self.observers {
            observer.before_flow(execution_id);
        }
    }

    fn flow_step_started(&self, execution_id: &str, step: &StepContext) {
        for observer in &self.observers {
            observer.flow_step_started(execution_id, step);
        }
    }

    fn before_handle(&self, execution_id: &str, step: &StepContext) {
        for observer in &self.observers {
            observer.before_handle(execution_id, step);
        }
    }

    fn after_handle(
        &self,
        execution_id: &str,
        step: &StepContext,
        error: Option<&str>,
        stats: Option<StepStatistics>,
    ) {
        for observer in &self.observers {
            observer.after_handle(execution_id, step, error, stats);
        }
    }

    fn flow_step_finished(
        &self,
        execution_id: &str,
        step: &StepContext,
        error: Option<&str>,
        cancelled: bool,
        stats: Option<StepStatistics>,
    ) {
        for observer in &self.observers {
            observer.flow_step_finished(execution_id, step, error, cancelled, stats);
        }
    }

    fn flow_step_failed_on_complete(&self, execution_id: &str, step: &StepContext, error: &str) {
        for observer in &self.observers {
            observer.flow_step_failed_on_complete(execution_id, step, error);
        }
    }

    fn after_flow(&self, execution_id: &str) {
        for observer in &self.observers {
            observer.after_flow(execution_id);
        }
    }

    fn log(&self, execution_id: &str, level: LogLevel, step: &StepContext, message: &str) {
        for observer in &self.observers {
            observer.log(execution_id, level, step, message);
        }
    }
}

/// Traces every lifecycle point. Stateless.
pub struct LoggingObserver {
    flow_name: String,
}

impl LoggingObserver {
    pub fn new(deployment: &Deployment) -> Self {
        Self {
            flow_name: deployment.flow_version.to_string(),
        }
    }
}

impl FlowObserver for LoggingObserver {
    fn before_flow(&self, execution_id: &str) {
        info!("Flow '{}' starting execution {execution_id}", self.flow_name);
    }

    fn flow_step_started(&self, execution_id: &str, step: &StepContext) {
        debug!(
            "Step '{}' ready in execution {execution_id}",
            step.component_name
        );
    }

    fn before_handle(&self, _execution_id: &str, step: &StepContext) {
        debug!("Step '{}' handling work", step.component_name);
    }

    fn after_handle(
        &self,
        _execution_id: &str,
        step: &StepContext,
        error: Option<&str>,
        _stats: Option<StepStatistics>,
    ) {
        if let Some(error) = error {
            debug!("Step '{}' failed a unit of work: {error}", step.component_name);
        } else {
            debug!("Step '{}' finished a unit of work", step.component_name);
        }
    }

    fn flow_step_finished(
        &self,
        execution_id: &str,
        step: &StepContext,
        error: Option<&str>,
        cancelled: bool,
        _stats: Option<StepStatistics>,
    ) {
        debug!(
            "Step '{}' finished in execution {execution_id} (error: {}, cancelled: {cancelled})",
            step.component_name,
            error.unwrap_or("none"),
        );
    }

    fn flow_step_failed_on_complete(&self, _execution_id: &str, step: &StepContext, error: &str) {
        debug!(
            "Step '{}' failed on completion: {error}",
            step.component_name
        );
    }

    fn after_flow(&self, execution_id: &str) {
        info!("Flow '{}' finished execution {execution_id}", self.flow_name);
    }

    fn log(&self, _execution_id: &str, level: LogLevel, step: &StepContext, message: &str) {
        debug!("[{level}] {}: {message}", step.component_name);
    }
}

/// Derives execution and step state from callbacks and enqueues every
/// mutation on the recorder queue.
///
/// Scoped to one deployment; the step map is reset at `before_flow` and
/// supports concurrent creation and mutation of different steps.
pub struct RecordingObserver {
    agent_id: String,
    agent_name: String,
    deployment: Deployment,
    recorder: RecorderHandle,
    execution: Mutex<Option<Execution>>,
    steps: DashMap<String, ExecutionStep>,
}

impl RecordingObserver {
    pub fn new(agent: &Agent, deployment: Deployment, recorder: RecorderHandle) -> Self {
        Self {
            agent_id: agent.id.clone(),
            agent_name: agent.name.clone(),
            deployment,
            recorder,
            execution: Mutex::new(None),
            steps: DashMap::new(),
        }
    }

    fn record_step(&self, step: &ExecutionStep) {
        self.recorder.record(ExecutionRecord::Step(step.clone()));
    }
}

impl FlowObserver for RecordingObserver {
    fn before_flow(&self, execution_id: &str) {
        self.steps.clear();
        let execution = Execution::begin(
            execution_id,
            &self.agent_id,
            self.deployment.flow_id(),
            &self.agent_name,
            self.deployment.flow_name(),
        );
        self.recorder
            .record(ExecutionRecord::Execution(execution.clone()));
        *self.execution.lock() = Some(execution);
    }

    fn flow_step_started(&self, execution_id: &str, step: &StepContext) {
        let mut entry = self
            .steps
            .entry(step.flow_step_id.clone())
            .or_insert_with(|| {
                ExecutionStep::new(execution_id, &step.flow_step_id, &step.component_name)
            });
        entry.status = ExecutionStatus::Ready;
        self.record_step(&entry);
    }

    fn before_handle(&self, _execution_id: &str, step: &StepContext) {
        let Some(mut entry) = self.steps.get_mut(&step.flow_step_id) else {
            error!(
                "before_handle for unknown step '{}'; flow engine callback ordering defect",
                step.flow_step_id
            );
            return;
        };
        if entry.start_time.is_none() {
            entry.start_time = Some(now());
        }
        // An error is sticky here: a later unit of work must not flip the
        // step back to RUNNING.
        if entry.status != ExecutionStatus::Error {
            entry.status = ExecutionStatus::Running;
        }
        self.record_step(&entry);
    }

    fn after_handle(
        &self,
        _execution_id: &str,
        step: &StepContext,
        error: Option<&str>,
        stats: Option<StepStatistics>,
    ) {
        let Some(mut entry) = self.steps.get_mut(&step.flow_step_id) else {
            error!(
                "after_handle for unknown step '{}'; flow engine callback ordering defect",
                step.flow_step_id
            );
            return;
        };
        entry.status = if error.is_some() {
            ExecutionStatus::Error
        } else {
            ExecutionStatus::Ready
        };
        if let Some(stats) = stats {
            entry.entities_processed = stats.entities_processed;
            entry.messages_received = stats.messages_received;
            entry.messages_produced = stats.messages_produced;
        }
        self.record_step(&entry);
    }

    fn flow_step_finished(
        &self,
        _execution_id: &str,
        step: &StepContext,
        error: Option<&str>,
        cancelled: bool,
        stats: Option<StepStatistics>,
    ) {
        // No-op when the step never reported readiness.
        let Some(mut entry) = self.steps.get_mut(&step.flow_step_id) else {
            return;
        };
        if entry.start_time.is_none() {
            entry.start_time = Some(now());
        }
        entry.end_time = Some(now());
        entry.status = if error.is_some() {
            ExecutionStatus::Error
        } else if cancelled {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Done
        };
        if let Some(stats) = stats {
            entry.entities_processed = stats.entities_processed;
            entry.messages_received = stats.messages_received;
            entry.messages_produced = stats.messages_produced;
        }
        self.record_step(&entry);
    }

    fn flow_step_failed_on_complete(&self, _execution_id: &str, step: &StepContext, _error: &str) {
        let Some(mut entry) = self.steps.get_mut(&step.flow_step_id) else {
            return;
        };
        entry.status = ExecutionStatus::Error;
        self.record_step(&entry);
    }

    fn after_flow(&self, _execution_id: &str) {
        let mut guard = self.execution.lock();
        let Some(execution) = guard.as_mut() else {
            error!("after_flow without a matching before_flow");
            return;
        };

        let mut saw_error = false;
        let mut saw_cancelled = false;
        for entry in self.steps.iter() {
            match entry.status {
                ExecutionStatus::Error => saw_error = true,
                ExecutionStatus::Cancelled => saw_cancelled = true,
                _ => {}
            }
        }
        execution.status = if saw_error {
            ExecutionStatus::Error
        } else if saw_cancelled {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Done
        };
        execution.end_time = Some(now());
        execution.last_update_time = Some(now());
        self.recorder
            .record(ExecutionRecord::Execution(execution.clone()));
    }

    fn log(&self, _execution_id: &str, level: LogLevel, step: &StepContext, message: &str) {
        if !self.deployment.log_level.admits(level) {
            return;
        }
        match self.steps.get(&step.flow_step_id) {
            Some(entry) => {
                self.recorder.record(ExecutionRecord::StepLog(
                    ExecutionStepLog::new(&entry.id, level, message),
                ));
            }
            None => error!(
                "Log line for step '{}' that never reported readiness; dropping it",
                step.flow_step_id
            ),
        }
    }
}
