//! Agent orchestration.
//!
//! `AgentHost` is the single authority over an agent's running state and its
//! active deployments: it arms schedules, admits manual triggers, owns the
//! recorder consumer and the watchdog, and persists every agent and
//! deployment transition. Structural state lives behind one async mutex, so
//! `start`/`stop`/`deploy`/`undeploy`/`trigger_now` are mutually exclusive
//! and idempotent under concurrent invocation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use cascade_types::{
    Agent, AgentStatus, ConfigurationStore, Deployment, DeploymentStatus, ExecutionSink,
    FlowVersion, StartType, new_id,
};

use crate::cron::CronSchedule;
use crate::error::{Result, RuntimeError, root_cause_message};
use crate::flow::{FlowRuntime, FlowRuntimeFactory};
use crate::options::RuntimeOptions;
use crate::recorder::{AsyncRecorder, RecorderHandle};
use crate::tracker::{ExecutionTracker, FlowObserver, LoggingObserver, RecordingObserver};

/// Top-level lifecycle manager for one agent.
pub struct AgentHost {
    config_store: Arc<dyn ConfigurationStore>,
    sink: Arc<dyn ExecutionSink>,
    factory: Arc<dyn FlowRuntimeFactory>,
    options: RuntimeOptions,
    inner: Mutex<HostState>,
}

/// Structural state, mutated only while holding the host mutex.
struct HostState {
    agent: Agent,
    started: bool,
    recorder: Option<AsyncRecorder>,
    watchdog: Option<JoinHandle<()>>,
    /// Deployment id → live flow runtime.
    runtimes: HashMap<String, Arc<dyn FlowRuntime>>,
    /// Deployment id → live schedule or in-flight run task.
    schedules: HashMap<String, JoinHandle<()>>,
}

impl AgentHost {
    pub fn new(
        agent: Agent,
        config_store: Arc<dyn ConfigurationStore>,
        sink: Arc<dyn ExecutionSink>,
        factory: Arc<dyn FlowRuntimeFactory>,
        options: RuntimeOptions,
    ) -> Self {
        Self {
            config_store,
            sink,
            factory,
            options,
            inner: Mutex::new(HostState {
                agent,
                started: false,
                recorder: None,
                watchdog: None,
                runtimes: HashMap::new(),
                schedules: HashMap::new(),
            }),
        }
    }

    /// Start the agent: spawn the recorder consumer, arm every configured
    /// deployment in order, start the watchdog, then persist status
    /// `RUNNING` — last, so the persisted status reflects true readiness.
    ///
    /// Idempotent; a second call (including a concurrent one) is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.inner.lock().await;
        if state.started {
            return Ok(());
        }
        info!("Agent '{}' is being started", state.agent.name);

        let recorder = AsyncRecorder::spawn(self.sink.clone());
        let recorder_handle = recorder.handle();
        state.recorder = Some(recorder);

        let mut deployments = std::mem::take(&mut state.agent.deployments);
        for deployment in &mut deployments {
            self.arm(&mut state, deployment, recorder_handle.clone())
                .await;
        }
        state.agent.deployments = deployments;

        state.watchdog = Some(spawn_watchdog(self.options.watchdog_interval));

        state.agent.status = AgentStatus::Running;
        self.config_store.save_agent(&state.agent)?;
        state.started = true;
        info!("Agent '{}' has been started", state.agent.name);
        Ok(())
    }

    /// Stop the agent: cancel the watchdog, stop every deployment (failures
    /// isolated), drain the recorder, persist status `STOPPED`.
    ///
    /// Idempotent; a no-op when not started.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.inner.lock().await;
        if !state.started {
            return Ok(());
        }
        info!("Agent '{}' is being stopped", state.agent.name);

        if let Some(watchdog) = state.watchdog.take() {
            watchdog.abort();
        }

        let ids: Vec<String> = state.agent.deployments.iter().map(|d| d.id.clone()).collect();
        for id in ids {
            stop_deployment(&mut state, &id).await;
        }

        // Drain-then-halt: every record the stopped deployments enqueued is
        // owed to storage before the agent reports itself stopped.
        if let Some(recorder) = state.recorder.take() {
            recorder.shutdown().await;
        }

        state.agent.status = AgentStatus::Stopped;
        self.config_store.save_agent(&state.agent)?;
        state.started = false;
        info!("Agent '{}' has been stopped", state.agent.name);
        Ok(())
    }

    pub async fn is_started(&self) -> bool {
        self.inner.lock().await.started
    }

    /// Snapshot of the agent's current state, deployments included.
    pub async fn agent(&self) -> Agent {
        self.inner.lock().await.agent.clone()
    }

    /// Deploy a flow version to this agent.
    ///
    /// Idempotent by flow-version identity: an existing deployment is
    /// returned unchanged. A new one is persisted, registered in insertion
    /// order, and — when the agent is running — armed immediately.
    pub async fn deploy(&self, flow_version: FlowVersion) -> Result<Deployment> {
        let mut state = self.inner.lock().await;
        if let Some(existing) = state.agent.deployment_for(&flow_version.id) {
            return Ok(existing.clone());
        }

        let mut deployment = Deployment::new(state.agent.id.clone(), flow_version);
        self.config_store.save_deployment(&deployment)?;

        if let Some(recorder_handle) = state.recorder.as_ref().map(AsyncRecorder::handle) {
            self.arm(&mut state, &mut deployment, recorder_handle).await;
        }
        state.agent.deployments.push(deployment.clone());
        Ok(deployment)
    }

    /// Stop a deployment, remove it from the agent, and delete its
    /// persisted record.
    pub async fn undeploy(&self, deployment: &Deployment) -> Result<()> {
        let mut state = self.inner.lock().await;
        stop_deployment(&mut state, &deployment.id).await;
        state.agent.deployments.retain(|d| d.id != deployment.id);
        self.config_store.delete_deployment(deployment)?;
        info!("Flow '{}' has been undeployed", deployment.flow_version.name);
        Ok(())
    }

    /// Schedule an immediate one-shot run for a deployment.
    ///
    /// Returns a fresh run identifier, or `None` when a run is already
    /// pending or executing for the deployment — the single admission
    /// control point preventing overlapping manual runs.
    pub async fn trigger_now(&self, deployment_id: &str) -> Option<String> {
        let mut state = self.inner.lock().await;
        if let Some(handle) = state.schedules.get(deployment_id) {
            if !handle.is_finished() {
                return None;
            }
        }
        let runtime = state.runtimes.get(deployment_id)?.clone();

        let execution_id = new_id();
        info!(
            "Scheduling '{}' on '{}' for now",
            runtime.deployment().flow_version,
            state.agent.name
        );
        let handle = spawn_run(runtime, execution_id.clone());
        state.schedules.insert(deployment_id.to_string(), handle);
        Some(execution_id)
    }

    /// Arm a deployment's schedule, converting any failure into deployment
    /// status `ERROR` with the root cause attached. Arming failures never
    /// propagate and never abort the loop over other deployments.
    async fn arm(
        &self,
        state: &mut HostState,
        deployment: &mut Deployment,
        recorder: RecorderHandle,
    ) {
        info!(
            "Deploying '{}' to '{}'",
            deployment.flow_version, state.agent.name
        );
        match self.try_arm(state, deployment, recorder).await {
            Ok(()) => {
                deployment.message.clear();
                info!("Flow '{}' has been deployed", deployment.flow_version.name);
            }
            Err(e) => {
                warn!("Failed to arm '{}': {e}", deployment.flow_version.name);
                deployment.status = DeploymentStatus::Error;
                deployment.message = root_cause_message(&e);
            }
        }
        if let Err(e) = self.config_store.save_deployment(deployment) {
            warn!(
                "Failed to persist deployment '{}': {e}",
                deployment.flow_version.name
            );
        }
    }

    async fn try_arm(
        &self,
        state: &mut HostState,
        deployment: &mut Deployment,
        recorder: RecorderHandle,
    ) -> Result<()> {
        deployment.flow_version = self.config_store.refresh(&deployment.flow_version)?;

        let observers: Vec<Arc<dyn FlowObserver>> = vec![
            Arc::new(LoggingObserver::new(deployment)),
            Arc::new(RecordingObserver::new(
                &state.agent,
                deployment.clone(),
                recorder,
            )),
        ];
        let tracker = Arc::new(ExecutionTracker::new(observers));
        let runtime = self.factory.create(deployment.clone(), tracker).await?;
        state.runtimes.insert(deployment.id.clone(), runtime.clone());

        match deployment.flow_version.start_type {
            StartType::OnDeploy => {
                let handle = spawn_run(runtime, new_id());
                state.schedules.insert(deployment.id.clone(), handle);
            }
            StartType::ScheduledCron => {
                let expression = deployment
                    .flow_version
                    .start_expression
                    .clone()
                    .ok_or_else(|| {
                        RuntimeError::MissingCronExpression(deployment.flow_version.name.clone())
                    })?;
                let schedule = CronSchedule::parse(&expression)?;
                if let Some(next) = schedule.next_after(Utc::now()) {
                    info!(
                        "Scheduling '{}' on '{}' with cron '{expression}'; next run at {next}",
                        deployment.flow_version, state.agent.name
                    );
                }
                let handle = spawn_cron_schedule(runtime, schedule);
                state.schedules.insert(deployment.id.clone(), handle);
                // Armed, awaiting the next fire.
                deployment.status = DeploymentStatus::Stopped;
            }
            StartType::Manual => {
                deployment.status = DeploymentStatus::Stopped;
            }
        }
        Ok(())
    }
}

/// Cancel a deployment's schedule and stop its live runtime. Stop failures
/// are logged and isolated; stopping one deployment never blocks the rest.
async fn stop_deployment(state: &mut HostState, deployment_id: &str) {
    if let Some(schedule) = state.schedules.remove(deployment_id) {
        schedule.abort();
    }
    if let Some(runtime) = state.runtimes.remove(deployment_id) {
        let flow = runtime.deployment().flow_version.to_string();
        match runtime.stop().await {
            Ok(()) => info!("Flow '{flow}' has been stopped"),
            Err(e) => warn!("Failed to stop '{flow}': {e}"),
        }
    }
}

/// One scheduled or triggered run: start the runtime under the run id and
/// block this task until the flow completes. Run failures are logged here
/// and never propagate — a failing run must not cancel future fires.
async fn run_flow(runtime: &dyn FlowRuntime, execution_id: &str) {
    let flow = runtime.deployment().flow_version.to_string();
    info!("Scheduled '{flow}' is running as execution {execution_id}");
    let result = async {
        runtime.start(execution_id).await?;
        runtime.wait_for_completion().await
    }
    .await;
    match result {
        Ok(()) => info!("Scheduled '{flow}' is finished"),
        Err(e) => error!("Error while waiting for '{flow}' to complete: {e}"),
    }
}

fn spawn_run(runtime: Arc<dyn FlowRuntime>, execution_id: String) -> JoinHandle<()> {
    tokio::spawn(async move { run_flow(runtime.as_ref(), &execution_id).await })
}

/// Recurring cron schedule for one deployment. Runs are serialized per
/// deployment: the next fire is computed only after the current run
/// completes, so a fire landing mid-run coalesces into the next occurrence.
fn spawn_cron_schedule(runtime: Arc<dyn FlowRuntime>, schedule: CronSchedule) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(next) = schedule.next_after(now) else {
                info!(
                    "Cron '{}' has no future fire times; schedule retired",
                    schedule.expression()
                );
                break;
            };
            let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(delay).await;
            run_flow(runtime.as_ref(), &new_id()).await;
        }
    })
}

fn spawn_watchdog(interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            // Hook point for periodic health checks.
            tracing::trace!("Agent watchdog tick");
        }
    })
}
