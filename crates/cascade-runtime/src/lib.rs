//! Agent orchestration and execution tracking for Cascade.
//!
//! This crate provides the `AgentHost` — Cascade's execution backbone for
//! deployed, scheduled pipeline flows. It owns the deployment schedules, the
//! asynchronous recorder draining execution records to storage, and the
//! tracker observing every flow lifecycle callback.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  AgentHost                                               │
//! │  - Deploys flow versions, arms their schedules           │
//! │  - Immediate / cron / manual run initiation              │
//! │  - Watchdog tick + graceful shutdown                     │
//! │        │                                                 │
//! │        ├── FlowRuntime (external flow graph engine)      │
//! │        │       └── ExecutionTracker (observer fan-out)   │
//! │        │               └── AsyncRecorder ──► storage     │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod cron;
pub mod error;
pub mod flow;
pub mod options;
pub mod recorder;
pub mod tracker;

pub use agent::AgentHost;
pub use cron::CronSchedule;
pub use error::{Result, RuntimeError};
pub use flow::{FlowRuntime, FlowRuntimeFactory, StepContext, StepStatistics};
pub use options::RuntimeOptions;
pub use recorder::{AsyncRecorder, ExecutionRecord, RecorderHandle};
pub use tracker::{ExecutionTracker, FlowObserver, LoggingObserver, RecordingObserver};
