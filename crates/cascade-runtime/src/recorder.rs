//! Asynchronous persistence of execution records.
//!
//! Flow steps running in parallel produce a high-volume stream of lifecycle
//! records; persisting them inline would throttle the pipeline on storage
//! latency. `AsyncRecorder` decouples the two with an unbounded FIFO queue
//! and a single consumer task, so `record()` costs one channel send and
//! records reach storage in the exact order they were enqueued.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use cascade_types::{Execution, ExecutionSink, ExecutionStep, ExecutionStepLog};

/// One entry on the recorder queue.
#[derive(Debug, Clone)]
pub enum ExecutionRecord {
    Execution(Execution),
    Step(ExecutionStep),
    StepLog(ExecutionStepLog),
}

/// Producer-side handle onto the recorder queue. Cheap to clone.
#[derive(Clone)]
pub struct RecorderHandle {
    tx: mpsc::UnboundedSender<ExecutionRecord>,
}

impl RecorderHandle {
    /// Enqueue a record for persistence. Never blocks.
    ///
    /// The queue is unbounded, so a failed send means the consumer is gone
    /// while producers are still running — a wiring defect, not a
    /// recoverable runtime condition.
    pub fn record(&self, record: ExecutionRecord) {
        self.tx
            .send(record)
            .expect("recorder consumer stopped while producers are still recording");
    }
}

/// Owner of the recorder queue's consumer task.
pub struct AsyncRecorder {
    tx: mpsc::UnboundedSender<ExecutionRecord>,
    stop_tx: watch::Sender<bool>,
    consumer: Option<JoinHandle<()>>,
}

impl AsyncRecorder {
    /// Spawn the consumer task draining records into `sink`.
    pub fn spawn(sink: Arc<dyn ExecutionSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let consumer = tokio::spawn(consume(rx, stop_rx, sink));
        Self {
            tx,
            stop_tx,
            consumer: Some(consumer),
        }
    }

    /// A producer handle for trackers to record through.
    pub fn handle(&self) -> RecorderHandle {
        RecorderHandle {
            tx: self.tx.clone(),
        }
    }

    /// Drain-then-halt: signal the consumer, which persists every record
    /// already enqueued before exiting, and wait for it to finish.
    pub async fn shutdown(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(consumer) = self.consumer.take() {
            if let Err(e) = consumer.await {
                error!("Recorder consumer task failed during shutdown: {e}");
            }
        }
        info!("Recorder queue drained and stopped");
    }
}

async fn consume(
    mut rx: mpsc::UnboundedReceiver<ExecutionRecord>,
    mut stop_rx: watch::Receiver<bool>,
    sink: Arc<dyn ExecutionSink>,
) {
    loop {
        tokio::select! {
            record = rx.recv() => match record {
                Some(record) => persist(sink.as_ref(), &record),
                // All producer handles dropped; nothing more can arrive.
                None => return,
            },
            _ = stop_rx.changed() => break,
        }
    }

    // Everything enqueued before the shutdown signal is still owed to
    // storage; a shutdown is a drain, never a cancel.
    let mut drained = 0usize;
    while let Ok(record) = rx.try_recv() {
        persist(sink.as_ref(), &record);
        drained += 1;
    }
    if drained > 0 {
        debug!("Recorder consumer drained {drained} records at shutdown");
    }
}

fn persist(sink: &dyn ExecutionSink, record: &ExecutionRecord) {
    let result = match record {
        ExecutionRecord::Execution(execution) => sink.save_execution(execution),
        ExecutionRecord::Step(step) => sink.save_step(step),
        ExecutionRecord::StepLog(log) => sink.save_step_log(log),
    };
    // One storage hiccup must not take the consumer down with it; the
    // record is lost but the stream keeps flowing.
    if let Err(e) = result {
        error!("Failed to persist execution record: {e}");
    }
}
