use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::transport::HttpTransport;

use super::diff::{self, Diff};
use super::error::ReconcileError;
use super::snapshot::Snapshot;
use super::state::DesiredState;

/// Invoked once per reconcile cycle with the full desired state and the
/// diff against the previously committed snapshot.
pub trait ReconcileHandler: Send + Sync {
    fn handle(&self, desired: &DesiredState, diff: &Diff) -> anyhow::Result<()>;
}

#[derive(Serialize)]
struct DriftReportBody<'a> {
    corrections: &'a [diff::Correction],
}

/// Drives the fetch -> diff -> handle -> report -> commit cycle on a timer,
/// or on demand via [`Reconciler::trigger`].
pub struct Reconciler {
    transport: Arc<HttpTransport>,
    node_id: String,
    interval: Duration,
    snapshot: Snapshot,
    handlers: Vec<Box<dyn ReconcileHandler>>,
    trigger: Notify,
}

impl Reconciler {
    pub fn new(transport: Arc<HttpTransport>, node_id: impl Into<String>, interval: Duration) -> Self {
        Self {
            transport,
            node_id: node_id.into(),
            interval,
            snapshot: Snapshot::default(),
            handlers: Vec::new(),
            trigger: Notify::new(),
        }
    }

    pub fn register(&mut self, handler: Box<dyn ReconcileHandler>) {
        self.handlers.push(handler);
    }

    /// Wakes the loop for an out-of-band cycle, e.g. when an SSE event
    /// conveys a state change. Multiple rapid calls coalesce to one extra
    /// cycle.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    pub fn current_state(&self) -> DesiredState {
        self.snapshot.get()
    }

    pub async fn run(&self, cancel: CancellationToken) {
        self.run_cycle().await;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.trigger.notified() => {}
                _ = cancel.cancelled() => return,
            }
            self.run_cycle().await;
        }
    }

    async fn run_cycle(&self) {
        if let Err(err) = self.run_cycle_fallible().await {
            tracing::warn!(error = %err, "reconcile cycle failed");
        }
    }

    async fn run_cycle_fallible(&self) -> Result<(), ReconcileError> {
        let path = format!("v1/nodes/{}/state", self.node_id);
        let desired: DesiredState = self
            .transport
            .get(&path)
            .await
            .map_err(ReconcileError::Fetch)?;

        let local = self.snapshot.get();
        let diff = diff::compute(&desired, &local);

        let mut all_succeeded = true;
        for handler in &self.handlers {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&desired, &diff)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "reconcile handler returned an error");
                    all_succeeded = false;
                }
                Err(_) => {
                    tracing::error!("reconcile handler panicked");
                    all_succeeded = false;
                }
            }
        }

        if !diff.is_empty() {
            let drift_path = format!("v1/nodes/{}/drift", self.node_id);
            let body = DriftReportBody {
                corrections: &diff.corrections,
            };
            let _: serde_json::Value = self
                .transport
                .post(&drift_path, &body)
                .await
                .map_err(ReconcileError::DriftReport)?;
        }

        if all_succeeded {
            self.snapshot.commit(desired);
        }

        Ok(())
    }
}
