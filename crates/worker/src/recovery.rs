//! Periodic sweep that returns orphaned tasks to the queue.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{error, info};

use conductor_domain::errors::ConductorResult;
use conductor_domain::events;
use conductor_domain::repositories::{EventLog, TaskQueue};

/// Name used for event log entries written by the sweep itself.
const MONITOR_NAME: &str = "recovery-monitor";

pub struct RecoveryMonitor {
    queue: Arc<dyn TaskQueue>,
    events: Arc<dyn EventLog>,
    interval: Duration,
    liveness_timeout: Duration,
}

impl RecoveryMonitor {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        events: Arc<dyn EventLog>,
        interval: Duration,
        liveness_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            events,
            interval,
            liveness_timeout,
        }
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> ConductorResult<()> {
        let mut ticker = tokio::time::interval(self.interval);
        info!(
            interval_seconds = self.interval.as_secs(),
            liveness_timeout_seconds = self.liveness_timeout.as_secs(),
            "recovery monitor started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "recovery sweep failed");
                    }
                }
            }
        }

        info!("recovery monitor stopped");
        Ok(())
    }

    /// One sweep: requeue every task whose owner missed its heartbeat
    /// deadline and log each recovery.
    pub async fn sweep_once(&self) -> ConductorResult<Vec<i64>> {
        let requeued = self.queue.requeue_stale(self.liveness_timeout).await?;
        if requeued.is_empty() {
            return Ok(requeued);
        }

        counter!("tasks_requeued_total").increment(requeued.len() as u64);
        for task_id in &requeued {
            info!(task_id, "requeued task from unresponsive agent");
            self.events
                .append(
                    MONITOR_NAME,
                    events::TASK_REQUEUED,
                    json!({"task_id": task_id}),
                )
                .await?;
        }
        Ok(requeued)
    }
}
