//! SLA monitor: periodic deadline sweep, independent of the dispatch path.
//!
//! Escalates queued/parked tasks one level when the remaining fraction of
//! their SLA budget drops below the configured threshold, and fires a
//! one-shot breach escalation to Critical once the deadline passes. Breaches
//! are reported, never auto-failed.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info};

use crate::domain::models::{SlaConfig, TaskPriority};
use crate::services::event_bus::{EventBus, TriageEventPayload};
use crate::services::task_queue::TaskQueue;

/// Periodic SLA sweep over the queue's deadline-bearing tasks.
pub struct SlaMonitor {
    queue: Arc<TaskQueue>,
    bus: Arc<EventBus>,
    config: SlaConfig,
    breach_count: Arc<AtomicU64>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SlaMonitor {
    pub fn new(queue: Arc<TaskQueue>, bus: Arc<EventBus>, config: SlaConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            queue,
            bus,
            config,
            breach_count: Arc::new(AtomicU64::new(0)),
            shutdown_tx,
        }
    }

    /// Spawn the background sweep loop. Sweeps are driven by one interval
    /// timer, not per-task timers.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            let mut sweep_interval = interval(period);
            info!(
                interval_secs = period.as_secs(),
                threshold = monitor.config.escalation_threshold,
                "SLA monitor started"
            );
            loop {
                tokio::select! {
                    _ = sweep_interval.tick() => {
                        monitor.sweep(Utc::now()).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("SLA monitor shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Run one sweep at the given instant. Exposed so tests can drive the
    /// clock deterministically.
    pub async fn sweep(&self, now: DateTime<Utc>) {
        for view in self.queue.deadline_snapshot().await {
            let total = (view.sla_deadline - view.enqueue_time).num_milliseconds();
            let remaining = (view.sla_deadline - now).num_milliseconds();
            #[allow(clippy::cast_precision_loss)]
            let fraction = if total <= 0 {
                0.0
            } else {
                remaining as f64 / total as f64
            };

            if fraction <= 0.0 {
                if view.sla_breached {
                    continue;
                }
                if let Some(sig) = self.queue.mark_sla_breached(view.id).await {
                    self.breach_count.fetch_add(1, Ordering::SeqCst);
                    self.bus.publish(TriageEventPayload::SlaBreach {
                        task_id: view.id,
                        signature: sig,
                        breach_time: now,
                    });
                }
            } else if fraction < self.config.escalation_threshold
                && view.priority != TaskPriority::Critical
            {
                debug!(task_id = %view.id, fraction, "SLA escalation");
                self.queue.escalate(view.id).await;
            }
        }
    }

    /// Total breaches observed since startup.
    pub fn breach_count(&self) -> u64 {
        self.breach_count.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
