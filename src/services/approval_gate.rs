//! Approval gate for high-risk tasks.
//!
//! Gated tasks are parked out of the dispatch path (no worker is occupied)
//! until an external decision arrives or the timeout sweep fires. Exactly
//! one open request exists per task, and exactly one decision is accepted
//! per request.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::interval;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::models::{ApprovalConfig, ApprovalDecision, ApprovalRequest, FailureReason};
use crate::domain::{TriageError, TriageResult};
use crate::services::event_bus::{EventBus, TriageEventPayload};
use crate::services::task_queue::TaskQueue;

struct GateInner {
    requests: HashMap<Uuid, ApprovalRequest>,
    /// Open request per task; at most one.
    open_by_task: HashMap<Uuid, Uuid>,
}

/// Checkpoint that withholds dispatch of risk-flagged tasks pending an
/// external decision.
pub struct ApprovalGate {
    inner: RwLock<GateInner>,
    queue: Arc<TaskQueue>,
    bus: Arc<EventBus>,
    config: ApprovalConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApprovalGate {
    pub fn new(queue: Arc<TaskQueue>, bus: Arc<EventBus>, config: ApprovalConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            inner: RwLock::new(GateInner {
                requests: HashMap::new(),
                open_by_task: HashMap::new(),
            }),
            queue,
            bus,
            config,
            shutdown_tx,
        }
    }

    /// Gate a queued task: park it and open an approval request.
    pub async fn submit(
        &self,
        task_id: Uuid,
        risk_assessment: impl Into<String>,
    ) -> TriageResult<Uuid> {
        {
            let inner = self.inner.read().await;
            if inner.open_by_task.contains_key(&task_id) {
                return Err(TriageError::ApprovalAlreadyOpen(task_id));
            }
        }

        // Parking first keeps the task out of any concurrent dequeue.
        self.queue.park_for_approval(task_id).await?;

        let timeout_at = Utc::now()
            + ChronoDuration::seconds(i64::try_from(self.config.timeout_secs).unwrap_or(i64::MAX));
        let request = ApprovalRequest::new(task_id, risk_assessment, timeout_at);
        let request_id = request.id;
        let risk_assessment = request.risk_assessment.clone();

        {
            let mut inner = self.inner.write().await;
            inner.open_by_task.insert(task_id, request_id);
            inner.requests.insert(request_id, request);
        }

        info!(request_id = %request_id, task_id = %task_id, "Approval requested");
        self.bus.publish(TriageEventPayload::ApprovalRequested {
            request_id,
            task_id,
            risk_assessment,
        });
        Ok(request_id)
    }

    /// Record an external decision. The first decision wins; later calls
    /// are rejected with `AlreadyDecided`.
    pub async fn decide(
        &self,
        request_id: Uuid,
        approved: bool,
        decided_by: impl Into<String>,
    ) -> TriageResult<()> {
        let task_id = {
            let mut inner = self.inner.write().await;
            let Some(request) = inner.requests.get_mut(&request_id) else {
                return Err(TriageError::RequestNotFound(request_id));
            };
            if request.decision.is_resolved() {
                return Err(TriageError::AlreadyDecided(request_id));
            }
            request.decision = if approved {
                ApprovalDecision::Approved
            } else {
                ApprovalDecision::Denied
            };
            request.decided_by = Some(decided_by.into());
            request.decided_at = Some(Utc::now());
            let task_id = request.task_id;
            inner.open_by_task.remove(&task_id);
            task_id
        };

        if approved {
            info!(request_id = %request_id, task_id = %task_id, "Approval granted");
            self.queue.release_approved(task_id).await?;
        } else {
            warn!(request_id = %request_id, task_id = %task_id, "Approval denied");
            self.queue
                .fail_parked(task_id, FailureReason::ApprovalDenied)
                .await?;
        }
        Ok(())
    }

    /// Time out pending requests past their deadline. Driven by the
    /// background loop; exposed for deterministic tests.
    pub async fn sweep(&self, now: DateTime<Utc>) {
        let expired: Vec<(Uuid, Uuid)> = {
            let mut inner = self.inner.write().await;
            let expired: Vec<(Uuid, Uuid)> = inner
                .requests
                .values()
                .filter(|r| r.is_expired(now))
                .map(|r| (r.id, r.task_id))
                .collect();
            for (request_id, task_id) in &expired {
                if let Some(request) = inner.requests.get_mut(request_id) {
                    request.decision = ApprovalDecision::TimedOut;
                    request.decided_at = Some(now);
                }
                inner.open_by_task.remove(task_id);
            }
            expired
        };

        for (request_id, task_id) in expired {
            warn!(request_id = %request_id, task_id = %task_id, "Approval timed out");
            if let Err(err) = self
                .queue
                .fail_parked(task_id, FailureReason::ApprovalTimeout)
                .await
            {
                warn!(task_id = %task_id, error = %err, "Timed-out task could not be failed");
            }
        }
    }

    /// Spawn the background timeout sweep.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let gate = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            let mut sweep_interval = interval(period);
            info!(
                interval_secs = period.as_secs(),
                timeout_secs = gate.config.timeout_secs,
                "Approval gate sweep started"
            );
            loop {
                tokio::select! {
                    _ = sweep_interval.tick() => {
                        gate.sweep(Utc::now()).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Approval gate shutting down");
                        break;
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub async fn get_request(&self, request_id: Uuid) -> Option<ApprovalRequest> {
        self.inner.read().await.requests.get(&request_id).cloned()
    }
}
