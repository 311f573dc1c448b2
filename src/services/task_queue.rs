//! Strict-priority task queue.
//!
//! Four FIFO levels (Critical, High, Normal, Low). Every mutation —
//! enqueue, dequeue, cancel, escalate, approval parking — goes through one
//! mutex so FIFO-within-level and priority ordering hold under concurrent
//! producers, and cancellation is race-free against dequeue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::models::{
    signature, FailureReason, Task, TaskPriority, TaskState,
};
use crate::domain::{TriageError, TriageResult};
use crate::services::event_bus::{EventBus, TriageEventPayload};
use crate::services::handler_registry::HandlerRegistry;

/// Per-level queue depths, published on every mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepths {
    pub critical: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl QueueDepths {
    pub fn total(&self) -> usize {
        self.critical + self.high + self.normal + self.low
    }
}

/// Result of a dispatch pull.
#[derive(Debug)]
pub enum DequeueOutcome {
    /// Task handed to the caller, already marked `Dispatched`.
    Dispatched(Task),
    /// Task requires approval; it has been removed from its level but is
    /// still `Queued`. The caller must route it through the approval gate.
    NeedsApproval(Task),
    /// Nothing eligible at or above the floor.
    Empty,
}

/// Read-only view of a queued or parked task, used by the SLA sweep.
#[derive(Debug, Clone)]
pub struct SlaView {
    pub id: Uuid,
    pub priority: TaskPriority,
    pub enqueue_time: chrono::DateTime<chrono::Utc>,
    pub sla_deadline: chrono::DateTime<chrono::Utc>,
    pub sla_breached: bool,
}

struct QueueInner {
    /// Task ids per level, index 0 = Critical. Ids of cancelled or escalated
    /// tasks may linger as tombstones; dequeue skips anything whose table
    /// entry no longer says Queued at that level.
    levels: [VecDeque<Uuid>; 4],
    /// All live (non-terminal) tasks, including parked and dispatched ones.
    tasks: HashMap<Uuid, Task>,
}

impl QueueInner {
    fn depths(&self) -> QueueDepths {
        let count = |idx: usize| {
            self.levels[idx]
                .iter()
                .filter(|id| {
                    self.tasks
                        .get(id)
                        .is_some_and(|t| t.state == TaskState::Queued)
                })
                .count()
        };
        QueueDepths {
            critical: count(0),
            high: count(1),
            normal: count(2),
            low: count(3),
        }
    }

    /// Drop a task id from the level it currently sits in.
    fn remove_from_level(&mut self, id: Uuid, priority: TaskPriority) {
        self.levels[priority.level_index()].retain(|queued| *queued != id);
    }
}

/// The task queue manager. Owns task lifecycle until dispatch; workers
/// report terminal state back through `complete_dispatched` /
/// `fail_dispatched`.
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    depths_tx: watch::Sender<QueueDepths>,
    registry: Arc<HandlerRegistry>,
    bus: Arc<EventBus>,
}

impl TaskQueue {
    pub fn new(registry: Arc<HandlerRegistry>, bus: Arc<EventBus>) -> Self {
        let (depths_tx, _) = watch::channel(QueueDepths::default());
        Self {
            inner: Mutex::new(QueueInner {
                levels: [
                    VecDeque::new(),
                    VecDeque::new(),
                    VecDeque::new(),
                    VecDeque::new(),
                ],
                tasks: HashMap::new(),
            }),
            notify: Notify::new(),
            depths_tx,
            registry,
            bus,
        }
    }

    /// Enqueue a task. Fails with `UnknownTaskType` when no handler is
    /// registered for `task.task_type`.
    pub async fn enqueue(&self, task: Task) -> TriageResult<Uuid> {
        if !self.registry.contains(&task.task_type).await {
            return Err(TriageError::UnknownTaskType(task.task_type));
        }
        if task.state != TaskState::Queued {
            return Err(TriageError::ValidationFailed(format!(
                "cannot enqueue task in state {}",
                task.state.as_str()
            )));
        }

        let id = task.id;
        let task_type = task.task_type.clone();
        let priority = task.priority;
        {
            let mut inner = self.inner.lock().await;
            inner.levels[priority.level_index()].push_back(id);
            inner.tasks.insert(id, task);
            self.publish_depths(&inner);
        }
        self.notify.notify_one();

        info!(task_id = %id, task_type = %task_type, priority = priority.as_str(), "Task enqueued");
        self.bus.publish(TriageEventPayload::TaskEnqueued {
            task_id: id,
            task_type,
            priority,
        });
        Ok(id)
    }

    /// Dequeue the next task from the highest non-empty level.
    pub async fn dequeue(&self) -> Option<Task> {
        self.dequeue_at_or_above(TaskPriority::Low).await
    }

    /// Dequeue the next task whose level is at or above `floor`, skipping
    /// nothing. A task that still needs gating is left queued at the head
    /// of its level and `None` is returned; callers that can divert to the
    /// approval gate use [`TaskQueue::pull_for_dispatch`] instead.
    pub async fn dequeue_at_or_above(&self, floor: TaskPriority) -> Option<Task> {
        match self.pull_for_dispatch(floor).await {
            DequeueOutcome::Dispatched(task) => Some(task),
            DequeueOutcome::NeedsApproval(task) => {
                // Put it back where it came from; this path has no gate.
                let mut inner = self.inner.lock().await;
                inner.levels[task.priority.level_index()].push_front(task.id);
                self.publish_depths(&inner);
                None
            }
            DequeueOutcome::Empty => None,
        }
    }

    /// Pull the next task at or above `floor` for dispatch.
    ///
    /// The priority floor is how the worker pool applies health backoff:
    /// while stressed, Critical/High pulls bypass the delay entirely. A
    /// task whose context requires approval (and was not already granted
    /// it) comes back as `NeedsApproval`, still in `Queued` state but
    /// removed from its level, so the caller can submit it to the gate
    /// without racing another worker.
    pub async fn pull_for_dispatch(&self, floor: TaskPriority) -> DequeueOutcome {
        let mut inner = self.inner.lock().await;
        for priority in TaskPriority::DESCENDING {
            if priority < floor {
                break;
            }
            let level = priority.level_index();
            while let Some(id) = inner.levels[level].pop_front() {
                // Tombstone skip: cancelled or moved ids stay in the deque
                // until they surface here.
                let eligible = inner.tasks.get(&id).is_some_and(|t| {
                    t.state == TaskState::Queued && t.priority == priority
                });
                if !eligible {
                    continue;
                }
                let task = inner.tasks.get_mut(&id).expect("checked above");
                if task.needs_gating() {
                    let gated = task.clone();
                    self.publish_depths(&inner);
                    return DequeueOutcome::NeedsApproval(gated);
                }
                // Queued -> Dispatched is always a legal transition.
                let _ = task.transition_to(TaskState::Dispatched);
                let dispatched = task.clone();
                self.publish_depths(&inner);
                drop(inner);

                self.bus.publish(TriageEventPayload::TaskDispatched {
                    task_id: dispatched.id,
                    task_type: dispatched.task_type.clone(),
                });
                return DequeueOutcome::Dispatched(dispatched);
            }
        }
        DequeueOutcome::Empty
    }

    /// Highest priority currently eligible for dequeue, without removing.
    pub async fn peek_priority(&self) -> Option<TaskPriority> {
        let inner = self.inner.lock().await;
        for priority in TaskPriority::DESCENDING {
            let has_eligible = inner.levels[priority.level_index()].iter().any(|id| {
                inner.tasks.get(id).is_some_and(|t| {
                    t.state == TaskState::Queued && t.priority == priority
                })
            });
            if has_eligible {
                return Some(priority);
            }
        }
        None
    }

    /// Cancel a task. Succeeds only while the task is still queued.
    pub async fn cancel(&self, id: Uuid) -> TriageResult<bool> {
        let cancelled = {
            let mut inner = self.inner.lock().await;
            let Some(task) = inner.tasks.get_mut(&id) else {
                return Err(TriageError::TaskNotFound(id));
            };
            if task.state != TaskState::Queued {
                debug!(task_id = %id, state = task.state.as_str(), "Cancel refused");
                return Ok(false);
            }
            task.transition_to(TaskState::Cancelled)?;
            task.failure_reason = Some(FailureReason::Cancelled);
            let task = inner.tasks.remove(&id).map(|t| (t.task_type, t.priority));
            if let Some((_, priority)) = task {
                inner.remove_from_level(id, priority);
            }
            self.publish_depths(&inner);
            task
        };

        if let Some((task_type, _)) = cancelled {
            info!(task_id = %id, "Task cancelled");
            self.bus.publish(TriageEventPayload::TaskFailed {
                task_id: id,
                task_type,
                reason: FailureReason::Cancelled,
            });
        }
        Ok(true)
    }

    /// Raise a task one priority level. Escalated tasks re-enter at the
    /// tail of the higher level so previously escalated tasks are not
    /// starved. No-op for dispatched/terminal tasks or Critical ones.
    pub async fn escalate(&self, id: Uuid) -> Option<TaskPriority> {
        let new_priority = {
            let mut inner = self.inner.lock().await;
            let task = inner.tasks.get_mut(&id)?;
            if !matches!(task.state, TaskState::Queued | TaskState::ApprovalPending) {
                return None;
            }
            let old = task.priority;
            if !task.escalate() {
                return None;
            }
            let new = task.priority;
            let state = task.state;
            if state == TaskState::Queued {
                inner.remove_from_level(id, old);
                inner.levels[new.level_index()].push_back(id);
            }
            self.publish_depths(&inner);
            new
        };
        self.notify.notify_one();

        info!(task_id = %id, new_priority = new_priority.as_str(), "Task escalated");
        self.bus.publish(TriageEventPayload::TaskEscalated {
            task_id: id,
            new_priority,
        });
        Some(new_priority)
    }

    /// One-shot SLA breach: mark the task breached and escalate straight to
    /// Critical. Returns the task's learning signature on the first call,
    /// `None` on repeats or for dispatched/terminal tasks.
    pub async fn mark_sla_breached(&self, id: Uuid) -> Option<String> {
        let (sig, escalated) = {
            let mut inner = self.inner.lock().await;
            let task = inner.tasks.get_mut(&id)?;
            if task.sla_breached
                || !matches!(task.state, TaskState::Queued | TaskState::ApprovalPending)
            {
                return None;
            }
            task.sla_breached = true;
            let old = task.priority;
            let escalated = task.escalate_to_critical();
            let sig = signature(&task.task_type, &task.context);
            let state = task.state;
            if escalated && state == TaskState::Queued {
                inner.remove_from_level(id, old);
                inner.levels[TaskPriority::Critical.level_index()].push_back(id);
            }
            self.publish_depths(&inner);
            (sig, escalated)
        };
        self.notify.notify_one();

        warn!(task_id = %id, signature = %sig, "SLA breached");
        if escalated {
            self.bus.publish(TriageEventPayload::TaskEscalated {
                task_id: id,
                new_priority: TaskPriority::Critical,
            });
        }
        Some(sig)
    }

    /// Park a queued task out of the dispatch path pending approval.
    pub async fn park_for_approval(&self, id: Uuid) -> TriageResult<Task> {
        let mut inner = self.inner.lock().await;
        let Some(task) = inner.tasks.get_mut(&id) else {
            return Err(TriageError::TaskNotFound(id));
        };
        task.transition_to(TaskState::ApprovalPending)?;
        let parked = task.clone();
        let priority = parked.priority;
        inner.remove_from_level(id, priority);
        self.publish_depths(&inner);
        debug!(task_id = %id, "Task parked for approval");
        Ok(parked)
    }

    /// Re-admit an approved task at the tail of its current priority level.
    pub async fn release_approved(&self, id: Uuid) -> TriageResult<()> {
        {
            let mut inner = self.inner.lock().await;
            let Some(task) = inner.tasks.get_mut(&id) else {
                return Err(TriageError::TaskNotFound(id));
            };
            task.transition_to(TaskState::Queued)?;
            task.approval_granted = true;
            let priority = task.priority;
            inner.levels[priority.level_index()].push_back(id);
            self.publish_depths(&inner);
        }
        self.notify.notify_one();
        info!(task_id = %id, "Approved task re-queued");
        Ok(())
    }

    /// Fail a parked task (approval denied or timed out).
    pub async fn fail_parked(&self, id: Uuid, reason: FailureReason) -> TriageResult<Task> {
        let failed = {
            let mut inner = self.inner.lock().await;
            let Some(task) = inner.tasks.get_mut(&id) else {
                return Err(TriageError::TaskNotFound(id));
            };
            task.transition_to(TaskState::Failed)?;
            task.failure_reason = Some(reason);
            let failed = inner.tasks.remove(&id).expect("checked above");
            self.publish_depths(&inner);
            failed
        };

        self.bus.publish(TriageEventPayload::TaskFailed {
            task_id: id,
            task_type: failed.task_type.clone(),
            reason,
        });
        Ok(failed)
    }

    /// Worker callback: the handler finished successfully.
    pub async fn complete_dispatched(&self, id: Uuid, duration_ms: u64) -> TriageResult<Task> {
        let completed = {
            let mut inner = self.inner.lock().await;
            let Some(task) = inner.tasks.get_mut(&id) else {
                return Err(TriageError::TaskNotFound(id));
            };
            task.transition_to(TaskState::Completed)?;
            inner.tasks.remove(&id).expect("checked above")
        };

        self.bus.publish(TriageEventPayload::TaskCompleted {
            task_id: id,
            task_type: completed.task_type.clone(),
            duration_ms,
        });
        Ok(completed)
    }

    /// Worker callback: the handler failed, panicked, or hit the ceiling.
    pub async fn fail_dispatched(&self, id: Uuid, reason: FailureReason) -> TriageResult<Task> {
        let failed = {
            let mut inner = self.inner.lock().await;
            let Some(task) = inner.tasks.get_mut(&id) else {
                return Err(TriageError::TaskNotFound(id));
            };
            task.transition_to(TaskState::Failed)?;
            task.failure_reason = Some(reason);
            inner.tasks.remove(&id).expect("checked above")
        };

        self.bus.publish(TriageEventPayload::TaskFailed {
            task_id: id,
            task_type: failed.task_type.clone(),
            reason,
        });
        Ok(failed)
    }

    /// Snapshot of queued/parked tasks with deadlines, for the SLA sweep.
    pub async fn deadline_snapshot(&self) -> Vec<SlaView> {
        let inner = self.inner.lock().await;
        inner
            .tasks
            .values()
            .filter(|t| {
                matches!(t.state, TaskState::Queued | TaskState::ApprovalPending)
                    && t.sla_deadline.is_some()
            })
            .map(|t| SlaView {
                id: t.id,
                priority: t.priority,
                enqueue_time: t.enqueue_time,
                sla_deadline: t.sla_deadline.expect("filtered above"),
                sla_breached: t.sla_breached,
            })
            .collect()
    }

    /// Look up a live task by id.
    pub async fn get(&self, id: Uuid) -> Option<Task> {
        self.inner.lock().await.tasks.get(&id).cloned()
    }

    /// Current per-level depths.
    pub async fn depths(&self) -> QueueDepths {
        self.inner.lock().await.depths()
    }

    /// Watch channel carrying depth updates, consumed by the health
    /// throttle.
    pub fn watch_depths(&self) -> watch::Receiver<QueueDepths> {
        self.depths_tx.subscribe()
    }

    /// Wait until an enqueue/release might have made a task available.
    /// Callers must re-poll; wakeups are advisory.
    pub async fn wait_for_task(&self) {
        self.notify.notified().await;
    }

    fn publish_depths(&self, inner: &QueueInner) {
        let _ = self.depths_tx.send_replace(inner.depths());
    }
}
