//! Broadcast bus for events the core emits for external consumption.
//!
//! Sequence numbers are assigned at publish time so subscribers can detect
//! gaps after broadcast lag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::models::{FailureReason, TaskPriority};

/// Monotonically increasing sequence number assigned by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Envelope for every outbound event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageEvent {
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub payload: TriageEventPayload,
}

/// Outbound event payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TriageEventPayload {
    TaskEnqueued {
        task_id: Uuid,
        task_type: String,
        priority: TaskPriority,
    },
    TaskDispatched {
        task_id: Uuid,
        task_type: String,
    },
    TaskCompleted {
        task_id: Uuid,
        task_type: String,
        duration_ms: u64,
    },
    TaskFailed {
        task_id: Uuid,
        task_type: String,
        reason: FailureReason,
    },
    TaskEscalated {
        task_id: Uuid,
        new_priority: TaskPriority,
    },
    SlaBreach {
        task_id: Uuid,
        signature: String,
        breach_time: DateTime<Utc>,
    },
    CapacityRequested {
        queue_depth: usize,
        cpu_pct: f64,
        mem_pct: f64,
    },
    ApprovalRequested {
        request_id: Uuid,
        task_id: Uuid,
        risk_assessment: String,
    },
}

impl TriageEventPayload {
    /// Dotted event name, for external routing.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskEnqueued { .. } => "task.enqueued",
            Self::TaskDispatched { .. } => "task.dispatched",
            Self::TaskCompleted { .. } => "task.completed",
            Self::TaskFailed { .. } => "task.failed",
            Self::TaskEscalated { .. } => "task.escalated",
            Self::SlaBreach { .. } => "sla.breach",
            Self::CapacityRequested { .. } => "capacity.requested",
            Self::ApprovalRequested { .. } => "approval.requested",
        }
    }
}

/// Broadcast-based event bus. Publishing never blocks; events are dropped
/// for subscribers that lag past the channel capacity.
pub struct EventBus {
    tx: broadcast::Sender<TriageEvent>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TriageEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Returns the assigned sequence number.
    pub fn publish(&self, payload: TriageEventPayload) -> SequenceNumber {
        let sequence = SequenceNumber(self.sequence.fetch_add(1, Ordering::SeqCst));
        let event = TriageEvent {
            sequence,
            timestamp: Utc::now(),
            payload,
        };
        // Send fails only when there are no subscribers; that is fine.
        let _ = self.tx.send(event);
        sequence
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
