//! Task domain model.
//!
//! Tasks are the unit of dispatchable work: incidents, ingestion jobs, and
//! remediation actions all flow through the same priority queues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Strict priority level for tasks. Higher levels always dequeue first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl TaskPriority {
    /// All levels in dequeue order (highest first).
    pub const DESCENDING: [TaskPriority; 4] =
        [Self::Critical, Self::High, Self::Normal, Self::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// The next level up. Saturates at Critical.
    pub fn escalated(&self) -> Self {
        match self {
            Self::Low => Self::Normal,
            Self::Normal => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }

    /// Index into per-level queue storage (0 = Critical).
    pub(crate) fn level_index(self) -> usize {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }
}

/// Status of a task in the dispatch pipeline.
///
/// Transitions are monotonic: a task never returns to `Queued` once
/// dispatched, and terminal states accept no further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Sitting in a priority queue, eligible for dispatch
    Queued,
    /// Parked out of the dispatch path awaiting an approval decision
    ApprovalPending,
    /// Pulled by a worker; handler is executing
    Dispatched,
    /// Handler finished successfully
    Completed,
    /// Handler failed, timed out, or approval was denied/timed out
    Failed,
    /// Cancelled while still queued
    Cancelled,
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Queued
    }
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::ApprovalPending => "approval_pending",
            Self::Dispatched => "dispatched",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Valid transitions from this state.
    pub fn valid_transitions(&self) -> Vec<TaskState> {
        match self {
            Self::Queued => vec![Self::ApprovalPending, Self::Dispatched, Self::Cancelled],
            // Approval may be denied (Failed) or granted (back to Queued for
            // re-insertion at the tail of its level).
            Self::ApprovalPending => vec![Self::Queued, Self::Failed],
            Self::Dispatched => vec![Self::Completed, Self::Failed],
            Self::Completed | Self::Failed | Self::Cancelled => vec![],
        }
    }

    pub fn can_transition_to(&self, new_state: Self) -> bool {
        self.valid_transitions().contains(&new_state)
    }
}

/// Why a task ended in the `Failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    HandlerError,
    ExecutionTimeout,
    ApprovalDenied,
    ApprovalTimeout,
    Cancelled,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HandlerError => "handler_error",
            Self::ExecutionTimeout => "execution_timeout",
            Self::ApprovalDenied => "approval_denied",
            Self::ApprovalTimeout => "approval_timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Risk classification attached at enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl Default for RiskLevel {
    fn default() -> Self {
        Self::Low
    }
}

impl RiskLevel {
    /// High-risk tasks require approval unless explicitly overridden.
    pub fn requires_approval(&self) -> bool {
        matches!(self, Self::High)
    }
}

/// Structured metadata attached to a task at enqueue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    /// Subsystem that produced the task
    pub origin: String,
    /// Resource identifiers the task touches (deduped, insertion order)
    pub dependent_resources: Vec<String>,
    /// Risk classification
    pub risk_level: RiskLevel,
    /// Whether dispatch must pass the approval gate. Derived from
    /// `risk_level` but overridable; enforced at dispatch, not enqueue.
    pub requires_approval: bool,
    /// Related tasks, for clustering
    pub related_task_ids: Vec<Uuid>,
    /// Opaque rollback plan, if the producer supplied one
    pub rollback_plan: Option<serde_json::Value>,
}

impl TaskContext {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Self::default()
        }
    }

    /// Set risk level and derive `requires_approval` from it.
    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk_level = risk;
        self.requires_approval = risk.requires_approval();
        self
    }

    /// Override the derived approval requirement.
    pub fn with_requires_approval(mut self, required: bool) -> Self {
        self.requires_approval = required;
        self
    }

    /// Add a dependent resource, preserving insertion order without dupes.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        let resource = resource.into();
        if !self.dependent_resources.contains(&resource) {
            self.dependent_resources.push(resource);
        }
        self
    }

    pub fn with_related_task(mut self, task_id: Uuid) -> Self {
        if !self.related_task_ids.contains(&task_id) {
            self.related_task_ids.push(task_id);
        }
        self
    }

    pub fn with_rollback_plan(mut self, plan: serde_json::Value) -> Self {
        self.rollback_plan = Some(plan);
        self
    }
}

/// A unit of dispatchable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier, generated at construction
    pub id: Uuid,
    /// Tag used for handler lookup and learning-signature grouping
    pub task_type: String,
    /// Current priority. Only ever increases once escalated.
    pub priority: TaskPriority,
    /// Opaque payload passed to the handler
    pub payload: serde_json::Value,
    /// Structured metadata
    pub context: TaskContext,
    /// Current state
    pub state: TaskState,
    /// When the task entered the queue
    pub enqueue_time: DateTime<Utc>,
    /// Optional SLA deadline; absent means no SLA
    pub sla_deadline: Option<DateTime<Utc>>,
    /// When a worker pulled the task
    pub dispatch_time: Option<DateTime<Utc>>,
    /// When the task reached a terminal state
    pub completed_time: Option<DateTime<Utc>>,
    /// Set when `state == Failed`
    pub failure_reason: Option<FailureReason>,
    /// Whether the one-shot breach escalation has already fired
    pub sla_breached: bool,
    /// Whether the priority was ever raised above its enqueue level
    pub escalated: bool,
    /// Set when an approval decision admitted this task; a granted task is
    /// not gated again on its way to a worker
    pub approval_granted: bool,
}

impl Task {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: task_type.into(),
            priority: TaskPriority::default(),
            payload: serde_json::Value::Null,
            context: TaskContext::default(),
            state: TaskState::default(),
            enqueue_time: Utc::now(),
            sla_deadline: None,
            dispatch_time: None,
            completed_time: None,
            failure_reason: None,
            sla_breached: false,
            escalated: false,
            approval_granted: false,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_context(mut self, context: TaskContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.sla_deadline = Some(deadline);
        self
    }

    pub fn can_transition_to(&self, new_state: TaskState) -> bool {
        self.state.can_transition_to(new_state)
    }

    /// Transition to a new state, updating timestamps.
    pub fn transition_to(&mut self, new_state: TaskState) -> Result<(), crate::domain::TriageError> {
        if !self.can_transition_to(new_state) {
            return Err(crate::domain::TriageError::InvalidStateTransition {
                from: self.state.as_str().to_string(),
                to: new_state.as_str().to_string(),
                reason: "transition not permitted".to_string(),
            });
        }
        self.state = new_state;
        match new_state {
            TaskState::Dispatched => self.dispatch_time = Some(Utc::now()),
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled => {
                self.completed_time = Some(Utc::now());
            }
            _ => {}
        }
        Ok(())
    }

    /// Raise priority by one level. Escalation is one-directional; calling
    /// this on a Critical task is a no-op.
    pub fn escalate(&mut self) -> bool {
        let next = self.priority.escalated();
        if next == self.priority {
            return false;
        }
        self.priority = next;
        self.escalated = true;
        true
    }

    /// Raise priority straight to Critical (SLA breach path).
    pub fn escalate_to_critical(&mut self) -> bool {
        if self.priority == TaskPriority::Critical {
            return false;
        }
        self.priority = TaskPriority::Critical;
        self.escalated = true;
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether dispatch must divert this task through the approval gate.
    pub fn needs_gating(&self) -> bool {
        self.context.requires_approval && !self.approval_granted
    }

    /// Fraction of the SLA budget remaining, if a deadline is set.
    ///
    /// 1.0 at enqueue, 0.0 at the deadline, negative after breach. A
    /// degenerate deadline at or before enqueue reads as already breached.
    pub fn sla_remaining_fraction(&self, now: DateTime<Utc>) -> Option<f64> {
        let deadline = self.sla_deadline?;
        let total = (deadline - self.enqueue_time).num_milliseconds();
        if total <= 0 {
            return Some(0.0);
        }
        let remaining = (deadline - now).num_milliseconds();
        #[allow(clippy::cast_precision_loss)]
        Some(remaining as f64 / total as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
    }

    #[test]
    fn test_priority_escalation_saturates() {
        assert_eq!(TaskPriority::Low.escalated(), TaskPriority::Normal);
        assert_eq!(TaskPriority::High.escalated(), TaskPriority::Critical);
        assert_eq!(TaskPriority::Critical.escalated(), TaskPriority::Critical);
    }

    #[test]
    fn test_state_transitions_monotonic() {
        let mut task = Task::new("db_timeout");
        assert_eq!(task.state, TaskState::Queued);

        task.transition_to(TaskState::Dispatched).unwrap();
        assert!(task.dispatch_time.is_some());

        // No way back to Queued after dispatch
        assert!(!task.can_transition_to(TaskState::Queued));

        task.transition_to(TaskState::Completed).unwrap();
        assert!(task.is_terminal());
        assert!(task.completed_time.is_some());
        assert!(task.transition_to(TaskState::Queued).is_err());
    }

    #[test]
    fn test_approval_pending_roundtrip() {
        let mut task = Task::new("restart_service");
        task.transition_to(TaskState::ApprovalPending).unwrap();
        // Approved: back to queued
        task.transition_to(TaskState::Queued).unwrap();
        task.transition_to(TaskState::Dispatched).unwrap();
        assert_eq!(task.state, TaskState::Dispatched);
    }

    #[test]
    fn test_escalate_marks_task() {
        let mut task = Task::new("t").with_priority(TaskPriority::Normal);
        assert!(task.escalate());
        assert_eq!(task.priority, TaskPriority::High);
        assert!(task.escalated);

        task.priority = TaskPriority::Critical;
        assert!(!task.escalate());
    }

    #[test]
    fn test_context_risk_derives_approval() {
        let ctx = TaskContext::new("scanner").with_risk(RiskLevel::High);
        assert!(ctx.requires_approval);

        let ctx = TaskContext::new("scanner")
            .with_risk(RiskLevel::High)
            .with_requires_approval(false);
        assert!(!ctx.requires_approval);

        let ctx = TaskContext::new("scanner").with_risk(RiskLevel::Low);
        assert!(!ctx.requires_approval);
    }

    #[test]
    fn test_dependent_resources_dedupe() {
        let ctx = TaskContext::new("ingest")
            .with_resource("db-primary")
            .with_resource("cache")
            .with_resource("db-primary");
        assert_eq!(ctx.dependent_resources, vec!["db-primary", "cache"]);
    }

    #[test]
    fn test_sla_remaining_fraction() {
        let now = Utc::now();
        let mut task = Task::new("t").with_deadline(now + Duration::seconds(10));
        task.enqueue_time = now;

        let half = task.sla_remaining_fraction(now + Duration::seconds(5)).unwrap();
        assert!((half - 0.5).abs() < 0.01);

        let past = task.sla_remaining_fraction(now + Duration::seconds(11)).unwrap();
        assert!(past < 0.0);

        assert!(Task::new("t").sla_remaining_fraction(now).is_none());
    }
}
