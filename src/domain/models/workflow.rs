//! Workflow learning records.
//!
//! Each completed task appends one record describing the remediation steps
//! the handler executed and how it ended. Records are never mutated; the
//! store is queried by signature to recommend a previously-successful
//! sequence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::task::TaskContext;

/// One handler-reported sub-action within a remediation sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub action: String,
    /// Resource the step acted on, if any
    pub target: Option<String>,
}

impl WorkflowStep {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            target: None,
        }
    }

    pub fn on(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

/// How a recorded workflow ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowOutcome {
    Resolved,
    Failed,
    TimedOut,
}

/// Append-only learning unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub signature: String,
    pub steps: Vec<WorkflowStep>,
    pub outcome: WorkflowOutcome,
    pub duration: Duration,
    pub recorded_at: DateTime<Utc>,
}

impl WorkflowRecord {
    pub fn new(
        signature: impl Into<String>,
        steps: Vec<WorkflowStep>,
        outcome: WorkflowOutcome,
        duration: Duration,
    ) -> Self {
        Self {
            signature: signature.into(),
            steps,
            outcome,
            duration,
            recorded_at: Utc::now(),
        }
    }
}

/// Derive the learning signature for a task.
///
/// Pure function of the task type and the sorted dependent resources, so
/// repeated incidents touching the same resources index the same history.
pub fn signature(task_type: &str, context: &TaskContext) -> String {
    let mut resources = context.dependent_resources.clone();
    resources.sort();
    format!("{}|{}", task_type, resources.join(","))
}
