//! Workflow learning store.
//!
//! Records which remediation step sequences were executed for a task
//! signature and with what outcome, and recommends the most recent
//! previously-successful sequence for matching signatures. Storage failure
//! degrades to a logged warning; it never blocks task completion.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::models::{WorkflowOutcome, WorkflowRecord, WorkflowStep};
use crate::domain::{TriageError, TriageResult};

/// Append-only storage port for workflow records.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn append(&self, record: WorkflowRecord) -> TriageResult<()>;

    /// All records for an exact signature, in append order.
    async fn by_signature(&self, signature: &str) -> TriageResult<Vec<WorkflowRecord>>;
}

/// In-memory workflow store, keyed by signature.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    records: RwLock<HashMap<String, Vec<WorkflowRecord>>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn append(&self, record: WorkflowRecord) -> TriageResult<()> {
        self.records
            .write()
            .await
            .entry(record.signature.clone())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn by_signature(&self, signature: &str) -> TriageResult<Vec<WorkflowRecord>> {
        Ok(self
            .records
            .read()
            .await
            .get(signature)
            .cloned()
            .unwrap_or_default())
    }
}

/// Learning service over a workflow store.
///
/// An optional namespace prefix keeps simulated outcomes out of the
/// production recommendation space.
pub struct LearningService {
    store: Arc<dyn WorkflowStore>,
    namespace: Option<String>,
}

impl LearningService {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self {
            store,
            namespace: None,
        }
    }

    /// Prefix every signature with `{namespace}:`. Used by the simulation
    /// harness so simulated records never pollute real recommendations.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    fn qualified(&self, signature: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:{signature}"),
            None => signature.to_string(),
        }
    }

    /// Append one outcome record. Storage unavailability degrades to a
    /// warning; the caller's task completion is unaffected.
    pub async fn record_outcome(
        &self,
        signature: &str,
        steps: Vec<WorkflowStep>,
        outcome: WorkflowOutcome,
        duration: Duration,
    ) {
        let record = WorkflowRecord::new(self.qualified(signature), steps, outcome, duration);
        if let Err(err) = self.store.append(record).await {
            warn!(signature = %signature, error = %err, "Workflow record dropped; learning degraded");
        }
    }

    /// Steps of the most recent record with a resolved outcome for an exact
    /// signature match. `None` when nothing matched (callers fall back to
    /// default handling).
    pub async fn recommend(&self, signature: &str) -> Option<Vec<WorkflowStep>> {
        let records = match self.store.by_signature(&self.qualified(signature)).await {
            Ok(records) => records,
            Err(err) => {
                warn!(signature = %signature, error = %err, "Workflow lookup failed; no recommendation");
                return None;
            }
        };
        let recommended = records
            .iter()
            .rev()
            .find(|r| r.outcome == WorkflowOutcome::Resolved)
            .map(|r| r.steps.clone());
        if recommended.is_some() {
            debug!(signature = %signature, "Recommending learned workflow");
        }
        recommended
    }
}

/// A store that always fails, for exercising the degraded path.
#[cfg(test)]
pub struct UnavailableStore;

#[cfg(test)]
#[async_trait]
impl WorkflowStore for UnavailableStore {
    async fn append(&self, _record: WorkflowRecord) -> TriageResult<()> {
        Err(TriageError::StorageUnavailable("offline".to_string()))
    }

    async fn by_signature(&self, _signature: &str) -> TriageResult<Vec<WorkflowRecord>> {
        Err(TriageError::StorageUnavailable("offline".to_string()))
    }
}
