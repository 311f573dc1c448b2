//! Task handler registration.
//!
//! External collaborators register one handler per task type at startup.
//! Enqueue rejects task types with no registered handler.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::domain::models::{Task, WorkflowStep};

/// Outcome of one handler invocation: the remediation steps it executed.
pub type HandlerResult = anyhow::Result<Vec<WorkflowStep>>;

/// A registered executor for one task type.
///
/// Handlers receive the task and, when the learning store has seen this
/// signature succeed before, the recommended step sequence. Errors and
/// panics are contained by the worker pool and never crash a worker loop.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task, recommendation: Option<Vec<WorkflowStep>>)
        -> HandlerResult;
}

/// Registry mapping task types to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a task type. Re-registering replaces the
    /// previous handler.
    pub async fn register(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let task_type = task_type.into();
        info!(task_type = %task_type, "Handler registered");
        self.handlers.write().await.insert(task_type, handler);
    }

    pub async fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().await.get(task_type).cloned()
    }

    pub async fn contains(&self, task_type: &str) -> bool {
        self.handlers.read().await.contains_key(task_type)
    }
}
