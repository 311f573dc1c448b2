//! Domain models for the triage core.

pub mod approval;
pub mod config;
pub mod event;
pub mod health;
pub mod task;
pub mod workflow;

pub use approval::{ApprovalDecision, ApprovalRequest};
pub use config::{
    ApprovalConfig, Config, HealthConfig, LoggingConfig, RouteActionConfig, RoutePredicateConfig,
    RouterRuleConfig, SlaConfig,
};
pub use event::{Event, EventSeverity};
pub use health::{HealthLimits, HealthSample, HealthWindow};
pub use task::{FailureReason, RiskLevel, Task, TaskContext, TaskPriority, TaskState};
pub use workflow::{signature, WorkflowOutcome, WorkflowRecord, WorkflowStep};
