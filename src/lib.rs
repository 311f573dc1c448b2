//! Triage - Priority Task Orchestration Core
//!
//! Triage turns inbound operational events into prioritized, SLA-tracked
//! tasks and drives them through a fixed worker pool. It routes events by
//! configurable rules, schedules four strict priority levels, escalates
//! tasks whose SLA budget runs low, throttles background work under
//! sustained resource pressure, gates high-risk tasks behind external
//! approval, and learns which remediation workflows resolved past tasks.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Pure business logic and domain models
//! - **Service Layer** (`services`): Queues, routing, monitoring, execution
//! - **Application Layer** (`application`): The orchestrator facade
//! - **Infrastructure Layer** (`infrastructure`): Configuration and logging
//!
//! # Example
//!
//! ```ignore
//! use triage::application::Orchestrator;
//! use triage::domain::models::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut core = Orchestrator::new(Config::default());
//!     core.start();
//!     // submit events, await work, then:
//!     core.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::Orchestrator;
pub use domain::models::{
    ApprovalDecision, ApprovalRequest, Config, Event, EventSeverity, FailureReason, RiskLevel,
    Task, TaskContext, TaskPriority, TaskState, WorkflowOutcome, WorkflowRecord, WorkflowStep,
};
pub use domain::{TriageError, TriageResult};
pub use services::{
    EventBus, HandlerResult, RouteAction, SimulationHarness, SimulationReport, TaskHandler,
    ThrottleState, TriageEvent, TriageEventPayload, WorkflowStore,
};
