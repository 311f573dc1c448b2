//! Core services: queues, routing, monitoring, execution.

pub mod approval_gate;
pub mod event_bus;
pub mod event_router;
pub mod handler_registry;
pub mod health_throttle;
pub mod learning_store;
pub mod simulation;
pub mod sla_monitor;
pub mod task_queue;
pub mod worker_pool;

pub use approval_gate::ApprovalGate;
pub use event_bus::{EventBus, SequenceNumber, TriageEvent, TriageEventPayload};
pub use event_router::{EventRouter, RouteAction};
pub use handler_registry::{HandlerRegistry, HandlerResult, TaskHandler};
pub use health_throttle::{HealthThrottle, ThrottleState};
pub use learning_store::{InMemoryWorkflowStore, LearningService, WorkflowStore};
pub use simulation::{SimulationHarness, SimulationReport};
pub use sla_monitor::SlaMonitor;
pub use task_queue::{DequeueOutcome, QueueDepths, TaskQueue};
pub use worker_pool::WorkerPool;
