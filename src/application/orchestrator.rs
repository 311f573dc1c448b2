//! Orchestrator facade.
//!
//! Owns the wiring between the router, queue, monitors, gate, learning
//! store, and worker pool, and exposes the whole core behind one inbound
//! surface: submit events, register handlers, decide approvals, push
//! health samples, subscribe to outbound events.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::domain::models::{ApprovalRequest, Config, Event, Task};
use crate::domain::TriageResult;
use crate::services::approval_gate::ApprovalGate;
use crate::services::event_bus::{EventBus, TriageEvent};
use crate::services::event_router::{EventRouter, RouteAction};
use crate::services::handler_registry::{HandlerRegistry, TaskHandler};
use crate::services::health_throttle::{HealthThrottle, ThrottleState};
use crate::services::learning_store::{InMemoryWorkflowStore, LearningService, WorkflowStore};
use crate::services::sla_monitor::SlaMonitor;
use crate::services::task_queue::{QueueDepths, TaskQueue};
use crate::services::worker_pool::WorkerPool;

/// The assembled triage core.
pub struct Orchestrator {
    config: Config,
    bus: Arc<EventBus>,
    registry: Arc<HandlerRegistry>,
    queue: Arc<TaskQueue>,
    router: EventRouter,
    sla_monitor: Arc<SlaMonitor>,
    throttle: Arc<HealthThrottle>,
    learning: Arc<LearningService>,
    gate: Arc<ApprovalGate>,
    pool: Arc<WorkerPool>,
    background: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Wire all services from configuration, with an in-memory workflow
    /// store.
    pub fn new(config: Config) -> Self {
        Self::with_store(config, Arc::new(InMemoryWorkflowStore::new()))
    }

    /// Wire all services against a caller-supplied workflow store.
    pub fn with_store(config: Config, store: Arc<dyn WorkflowStore>) -> Self {
        let bus = Arc::new(EventBus::default());
        let registry = Arc::new(HandlerRegistry::new());
        let queue = Arc::new(TaskQueue::new(Arc::clone(&registry), Arc::clone(&bus)));
        let router = EventRouter::new(config.router_rules.clone(), Arc::clone(&queue));
        let sla_monitor = Arc::new(SlaMonitor::new(
            Arc::clone(&queue),
            Arc::clone(&bus),
            config.sla.clone(),
        ));
        let throttle = Arc::new(HealthThrottle::new(
            config.health.clone(),
            queue.watch_depths(),
            Arc::clone(&bus),
        ));
        let learning = Arc::new(LearningService::new(store));
        let gate = Arc::new(ApprovalGate::new(
            Arc::clone(&queue),
            Arc::clone(&bus),
            config.approval.clone(),
        ));
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&queue),
            Arc::clone(&registry),
            Arc::clone(&gate),
            Arc::clone(&learning),
            Arc::clone(&throttle),
            config.workers,
            Duration::from_secs(config.execution_ceiling_secs),
        ));

        Self {
            config,
            bus,
            registry,
            queue,
            router,
            sla_monitor,
            throttle,
            learning,
            gate,
            pool,
            background: vec![],
        }
    }

    /// Start workers and background sweeps. Idempotent start is not
    /// supported; call once.
    pub fn start(&mut self) {
        info!(
            workers = self.config.workers,
            rules = self.config.router_rules.len(),
            "Triage core starting"
        );
        self.background.push(self.sla_monitor.start());
        self.background.push(self.gate.start());
        self.background.extend(self.pool.start());
    }

    /// Signal every background loop and wait for workers to drain their
    /// current step.
    pub async fn shutdown(&mut self) {
        info!("Triage core shutting down");
        self.pool.shutdown();
        self.sla_monitor.shutdown();
        self.gate.shutdown();
        for handle in self.background.drain(..) {
            let _ = handle.await;
        }
    }

    /// Route one inbound event through the rule list.
    pub async fn submit_event(&self, event: &Event) -> TriageResult<RouteAction> {
        self.router.route(event).await
    }

    /// Enqueue a task directly, bypassing the router.
    pub async fn submit_task(&self, task: Task) -> TriageResult<Uuid> {
        self.queue.enqueue(task).await
    }

    /// Register a handler for a task type. Replaces any previous handler.
    pub async fn register_handler(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.registry.register(task_type, handler).await;
    }

    /// Record an external approval decision.
    pub async fn submit_approval_decision(
        &self,
        request_id: Uuid,
        approved: bool,
        decided_by: impl Into<String>,
    ) -> TriageResult<()> {
        self.gate.decide(request_id, approved, decided_by).await
    }

    /// Feed one resource-usage sample to the health throttle. Queue depth
    /// is taken from the live queues unless the collector overrides it.
    pub async fn push_health_sample(
        &self,
        cpu_pct: f64,
        mem_pct: f64,
        queue_depth_override: Option<usize>,
    ) {
        self.throttle
            .push_sample(cpu_pct, mem_pct, queue_depth_override)
            .await;
    }

    /// Subscribe to outbound events.
    pub fn subscribe(&self) -> broadcast::Receiver<TriageEvent> {
        self.bus.subscribe()
    }

    pub async fn cancel_task(&self, task_id: Uuid) -> TriageResult<bool> {
        self.queue.cancel(task_id).await
    }

    pub async fn task(&self, task_id: Uuid) -> Option<Task> {
        self.queue.get(task_id).await
    }

    pub async fn approval_request(&self, request_id: Uuid) -> Option<ApprovalRequest> {
        self.gate.get_request(request_id).await
    }

    pub async fn queue_depths(&self) -> QueueDepths {
        self.queue.depths().await
    }

    pub async fn throttle_state(&self) -> ThrottleState {
        self.throttle.state().await
    }

    /// Total SLA breaches observed since start.
    pub fn sla_breach_count(&self) -> u64 {
        self.sla_monitor.breach_count()
    }

    pub fn learning(&self) -> &Arc<LearningService> {
        &self.learning
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{EventSeverity, RouteActionConfig, RoutePredicateConfig, RouterRuleConfig, TaskPriority, TaskState};
    use crate::services::handler_registry::HandlerResult;
    use crate::services::task_queue::DequeueOutcome;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler for CountingHandler {
        async fn handle(
            &self,
            _task: &Task,
            _rec: Option<Vec<crate::domain::models::WorkflowStep>>,
        ) -> HandlerResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }
    }

    fn rules() -> Vec<RouterRuleConfig> {
        vec![RouterRuleConfig {
            name: "db-timeouts".to_string(),
            predicate: RoutePredicateConfig {
                event_type: Some("db_timeout".to_string()),
                min_severity: Some(EventSeverity::High),
                source: None,
            },
            action: RouteActionConfig::Enqueue {
                task_type: "db_timeout".to_string(),
                priority: TaskPriority::High,
                risk_level: None,
                sla_secs: Some(600),
                requires_approval: None,
            },
        }]
    }

    #[tokio::test]
    async fn test_event_to_queued_task_without_workers() {
        let config = Config {
            router_rules: rules(),
            ..Config::default()
        };
        let orchestrator = Orchestrator::new(config);
        orchestrator
            .register_handler(
                "db_timeout",
                Arc::new(CountingHandler {
                    calls: AtomicUsize::new(0),
                }),
            )
            .await;

        let event = Event::new("db_timeout", EventSeverity::High, "monitor");
        let action = orchestrator.submit_event(&event).await.unwrap();
        let RouteAction::Enqueued(id) = action else {
            panic!("expected enqueue, got {action:?}");
        };

        let task = orchestrator.task(id).await.unwrap();
        assert_eq!(task.state, TaskState::Queued);
        assert_eq!(task.priority, TaskPriority::High);
        assert_eq!(orchestrator.queue_depths().await.total(), 1);
    }

    #[tokio::test]
    async fn test_full_dispatch_cycle() {
        let config = Config {
            workers: 2,
            router_rules: rules(),
            ..Config::default()
        };
        let mut orchestrator = Orchestrator::new(config);
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        orchestrator
            .register_handler("db_timeout", Arc::clone(&handler) as Arc<dyn TaskHandler>)
            .await;
        orchestrator.start();

        let event = Event::new("db_timeout", EventSeverity::Critical, "monitor");
        orchestrator.submit_event(&event).await.unwrap();

        for _ in 0..100 {
            if handler.calls.load(Ordering::SeqCst) == 1 {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_direct_submit_and_cancel() {
        let orchestrator = Orchestrator::new(Config::default());
        orchestrator
            .register_handler(
                "t",
                Arc::new(CountingHandler {
                    calls: AtomicUsize::new(0),
                }),
            )
            .await;

        // No workers running: the task stays queued and cancel wins
        let id = orchestrator.submit_task(Task::new("t")).await.unwrap();
        assert!(orchestrator.cancel_task(id).await.unwrap());
        assert!(matches!(
            orchestrator
                .queue
                .pull_for_dispatch(TaskPriority::Low)
                .await,
            DequeueOutcome::Empty
        ));
    }
}
