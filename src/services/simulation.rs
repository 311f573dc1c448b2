//! Simulation harness.
//!
//! Runs synthetic load through a fully isolated copy of the core: its own
//! bus, queues, gate, throttle, and workers, plus a namespaced view of the
//! workflow store so simulated outcomes never leak into production
//! recommendations.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::models::{Config, Event, Task};
use crate::domain::TriageResult;
use crate::services::approval_gate::ApprovalGate;
use crate::services::event_bus::{EventBus, TriageEventPayload};
use crate::services::event_router::{EventRouter, RouteAction};
use crate::services::handler_registry::{HandlerRegistry, TaskHandler};
use crate::services::health_throttle::HealthThrottle;
use crate::services::learning_store::{InMemoryWorkflowStore, LearningService, WorkflowStore};
use crate::services::sla_monitor::SlaMonitor;
use crate::services::task_queue::TaskQueue;
use crate::services::worker_pool::WorkerPool;

/// Signature namespace applied to every record a simulation writes.
const SIM_NAMESPACE: &str = "sim";

/// Aggregated results of one simulation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationReport {
    /// Tasks that entered the simulated queues
    pub injected: usize,
    /// Events dropped by the router
    pub ignored_events: usize,
    pub resolved: usize,
    pub failed: usize,
    /// Tasks still non-terminal when the drain timeout expired
    pub unfinished: usize,
    pub sla_breaches: u64,
    /// Enqueue-to-dispatch latency over all dispatched tasks, in ms
    pub mean_dispatch_latency_ms: f64,
    pub p50_dispatch_latency_ms: f64,
    pub p95_dispatch_latency_ms: f64,
}

/// Isolated orchestration core for synthetic load.
///
/// Construction wires everything; callers register scripted handlers and
/// feed tasks or events, then `run` drives the load to completion and
/// returns the report. The harness shares no queue or bus with a live
/// core, and its learning records live under the `sim:` namespace.
pub struct SimulationHarness {
    config: Config,
    bus: Arc<EventBus>,
    registry: Arc<HandlerRegistry>,
    queue: Arc<TaskQueue>,
    router: EventRouter,
    sla_monitor: Arc<SlaMonitor>,
    gate: Arc<ApprovalGate>,
    pool: Arc<WorkerPool>,
    tasks: Vec<Task>,
    events: Vec<Event>,
}

impl SimulationHarness {
    /// Harness with its own private workflow store.
    pub fn new(config: Config) -> Self {
        Self::with_store(config, Arc::new(InMemoryWorkflowStore::new()))
    }

    /// Harness writing into a shared store, under the simulation
    /// namespace.
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
        let learning = Arc::new(
            LearningService::new(store).with_namespace(SIM_NAMESPACE),
        );
        let gate = Arc::new(ApprovalGate::new(
            Arc::clone(&queue),
            Arc::clone(&bus),
            config.approval.clone(),
        ));
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&queue),
            Arc::clone(&registry),
            Arc::clone(&gate),
            learning,
            throttle,
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
            gate,
            pool,
            tasks: vec![],
            events: vec![],
        }
    }

    pub async fn register_handler(
        &self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) {
        self.registry.register(task_type, handler).await;
    }

    /// Queue a synthetic task for the run.
    pub fn inject_task(&mut self, task: Task) {
        self.tasks.push(task);
    }

    /// Queue a synthetic event for the run; the configured router rules
    /// decide what becomes of it.
    pub fn inject_event(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Drive all injected load to a terminal state and report.
    ///
    /// Stops early when every injected task is terminal; otherwise gives
    /// up after `drain_timeout` and reports the remainder as unfinished.
    pub async fn run(mut self, drain_timeout: Duration) -> TriageResult<SimulationReport> {
        let mut outbound = self.bus.subscribe();
        let mut report = SimulationReport::default();

        info!(
            tasks = self.tasks.len(),
            events = self.events.len(),
            workers = self.config.workers,
            "Simulation starting"
        );

        let mut background = vec![self.sla_monitor.start(), self.gate.start()];
        background.extend(self.pool.start());

        let mut pending: HashSet<Uuid> = HashSet::new();
        for task in self.tasks.drain(..) {
            pending.insert(self.queue.enqueue(task).await?);
        }
        for event in self.events.drain(..) {
            match self.router.route(&event).await? {
                RouteAction::Enqueued(id) => {
                    pending.insert(id);
                }
                RouteAction::Ignored => report.ignored_events += 1,
                RouteAction::Escalated(_) => {}
            }
        }
        report.injected = pending.len();

        let deadline = Instant::now() + drain_timeout;
        while !pending.is_empty() && Instant::now() < deadline {
            let mut still_running = HashSet::new();
            for id in &pending {
                if self.queue.get(*id).await.is_some() {
                    still_running.insert(*id);
                }
            }
            pending = still_running;
            if !pending.is_empty() {
                sleep(Duration::from_millis(20)).await;
            }
        }
        if !pending.is_empty() {
            warn!(unfinished = pending.len(), "Simulation drain timed out");
        }
        report.unfinished = pending.len();

        self.pool.shutdown();
        self.sla_monitor.shutdown();
        self.gate.shutdown();
        for handle in background {
            let _ = handle.await;
        }
        report.sla_breaches = self.sla_monitor.breach_count();

        // Latency and outcome tallies from the private bus.
        let mut enqueued_at = HashMap::new();
        let mut latencies_ms = Vec::new();
        while let Ok(event) = outbound.try_recv() {
            match event.payload {
                TriageEventPayload::TaskEnqueued { task_id, .. } => {
                    enqueued_at.insert(task_id, event.timestamp);
                }
                TriageEventPayload::TaskDispatched { task_id, .. } => {
                    if let Some(start) = enqueued_at.get(&task_id) {
                        #[allow(clippy::cast_precision_loss)]
                        latencies_ms
                            .push((event.timestamp - *start).num_milliseconds().max(0) as f64);
                    }
                }
                TriageEventPayload::TaskCompleted { .. } => report.resolved += 1,
                TriageEventPayload::TaskFailed { .. } => report.failed += 1,
                _ => {}
            }
        }
        if !latencies_ms.is_empty() {
            latencies_ms.sort_by(|a, b| a.total_cmp(b));
            #[allow(clippy::cast_precision_loss)]
            let mean = latencies_ms.iter().sum::<f64>() / latencies_ms.len() as f64;
            report.mean_dispatch_latency_ms = mean;
            report.p50_dispatch_latency_ms = percentile(&latencies_ms, 0.50);
            report.p95_dispatch_latency_ms = percentile(&latencies_ms, 0.95);
        }

        info!(
            injected = report.injected,
            resolved = report.resolved,
            failed = report.failed,
            unfinished = report.unfinished,
            "Simulation finished"
        );
        Ok(report)
    }
}

/// Nearest-rank percentile over a sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let index = (((sorted.len() - 1) as f64) * q).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}

/// Scripted handler for synthetic runs: fixed latency, fixed verdict.
pub struct ScriptedHandler {
    pub latency: Duration,
    pub succeed: bool,
}

#[async_trait::async_trait]
impl TaskHandler for ScriptedHandler {
    async fn handle(
        &self,
        _task: &Task,
        recommendation: Option<Vec<crate::domain::models::WorkflowStep>>,
    ) -> crate::services::handler_registry::HandlerResult {
        sleep(self.latency).await;
        if self.succeed {
            Ok(recommendation
                .unwrap_or_else(|| vec![crate::domain::models::WorkflowStep::new("scripted")]))
        } else {
            Err(anyhow::anyhow!("scripted failure"))
        }
    }
}
