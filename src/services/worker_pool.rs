//! Fixed-size worker pool.
//!
//! Each worker loop pulls the next eligible task, invokes its registered
//! handler under the per-task execution ceiling, and reports the terminal
//! state and outcome. Handler errors and panics are contained per task and
//! never crash a worker loop. Tasks needing approval are diverted to the
//! gate instead of occupying a worker.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::domain::models::{signature, FailureReason, Task, TaskPriority, WorkflowOutcome};
use crate::services::approval_gate::ApprovalGate;
use crate::services::handler_registry::HandlerRegistry;
use crate::services::health_throttle::HealthThrottle;
use crate::services::learning_store::LearningService;
use crate::services::task_queue::{DequeueOutcome, TaskQueue};

/// Poll fallback so a worker that missed a wakeup still makes progress.
const IDLE_RECHECK: Duration = Duration::from_millis(200);

/// Fixed pool of N task executors.
pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    registry: Arc<HandlerRegistry>,
    gate: Arc<ApprovalGate>,
    learning: Arc<LearningService>,
    throttle: Arc<HealthThrottle>,
    workers: usize,
    execution_ceiling: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<TaskQueue>,
        registry: Arc<HandlerRegistry>,
        gate: Arc<ApprovalGate>,
        learning: Arc<LearningService>,
        throttle: Arc<HealthThrottle>,
        workers: usize,
        execution_ceiling: Duration,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            queue,
            registry,
            gate,
            learning,
            throttle,
            workers: workers.max(1),
            execution_ceiling,
            shutdown_tx,
        }
    }

    /// Spawn all worker loops.
    pub fn start(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        info!(workers = self.workers, "Worker pool starting");
        (0..self.workers)
            .map(|worker_id| {
                let pool = Arc::clone(self);
                tokio::spawn(async move {
                    pool.run_worker(worker_id).await;
                })
            })
            .collect()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    async fn run_worker(&self, worker_id: usize) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        debug!(worker_id, "Worker started");

        // Shutdown is checked between steps, never mid-dispatch, so a
        // running handler always reports its terminal state.
        loop {
            if shutdown_rx.try_recv().is_ok() {
                debug!(worker_id, "Worker shutting down");
                break;
            }
            self.step(worker_id).await;
        }
    }

    /// One pull-and-execute iteration.
    async fn step(&self, worker_id: usize) {
        let Some(next_priority) = self.queue.peek_priority().await else {
            // Nothing queued: wait for a wakeup, with a recheck fallback.
            let _ = timeout(IDLE_RECHECK, self.queue.wait_for_task()).await;
            return;
        };

        // Backpressure: under sustained stress, Normal/Low pulls pay one
        // backoff interval per dispatch. Critical/High never wait, even
        // when they arrive while a worker is already backing off.
        if self.throttle.should_delay(next_priority).await {
            match self.queue.pull_for_dispatch(TaskPriority::High).await {
                DequeueOutcome::Dispatched(task) => return self.execute(worker_id, task).await,
                DequeueOutcome::NeedsApproval(task) => return self.divert_to_gate(task).await,
                DequeueOutcome::Empty => {}
            }
            self.backoff_interruptible().await;
        }

        match self.queue.pull_for_dispatch(TaskPriority::Low).await {
            DequeueOutcome::Dispatched(task) => self.execute(worker_id, task).await,
            DequeueOutcome::NeedsApproval(task) => self.divert_to_gate(task).await,
            DequeueOutcome::Empty => {
                let _ = timeout(IDLE_RECHECK, self.queue.wait_for_task()).await;
            }
        }
    }

    /// Sleep one backoff interval, waking early when urgent work arrives.
    async fn backoff_interruptible(&self) {
        let backoff = self.throttle.next_backoff().await;
        let expired = sleep(backoff);
        tokio::pin!(expired);
        loop {
            tokio::select! {
                () = &mut expired => break,
                () = self.queue.wait_for_task() => {
                    let urgent = matches!(
                        self.queue.peek_priority().await,
                        Some(p) if p >= TaskPriority::High
                    );
                    if urgent {
                        break;
                    }
                }
            }
        }
    }

    async fn divert_to_gate(&self, task: Task) {
        let assessment = format!("risk_level={}", risk_label(&task));
        if let Err(err) = self.gate.submit(task.id, assessment).await {
            // Lost a race with cancel or a concurrent gate entry.
            warn!(task_id = %task.id, error = %err, "Gate submission failed");
        }
    }

    async fn execute(&self, worker_id: usize, task: Task) {
        let sig = signature(&task.task_type, &task.context);
        let Some(handler) = self.registry.get(&task.task_type).await else {
            // Enqueue verified the registration; a missing handler here
            // means it was replaced by a registry wipe mid-flight.
            error!(task_id = %task.id, task_type = %task.task_type, "No handler at dispatch");
            let _ = self
                .queue
                .fail_dispatched(task.id, FailureReason::HandlerError)
                .await;
            return;
        };

        let recommendation = self.learning.recommend(&sig).await;
        debug!(
            worker_id,
            task_id = %task.id,
            task_type = %task.task_type,
            recommended = recommendation.is_some(),
            "Executing task"
        );

        let started = Instant::now();
        let invocation =
            AssertUnwindSafe(handler.handle(&task, recommendation)).catch_unwind();
        let result = timeout(self.execution_ceiling, invocation).await;
        let elapsed = started.elapsed();
        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = elapsed.as_millis() as u64;

        match result {
            Ok(Ok(Ok(steps))) => {
                let _ = self.queue.complete_dispatched(task.id, elapsed_ms).await;
                self.learning
                    .record_outcome(&sig, steps, WorkflowOutcome::Resolved, elapsed)
                    .await;
            }
            Ok(Ok(Err(err))) => {
                warn!(task_id = %task.id, error = %err, "Handler failed");
                let _ = self
                    .queue
                    .fail_dispatched(task.id, FailureReason::HandlerError)
                    .await;
                self.learning
                    .record_outcome(&sig, vec![], WorkflowOutcome::Failed, elapsed)
                    .await;
            }
            Ok(Err(_panic)) => {
                error!(task_id = %task.id, task_type = %task.task_type, "Handler panicked");
                let _ = self
                    .queue
                    .fail_dispatched(task.id, FailureReason::HandlerError)
                    .await;
                self.learning
                    .record_outcome(&sig, vec![], WorkflowOutcome::Failed, elapsed)
                    .await;
            }
            Err(_elapsed) => {
                warn!(
                    task_id = %task.id,
                    ceiling_ms = self.execution_ceiling.as_millis() as u64,
                    "Handler exceeded execution ceiling"
                );
                let _ = self
                    .queue
                    .fail_dispatched(task.id, FailureReason::ExecutionTimeout)
                    .await;
                self.learning
                    .record_outcome(&sig, vec![], WorkflowOutcome::TimedOut, elapsed)
                    .await;
            }
        }
    }
}

fn risk_label(task: &Task) -> &'static str {
    match task.context.risk_level {
        crate::domain::models::RiskLevel::Low => "low",
        crate::domain::models::RiskLevel::Medium => "medium",
        crate::domain::models::RiskLevel::High => "high",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        ApprovalConfig, HealthConfig, TaskContext, TaskState, WorkflowStep,
    };
    use crate::services::event_bus::EventBus;
    use crate::services::handler_registry::{HandlerResult, TaskHandler};
    use crate::services::learning_store::InMemoryWorkflowStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OkHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler for OkHandler {
        async fn handle(
            &self,
            _task: &Task,
            _rec: Option<Vec<WorkflowStep>>,
        ) -> HandlerResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![WorkflowStep::new("noop")])
        }
    }

    struct PanicHandler;

    #[async_trait]
    impl TaskHandler for PanicHandler {
        async fn handle(
            &self,
            _task: &Task,
            _rec: Option<Vec<WorkflowStep>>,
        ) -> HandlerResult {
            panic!("handler exploded");
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl TaskHandler for SlowHandler {
        async fn handle(
            &self,
            _task: &Task,
            _rec: Option<Vec<WorkflowStep>>,
        ) -> HandlerResult {
            sleep(Duration::from_secs(60)).await;
            Ok(vec![])
        }
    }

    struct Harness {
        queue: Arc<TaskQueue>,
        pool: Arc<WorkerPool>,
        bus: Arc<EventBus>,
    }

    async fn harness(registry: Arc<HandlerRegistry>, ceiling: Duration) -> Harness {
        let bus = Arc::new(EventBus::default());
        let queue = Arc::new(TaskQueue::new(Arc::clone(&registry), Arc::clone(&bus)));
        let gate = Arc::new(ApprovalGate::new(
            Arc::clone(&queue),
            Arc::clone(&bus),
            ApprovalConfig::default(),
        ));
        let learning = Arc::new(LearningService::new(Arc::new(InMemoryWorkflowStore::new())));
        let throttle = Arc::new(HealthThrottle::new(
            HealthConfig::default(),
            queue.watch_depths(),
            Arc::clone(&bus),
        ));
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&queue),
            registry,
            gate,
            learning,
            throttle,
            2,
            ceiling,
        ));
        Harness { queue, pool, bus }
    }

    async fn wait_terminal(queue: &TaskQueue, id: uuid::Uuid) {
        for _ in 0..100 {
            if queue.get(id).await.is_none() {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("task {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn test_pool_executes_task() {
        let registry = Arc::new(HandlerRegistry::new());
        let handler = Arc::new(OkHandler {
            calls: AtomicUsize::new(0),
        });
        registry.register("t", Arc::clone(&handler) as Arc<dyn TaskHandler>).await;

        let h = harness(registry, Duration::from_secs(5)).await;
        let handles = h.pool.start();

        let id = h.queue.enqueue(Task::new("t")).await.unwrap();
        wait_terminal(&h.queue, id).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        h.pool.shutdown();
        for handle in handles {
            let _ = handle.await;
        }
    }

    #[tokio::test]
    async fn test_panic_contained_and_marked_failed() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register("boom", Arc::new(PanicHandler)).await;
        registry
            .register(
                "ok",
                Arc::new(OkHandler {
                    calls: AtomicUsize::new(0),
                }),
            )
            .await;

        let h = harness(registry, Duration::from_secs(5)).await;
        let mut events = h.bus.subscribe();
        let handles = h.pool.start();

        let boom = h.queue.enqueue(Task::new("boom")).await.unwrap();
        wait_terminal(&h.queue, boom).await;

        // Worker survived the panic and still executes later tasks
        let ok = h.queue.enqueue(Task::new("ok")).await.unwrap();
        wait_terminal(&h.queue, ok).await;

        let mut saw_handler_error = false;
        while let Ok(event) = events.try_recv() {
            if let crate::services::event_bus::TriageEventPayload::TaskFailed {
                task_id,
                reason,
                ..
            } = event.payload
            {
                if task_id == boom {
                    assert_eq!(reason, FailureReason::HandlerError);
                    saw_handler_error = true;
                }
            }
        }
        assert!(saw_handler_error);

        h.pool.shutdown();
        for handle in handles {
            let _ = handle.await;
        }
    }

    #[tokio::test]
    async fn test_execution_ceiling_reclaims_worker() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register("slow", Arc::new(SlowHandler)).await;
        let fast = Arc::new(OkHandler {
            calls: AtomicUsize::new(0),
        });
        registry.register("fast", Arc::clone(&fast) as Arc<dyn TaskHandler>).await;

        let h = harness(registry, Duration::from_millis(100)).await;
        let handles = h.pool.start();

        let slow = h.queue.enqueue(Task::new("slow")).await.unwrap();
        wait_terminal(&h.queue, slow).await;

        // The reclaimed worker picks up new work
        let id = h.queue.enqueue(Task::new("fast")).await.unwrap();
        wait_terminal(&h.queue, id).await;
        assert_eq!(fast.calls.load(Ordering::SeqCst), 1);

        h.pool.shutdown();
        for handle in handles {
            let _ = handle.await;
        }
    }

    #[tokio::test]
    async fn test_critical_arrival_cuts_stressed_backoff_short() {
        use crate::services::health_throttle::ThrottleState;

        let registry = Arc::new(HandlerRegistry::new());
        let handler = Arc::new(OkHandler {
            calls: AtomicUsize::new(0),
        });
        registry.register("bg", Arc::clone(&handler) as Arc<dyn TaskHandler>).await;
        registry.register("urgent", Arc::clone(&handler) as Arc<dyn TaskHandler>).await;

        let bus = Arc::new(EventBus::default());
        let queue = Arc::new(TaskQueue::new(Arc::clone(&registry), Arc::clone(&bus)));
        let gate = Arc::new(ApprovalGate::new(
            Arc::clone(&queue),
            Arc::clone(&bus),
            ApprovalConfig::default(),
        ));
        let learning = Arc::new(LearningService::new(Arc::new(InMemoryWorkflowStore::new())));
        // Zero-length window: a single hot sample counts as sustained.
        let throttle = Arc::new(HealthThrottle::new(
            HealthConfig {
                window_secs: 0,
                backoff_initial_ms: 2_000,
                backoff_max_ms: 2_000,
                ..HealthConfig::default()
            },
            queue.watch_depths(),
            Arc::clone(&bus),
        ));
        throttle.push_sample(99.0, 99.0, Some(0)).await;
        assert_eq!(throttle.state().await, ThrottleState::Stressed);

        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&queue),
            registry,
            gate,
            learning,
            throttle,
            1,
            Duration::from_secs(5),
        ));
        let handles = pool.start();

        let bg = queue
            .enqueue(Task::new("bg").with_priority(TaskPriority::Normal))
            .await
            .unwrap();
        // Let the lone worker peek the Normal task and enter its backoff
        sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        let urgent = queue
            .enqueue(Task::new("urgent").with_priority(TaskPriority::Critical))
            .await
            .unwrap();
        wait_terminal(&queue, urgent).await;
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "Critical dispatch waited {:?} behind a stressed backoff",
            started.elapsed()
        );

        let _ = queue.cancel(bg).await;
        pool.shutdown();
        for handle in handles {
            let _ = handle.await;
        }
    }

    #[tokio::test]
    async fn test_approval_required_task_diverted_not_executed() {
        let registry = Arc::new(HandlerRegistry::new());
        let handler = Arc::new(OkHandler {
            calls: AtomicUsize::new(0),
        });
        registry.register("risky", Arc::clone(&handler) as Arc<dyn TaskHandler>).await;

        let h = harness(registry, Duration::from_secs(5)).await;
        let handles = h.pool.start();

        let ctx = TaskContext::new("scanner").with_requires_approval(true);
        let id = h
            .queue
            .enqueue(Task::new("risky").with_context(ctx))
            .await
            .unwrap();

        // Give workers time to pull it; it must end up parked, not run
        sleep(Duration::from_millis(300)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            h.queue.get(id).await.unwrap().state,
            TaskState::ApprovalPending
        );

        h.pool.shutdown();
        for handle in handles {
            let _ = handle.await;
        }
    }
}
