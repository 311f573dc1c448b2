//! Integration tests for the simulation harness: synthetic load, latency
//! reporting, and isolation from production learning state.

use std::sync::Arc;
use std::time::Duration;

use triage::domain::models::{
    signature, Config, Event, EventSeverity, RouteActionConfig, RoutePredicateConfig,
    RouterRuleConfig, Task, TaskPriority, WorkflowOutcome,
};
use triage::services::learning_store::{InMemoryWorkflowStore, LearningService};
use triage::services::simulation::ScriptedHandler;
use triage::services::{SimulationHarness, WorkflowStore};

#[tokio::test]
async fn test_synthetic_critical_load_drains_with_latency_report() {
    let mut harness = SimulationHarness::new(Config {
        workers: 4,
        ..Config::default()
    });
    harness
        .register_handler(
            "incident",
            Arc::new(ScriptedHandler {
                latency: Duration::from_millis(2),
                succeed: true,
            }),
        )
        .await;
    for _ in 0..50 {
        harness.inject_task(Task::new("incident").with_priority(TaskPriority::Critical));
    }

    let report = harness.run(Duration::from_secs(30)).await.unwrap();
    assert_eq!(report.injected, 50);
    assert_eq!(report.resolved, 50);
    assert_eq!(report.failed, 0);
    assert_eq!(report.unfinished, 0);
    assert_eq!(report.sla_breaches, 0);

    assert!(report.mean_dispatch_latency_ms <= report.p95_dispatch_latency_ms);
    assert!(report.p50_dispatch_latency_ms <= report.p95_dispatch_latency_ms);
    // 50 tasks at 2ms across 4 workers should dispatch well under this
    assert!(report.p95_dispatch_latency_ms < 5_000.0);
}

#[tokio::test]
async fn test_simulated_events_route_like_production() {
    let config = Config {
        workers: 2,
        router_rules: vec![RouterRuleConfig {
            name: "overload".to_string(),
            predicate: RoutePredicateConfig {
                event_type: Some("cpu_overload".to_string()),
                min_severity: Some(EventSeverity::Medium),
                source: None,
            },
            action: RouteActionConfig::Enqueue {
                task_type: "shed_load".to_string(),
                priority: TaskPriority::Normal,
                risk_level: None,
                sla_secs: None,
                requires_approval: None,
            },
        }],
        ..Config::default()
    };
    let mut harness = SimulationHarness::with_store(
        config,
        Arc::new(InMemoryWorkflowStore::new()) as Arc<dyn WorkflowStore>,
    );
    harness
        .register_handler(
            "shed_load",
            Arc::new(ScriptedHandler {
                latency: Duration::ZERO,
                succeed: true,
            }),
        )
        .await;

    harness.inject_event(Event::new("cpu_overload", EventSeverity::High, "sim"));
    harness.inject_event(Event::new("cpu_overload", EventSeverity::Info, "sim"));
    harness.inject_event(Event::new("unrelated", EventSeverity::Critical, "sim"));

    let report = harness.run(Duration::from_secs(10)).await.unwrap();
    assert_eq!(report.injected, 1);
    assert_eq!(report.ignored_events, 2);
    assert_eq!(report.resolved, 1);
}

#[tokio::test]
async fn test_simulation_does_not_pollute_production_recommendations() {
    let store = Arc::new(InMemoryWorkflowStore::new());

    let mut harness = SimulationHarness::with_store(
        Config {
            workers: 1,
            ..Config::default()
        },
        Arc::clone(&store) as Arc<dyn WorkflowStore>,
    );
    harness
        .register_handler(
            "reindex",
            Arc::new(ScriptedHandler {
                latency: Duration::ZERO,
                succeed: true,
            }),
        )
        .await;
    let task = Task::new("reindex");
    let sig = signature(&task.task_type, &task.context);
    harness.inject_task(task);
    harness.run(Duration::from_secs(10)).await.unwrap();

    // The record exists, but only under the simulation namespace
    let production = LearningService::new(Arc::clone(&store) as Arc<dyn WorkflowStore>);
    assert_eq!(production.recommend(&sig).await, None);
    let sim_records = store.by_signature(&format!("sim:{sig}")).await.unwrap();
    assert_eq!(sim_records.len(), 1);
    assert_eq!(sim_records[0].outcome, WorkflowOutcome::Resolved);
}
