//! Event policy router.
//!
//! Evaluates inbound events against an ordered, configuration-defined rule
//! list. First matching rule wins; unmatched events are ignored (log-only)
//! so noise can never grow the queues unbounded.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::models::{
    Event, RiskLevel, RouteActionConfig, RoutePredicateConfig, RouterRuleConfig, Task,
    TaskContext,
};
use crate::domain::TriageResult;
use crate::services::task_queue::TaskQueue;

/// What the router did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    /// A task was enqueued.
    Enqueued(Uuid),
    /// Dropped, with a log line.
    Ignored,
    /// An existing task was escalated one level.
    Escalated(Uuid),
}

/// Ordered first-match-wins router over inbound events.
pub struct EventRouter {
    rules: Vec<RouterRuleConfig>,
    queue: Arc<TaskQueue>,
}

impl EventRouter {
    pub fn new(rules: Vec<RouterRuleConfig>, queue: Arc<TaskQueue>) -> Self {
        Self { rules, queue }
    }

    /// Route one event. Only enqueue-time errors (unknown task type)
    /// surface to the caller; everything else resolves to an action.
    pub async fn route(&self, event: &Event) -> TriageResult<RouteAction> {
        let Some(rule) = self.rules.iter().find(|r| matches(&r.predicate, event)) else {
            debug!(
                event_type = %event.event_type,
                severity = %event.severity,
                source = %event.source,
                "Event matched no rule; ignoring"
            );
            return Ok(RouteAction::Ignored);
        };

        match &rule.action {
            RouteActionConfig::Ignore => {
                debug!(rule = %rule.name, event_type = %event.event_type, "Rule ignores event");
                Ok(RouteAction::Ignored)
            }
            RouteActionConfig::Escalate => {
                let Some(task_id) = event.task_id_attribute() else {
                    warn!(rule = %rule.name, "Escalate rule matched an event without a task_id");
                    return Ok(RouteAction::Ignored);
                };
                if self.queue.escalate(task_id).await.is_some() {
                    Ok(RouteAction::Escalated(task_id))
                } else {
                    debug!(task_id = %task_id, "Escalation had no effect");
                    Ok(RouteAction::Ignored)
                }
            }
            RouteActionConfig::Enqueue {
                task_type,
                priority,
                risk_level,
                sla_secs,
                requires_approval,
            } => {
                let task = build_task(
                    event,
                    task_type,
                    *priority,
                    *risk_level,
                    *sla_secs,
                    *requires_approval,
                );
                let id = self.queue.enqueue(task).await?;
                debug!(rule = %rule.name, task_id = %id, "Event routed to queue");
                Ok(RouteAction::Enqueued(id))
            }
        }
    }
}

fn matches(predicate: &RoutePredicateConfig, event: &Event) -> bool {
    if let Some(ref event_type) = predicate.event_type {
        if *event_type != event.event_type {
            return false;
        }
    }
    if let Some(min_severity) = predicate.min_severity {
        if event.severity < min_severity {
            return false;
        }
    }
    if let Some(ref source) = predicate.source {
        if *source != event.source {
            return false;
        }
    }
    true
}

fn build_task(
    event: &Event,
    task_type: &str,
    priority: crate::domain::models::TaskPriority,
    risk_level: Option<RiskLevel>,
    sla_secs: Option<u64>,
    requires_approval: Option<bool>,
) -> Task {
    let mut context = TaskContext::new(event.source.clone());
    if let Some(risk) = risk_level {
        context = context.with_risk(risk);
    }
    if let Some(required) = requires_approval {
        context = context.with_requires_approval(required);
    }
    // Producers may name the resources an incident touches.
    if let Some(resources) = event.attributes.get("resources").and_then(|v| v.as_array()) {
        for resource in resources.iter().filter_map(|r| r.as_str()) {
            context = context.with_resource(resource);
        }
    }

    let payload = serde_json::json!({
        "event_type": event.event_type,
        "severity": event.severity,
        "source": event.source,
        "attributes": event.attributes,
    });

    let mut task = Task::new(task_type)
        .with_priority(priority)
        .with_payload(payload)
        .with_context(context);
    if let Some(secs) = sla_secs {
        task.sla_deadline = Some(
            task.enqueue_time + ChronoDuration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)),
        );
    }
    task
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{EventSeverity, TaskPriority, TaskState};
    use crate::domain::TriageError;
    use crate::services::event_bus::EventBus;
    use crate::services::handler_registry::{HandlerRegistry, HandlerResult, TaskHandler};
    use async_trait::async_trait;

    struct NoopHandler;

    #[async_trait]
    impl TaskHandler for NoopHandler {
        async fn handle(
            &self,
            _task: &Task,
            _rec: Option<Vec<crate::domain::models::WorkflowStep>>,
        ) -> HandlerResult {
            Ok(vec![])
        }
    }

    async fn queue_with_types(types: &[&str]) -> Arc<TaskQueue> {
        let registry = Arc::new(HandlerRegistry::new());
        for t in types {
            registry.register(*t, Arc::new(NoopHandler)).await;
        }
        Arc::new(TaskQueue::new(registry, Arc::new(EventBus::default())))
    }

    fn enqueue_rule(name: &str, event_type: &str, min: EventSeverity) -> RouterRuleConfig {
        RouterRuleConfig {
            name: name.to_string(),
            predicate: RoutePredicateConfig {
                event_type: Some(event_type.to_string()),
                min_severity: Some(min),
                source: None,
            },
            action: RouteActionConfig::Enqueue {
                task_type: event_type.to_string(),
                priority: TaskPriority::High,
                risk_level: None,
                sla_secs: Some(600),
                requires_approval: None,
            },
        }
    }

    #[tokio::test]
    async fn test_matching_rule_enqueues() {
        let queue = queue_with_types(&["db_timeout"]).await;
        let router = EventRouter::new(
            vec![enqueue_rule("db", "db_timeout", EventSeverity::High)],
            Arc::clone(&queue),
        );

        let event = Event::new("db_timeout", EventSeverity::High, "monitor")
            .with_attribute("resources", serde_json::json!(["db-primary"]));
        let action = router.route(&event).await.unwrap();

        let RouteAction::Enqueued(id) = action else {
            panic!("expected enqueue, got {action:?}");
        };
        let task = queue.get(id).await.unwrap();
        assert_eq!(task.task_type, "db_timeout");
        assert_eq!(task.priority, TaskPriority::High);
        assert!(task.sla_deadline.is_some());
        assert_eq!(task.context.dependent_resources, vec!["db-primary"]);
        assert_eq!(task.context.origin, "monitor");
    }

    #[tokio::test]
    async fn test_severity_below_floor_falls_through_to_ignore() {
        let queue = queue_with_types(&["db_timeout"]).await;
        let router = EventRouter::new(
            vec![enqueue_rule("db", "db_timeout", EventSeverity::High)],
            queue,
        );

        let event = Event::new("db_timeout", EventSeverity::Low, "monitor");
        assert_eq!(router.route(&event).await.unwrap(), RouteAction::Ignored);
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let queue = queue_with_types(&["db_timeout"]).await;
        let ignore_first = RouterRuleConfig {
            name: "mute-db".to_string(),
            predicate: RoutePredicateConfig {
                event_type: Some("db_timeout".to_string()),
                min_severity: None,
                source: None,
            },
            action: RouteActionConfig::Ignore,
        };
        let router = EventRouter::new(
            vec![
                ignore_first,
                enqueue_rule("db", "db_timeout", EventSeverity::Info),
            ],
            queue,
        );

        let event = Event::new("db_timeout", EventSeverity::Critical, "monitor");
        assert_eq!(router.route(&event).await.unwrap(), RouteAction::Ignored);
    }

    #[tokio::test]
    async fn test_unmatched_event_ignored() {
        let queue = queue_with_types(&[]).await;
        let router = EventRouter::new(vec![], queue);
        let event = Event::new("anything", EventSeverity::Critical, "x");
        assert_eq!(router.route(&event).await.unwrap(), RouteAction::Ignored);
    }

    #[tokio::test]
    async fn test_unknown_task_type_surfaces() {
        let queue = queue_with_types(&[]).await;
        let router = EventRouter::new(
            vec![enqueue_rule("db", "db_timeout", EventSeverity::Info)],
            queue,
        );
        let event = Event::new("db_timeout", EventSeverity::High, "monitor");
        let err = router.route(&event).await.unwrap_err();
        assert!(matches!(err, TriageError::UnknownTaskType(_)));
    }

    #[tokio::test]
    async fn test_escalate_rule() {
        let queue = queue_with_types(&["t"]).await;
        let id = queue
            .enqueue(Task::new("t").with_priority(TaskPriority::Normal))
            .await
            .unwrap();

        let rule = RouterRuleConfig {
            name: "stuck".to_string(),
            predicate: RoutePredicateConfig {
                event_type: Some("stuck_task".to_string()),
                min_severity: None,
                source: None,
            },
            action: RouteActionConfig::Escalate,
        };
        let router = EventRouter::new(vec![rule], Arc::clone(&queue));

        let event = Event::new("stuck_task", EventSeverity::High, "monitor")
            .with_attribute("task_id", serde_json::json!(id.to_string()));
        assert_eq!(router.route(&event).await.unwrap(), RouteAction::Escalated(id));
        assert_eq!(queue.get(id).await.unwrap().priority, TaskPriority::High);
        assert_eq!(queue.get(id).await.unwrap().state, TaskState::Queued);

        // Missing task_id degrades to ignore
        let bare = Event::new("stuck_task", EventSeverity::High, "monitor");
        assert_eq!(router.route(&bare).await.unwrap(), RouteAction::Ignored);
    }
}
