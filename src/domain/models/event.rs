//! Inbound event envelope fed to the event router.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Severity attached by the producing subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

impl EventSeverity {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "info" => Some(Self::Info),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// An event submitted by an external subsystem (ingestion, monitoring,
/// security scanners, scheduled triggers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    pub severity: EventSeverity,
    pub source: String,
    /// Free-form attributes; well-known keys (e.g. `task_id` for escalation
    /// rules) are read by the router.
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    pub received_at: DateTime<Utc>,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        severity: EventSeverity,
        source: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            severity,
            source: source.into(),
            attributes: HashMap::new(),
            received_at: Utc::now(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Task id referenced by this event, if the producer attached one.
    pub fn task_id_attribute(&self) -> Option<Uuid> {
        self.attributes
            .get("task_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(EventSeverity::Critical > EventSeverity::High);
        assert!(EventSeverity::High > EventSeverity::Info);
    }

    #[test]
    fn test_task_id_attribute_parsing() {
        let id = Uuid::new_v4();
        let event = Event::new("stuck_task", EventSeverity::High, "monitor")
            .with_attribute("task_id", serde_json::json!(id.to_string()));
        assert_eq!(event.task_id_attribute(), Some(id));

        let bad = Event::new("stuck_task", EventSeverity::High, "monitor")
            .with_attribute("task_id", serde_json::json!("not-a-uuid"));
        assert_eq!(bad.task_id_attribute(), None);
    }
}
