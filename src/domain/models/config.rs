//! Configuration for the triage orchestration core.
//!
//! All knobs are startup-time only; no hot reload.

use serde::{Deserialize, Serialize};

use super::event::EventSeverity;
use super::health::HealthLimits;
use super::task::{RiskLevel, TaskPriority};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Number of worker loops pulling from the queue (1-256)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-task handler execution ceiling in seconds
    #[serde(default = "default_execution_ceiling_secs")]
    pub execution_ceiling_secs: u64,

    /// SLA monitoring configuration
    #[serde(default)]
    pub sla: SlaConfig,

    /// Health throttle configuration
    #[serde(default)]
    pub health: HealthConfig,

    /// Approval gate configuration
    #[serde(default)]
    pub approval: ApprovalConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Event router rules, evaluated in order; first match wins
    #[serde(default)]
    pub router_rules: Vec<RouterRuleConfig>,
}

const fn default_workers() -> usize {
    4
}

const fn default_execution_ceiling_secs() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            execution_ceiling_secs: default_execution_ceiling_secs(),
            sla: SlaConfig::default(),
            health: HealthConfig::default(),
            approval: ApprovalConfig::default(),
            logging: LoggingConfig::default(),
            router_rules: vec![],
        }
    }
}

/// SLA monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SlaConfig {
    /// Sweep interval in seconds
    #[serde(default = "default_sla_sweep_secs")]
    pub sweep_interval_secs: u64,

    /// Escalate one level when remaining fraction drops below this
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: f64,
}

const fn default_sla_sweep_secs() -> u64 {
    2
}

fn default_escalation_threshold() -> f64 {
    0.10
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sla_sweep_secs(),
            escalation_threshold: default_escalation_threshold(),
        }
    }
}

/// Health throttle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthConfig {
    /// Sustained-threshold window length in seconds
    #[serde(default = "default_health_window_secs")]
    pub window_secs: u64,

    /// Per-metric limits
    #[serde(default)]
    pub limits: HealthLimits,

    /// Initial backoff applied to Normal/Low dequeues while stressed, in ms
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    /// Backoff cap in ms
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

const fn default_health_window_secs() -> u64 {
    30
}

const fn default_backoff_initial_ms() -> u64 {
    250
}

const fn default_backoff_max_ms() -> u64 {
    8_000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_secs: default_health_window_secs(),
            limits: HealthLimits::default(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

/// Approval gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ApprovalConfig {
    /// Pending requests time out after this many seconds
    #[serde(default = "default_approval_timeout_secs")]
    pub timeout_secs: u64,

    /// Timeout sweep interval in seconds
    #[serde(default = "default_approval_sweep_secs")]
    pub sweep_interval_secs: u64,
}

const fn default_approval_timeout_secs() -> u64 {
    900
}

const fn default_approval_sweep_secs() -> u64 {
    5
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_approval_timeout_secs(),
            sweep_interval_secs: default_approval_sweep_secs(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Predicate over inbound event attributes. All present fields must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RoutePredicateConfig {
    /// Exact event type match
    pub event_type: Option<String>,
    /// Minimum severity (inclusive)
    pub min_severity: Option<EventSeverity>,
    /// Exact source match
    pub source: Option<String>,
}

/// Action taken when a rule matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouteActionConfig {
    /// Enqueue a task built from this template and the event.
    Enqueue {
        task_type: String,
        priority: TaskPriority,
        #[serde(default)]
        risk_level: Option<RiskLevel>,
        /// Deadline offset from enqueue; absent means no SLA
        #[serde(default)]
        sla_secs: Option<u64>,
        /// Override the risk-derived approval requirement
        #[serde(default)]
        requires_approval: Option<bool>,
    },
    /// Log and drop.
    Ignore,
    /// Escalate the task referenced by the event's `task_id` attribute.
    Escalate,
}

/// One ordered router rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RouterRuleConfig {
    pub name: String,
    #[serde(default)]
    pub predicate: RoutePredicateConfig,
    pub action: RouteActionConfig,
}
