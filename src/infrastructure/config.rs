//! Configuration loading.
//!
//! Precedence, lowest to highest: built-in defaults, a YAML file, then
//! `TRIAGE_`-prefixed environment variables (nested keys separated by
//! `__`, e.g. `TRIAGE_SLA__SWEEP_INTERVAL_SECS=1`).

use anyhow::Context;
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use tracing::info;

use crate::domain::models::{Config, RouteActionConfig};
use crate::domain::{TriageError, TriageResult};

/// Load configuration from defaults, an optional YAML file, and the
/// environment, then validate.
pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));
    if let Some(path) = path {
        figment = figment.merge(Yaml::file(path));
    }
    let config: Config = figment
        .merge(Env::prefixed("TRIAGE_").split("__"))
        .extract()
        .context("invalid configuration")?;

    validate(&config)?;
    info!(
        workers = config.workers,
        rules = config.router_rules.len(),
        "Configuration loaded"
    );
    Ok(config)
}

/// Reject configurations that would wedge the core at startup rather
/// than fail obscurely later.
pub fn validate(config: &Config) -> TriageResult<()> {
    if config.workers == 0 || config.workers > 256 {
        return Err(TriageError::ValidationFailed(format!(
            "workers must be in 1..=256, got {}",
            config.workers
        )));
    }
    if config.execution_ceiling_secs == 0 {
        return Err(TriageError::ValidationFailed(
            "execution_ceiling_secs must be positive".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&config.sla.escalation_threshold) {
        return Err(TriageError::ValidationFailed(format!(
            "sla.escalation_threshold must be in 0.0..=1.0, got {}",
            config.sla.escalation_threshold
        )));
    }
    if config.health.backoff_initial_ms == 0
        || config.health.backoff_max_ms < config.health.backoff_initial_ms
    {
        return Err(TriageError::ValidationFailed(
            "health backoff range is empty".to_string(),
        ));
    }
    if config.approval.timeout_secs == 0 {
        return Err(TriageError::ValidationFailed(
            "approval.timeout_secs must be positive".to_string(),
        ));
    }
    for rule in &config.router_rules {
        if rule.name.is_empty() {
            return Err(TriageError::ValidationFailed(
                "router rule names must be non-empty".to_string(),
            ));
        }
        if let RouteActionConfig::Enqueue { task_type, .. } = &rule.action {
            if task_type.is_empty() {
                return Err(TriageError::ValidationFailed(format!(
                    "rule '{}' enqueues an empty task_type",
                    rule.name
                )));
            }
        }
    }
    Ok(())
}
