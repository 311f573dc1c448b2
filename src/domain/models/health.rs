//! Health samples and the bounded sliding window used for sustained
//! threshold detection.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Point-in-time resource reading pushed by an external metrics collector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub queue_depth: usize,
    pub timestamp: DateTime<Utc>,
}

impl HealthSample {
    pub fn new(cpu_pct: f64, mem_pct: f64, queue_depth: usize) -> Self {
        Self {
            cpu_pct,
            mem_pct,
            queue_depth,
            timestamp: Utc::now(),
        }
    }
}

/// Per-metric limits for sustained-threshold detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthLimits {
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub queue_depth: usize,
}

impl Default for HealthLimits {
    fn default() -> Self {
        Self {
            cpu_pct: 85.0,
            mem_pct: 90.0,
            queue_depth: 500,
        }
    }
}

impl HealthLimits {
    /// Whether any metric in a sample is over its limit.
    pub fn exceeded_by(&self, sample: &HealthSample) -> bool {
        sample.cpu_pct > self.cpu_pct
            || sample.mem_pct > self.mem_pct
            || sample.queue_depth > self.queue_depth
    }
}

/// Sliding window of recent samples, pruned to a fixed time horizon.
///
/// Written by one sampling source and read by the health throttle only.
#[derive(Debug, Clone)]
pub struct HealthWindow {
    samples: VecDeque<HealthSample>,
    horizon: Duration,
}

impl HealthWindow {
    pub fn new(horizon: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            horizon,
        }
    }

    /// Append a sample and drop anything older than the horizon.
    pub fn push(&mut self, sample: HealthSample) {
        let cutoff = sample.timestamp - self.horizon;
        self.samples.push_back(sample);
        while self
            .samples
            .front()
            .is_some_and(|s| s.timestamp < cutoff)
        {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&HealthSample> {
        self.samples.back()
    }

    /// True when every sample in the last `span` exceeds the limits.
    ///
    /// Requires retained samples to actually cover the span: a single hot
    /// sample is not "sustained".
    pub fn sustained_over(&self, limits: &HealthLimits, span: Duration) -> bool {
        self.sustained(span, |s| limits.exceeded_by(s))
    }

    /// True when every sample in the last `span` is under the limits.
    pub fn sustained_under(&self, limits: &HealthLimits, span: Duration) -> bool {
        self.sustained(span, |s| !limits.exceeded_by(s))
    }

    fn sustained(&self, span: Duration, pred: impl Fn(&HealthSample) -> bool) -> bool {
        let Some(last) = self.samples.back() else {
            return false;
        };
        let cutoff = last.timestamp - span;
        // The oldest retained sample must predate the span, otherwise the
        // readings do not yet cover it.
        if self.samples.front().is_none_or(|f| f.timestamp > cutoff) {
            return false;
        }
        self.samples
            .iter()
            .filter(|s| s.timestamp >= cutoff)
            .all(pred)
    }
}
