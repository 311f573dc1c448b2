//! Health throttle: sustained-threshold backpressure on non-critical
//! dequeues.
//!
//! Samples are pushed by an external metrics collector. The throttle enters
//! STRESSED only after every sample across the configured window exceeds a
//! limit, and exits only after a full window of clean readings (hysteresis,
//! so a single alternating sample cannot flap the state). While stressed,
//! Normal/Low dequeues are delayed with capped exponential backoff and a
//! capacity request is emitted for an external scaling collaborator.

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::domain::models::{HealthConfig, HealthSample, HealthWindow, TaskPriority};
use crate::services::event_bus::{EventBus, TriageEventPayload};
use crate::services::task_queue::QueueDepths;

/// Throttle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleState {
    Nominal,
    Stressed,
}

struct ThrottleInner {
    window: HealthWindow,
    state: ThrottleState,
    /// Consecutive delayed dequeues since entering STRESSED.
    delay_streak: u32,
}

/// Resource-aware dequeue throttle.
pub struct HealthThrottle {
    inner: RwLock<ThrottleInner>,
    config: HealthConfig,
    depths_rx: watch::Receiver<QueueDepths>,
    bus: Arc<EventBus>,
}

impl HealthThrottle {
    pub fn new(
        config: HealthConfig,
        depths_rx: watch::Receiver<QueueDepths>,
        bus: Arc<EventBus>,
    ) -> Self {
        let window_secs = i64::try_from(config.window_secs).unwrap_or(i64::MAX);
        // Retain twice the detection span so exit hysteresis has history.
        let horizon = ChronoDuration::seconds(window_secs.saturating_mul(2));
        Self {
            inner: RwLock::new(ThrottleInner {
                window: HealthWindow::new(horizon),
                state: ThrottleState::Nominal,
                delay_streak: 0,
            }),
            config,
            depths_rx,
            bus,
        }
    }

    /// Ingest one resource sample. The queue-depth override takes
    /// precedence; otherwise the queue's published depth is used.
    pub async fn push_sample(
        &self,
        cpu_pct: f64,
        mem_pct: f64,
        queue_depth_override: Option<usize>,
    ) {
        let queue_depth =
            queue_depth_override.unwrap_or_else(|| self.depths_rx.borrow().total());
        let sample = HealthSample::new(cpu_pct, mem_pct, queue_depth);
        let span = ChronoDuration::seconds(
            i64::try_from(self.config.window_secs).unwrap_or(i64::MAX),
        );

        let stressed_now = {
            let mut inner = self.inner.write().await;
            inner.window.push(sample);

            match inner.state {
                ThrottleState::Nominal => {
                    if inner.window.sustained_over(&self.config.limits, span) {
                        warn!(
                            cpu_pct,
                            mem_pct, queue_depth, "Health throttle entering stressed state"
                        );
                        inner.state = ThrottleState::Stressed;
                        inner.delay_streak = 0;
                    }
                }
                ThrottleState::Stressed => {
                    if inner.window.sustained_under(&self.config.limits, span) {
                        info!("Health throttle recovered to nominal");
                        inner.state = ThrottleState::Nominal;
                        inner.delay_streak = 0;
                    }
                }
            }
            inner.state == ThrottleState::Stressed
        };

        if stressed_now {
            self.bus.publish(TriageEventPayload::CapacityRequested {
                queue_depth,
                cpu_pct,
                mem_pct,
            });
        }
    }

    pub async fn state(&self) -> ThrottleState {
        self.inner.read().await.state
    }

    /// Whether a dequeue at this priority should be delayed right now.
    /// Critical and High are never delayed.
    pub async fn should_delay(&self, priority: TaskPriority) -> bool {
        priority < TaskPriority::High && self.inner.read().await.state == ThrottleState::Stressed
    }

    /// Next backoff interval for a delayed dequeue: exponential in the
    /// number of consecutive delays, capped at the configured maximum.
    pub async fn next_backoff(&self) -> Duration {
        let mut inner = self.inner.write().await;
        let shift = inner.delay_streak.min(16);
        inner.delay_streak = inner.delay_streak.saturating_add(1);
        let ms = self
            .config
            .backoff_initial_ms
            .saturating_mul(1 << shift)
            .min(self.config.backoff_max_ms);
        debug!(backoff_ms = ms, "Throttled dequeue backoff");
        Duration::from_millis(ms)
    }
}
