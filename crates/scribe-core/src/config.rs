use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Worker pacing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Deliberate delay between finished jobs (rate limiting toward the
    /// paid AI backend).
    pub pacing_interval: Duration,

    /// Delay between dequeue attempts while the queue is empty; also the
    /// backoff applied after an infrastructure error.
    pub idle_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pacing_interval: Duration::from_secs(
                std::env::var("WORKER_PACING_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            idle_interval: Duration::from_secs(
                std::env::var("WORKER_IDLE_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60),
            ),
        }
    }
}

/// Daily scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Six-field cron expression in local time. Default fires at 01:00.
    pub cron_expr: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cron_expr: std::env::var("SCHEDULER_CRON")
                .unwrap_or_else(|_| "0 0 1 * * *".to_string()),
        }
    }
}

/// Auto-trigger configuration. Runtime-mutable through `apply`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub enabled: bool,
    /// Memory growth (or first-time total) required to trigger.
    pub threshold: i64,
    /// Minimum hours between successive runs for the same user.
    pub cooldown_hours: i64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            enabled: std::env::var("TRIGGER_ENABLED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            threshold: std::env::var("TRIGGER_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            cooldown_hours: std::env::var("TRIGGER_COOLDOWN_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24),
        }
    }
}

/// Partial update from the admin surface.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerConfigUpdate {
    pub enabled: Option<bool>,
    pub threshold: Option<i64>,
    pub cooldown_hours: Option<i64>,
}

impl TriggerConfig {
    /// Apply a partial update, clamping to sane minimums.
    pub fn apply(&mut self, update: TriggerConfigUpdate) {
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
        if let Some(threshold) = update.threshold {
            self.threshold = threshold.max(10);
        }
        if let Some(cooldown_hours) = update.cooldown_hours {
            self.cooldown_hours = cooldown_hours.max(1);
        }
    }
}
