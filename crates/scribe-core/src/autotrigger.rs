// Growth-based auto-trigger for memory optimization.
//
// Invoked fire-and-forget after a user interaction completes. It must never
// block or raise into the caller's request path: every failure is logged and
// swallowed. Eligibility distinguishes "never run" (absolute threshold over
// the current count) from "run before" (growth since the last successful
// run), and a cooldown bounds the cost of bursty triggering against the
// rate-limited AI backend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{TriggerConfig, TriggerConfigUpdate};
use crate::database::RunRepository;
use crate::executor::StepExecutor;
use crate::models::{ProgressMap, Scalar, WORKFLOW_MEMORY_OPTIMIZATION};
use crate::sources::MemoryCensus;
use crate::tracker::RunTracker;

/// Output key holding the memory count recorded right after an optimization
/// run finished; the baseline for the next growth computation.
pub const POST_OPTIMIZATION_COUNT: &str = "post_optimization_count";

pub struct AutoTrigger<D: RunRepository + 'static, C: MemoryCensus + 'static> {
    tracker: Arc<RunTracker<D>>,
    census: Arc<C>,
    executor: Arc<dyn StepExecutor>,
    config: RwLock<TriggerConfig>,
}

impl<D: RunRepository, C: MemoryCensus> AutoTrigger<D, C> {
    pub fn new(
        tracker: Arc<RunTracker<D>>,
        census: Arc<C>,
        executor: Arc<dyn StepExecutor>,
        config: TriggerConfig,
    ) -> Self {
        Self {
            tracker,
            census,
            executor,
            config: RwLock::new(config),
        }
    }

    pub async fn config(&self) -> TriggerConfig {
        self.config.read().await.clone()
    }

    pub async fn update_config(&self, update: TriggerConfigUpdate) -> TriggerConfig {
        let mut config = self.config.write().await;
        config.apply(update);
        config.clone()
    }

    /// Evaluate the trigger for one user. Never fails the caller.
    pub async fn maybe_trigger(&self, user_id: &str) {
        if let Err(e) = self.evaluate(user_id).await {
            error!(user_id, "auto-trigger evaluation failed: {e:#}");
        }
    }

    async fn evaluate(&self, user_id: &str) -> anyhow::Result<()> {
        let config = self.config().await;
        if !config.enabled {
            debug!(user_id, "auto-trigger disabled, skipping");
            return Ok(());
        }

        let current_count = self.census.memory_count(user_id).await?;
        if current_count == 0 {
            debug!(user_id, "user has no memories, skipping");
            return Ok(());
        }

        let baseline = self.baseline(user_id).await?;
        if !growth_eligible(current_count, baseline, config.threshold) {
            debug!(
                user_id,
                current_count,
                ?baseline,
                threshold = config.threshold,
                "below trigger threshold"
            );
            return Ok(());
        }

        let last_finished = self
            .tracker
            .last_finished_at(user_id, WORKFLOW_MEMORY_OPTIMIZATION)
            .await?;
        if !cooldown_elapsed(last_finished, config.cooldown_hours, Utc::now()) {
            info!(user_id, "within cooldown period, skipping");
            return Ok(());
        }

        match baseline {
            Some(b) => info!(
                user_id,
                growth = current_count - b,
                current_count,
                "triggering memory optimization"
            ),
            None => info!(
                user_id,
                current_count, "triggering first-time memory optimization"
            ),
        }

        self.spawn_run(user_id, current_count).await
    }

    /// Baseline count from the most recent successfully completed run.
    async fn baseline(&self, user_id: &str) -> anyhow::Result<Option<i64>> {
        let last = self
            .tracker
            .last_completed(user_id, WORKFLOW_MEMORY_OPTIMIZATION)
            .await?;
        Ok(last
            .and_then(|run| run.output_data.get(POST_OPTIMIZATION_COUNT).cloned())
            .and_then(|v| v.as_i64()))
    }

    /// Start tracking and spawn the executor detached. The supervisor task
    /// only logs; nothing propagates into the request path.
    async fn spawn_run(&self, user_id: &str, current_count: i64) -> anyhow::Result<()> {
        let run_id = Uuid::new_v4().to_string();
        let input = ProgressMap::from([
            ("trigger".to_string(), Scalar::Text("memory_growth".to_string())),
            ("memory_count".to_string(), Scalar::Int(current_count)),
        ]);
        self.tracker
            .start(&run_id, WORKFLOW_MEMORY_OPTIMIZATION, user_id, &input)
            .await?;

        let executor = Arc::clone(&self.executor);
        let user = user_id.to_string();
        let handle = tokio::spawn(async move {
            match executor.execute(&user, &input, &run_id).await {
                Ok(outcome) if outcome.success => {
                    info!(user_id = %user, run_id = %run_id, "background optimization completed");
                }
                Ok(outcome) => {
                    warn!(
                        user_id = %user,
                        run_id = %run_id,
                        error = outcome.error.as_deref().unwrap_or("unknown"),
                        "background optimization failed"
                    );
                }
                Err(e) => {
                    error!(user_id = %user, run_id = %run_id, "background optimization error: {e:#}");
                }
            }
        });

        // Observe the detached task so a panic is logged instead of lost.
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                error!("background optimization task aborted: {e}");
            }
        });

        Ok(())
    }
}

/// First-time users trigger on the absolute count; returning users trigger
/// on growth since the recorded baseline.
fn growth_eligible(current_count: i64, baseline: Option<i64>, threshold: i64) -> bool {
    match baseline {
        Some(baseline) => current_count - baseline >= threshold,
        None => current_count >= threshold,
    }
}

/// True when the user may run again: never ran, or the cooldown expired.
fn cooldown_elapsed(
    last_finished: Option<DateTime<Utc>>,
    cooldown_hours: i64,
    now: DateTime<Utc>,
) -> bool {
    match last_finished {
        Some(last) => now >= last + chrono::Duration::hours(cooldown_hours),
        None => true,
    }
}
