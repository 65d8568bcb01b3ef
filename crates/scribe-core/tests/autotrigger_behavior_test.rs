use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use scribe_core::autotrigger::{AutoTrigger, POST_OPTIMIZATION_COUNT};
use scribe_core::config::{TriggerConfig, TriggerConfigUpdate};
use scribe_core::executor::{StepExecutor, StepOutcome};
use scribe_core::models::{ProgressMap, RunOutcome, Scalar, WORKFLOW_MEMORY_OPTIMIZATION};
use scribe_core::sources::MemoryCensus;
use scribe_core::tracker::RunTracker;
use scribe_state::SqliteDatabase;

struct StubCensus {
    counts: HashMap<String, i64>,
    fail: bool,
}

impl StubCensus {
    fn with_count(user: &str, count: i64) -> Self {
        Self {
            counts: HashMap::from([(user.to_string(), count)]),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            counts: HashMap::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl MemoryCensus for StubCensus {
    async fn memory_count(&self, user_id: &str) -> Result<i64> {
        if self.fail {
            anyhow::bail!("census store unreachable");
        }
        Ok(self.counts.get(user_id).copied().unwrap_or(0))
    }
}

/// Records invocations; never completes the run so the trigger's own writes
/// stay observable.
struct RecordingExecutor {
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

#[async_trait]
impl StepExecutor for RecordingExecutor {
    async fn execute(
        &self,
        user_id: &str,
        _params: &ProgressMap,
        run_id: &str,
    ) -> Result<StepOutcome> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((user_id.to_string(), run_id.to_string()));
        Ok(StepOutcome::ok())
    }
}

fn test_config() -> TriggerConfig {
    TriggerConfig {
        enabled: true,
        threshold: 100,
        cooldown_hours: 24,
    }
}

struct Fixture {
    db: Arc<SqliteDatabase>,
    tracker: Arc<RunTracker<SqliteDatabase>>,
    executor: Arc<RecordingExecutor>,
    trigger: AutoTrigger<SqliteDatabase, StubCensus>,
}

async fn setup(census: StubCensus, config: TriggerConfig) -> Result<Fixture> {
    let db = Arc::new(SqliteDatabase::new(":memory:").await?);
    db.run_migrations().await?;
    let tracker = Arc::new(RunTracker::new(Arc::clone(&db)));
    let executor = RecordingExecutor::new();
    let trigger = AutoTrigger::new(
        Arc::clone(&tracker),
        Arc::new(census),
        executor.clone() as Arc<dyn StepExecutor>,
        config,
    );
    Ok(Fixture {
        db,
        tracker,
        executor,
        trigger,
    })
}

/// Seed a terminal run and backdate its completion time.
async fn seed_finished_run(
    fx: &Fixture,
    run_id: &str,
    user: &str,
    outcome: RunOutcome,
    post_count: Option<i64>,
    hours_ago: i64,
) -> Result<()> {
    fx.tracker
        .start(run_id, WORKFLOW_MEMORY_OPTIMIZATION, user, &ProgressMap::new())
        .await?;
    let output = match post_count {
        Some(count) => ProgressMap::from([(
            POST_OPTIMIZATION_COUNT.to_string(),
            Scalar::Int(count),
        )]),
        None => ProgressMap::new(),
    };
    fx.tracker
        .complete(run_id, outcome, &output, None)
        .await?;

    let backdated = Utc::now() - chrono::Duration::hours(hours_ago);
    sqlx::query("UPDATE workflow_runs SET completed_at = ? WHERE run_id = ?")
        .bind(backdated)
        .bind(run_id)
        .execute(fx.db.pool())
        .await?;
    Ok(())
}

async fn wait_for_calls(executor: &RecordingExecutor, expected: usize) {
    for _ in 0..200 {
        if executor.call_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("executor was not invoked {expected} time(s)");
}

#[tokio::test]
async fn test_first_time_user_triggers_on_absolute_count() -> Result<()> {
    let fx = setup(StubCensus::with_count("user-1", 150), test_config()).await?;

    fx.trigger.maybe_trigger("user-1").await;

    // The run row exists as soon as the trigger returns.
    let active = fx.tracker.query_active(Some(WORKFLOW_MEMORY_OPTIMIZATION)).await?;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].user_id, "user-1");
    wait_for_calls(&fx.executor, 1).await;
    Ok(())
}

#[tokio::test]
async fn test_first_time_user_below_threshold_is_skipped() -> Result<()> {
    let fx = setup(StubCensus::with_count("user-1", 50), test_config()).await?;

    fx.trigger.maybe_trigger("user-1").await;

    assert!(fx.tracker.query_active(None).await?.is_empty());
    assert_eq!(fx.executor.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_returning_user_needs_growth_not_total() -> Result<()> {
    // 150 memories but only +50 since the last optimization.
    let fx = setup(StubCensus::with_count("user-1", 150), test_config()).await?;
    seed_finished_run(&fx, "run-old", "user-1", RunOutcome::Completed, Some(100), 48).await?;

    fx.trigger.maybe_trigger("user-1").await;
    assert!(fx.tracker.query_active(None).await?.is_empty());
    assert_eq!(fx.executor.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_returning_user_triggers_on_growth() -> Result<()> {
    let fx = setup(StubCensus::with_count("user-1", 220), test_config()).await?;
    seed_finished_run(&fx, "run-old", "user-1", RunOutcome::Completed, Some(100), 48).await?;

    fx.trigger.maybe_trigger("user-1").await;

    let active = fx.tracker.query_active(None).await?;
    assert_eq!(active.len(), 1);
    wait_for_calls(&fx.executor, 1).await;
    Ok(())
}

#[tokio::test]
async fn test_cooldown_blocks_recent_runs() -> Result<()> {
    let fx = setup(StubCensus::with_count("user-1", 400), test_config()).await?;
    // Otherwise eligible, but the last run finished an hour ago.
    seed_finished_run(&fx, "run-old", "user-1", RunOutcome::Completed, Some(100), 1).await?;

    fx.trigger.maybe_trigger("user-1").await;
    assert!(fx.tracker.query_active(None).await?.is_empty());
    assert_eq!(fx.executor.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_cooldown_expires_after_window() -> Result<()> {
    let fx = setup(StubCensus::with_count("user-1", 400), test_config()).await?;
    seed_finished_run(&fx, "run-old", "user-1", RunOutcome::Completed, Some(100), 25).await?;

    fx.trigger.maybe_trigger("user-1").await;
    assert_eq!(fx.tracker.query_active(None).await?.len(), 1);
    wait_for_calls(&fx.executor, 1).await;
    Ok(())
}

#[tokio::test]
async fn test_cooldown_counts_failed_runs_too() -> Result<()> {
    let fx = setup(StubCensus::with_count("user-1", 150), test_config()).await?;
    // A failed run an hour ago: no baseline, but the cooldown still applies.
    seed_finished_run(&fx, "run-old", "user-1", RunOutcome::Failed, None, 1).await?;

    fx.trigger.maybe_trigger("user-1").await;
    assert!(fx.tracker.query_active(None).await?.is_empty());
    assert_eq!(fx.executor.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_disabled_and_empty_users_are_noops() -> Result<()> {
    let fx = setup(
        StubCensus::with_count("user-1", 500),
        TriggerConfig {
            enabled: false,
            ..test_config()
        },
    )
    .await?;
    fx.trigger.maybe_trigger("user-1").await;
    assert_eq!(fx.executor.call_count(), 0);

    // Re-enable: a user with zero memories still never triggers.
    fx.trigger
        .update_config(TriggerConfigUpdate {
            enabled: Some(true),
            ..Default::default()
        })
        .await;
    fx.trigger.maybe_trigger("user-with-nothing").await;
    assert_eq!(fx.executor.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_evaluation_errors_never_escape() -> Result<()> {
    let fx = setup(StubCensus::failing(), test_config()).await?;
    // Must not panic or propagate.
    fx.trigger.maybe_trigger("user-1").await;
    assert_eq!(fx.executor.call_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_update_config_clamps_minimums() -> Result<()> {
    let fx = setup(StubCensus::with_count("user-1", 0), test_config()).await?;
    let config = fx
        .trigger
        .update_config(TriggerConfigUpdate {
            threshold: Some(1),
            cooldown_hours: Some(-5),
            ..Default::default()
        })
        .await;
    assert_eq!(config.threshold, 10);
    assert_eq!(config.cooldown_hours, 1);
    Ok(())
}
