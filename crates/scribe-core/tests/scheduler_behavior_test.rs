use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Local, NaiveDate};

use scribe_core::config::SchedulerConfig;
use scribe_core::database::JobRepository;
use scribe_core::models::GapUser;
use scribe_core::scheduler::{DailyScheduler, DAILY_JOB_PRIORITY};
use scribe_core::sources::ActivityCalendar;
use scribe_state::SqliteDatabase;

/// Calendar stub that reports a fixed set of users needing journals for any
/// date.
struct FixedCalendar {
    users: Vec<String>,
}

impl FixedCalendar {
    fn new(users: &[&str]) -> Self {
        Self {
            users: users.iter().map(|u| u.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ActivityCalendar for FixedCalendar {
    async fn activity_dates(&self, _user_id: &str) -> Result<Vec<NaiveDate>> {
        Ok(Vec::new())
    }

    async fn journaled_dates(&self, _user_id: &str) -> Result<Vec<NaiveDate>> {
        Ok(Vec::new())
    }

    async fn registered_on(&self, _user_id: &str) -> Result<Option<NaiveDate>> {
        Ok(None)
    }

    async fn users_with_activity_no_journal(
        &self,
        _target_date: NaiveDate,
    ) -> Result<Vec<String>> {
        Ok(self.users.clone())
    }

    async fn users_with_gap_days(&self) -> Result<Vec<GapUser>> {
        Ok(Vec::new())
    }
}

async fn setup_db() -> Result<Arc<SqliteDatabase>> {
    let db = Arc::new(SqliteDatabase::new(":memory:").await?);
    db.run_migrations().await?;
    Ok(db)
}

fn scheduler(
    db: Arc<SqliteDatabase>,
    users: &[&str],
) -> Result<DailyScheduler<SqliteDatabase, FixedCalendar>> {
    Ok(DailyScheduler::new(
        db,
        Arc::new(FixedCalendar::new(users)),
        SchedulerConfig::default(),
    )?)
}

#[tokio::test]
async fn test_trigger_now_targets_yesterday_with_daily_priority() -> Result<()> {
    let db = setup_db().await?;
    let scheduler = scheduler(Arc::clone(&db), &["user-1", "user-2"])?;

    assert_eq!(scheduler.trigger_now().await?, 2);

    let yesterday = Local::now().date_naive() - ChronoDuration::days(1);
    let job = db.next_pending_job().await?.expect("queued job");
    assert_eq!(job.priority, DAILY_JOB_PRIORITY);
    assert_eq!(job.target_date, yesterday);
    assert_eq!(db.queue_stats().await?.pending, 2);
    Ok(())
}

#[tokio::test]
async fn test_daily_procedure_is_idempotent() -> Result<()> {
    let db = setup_db().await?;
    let scheduler = scheduler(Arc::clone(&db), &["user-1", "user-2"])?;

    assert_eq!(scheduler.trigger_now().await?, 2);
    // Re-running for the same target date queues nothing new.
    assert_eq!(scheduler.trigger_now().await?, 0);
    assert_eq!(db.queue_stats().await?.total, 2);
    Ok(())
}

#[tokio::test]
async fn test_anonymous_users_are_never_queued() -> Result<()> {
    let db = setup_db().await?;
    let scheduler = scheduler(Arc::clone(&db), &["user-1", "anon-5fd3"])?;

    assert_eq!(scheduler.trigger_now().await?, 1);
    let job = db.next_pending_job().await?.expect("queued job");
    assert_eq!(job.user_id, "user-1");
    Ok(())
}

#[tokio::test]
async fn test_daily_jobs_outrank_backfill() -> Result<()> {
    let db = setup_db().await?;

    // Backfill queued first, with default priority.
    let backfill_date = Local::now().date_naive() - ChronoDuration::days(30);
    db.enqueue_job("history-user", backfill_date, 0).await?;

    let scheduler = scheduler(Arc::clone(&db), &["fresh-user"])?;
    scheduler.trigger_now().await?;

    let first = db.next_pending_job().await?.expect("job");
    assert_eq!(first.user_id, "fresh-user");
    Ok(())
}

#[tokio::test]
async fn test_status_reports_registered_job_and_next_fire() -> Result<()> {
    let db = setup_db().await?;
    let scheduler = scheduler(db, &[])?;

    let status = scheduler.status();
    assert!(!status.running);
    assert_eq!(status.job_id, "daily_journal_enqueue");
    let next = status.next_run.expect("next fire time");
    assert!(next > Local::now());

    scheduler.start();
    assert!(scheduler.status().running);
    scheduler.stop();
    assert!(!scheduler.status().running);
    Ok(())
}

#[tokio::test]
async fn test_invalid_cron_expression_fails_at_construction() -> Result<()> {
    let db = setup_db().await?;
    let result = DailyScheduler::new(
        db,
        Arc::new(FixedCalendar::new(&[])),
        SchedulerConfig {
            cron_expr: "every day at one".to_string(),
        },
    );
    assert!(result.is_err());
    Ok(())
}
