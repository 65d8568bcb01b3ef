// Journal queue operations: dedup enqueue, gap computation and the admin
// actions over the queue table.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use tracing::{debug, info};

use crate::database::JobRepository;
use crate::models::{BackfillReport, JobStatus, QueueJob, QueueStats};
use crate::sources::ActivityCalendar;

/// Priority for manually queued historical backfill; the daily scheduler
/// enqueues above this so same-day jobs are processed first.
pub const BACKFILL_PRIORITY: i64 = 0;

pub struct JobQueue<D: JobRepository, C: ActivityCalendar> {
    db: Arc<D>,
    calendar: Arc<C>,
}

impl<D: JobRepository, C: ActivityCalendar> JobQueue<D, C> {
    pub fn new(db: Arc<D>, calendar: Arc<C>) -> Self {
        Self { db, calendar }
    }

    /// Add one job. Returns false when (user, date) is already queued.
    pub async fn enqueue(
        &self,
        user_id: &str,
        target_date: NaiveDate,
        priority: i64,
    ) -> anyhow::Result<bool> {
        let inserted = self.db.enqueue_job(user_id, target_date, priority).await?;
        if inserted {
            info!(user_id, %target_date, priority, "queued journal job");
        } else {
            debug!(user_id, %target_date, "already queued");
        }
        Ok(inserted)
    }

    /// Days with activity but no journal, restricted to
    /// [registration date, today). Empty for unknown users.
    pub async fn compute_gaps(&self, user_id: &str) -> anyhow::Result<Vec<NaiveDate>> {
        let Some(registered_on) = self.calendar.registered_on(user_id).await? else {
            return Ok(Vec::new());
        };

        let activity: BTreeSet<NaiveDate> =
            self.calendar.activity_dates(user_id).await?.into_iter().collect();
        let journaled: BTreeSet<NaiveDate> =
            self.calendar.journaled_dates(user_id).await?.into_iter().collect();

        let today = Local::now().date_naive();
        let gaps = activity
            .difference(&journaled)
            .copied()
            .filter(|d| *d >= registered_on && *d < today)
            .collect();
        Ok(gaps)
    }

    /// Queue every gap day for one user. Returns the number of jobs added.
    pub async fn enqueue_user_gaps(
        &self,
        user_id: &str,
        priority: i64,
    ) -> anyhow::Result<usize> {
        let mut added = 0;
        for day in self.compute_gaps(user_id).await? {
            if self.enqueue(user_id, day, priority).await? {
                added += 1;
            }
        }
        info!(user_id, added, "queued gap days for user");
        Ok(added)
    }

    /// Queue gap days for every user that has any. `jobs_added` counts only
    /// newly inserted rows.
    pub async fn enqueue_all_gaps(&self, priority: i64) -> anyhow::Result<BackfillReport> {
        let users = self.calendar.users_with_gap_days().await?;
        let mut jobs_added = 0;
        for user in &users {
            jobs_added += self.enqueue_user_gaps(&user.user_id, priority).await?;
        }
        info!(
            users = users.len(),
            jobs_added, "queued gap days across all users"
        );
        Ok(BackfillReport {
            users_affected: users.len(),
            jobs_added,
        })
    }

    /// Next pending job: priority descending, then oldest first.
    pub async fn dequeue_next(&self) -> anyhow::Result<Option<QueueJob>> {
        self.db.next_pending_job().await
    }

    pub async fn mark_processing(&self, id: i64) -> anyhow::Result<()> {
        self.db.mark_job_processing(id).await
    }

    pub async fn mark_completed(&self, id: i64) -> anyhow::Result<()> {
        info!(job_id = id, "queue job completed");
        self.db.mark_job_completed(id).await
    }

    pub async fn mark_failed(&self, id: i64, error: &str) -> anyhow::Result<()> {
        info!(job_id = id, error, "queue job failed");
        self.db.mark_job_failed(id, error).await
    }

    pub async fn stats(&self) -> anyhow::Result<QueueStats> {
        self.db.queue_stats().await
    }

    pub async fn recent(&self, limit: i64) -> anyhow::Result<Vec<QueueJob>> {
        self.db.recent_jobs(limit).await
    }

    /// Reset failed jobs to pending for another attempt.
    pub async fn retry_failed(&self) -> anyhow::Result<u64> {
        let reset = self.db.retry_failed_jobs().await?;
        info!(reset, "reset failed jobs to pending");
        Ok(reset)
    }

    /// Retention cleanup of completed rows.
    pub async fn clear_completed(&self, older_than_days: i64) -> anyhow::Result<u64> {
        let deleted = self.db.clear_completed_jobs(older_than_days).await?;
        info!(deleted, older_than_days, "cleared completed queue jobs");
        Ok(deleted)
    }

    /// Cancel one job; see `JobRepository::cancel_job` for the state rules.
    pub async fn cancel_job(&self, id: i64) -> anyhow::Result<JobStatus> {
        let previous = self.db.cancel_job(id).await?;
        info!(job_id = id, previous = previous.as_str(), "cancelled queue job");
        Ok(previous)
    }

    /// Delete every pending job.
    pub async fn cancel_all_pending(&self) -> anyhow::Result<u64> {
        let cancelled = self.db.cancel_pending_jobs().await?;
        info!(cancelled, "cancelled all pending queue jobs");
        Ok(cancelled)
    }
}
