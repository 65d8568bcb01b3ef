// Repository traits for orchestration state.
// Implementations live in scribe-state (SqliteDatabase).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{JobStatus, ProgressMap, QueueJob, QueueStats, RunOutcome, WorkflowRun};

/// Persisted run-state operations.
///
/// Every method is one short, independently-committed transaction; the store
/// is the only coordination point between producer and consumer processes.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Idempotent upsert: creates the run as running, or resets an existing
    /// run with the same id back to running (retry semantics).
    async fn start_run(
        &self,
        run_id: &str,
        workflow_name: &str,
        user_id: &str,
        input: &ProgressMap,
    ) -> anyhow::Result<()>;

    /// Append a step and merge metrics into the run's progress map.
    ///
    /// Returns false when the run is missing or no longer running; the update
    /// is guarded so terminal runs are never mutated.
    async fn record_run_step(
        &self,
        run_id: &str,
        step_name: &str,
        metrics: &ProgressMap,
    ) -> anyhow::Result<bool>;

    /// Terminal transition: freezes output/error and stamps completed_at.
    async fn complete_run(
        &self,
        run_id: &str,
        outcome: RunOutcome,
        output: &ProgressMap,
        error: Option<&str>,
    ) -> anyhow::Result<()>;

    /// Force a running run to failed ("Cancelled by admin"). Rejects with
    /// `ScribeError::RunNotCancellable` when the run is not running, and
    /// `ScribeError::RunNotFound` when it does not exist.
    async fn cancel_run(&self, run_id: &str) -> anyhow::Result<WorkflowRun>;

    async fn get_run(&self, run_id: &str) -> anyhow::Result<Option<WorkflowRun>>;

    /// Index-backed read of running rows, newest first. Polled by admin
    /// surfaces every few seconds.
    async fn list_active_runs(
        &self,
        workflow_name: Option<&str>,
    ) -> anyhow::Result<Vec<WorkflowRun>>;

    /// Most recent successfully completed run for a user/workflow, if any.
    async fn last_completed_run(
        &self,
        user_id: &str,
        workflow_name: &str,
    ) -> anyhow::Result<Option<WorkflowRun>>;

    /// Completion time of the most recent terminal run (any outcome).
    async fn last_run_completed_at(
        &self,
        user_id: &str,
        workflow_name: &str,
    ) -> anyhow::Result<Option<DateTime<Utc>>>;
}

/// Persisted queue operations.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert-or-ignore on the (user_id, target_date) uniqueness constraint.
    /// Returns false when the pair already exists (not an error).
    async fn enqueue_job(
        &self,
        user_id: &str,
        target_date: NaiveDate,
        priority: i64,
    ) -> anyhow::Result<bool>;

    /// Single pending row, priority descending then FIFO. Plain read: the
    /// deployment assumes exactly one active consumer.
    async fn next_pending_job(&self) -> anyhow::Result<Option<QueueJob>>;

    async fn mark_job_processing(&self, id: i64) -> anyhow::Result<()>;
    async fn mark_job_completed(&self, id: i64) -> anyhow::Result<()>;
    async fn mark_job_failed(&self, id: i64, error: &str) -> anyhow::Result<()>;

    async fn queue_stats(&self) -> anyhow::Result<QueueStats>;

    /// Recent rows for admin display: processing first, then pending, then
    /// the rest, newest first.
    async fn recent_jobs(&self, limit: i64) -> anyhow::Result<Vec<QueueJob>>;

    /// Bulk reset failed jobs to pending, clearing their errors.
    async fn retry_failed_jobs(&self) -> anyhow::Result<u64>;

    /// Delete completed rows whose processed_at is past the retention window.
    async fn clear_completed_jobs(&self, older_than_days: i64) -> anyhow::Result<u64>;

    /// Cancel one job: pending rows are deleted, processing rows are marked
    /// failed (the audit trail is kept). Returns the job's previous status.
    async fn cancel_job(&self, id: i64) -> anyhow::Result<JobStatus>;

    /// Delete every pending row.
    async fn cancel_pending_jobs(&self) -> anyhow::Result<u64>;
}

/// Combined store interface used where a component needs both sides.
pub trait Database: RunRepository + JobRepository {}

impl<T: RunRepository + JobRepository> Database for T {}
