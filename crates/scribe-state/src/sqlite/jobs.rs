use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::Row;

use scribe_core::database::JobRepository;
use scribe_core::error::ScribeError;
use scribe_core::models::{JobStatus, QueueJob, QueueStats};

use super::core::SqliteDatabase;

#[async_trait]
impl JobRepository for SqliteDatabase {
    async fn enqueue_job(
        &self,
        user_id: &str,
        target_date: NaiveDate,
        priority: i64,
    ) -> Result<bool> {
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO journal_queue (user_id, target_date, priority)
            VALUES (?, ?, ?)
            ON CONFLICT (user_id, target_date) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(target_date)
        .bind(priority)
        .fetch_optional(&self.pool)
        .await?;
        Ok(inserted.is_some())
    }

    async fn next_pending_job(&self) -> Result<Option<QueueJob>> {
        // Plain read: the deployment runs exactly one consumer. The id
        // tie-break keeps FIFO order within identical timestamps.
        let job = sqlx::query_as::<_, QueueJob>(
            r#"
            SELECT * FROM journal_queue
            WHERE status = ?
            ORDER BY priority DESC, created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(JobStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    async fn mark_job_processing(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE journal_queue SET status = ? WHERE id = ?")
            .bind(JobStatus::Processing.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_job_completed(&self, id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE journal_queue
            SET status = ?, processed_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE id = ?
            "#,
        )
        .bind(JobStatus::Completed.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_job_failed(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE journal_queue
            SET status = ?, error_message = ?, processed_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE id = ?
            "#,
        )
        .bind(JobStatus::Failed.as_str())
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM journal_queue GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            match JobStatus::parse(&status) {
                Some(JobStatus::Pending) => stats.pending = count,
                Some(JobStatus::Processing) => stats.processing = count,
                Some(JobStatus::Completed) => stats.completed = count,
                Some(JobStatus::Failed) => stats.failed = count,
                None => continue,
            }
            stats.total += count;
        }
        Ok(stats)
    }

    async fn recent_jobs(&self, limit: i64) -> Result<Vec<QueueJob>> {
        let jobs = sqlx::query_as::<_, QueueJob>(
            r#"
            SELECT * FROM journal_queue
            ORDER BY
                CASE status
                    WHEN 'processing' THEN 1
                    WHEN 'pending' THEN 2
                    ELSE 3
                END,
                created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn retry_failed_jobs(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE journal_queue SET status = ?, error_message = NULL WHERE status = ?",
        )
        .bind(JobStatus::Pending.as_str())
        .bind(JobStatus::Failed.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn clear_completed_jobs(&self, older_than_days: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM journal_queue
            WHERE status = ? AND processed_at < DATETIME('now', ?)
            "#,
        )
        .bind(JobStatus::Completed.as_str())
        .bind(format!("-{older_than_days} days"))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn cancel_job(&self, id: i64) -> Result<JobStatus> {
        let mut tx = self.pool.begin().await?;

        let status =
            sqlx::query_scalar::<_, String>("SELECT status FROM journal_queue WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(status) = status else {
            return Err(ScribeError::JobNotFound { id }.into());
        };
        let previous = match JobStatus::parse(&status) {
            Some(previous @ (JobStatus::Pending | JobStatus::Failed)) => {
                sqlx::query("DELETE FROM journal_queue WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                previous
            }
            Some(JobStatus::Processing) => {
                // A job mid-execution cannot be stopped; keep the row as an
                // audit trail and mark it failed.
                sqlx::query(
                    "UPDATE journal_queue SET status = ?, error_message = 'Cancelled by admin' WHERE id = ?",
                )
                .bind(JobStatus::Failed.as_str())
                .bind(id)
                .execute(&mut *tx)
                .await?;
                JobStatus::Processing
            }
            _ => {
                return Err(ScribeError::JobNotCancellable { id, status }.into());
            }
        };

        tx.commit().await?;
        Ok(previous)
    }

    async fn cancel_pending_jobs(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM journal_queue WHERE status = ?")
            .bind(JobStatus::Pending.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
