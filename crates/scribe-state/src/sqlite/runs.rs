use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;

use scribe_core::database::RunRepository;
use scribe_core::error::ScribeError;
use scribe_core::models::{merge_progress, ProgressMap, RunOutcome, RunStatus, WorkflowRun};

use super::core::{encode_steps, parse_steps, RunRow, SqliteDatabase};

#[async_trait]
impl RunRepository for SqliteDatabase {
    async fn start_run(
        &self,
        run_id: &str,
        workflow_name: &str,
        user_id: &str,
        input: &ProgressMap,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_runs (run_id, workflow_name, user_id, status, current_step, steps_completed, input_data)
            VALUES (?, ?, ?, ?, 'Starting', '[]', ?)
            ON CONFLICT (run_id) DO UPDATE SET
                status = excluded.status,
                current_step = 'Starting',
                started_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')
            "#,
        )
        .bind(run_id)
        .bind(workflow_name)
        .bind(user_id)
        .bind(RunStatus::Running.as_str())
        .bind(Json(input))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_run_step(
        &self,
        run_id: &str,
        step_name: &str,
        metrics: &ProgressMap,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, (String, String, Json<ProgressMap>)>(
            "SELECT status, steps_completed, metrics FROM workflow_runs WHERE run_id = ?",
        )
        .bind(run_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((status, steps_raw, Json(mut merged))) = row else {
            return Ok(false);
        };
        if status != RunStatus::Running.as_str() {
            return Ok(false);
        }

        let mut steps = parse_steps(&steps_raw);
        if !steps.iter().any(|s| s == step_name) {
            steps.push(step_name.to_string());
        }
        merge_progress(&mut merged, metrics);

        // Guarded on status so a terminal run written between the read and
        // this update stays frozen.
        sqlx::query(
            r#"
            UPDATE workflow_runs
            SET current_step = ?, steps_completed = ?, metrics = ?
            WHERE run_id = ? AND status = ?
            "#,
        )
        .bind(step_name)
        .bind(encode_steps(&steps))
        .bind(Json(&merged))
        .bind(run_id)
        .bind(RunStatus::Running.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn complete_run(
        &self,
        run_id: &str,
        outcome: RunOutcome,
        output: &ProgressMap,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = ?,
                completed_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'),
                current_step = ?,
                output_data = ?,
                error_message = ?
            WHERE run_id = ?
            "#,
        )
        .bind(outcome.as_status().as_str())
        .bind(outcome.step_label())
        .bind(Json(output))
        .bind(error)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel_run(&self, run_id: &str) -> Result<WorkflowRun> {
        let mut tx = self.pool.begin().await?;

        let status = sqlx::query_scalar::<_, String>(
            "SELECT status FROM workflow_runs WHERE run_id = ?",
        )
        .bind(run_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(status) = status else {
            return Err(ScribeError::RunNotFound {
                run_id: run_id.to_string(),
            }
            .into());
        };
        if status != RunStatus::Running.as_str() {
            return Err(ScribeError::RunNotCancellable {
                run_id: run_id.to_string(),
                status,
            }
            .into());
        }

        sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = ?,
                completed_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'),
                current_step = 'Cancelled',
                error_message = 'Cancelled by admin'
            WHERE run_id = ?
            "#,
        )
        .bind(RunStatus::Failed.as_str())
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, RunRow>("SELECT * FROM workflow_runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Self::map_run(row))
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<WorkflowRun>> {
        let row = sqlx::query_as::<_, RunRow>("SELECT * FROM workflow_runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Self::map_run))
    }

    async fn list_active_runs(&self, workflow_name: Option<&str>) -> Result<Vec<WorkflowRun>> {
        let rows = match workflow_name {
            Some(name) => {
                sqlx::query_as::<_, RunRow>(
                    r#"
                    SELECT * FROM workflow_runs
                    WHERE status = ? AND workflow_name = ?
                    ORDER BY started_at DESC
                    "#,
                )
                .bind(RunStatus::Running.as_str())
                .bind(name)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, RunRow>(
                    "SELECT * FROM workflow_runs WHERE status = ? ORDER BY started_at DESC",
                )
                .bind(RunStatus::Running.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(Self::map_run).collect())
    }

    async fn last_completed_run(
        &self,
        user_id: &str,
        workflow_name: &str,
    ) -> Result<Option<WorkflowRun>> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT * FROM workflow_runs
            WHERE user_id = ? AND workflow_name = ? AND status = ?
            ORDER BY completed_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(workflow_name)
        .bind(RunStatus::Completed.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Self::map_run))
    }

    async fn last_run_completed_at(
        &self,
        user_id: &str,
        workflow_name: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let completed_at = sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"
            SELECT completed_at FROM workflow_runs
            WHERE user_id = ? AND workflow_name = ? AND completed_at IS NOT NULL
            ORDER BY completed_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(workflow_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(completed_at)
    }
}
