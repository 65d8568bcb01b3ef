// Persisted run-state tracker.
//
// The database is the single source of truth for run progress; the tracker
// additionally keeps a process-local mirror of runs it started so a
// single-container deployment can show progress without a query. The mirror
// is advisory only and is invalidated on every terminal transition —
// `query_active` always reads the store, which is what makes the design
// correct across multiple server processes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::database::RunRepository;
use crate::models::{step_metrics, ProgressMap, RunOutcome, Scalar, WorkflowRun};

/// Lightweight mirror entry for one run started in this process.
#[derive(Debug, Clone, Serialize)]
pub struct LocalRunView {
    pub run_id: String,
    pub workflow_name: String,
    pub user_id: String,
    pub current_step: String,
    pub step: u32,
    pub total_steps: u32,
    pub progress: i64,
    pub started_at: DateTime<Utc>,
}

pub struct RunTracker<D: RunRepository> {
    db: Arc<D>,
    mirror: RwLock<HashMap<String, LocalRunView>>,
}

impl<D: RunRepository> RunTracker<D> {
    pub fn new(db: Arc<D>) -> Self {
        Self {
            db,
            mirror: RwLock::new(HashMap::new()),
        }
    }

    /// Begin tracking a run. Idempotent: calling again for the same run id
    /// resets it to running instead of erroring, so retries are safe.
    pub async fn start(
        &self,
        run_id: &str,
        workflow_name: &str,
        user_id: &str,
        input: &ProgressMap,
    ) -> anyhow::Result<()> {
        self.db
            .start_run(run_id, workflow_name, user_id, input)
            .await?;

        self.mirror.write().await.insert(
            run_id.to_string(),
            LocalRunView {
                run_id: run_id.to_string(),
                workflow_name: workflow_name.to_string(),
                user_id: user_id.to_string(),
                current_step: "Starting".to_string(),
                step: 0,
                total_steps: 0,
                progress: 0,
                started_at: Utc::now(),
            },
        );

        info!(run_id, workflow_name, user_id, "run started");
        Ok(())
    }

    /// Record step progress. Never fails the caller: a missing or terminal
    /// run and any storage error are logged and swallowed, because a step
    /// executor mid-pipeline has nothing useful to do with the failure.
    pub async fn update_step(
        &self,
        run_id: &str,
        step_name: &str,
        step_number: u32,
        total_steps: u32,
        stats: &ProgressMap,
    ) {
        let metrics = step_metrics(step_number, total_steps, stats);
        match self.db.record_run_step(run_id, step_name, &metrics).await {
            Ok(true) => {
                let progress = metrics.get("progress").and_then(Scalar::as_i64).unwrap_or(0);
                let mut mirror = self.mirror.write().await;
                if let Some(view) = mirror.get_mut(run_id) {
                    view.current_step = step_name.to_string();
                    view.step = step_number;
                    view.total_steps = total_steps;
                    view.progress = progress;
                }
                info!(run_id, step_number, total_steps, step_name, "run step recorded");
            }
            Ok(false) => {
                warn!(run_id, step_name, "step update for missing or terminal run ignored");
            }
            Err(e) => {
                error!(run_id, step_name, "failed to record run step: {e:#}");
            }
        }
    }

    /// Terminal transition. Freezes output and error and stamps the
    /// completion time. Last writer wins if a cancelled run's executor
    /// finishes late.
    pub async fn complete(
        &self,
        run_id: &str,
        outcome: RunOutcome,
        output: &ProgressMap,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        self.db.complete_run(run_id, outcome, output, error).await?;
        self.mirror.write().await.remove(run_id);
        info!(run_id, status = outcome.as_status().as_str(), "run finished");
        Ok(())
    }

    /// Force a running run to failed. Rejects when the run is not running.
    /// Does not stop any in-flight executor.
    pub async fn cancel(&self, run_id: &str) -> anyhow::Result<WorkflowRun> {
        let run = self.db.cancel_run(run_id).await?;
        self.mirror.write().await.remove(run_id);
        info!(run_id, "run cancelled");
        Ok(run)
    }

    pub async fn get(&self, run_id: &str) -> anyhow::Result<Option<WorkflowRun>> {
        self.db.get_run(run_id).await
    }

    /// All running rows from the store, optionally filtered by workflow,
    /// newest first.
    pub async fn query_active(
        &self,
        workflow_name: Option<&str>,
    ) -> anyhow::Result<Vec<WorkflowRun>> {
        self.db.list_active_runs(workflow_name).await
    }

    /// Most recent successfully completed run for a user/workflow.
    pub async fn last_completed(
        &self,
        user_id: &str,
        workflow_name: &str,
    ) -> anyhow::Result<Option<WorkflowRun>> {
        self.db.last_completed_run(user_id, workflow_name).await
    }

    /// Completion time of the most recent terminal run, any outcome.
    pub async fn last_finished_at(
        &self,
        user_id: &str,
        workflow_name: &str,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        self.db.last_run_completed_at(user_id, workflow_name).await
    }

    /// Snapshot of the advisory local mirror. Not authoritative.
    pub async fn local_runs(&self) -> Vec<LocalRunView> {
        self.mirror.read().await.values().cloned().collect()
    }
}
