// Persisted orchestration models: workflow runs and queue jobs.
// Statuses are stored as strings in the database; the enums here are the
// canonical set with parse/as_str round-trips.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const WORKFLOW_DAILY_JOURNAL: &str = "Daily Journal";
pub const WORKFLOW_MEMORY_OPTIMIZATION: &str = "Memory Optimization";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or(())
    }
}

/// Terminal outcome passed to `complete`. Kept separate from `RunStatus` so a
/// caller cannot "complete" a run back into the running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed,
}

impl RunOutcome {
    pub fn as_status(&self) -> RunStatus {
        match self {
            Self::Completed => RunStatus::Completed,
            Self::Failed => RunStatus::Failed,
        }
    }

    /// Terminal label shown as the run's current step.
    pub fn step_label(&self) -> &'static str {
        match self {
            Self::Completed => "Done",
            Self::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or(())
    }
}

/// A single scalar value allowed in the run side-channels (metrics, input,
/// output). The untagged representation keeps the stored JSON plain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) => Some(*v as i64),
            Self::Text(s) => s.parse().ok(),
            Self::Bool(_) => None,
        }
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// String-keyed scalar map used for run metrics, input and output.
/// Merges are last-write-wins per key.
pub type ProgressMap = BTreeMap<String, Scalar>;

/// Merge `update` into `base`, overwriting existing keys.
pub fn merge_progress(base: &mut ProgressMap, update: &ProgressMap) {
    for (key, value) in update {
        base.insert(key.clone(), value.clone());
    }
}

/// Build the metrics payload for one step update: the well-known
/// step/total_steps/progress keys plus caller-provided stats. Stats win on
/// key collisions.
pub fn step_metrics(step_number: u32, total_steps: u32, stats: &ProgressMap) -> ProgressMap {
    let progress = if total_steps == 0 {
        0
    } else {
        (100.0 * f64::from(step_number) / f64::from(total_steps)).round() as i64
    };

    let mut metrics = ProgressMap::new();
    metrics.insert("step".to_string(), Scalar::Int(i64::from(step_number)));
    metrics.insert("total_steps".to_string(), Scalar::Int(i64::from(total_steps)));
    metrics.insert("progress".to_string(), Scalar::Int(progress));
    merge_progress(&mut metrics, stats);
    metrics
}

/// One tracked execution of a named workflow for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: String,
    pub workflow_name: String,
    pub user_id: String,
    pub status: String,
    pub current_step: String,
    pub steps_completed: Vec<String>,
    pub metrics: ProgressMap,
    pub input_data: ProgressMap,
    pub output_data: ProgressMap,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn run_status(&self) -> RunStatus {
        RunStatus::parse(&self.status).unwrap_or(RunStatus::Running)
    }
}

/// One queued unit of work: a user and a target date awaiting the worker.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueJob {
    pub id: i64,
    pub user_id: String,
    pub target_date: NaiveDate,
    pub priority: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl QueueJob {
    pub fn job_status(&self) -> JobStatus {
        JobStatus::parse(&self.status).unwrap_or(JobStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

/// A user with at least one gap day, as reported by the aggregate gap query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapUser {
    pub user_id: String,
    pub email: Option<String>,
    pub gap_count: i64,
}

/// Aggregate result of a backfill enqueue across all users.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BackfillReport {
    pub users_affected: usize,
    pub jobs_added: usize,
}
