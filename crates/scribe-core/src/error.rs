use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScribeError {
    #[error("run {run_id} not found")]
    RunNotFound { run_id: String },

    #[error("cannot cancel run {run_id} with status '{status}'")]
    RunNotCancellable { run_id: String, status: String },

    #[error("queue job {id} not found")]
    JobNotFound { id: i64 },

    #[error("cannot cancel queue job {id} with status '{status}'")]
    JobNotCancellable { id: i64, status: String },

    #[error("invalid cron expression '{expr}': {source}")]
    InvalidCron {
        expr: String,
        source: cron::error::Error,
    },
}

pub type ScribeResult<T> = Result<T, ScribeError>;
