pub mod autotrigger;
pub mod config;
pub mod database;
pub mod error;
pub mod executor;
pub mod models;
pub mod queue;
pub mod scheduler;
pub mod sources;
pub mod tracker;
pub mod worker;

pub use error::{ScribeError, ScribeResult};
pub use executor::{StepExecutor, StepOutcome};
pub use models::{JobStatus, ProgressMap, QueueJob, RunOutcome, RunStatus, Scalar, WorkflowRun};
