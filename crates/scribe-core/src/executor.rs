// Step executor contract. The content-generation pipeline lives outside this
// subsystem; producers and the worker only ever see this trait.

use async_trait::async_trait;

use crate::models::ProgressMap;

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Drives one workflow execution for one user.
///
/// Implementations call `RunTracker::update_step` as they make progress and
/// `RunTracker::complete` exactly once at the end. A returned `Err` and a
/// `StepOutcome { success: false, .. }` are equivalent for the caller: the
/// unit of work failed and the failure is recorded where the caller tracks it.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        user_id: &str,
        params: &ProgressMap,
        run_id: &str,
    ) -> anyhow::Result<StepOutcome>;
}
