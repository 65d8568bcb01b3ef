// Read-only inputs owned by the host application. The orchestration core
// never writes through these traits.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::GapUser;

/// Per-user activity/journal calendar used for gap computation and the daily
/// producer. Implementations exclude synthetic `anon-` user ids from the
/// aggregate queries.
#[async_trait]
pub trait ActivityCalendar: Send + Sync {
    /// Distinct dates on which the user had recorded activity.
    async fn activity_dates(&self, user_id: &str) -> anyhow::Result<Vec<NaiveDate>>;

    /// Dates for which the user already has a journal entry.
    async fn journaled_dates(&self, user_id: &str) -> anyhow::Result<Vec<NaiveDate>>;

    /// Registration date, or None for an unknown user.
    async fn registered_on(&self, user_id: &str) -> anyhow::Result<Option<NaiveDate>>;

    /// Users with activity on `target_date` but no journal for it.
    async fn users_with_activity_no_journal(
        &self,
        target_date: NaiveDate,
    ) -> anyhow::Result<Vec<String>>;

    /// Users with at least one day of activity that never got a journal.
    async fn users_with_gap_days(&self) -> anyhow::Result<Vec<GapUser>>;
}

/// Live count of a user's countable resource (memories), read at trigger
/// evaluation time.
#[async_trait]
pub trait MemoryCensus: Send + Sync {
    async fn memory_count(&self, user_id: &str) -> anyhow::Result<i64>;
}
