// Read-only adapters over host-owned tables (users, user_sessions,
// journal_entries, user_memories). The orchestration migrations do not
// create these tables; the host application owns them.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::SqlitePool;

use scribe_core::models::GapUser;
use scribe_core::sources::{ActivityCalendar, MemoryCensus};

pub struct SqliteActivityCalendar {
    pool: SqlitePool,
}

impl SqliteActivityCalendar {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActivityCalendar for SqliteActivityCalendar {
    async fn activity_dates(&self, user_id: &str) -> Result<Vec<NaiveDate>> {
        let dates = sqlx::query_scalar::<_, NaiveDate>(
            "SELECT DISTINCT DATE(occurred_at) FROM user_sessions WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(dates)
    }

    async fn journaled_dates(&self, user_id: &str) -> Result<Vec<NaiveDate>> {
        let dates = sqlx::query_scalar::<_, NaiveDate>(
            "SELECT journal_date FROM journal_entries WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(dates)
    }

    async fn registered_on(&self, user_id: &str) -> Result<Option<NaiveDate>> {
        let date = sqlx::query_scalar::<_, NaiveDate>(
            "SELECT DATE(created_at) FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(date)
    }

    async fn users_with_activity_no_journal(
        &self,
        target_date: NaiveDate,
    ) -> Result<Vec<String>> {
        let users = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT s.user_id
            FROM user_sessions s
            LEFT JOIN journal_entries j
                ON s.user_id = j.user_id AND j.journal_date = ?
            WHERE DATE(s.occurred_at) = ?
              AND j.id IS NULL
              AND s.user_id NOT LIKE 'anon-%'
            "#,
        )
        .bind(target_date)
        .bind(target_date)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn users_with_gap_days(&self) -> Result<Vec<GapUser>> {
        let rows = sqlx::query_as::<_, (String, Option<String>, i64)>(
            r#"
            WITH activity_days AS (
                SELECT user_id, DATE(occurred_at) AS activity_date
                FROM user_sessions
                WHERE user_id NOT LIKE 'anon-%'
                GROUP BY user_id, DATE(occurred_at)
            ),
            gaps AS (
                SELECT a.user_id, COUNT(*) AS gap_count
                FROM activity_days a
                LEFT JOIN journal_entries j
                    ON a.user_id = j.user_id AND a.activity_date = j.journal_date
                WHERE j.journal_date IS NULL
                  AND a.activity_date < DATE('now')
                GROUP BY a.user_id
            )
            SELECT g.user_id, u.email, g.gap_count
            FROM gaps g
            LEFT JOIN users u ON g.user_id = u.id
            WHERE g.gap_count > 0
            ORDER BY g.gap_count DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(user_id, email, gap_count)| GapUser {
                user_id,
                email,
                gap_count,
            })
            .collect())
    }
}

pub struct SqliteMemoryCensus {
    pool: SqlitePool,
}

impl SqliteMemoryCensus {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MemoryCensus for SqliteMemoryCensus {
    async fn memory_count(&self, user_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM user_memories WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
