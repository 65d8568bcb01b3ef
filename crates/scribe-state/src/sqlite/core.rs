use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::PathBuf;

use scribe_core::models::{ProgressMap, WorkflowRun};

pub(super) fn parse_steps(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

pub(super) fn encode_steps(steps: &[String]) -> String {
    serde_json::to_string(steps).unwrap_or_else(|_| "[]".to_string())
}

#[derive(sqlx::FromRow)]
pub(super) struct RunRow {
    pub run_id: String,
    pub workflow_name: String,
    pub user_id: String,
    pub status: String,
    pub current_step: String,
    pub steps_completed: String,
    pub metrics: sqlx::types::Json<ProgressMap>,
    pub input_data: sqlx::types::Json<ProgressMap>,
    pub output_data: sqlx::types::Json<ProgressMap>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub struct SqliteDatabase {
    pub(super) pool: SqlitePool,
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

fn sqlite_database_file_path(database_url: &str) -> Option<PathBuf> {
    let raw = if let Some(rest) = database_url.strip_prefix("sqlite://") {
        rest
    } else if let Some(rest) = database_url.strip_prefix("sqlite:") {
        rest
    } else {
        return None;
    };

    let path = raw.split('?').next().unwrap_or(raw);
    if path.is_empty() || path == ":memory:" || path.starts_with("file:") {
        return None;
    }

    Some(PathBuf::from(path))
}

impl SqliteDatabase {
    pub async fn new(database_url: &str) -> Result<Self> {
        if let Some(path) = sqlite_database_file_path(database_url) {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!(
                            "Failed to create SQLite database directory: {}",
                            parent.display()
                        )
                    })?;
                }
            }
        }

        // Every pooled connection to an in-memory database would otherwise
        // see its own private database.
        let max_connections = if is_memory_url(database_url) { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await?;

        // Enable foreign keys
        sqlx::query("PRAGMA foreign_keys = ON;").execute(&pool).await?;

        // WAL allows concurrent reads while the worker writes
        sqlx::query("PRAGMA journal_mode = WAL;").execute(&pool).await?;

        // NORMAL is safe and much faster than FULL
        sqlx::query("PRAGMA synchronous = NORMAL;").execute(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations_sqlite").run(&self.pool).await?;
        Ok(())
    }

    pub(super) fn map_run(row: RunRow) -> WorkflowRun {
        WorkflowRun {
            run_id: row.run_id,
            workflow_name: row.workflow_name,
            user_id: row.user_id,
            status: row.status,
            current_step: row.current_step,
            steps_completed: parse_steps(&row.steps_completed),
            metrics: row.metrics.0,
            input_data: row.input_data.0,
            output_data: row.output_data.0,
            error_message: row.error_message,
            started_at: row.started_at,
            completed_at: row.completed_at,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::{is_memory_url, parse_steps, sqlite_database_file_path};
    use std::path::PathBuf;

    #[test]
    fn test_is_memory_url() {
        assert!(is_memory_url(":memory:"));
        assert!(is_memory_url("sqlite::memory:"));
        assert!(is_memory_url("sqlite://file:memdb1?mode=memory&cache=shared"));
        assert!(!is_memory_url("sqlite://./.scribe/scribe.db?mode=rwc"));
    }

    #[test]
    fn test_sqlite_database_file_path_extracts_file_paths() {
        assert_eq!(
            sqlite_database_file_path("sqlite://./.scribe/scribe.db?mode=rwc"),
            Some(PathBuf::from("./.scribe/scribe.db"))
        );
        assert_eq!(
            sqlite_database_file_path("sqlite:./local.db"),
            Some(PathBuf::from("./local.db"))
        );
    }

    #[test]
    fn test_sqlite_database_file_path_ignores_memory_and_non_file_urls() {
        assert_eq!(sqlite_database_file_path(":memory:"), None);
        assert_eq!(sqlite_database_file_path("sqlite::memory:"), None);
        assert_eq!(
            sqlite_database_file_path("sqlite://file:memdb1?mode=memory&cache=shared"),
            None
        );
    }

    #[test]
    fn test_parse_steps_tolerates_garbage() {
        assert_eq!(parse_steps(r#"["a","b"]"#), vec!["a", "b"]);
        assert!(parse_steps("not json").is_empty());
    }
}
