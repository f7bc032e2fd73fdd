//! Relational store for the rollup aggregation engine.
//!
//! This crate owns every SQL statement the engine issues. The engine itself only
//! sees typed methods on [`RollupDb`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use rollup_db::{RollupDb, Result};
//!
//! let db = RollupDb::open("~/.rollup/rollup.sqlite3").await?;
//!
//! let configs = db.list_configurations().await?;
//! let pending = db.list_files_pending_upload().await?;
//! ```

mod error;
mod schema;
mod types;

// Method implementations organized by domain
mod configuration;
mod generated_files;
mod lineage;
mod query;
mod transactions;

pub mod sql_guard;

pub use error::{DbError, Result};
pub use types::*;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Handle to the rollup database.
///
/// Cloning is cheap; clones share one connection pool.
#[derive(Clone)]
pub struct RollupDb {
    pool: SqlitePool,
    /// `query_only` connections for operator-authored SQL.
    reader: SqlitePool,
}

impl RollupDb {
    /// Open or create a database at the given path.
    ///
    /// Creates all tables if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Open or create a database with an explicit pool size.
    pub async fn open_with(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // Per-connection pragmas; a one-off PRAGMA query would only reach one pooled connection.
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options.clone())
            .await?;

        let db = Self {
            reader: SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .connect_lazy_with(options.pragma("query_only", "ON")),
            pool,
        };
        db.ensure_schema().await?;

        info!(path = %path.display(), "Database opened");

        Ok(db)
    }

    /// Open an existing database (fails if not exists).
    pub async fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(DbError::NotFound(format!(
                "Database not found: {}",
                path.display()
            )));
        }

        Self::open(path).await
    }

    /// Get the underlying connection pool (escape hatch for complex queries).
    ///
    /// Prefer using the typed methods instead.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection.
    pub async fn close(self) {
        self.reader.close().await;
        self.pool.close().await;
    }
}

// Timestamp utilities
impl RollupDb {
    /// Current time as milliseconds since Unix epoch.
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Convert milliseconds to DateTime.
    pub fn millis_to_datetime(millis: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(millis).unwrap_or_else(chrono::Utc::now)
    }
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn parse_date(column: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| DbError::invalid_state(format!("{} is not a date ({}): {}", column, value, e)))
}

pub(crate) fn parse_optional_date(
    column: &str,
    value: Option<String>,
) -> Result<Option<NaiveDate>> {
    value.map(|v| parse_date(column, &v)).transpose()
}

pub(crate) fn parse_decimal(column: &str, value: &str) -> Result<Decimal> {
    Decimal::from_str(value).map_err(|e| {
        DbError::invalid_state(format!("{} is not a decimal ({}): {}", column, value, e))
    })
}

pub(crate) fn parse_optional_decimal(
    column: &str,
    value: Option<String>,
) -> Result<Option<Decimal>> {
    value.map(|v| parse_decimal(column, &v)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_database() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nested").join("rollup.sqlite3");

        let db = RollupDb::open(&db_path).await.unwrap();
        assert!(db_path.exists());

        db.close().await;
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("rollup.sqlite3");

        RollupDb::open(&db_path).await.unwrap().close().await;
        let db = RollupDb::open(&db_path).await.unwrap();
        assert!(db.list_configurations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_existing_fails_if_not_exists() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nonexistent.db");

        let result = RollupDb::open_existing(&db_path).await;
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[test]
    fn test_date_round_trip() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        assert_eq!(format_date(date), "2026-01-31");
        assert_eq!(parse_date("d", "2026-01-31").unwrap(), date);
        assert!(parse_date("d", "31/01/2026").is_err());
    }
}
