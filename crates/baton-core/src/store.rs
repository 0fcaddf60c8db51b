//! SQLite-backed transactional store shared by every agent process
//!
//! Provides the three things the coordinator and the queue rely on:
//! - single-row and multi-row reads plus `rows_affected` on writes, which is
//!   plain `sqlx` against [`Store::pool`] or a transaction connection
//! - [`Store::transaction`], which runs a closure between `BEGIN IMMEDIATE`
//!   and `COMMIT` so its read and conditional write see no interleaving writer
//! - the embedded schema, applied idempotently on open

use std::{path::Path, str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::BoxFuture;
use sqlx::{
    pool::PoolConnection,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Sqlite, SqliteConnection, SqlitePool,
};
use tracing::{debug, warn};

use crate::{config::StoreConfig, Error, Result};

const CURRENT_SCHEMA_VERSION: i64 = 1;

/// Database schema - executed on every open
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY CHECK(version = 1)
);

CREATE TABLE IF NOT EXISTS build_state (
    id INTEGER PRIMARY KEY CHECK(id = 1),
    status TEXT NOT NULL DEFAULT 'passing' CHECK(status IN ('passing', 'broken', 'fixing')),
    fixer_agent_id TEXT,
    broken_since TEXT,
    last_check TEXT
);

CREATE TABLE IF NOT EXISTS vcs_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending', 'running', 'done', 'failed')),
    enqueued_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_vcs_queue_status ON vcs_queue(status, id);
";

/// Handle to the shared coordination database
///
/// Cheap to clone; clones share one connection pool. Separate processes each
/// open their own `Store` on the same file.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database file at `path`
    ///
    /// # Errors
    ///
    /// Returns `Error::DatabaseError` if the file cannot be opened or the
    /// schema cannot be applied, and `Error::IoError` if the parent directory
    /// cannot be created.
    pub async fn open(path: &Path, config: &StoreConfig) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::IoError(format!(
                    "Failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| {
                Error::DatabaseError(format!(
                    "Failed to open database {}: {e}",
                    path.display()
                ))
            })?;

        Self::from_pool(pool).await
    }

    /// Private in-memory database, for tests and one-shot tooling
    ///
    /// Uses a single connection that is never recycled, since every `SQLite`
    /// memory connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::DatabaseError(format!("Invalid in-memory url: {e}")))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to open in-memory database: {e}")))?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, applying the schema
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Get the underlying connection pool
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run `f` inside one write-locked transaction
    ///
    /// The transaction begins with `BEGIN IMMEDIATE`, so concurrent callers
    /// (in this process or others) queue on the busy timeout before their
    /// first read. Commits when `f` returns `Ok`, rolls back when it returns
    /// `Err`. If the returned future is dropped midway the connection is
    /// closed instead of returned to the pool, which discards the open
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or `Error::DatabaseError` if the
    /// transaction cannot be started or committed.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>>,
    {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to acquire connection: {e}")))?;
        let mut guard = TxGuard { conn, open: false };

        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *guard.conn)
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to begin transaction: {e}")))?;
        guard.open = true;

        match f(&mut *guard.conn).await {
            Ok(value) => {
                sqlx::query("COMMIT")
                    .execute(&mut *guard.conn)
                    .await
                    .map_err(|e| Error::DatabaseError(format!("Failed to commit transaction: {e}")))?;
                guard.open = false;
                Ok(value)
            }
            Err(err) => {
                match sqlx::query("ROLLBACK").execute(&mut *guard.conn).await {
                    Ok(_) => guard.open = false,
                    Err(rollback_err) => {
                        warn!(error = %rollback_err, "Rollback failed, discarding connection");
                    }
                }
                debug!(error = %err, "Transaction rolled back");
                Err(err)
            }
        }
    }
}

/// Pooled connection that is closed rather than reused while a transaction
/// is still open on it
struct TxGuard {
    conn: PoolConnection<Sqlite>,
    open: bool,
}

impl Drop for TxGuard {
    fn drop(&mut self) {
        if self.open {
            self.conn.close_on_drop();
        }
    }
}

/// Initialize database schema
async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to initialize schema: {e}")))?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(CURRENT_SCHEMA_VERSION)
        .execute(pool)
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to set schema version: {e}")))?;

    let version: Option<(i64,)> = sqlx::query_as("SELECT MAX(version) FROM schema_version")
        .fetch_optional(pool)
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to read schema version: {e}")))?;

    match version {
        Some((v,)) if v == CURRENT_SCHEMA_VERSION => Ok(()),
        Some((v,)) => Err(Error::DatabaseError(format!(
            "Unsupported schema version {v} (expected {CURRENT_SCHEMA_VERSION})"
        ))),
        None => Err(Error::DatabaseError("Schema version missing".to_string())),
    }
}

/// Encode a timestamp the way every column in this schema stores it
///
/// Fixed-width nanoseconds, so a value read back compares equal to the one
/// written and the text still sorts chronologically.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Decode a stored timestamp column
pub(crate) fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::ParseError(format!("Invalid {column} timestamp '{raw}': {e}")))
}

/// Decode a nullable timestamp column
pub(crate) fn parse_optional_timestamp(
    column: &str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>> {
    raw.map(|value| parse_timestamp(column, value)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_is_idempotent() -> Result<()> {
        let store = Store::in_memory().await?;
        init_schema(store.pool()).await?;

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name IN ('build_state', 'vcs_queue') ORDER BY name",
        )
        .fetch_all(store.pool())
        .await?;
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(names, vec!["build_state", "vcs_queue"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_transaction_commits_on_ok() -> Result<()> {
        let store = Store::in_memory().await?;

        let id = store
            .transaction(|conn| {
                Box::pin(async move {
                    let done = sqlx::query(
                        "INSERT INTO vcs_queue (operation, payload, enqueued_at) VALUES ('op', '{}', '2024-01-01T00:00:00.000Z')",
                    )
                    .execute(&mut *conn)
                    .await?;
                    Ok(done.last_insert_rowid())
                })
            })
            .await?;

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vcs_queue WHERE id = ?")
            .bind(id)
            .fetch_one(store.pool())
            .await?;
        assert_eq!(count.0, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_err() -> Result<()> {
        let store = Store::in_memory().await?;

        let result: Result<()> = store
            .transaction(|conn| {
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO vcs_queue (operation, payload, enqueued_at) VALUES ('op', '{}', '2024-01-01T00:00:00.000Z')",
                    )
                    .execute(&mut *conn)
                    .await?;
                    Err(Error::ValidationError("abort".to_string()))
                })
            })
            .await;
        assert!(matches!(result, Err(Error::ValidationError(_))));

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vcs_queue")
            .fetch_one(store.pool())
            .await?;
        assert_eq!(count.0, 0);

        // The single pooled connection must be usable again.
        store.transaction(|_conn| Box::pin(async { Ok(()) })).await
    }

    #[test]
    fn test_timestamp_round_trip_is_lossless() -> Result<()> {
        let raw = "2025-03-01T12:30:45.123456789Z";
        let parsed = parse_timestamp("last_check", raw)?;
        assert_eq!(format_timestamp(parsed), raw);

        // Shorter stored forms still decode.
        let millis = parse_timestamp("last_check", "2025-03-01T12:30:45.123Z")?;
        assert_eq!(format_timestamp(millis), "2025-03-01T12:30:45.123000000Z");

        assert!(parse_timestamp("last_check", "yesterday").is_err());
        assert_eq!(parse_optional_timestamp("broken_since", None)?, None);
        Ok(())
    }
}
