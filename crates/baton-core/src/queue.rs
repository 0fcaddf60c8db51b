//! Serialized operation queue
//!
//! Version-control writes (and anything else that must not interleave) are
//! appended with [`OperationQueue::enqueue`] and taken off the front with
//! [`OperationQueue::dequeue`]. Ordering is strictly by id, which the store
//! assigns and never reuses.
//!
//! A claim is one immediate transaction: pick the lowest pending id, move it
//! to `running` with `WHERE id = ? AND status = 'pending'`, read it back. Two
//! concurrent dequeues therefore never return the same item. Nothing stops a
//! caller from claiming a second item before completing the first; keeping a
//! single operation in flight is the caller's side of the contract.
//!
//! Rows are never deleted, so the table doubles as an audit log.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use crate::{
    clock::{Clock, SystemClock},
    store::{format_timestamp, parse_optional_timestamp, parse_timestamp, Store},
    Error, Result,
};

/// Lifecycle of a queued operation
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum QueueStatus {
    /// Waiting to be claimed
    Pending,
    /// Claimed by a caller
    Running,
    /// Completed successfully
    Done,
    /// Completed with an error
    Failed,
}

impl QueueStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Check if this is a terminal state
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// One queued operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: i64,
    pub operation: String,
    pub payload: serde_json::Value,
    pub status: QueueStatus,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure detail, present only when `status` is `Failed`
    pub error: Option<String>,
}

/// Item counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub running: u64,
    pub done: u64,
    pub failed: u64,
}

impl QueueStats {
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.pending + self.running + self.done + self.failed
    }
}

/// FIFO queue of operations shared by every agent process
#[derive(Debug, Clone)]
pub struct OperationQueue {
    store: Store,
    clock: Arc<dyn Clock>,
}

/// `SELECT` of every item column, followed by the given clause
macro_rules! select_items {
    ($tail:literal) => {
        concat!(
            "SELECT id, operation, payload, status, enqueued_at, started_at, completed_at, error FROM vcs_queue ",
            $tail
        )
    };
}

type ItemRow = (
    i64,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
);

impl OperationQueue {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Append an operation; returns its id
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for a blank operation name.
    pub async fn enqueue(&self, operation: &str, payload: &serde_json::Value) -> Result<i64> {
        if operation.trim().is_empty() {
            return Err(Error::ValidationError(
                "operation name cannot be empty".to_string(),
            ));
        }

        let payload_json = serde_json::to_string(payload)
            .map_err(|e| Error::ParseError(format!("Failed to encode payload: {e}")))?;

        let id = sqlx::query(
            "INSERT INTO vcs_queue (operation, payload, status, enqueued_at) VALUES (?, ?, 'pending', ?)",
        )
        .bind(operation)
        .bind(&payload_json)
        .bind(format_timestamp(self.clock.now()))
        .execute(self.store.pool())
        .await
        .map(|result| result.last_insert_rowid())
        .map_err(|e| Error::DatabaseError(format!("Failed to enqueue operation: {e}")))?;

        info!(id, operation, "Operation enqueued");
        Ok(id)
    }

    /// Claim the oldest pending operation, or `None` if there is nothing to do
    pub async fn dequeue(&self) -> Result<Option<QueueItem>> {
        let clock = Arc::clone(&self.clock);
        self.store
            .transaction(move |conn| {
                Box::pin(async move { claim_next(conn, clock.now()).await })
            })
            .await
    }

    /// Finish a claimed operation: `done` without an error, `failed` with one
    ///
    /// Returns whether a row changed. Completing an id that does not exist or
    /// is still pending changes nothing. Completing twice overwrites the
    /// first outcome.
    pub async fn complete(&self, id: i64, error: Option<&str>) -> Result<bool> {
        let status = if error.is_some() {
            QueueStatus::Failed
        } else {
            QueueStatus::Done
        };

        let changed = sqlx::query(
            "UPDATE vcs_queue
             SET status = ?, completed_at = ?, error = ?
             WHERE id = ? AND status IN ('running', 'done', 'failed')",
        )
        .bind(status.as_str())
        .bind(format_timestamp(self.clock.now()))
        .bind(error)
        .bind(id)
        .execute(self.store.pool())
        .await
        .map(|result| result.rows_affected() > 0)
        .map_err(|e| Error::DatabaseError(format!("Failed to complete operation {id}: {e}")))?;

        if changed {
            info!(id, %status, "Operation completed");
        } else {
            warn!(id, "Complete ignored: no claimed operation with this id");
        }
        Ok(changed)
    }

    /// Pending operations in claim order
    pub async fn get_pending(&self) -> Result<Vec<QueueItem>> {
        let rows: Vec<ItemRow> = sqlx::query_as(select_items!(
            "WHERE status = 'pending' ORDER BY id ASC"
        ))
        .fetch_all(self.store.pool())
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to list pending operations: {e}")))?;

        rows.into_iter().map(item_from_row).collect()
    }

    /// Look up one operation by id
    pub async fn get(&self, id: i64) -> Result<Option<QueueItem>> {
        fetch_item(self.store.pool(), id).await
    }

    /// Operations claimed and not yet completed, oldest claim first
    ///
    /// A claimant that died mid-operation leaves its item here indefinitely.
    pub async fn running(&self) -> Result<Vec<QueueItem>> {
        let rows: Vec<ItemRow> = sqlx::query_as(select_items!(
            "WHERE status = 'running' ORDER BY started_at ASC, id ASC"
        ))
        .fetch_all(self.store.pool())
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to list running operations: {e}")))?;

        rows.into_iter().map(item_from_row).collect()
    }

    /// Most recent operations in any status, newest first
    pub async fn history(&self, limit: u32) -> Result<Vec<QueueItem>> {
        let rows: Vec<ItemRow> = sqlx::query_as(select_items!("ORDER BY id DESC LIMIT ?"))
        .bind(i64::from(limit))
        .fetch_all(self.store.pool())
        .await
        .map_err(|e| Error::DatabaseError(format!("Failed to read queue history: {e}")))?;

        rows.into_iter().map(item_from_row).collect()
    }

    /// Item counts per status
    pub async fn stats(&self) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM vcs_queue GROUP BY status")
                .fetch_all(self.store.pool())
                .await
                .map_err(|e| Error::DatabaseError(format!("Failed to count operations: {e}")))?;

        let counts = rows
            .into_iter()
            .map(|(status, count)| {
                let status: QueueStatus = status
                    .parse()
                    .map_err(|_| Error::ParseError(format!("Invalid queue status: {status}")))?;
                Ok((status, u64::try_from(count).unwrap_or(0)))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let count = |status: QueueStatus| counts.get(&status).copied().unwrap_or(0);
        Ok(QueueStats {
            pending: count(QueueStatus::Pending),
            running: count(QueueStatus::Running),
            done: count(QueueStatus::Done),
            failed: count(QueueStatus::Failed),
        })
    }
}

async fn claim_next(conn: &mut SqliteConnection, now: DateTime<Utc>) -> Result<Option<QueueItem>> {
    let next: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM vcs_queue WHERE status = 'pending' ORDER BY id ASC LIMIT 1")
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to find pending operation: {e}")))?;

    let Some((id,)) = next else {
        debug!("Queue empty");
        return Ok(None);
    };

    let claimed = sqlx::query(
        "UPDATE vcs_queue SET status = 'running', started_at = ? WHERE id = ? AND status = 'pending'",
    )
    .bind(format_timestamp(now))
    .bind(id)
    .execute(&mut *conn)
    .await
    .map(|result| result.rows_affected() == 1)
    .map_err(|e| Error::DatabaseError(format!("Failed to claim operation {id}: {e}")))?;

    if !claimed {
        debug!(id, "Operation claimed by another caller");
        return Ok(None);
    }

    let item = fetch_item(conn, id).await?;
    if let Some(item) = &item {
        info!(id, operation = %item.operation, "Operation claimed");
    }
    Ok(item)
}

async fn fetch_item<'e, E>(executor: E, id: i64) -> Result<Option<QueueItem>>
where
    E: sqlx::SqliteExecutor<'e>,
{
    let row: Option<ItemRow> =
        sqlx::query_as(select_items!("WHERE id = ?"))
            .bind(id)
            .fetch_optional(executor)
            .await
            .map_err(|e| Error::DatabaseError(format!("Failed to read operation {id}: {e}")))?;

    row.map(item_from_row).transpose()
}

fn item_from_row(row: ItemRow) -> Result<QueueItem> {
    let (id, operation, payload, status, enqueued_at, started_at, completed_at, error) = row;

    Ok(QueueItem {
        id,
        payload: serde_json::from_str(&payload)
            .map_err(|e| Error::ParseError(format!("Invalid payload for operation {id}: {e}")))?,
        status: status
            .parse()
            .map_err(|_| Error::ParseError(format!("Invalid queue status: {status}")))?,
        enqueued_at: parse_timestamp("enqueued_at", &enqueued_at)?,
        started_at: parse_optional_timestamp("started_at", started_at.as_deref())?,
        completed_at: parse_optional_timestamp("completed_at", completed_at.as_deref())?,
        operation,
        error,
    })
}
