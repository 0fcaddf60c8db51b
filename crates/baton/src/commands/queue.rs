//! Queue command implementation
//!
//! Serializes version-control operations across agents through
//! [`OperationQueue`].

use anyhow::{Context, Result};
use baton_core::{OperationQueue, QueueItem, QueueStats, QueueStatus};
use serde::Serialize;

/// What `baton queue` was asked to do
#[derive(Debug, Clone, PartialEq)]
pub enum QueueAction {
    Push {
        operation: String,
        payload: serde_json::Value,
    },
    Next,
    Done {
        id: i64,
    },
    Fail {
        id: i64,
        message: String,
    },
    Pending,
    History {
        limit: u32,
    },
    Stats,
}

/// Result of a queue action
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum QueueReport {
    Enqueued { id: i64 },
    Claimed(Option<QueueItem>),
    Completed { id: i64, status: QueueStatus },
    Items(Vec<QueueItem>),
    Stats(QueueStats),
}

/// Parse the `--payload` argument; absent means an empty object
///
/// # Errors
///
/// Returns an error if the text is not valid JSON
pub fn parse_payload(raw: Option<&str>) -> Result<serde_json::Value> {
    raw.map_or_else(
        || Ok(serde_json::json!({})),
        |text| serde_json::from_str(text).context("--payload must be valid JSON"),
    )
}

/// Run the queue command
///
/// # Errors
///
/// Returns an error if:
/// - The operation name is blank (push)
/// - The item was never claimed or does not exist (done, fail)
/// - The store fails
pub async fn run(action: QueueAction, queue: &OperationQueue) -> Result<QueueReport> {
    let report = match action {
        QueueAction::Push { operation, payload } => QueueReport::Enqueued {
            id: queue.enqueue(&operation, &payload).await?,
        },
        QueueAction::Next => QueueReport::Claimed(queue.dequeue().await?),
        QueueAction::Done { id } => complete(queue, id, None).await?,
        QueueAction::Fail { id, message } => complete(queue, id, Some(&message)).await?,
        QueueAction::Pending => QueueReport::Items(queue.get_pending().await?),
        QueueAction::History { limit } => QueueReport::Items(queue.history(limit).await?),
        QueueAction::Stats => QueueReport::Stats(queue.stats().await?),
    };
    Ok(report)
}

async fn complete(queue: &OperationQueue, id: i64, error: Option<&str>) -> Result<QueueReport> {
    if !queue.complete(id, error).await? {
        anyhow::bail!("Queue item {id} is not claimed; run 'baton queue next' first");
    }
    let status = if error.is_some() {
        QueueStatus::Failed
    } else {
        QueueStatus::Done
    };
    Ok(QueueReport::Completed { id, status })
}

/// Human-readable rendering
pub fn render(report: &QueueReport) -> String {
    match report {
        QueueReport::Enqueued { id } => format!("Enqueued #{id}"),
        QueueReport::Claimed(None) => "Queue is empty".to_string(),
        QueueReport::Claimed(Some(item)) => format!("Claimed {}", render_item(item)),
        QueueReport::Completed { id, status } => format!("#{id} marked {status}"),
        QueueReport::Items(items) if items.is_empty() => "No operations".to_string(),
        QueueReport::Items(items) => items
            .iter()
            .map(render_item)
            .collect::<Vec<_>>()
            .join("\n"),
        QueueReport::Stats(stats) => format!(
            "Pending: {}\nRunning: {}\nDone:    {}\nFailed:  {}\nTotal:   {}",
            stats.pending,
            stats.running,
            stats.done,
            stats.failed,
            stats.total()
        ),
    }
}

fn render_item(item: &QueueItem) -> String {
    let mut line = format!(
        "#{:<5} {:<8} {} {}",
        item.id, item.status, item.operation, item.payload
    );
    if let Some(error) = &item.error {
        line.push_str(&format!("  ({error})"));
    }
    line
}
