//! [`OfflineQueue`] — the sqlite-backed durable queue.
//!
//! Matches the project's existing checkpointer persistence style: WAL
//! journal mode, embedded `sqlx::migrate!` migrations run once at startup,
//! a single writer connection pool sized to 1 so writes serialize naturally
//! without an explicit application-level mutex.

use crate::item::{QueueItem, QueueItemKind, QueueItemState};
use chrono::Utc;
use haven_types::AgentError;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

pub struct OfflineQueue {
    pool: SqlitePool,
}

impl OfflineQueue {
    /// Opens (creating if absent) the queue database at `path`, running
    /// embedded migrations. WAL mode is enabled so readers never block the
    /// single writer.
    pub async fn open(path: &Path) -> Result<Self, AgentError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| AgentError::configuration(format!("invalid queue path: {e}")))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| AgentError::StoreCorruption {
                message: format!("failed to open queue.db: {e}"),
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| AgentError::StoreCorruption {
                message: format!("queue.db migration failed: {e}"),
            })?;

        Ok(Self { pool })
    }

    /// Appends a new pending item. Returns its generated id.
    pub async fn enqueue(&self, kind: QueueItemKind, payload: &str) -> Result<String, AgentError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO queue_items (id, kind, payload, enqueued_at, attempts, state) VALUES (?, ?, ?, ?, 0, 'pending')",
        )
        .bind(&id)
        .bind(kind.as_str())
        .bind(payload)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| AgentError::StoreCorruption {
            message: format!("enqueue failed: {e}"),
        })?;
        Ok(id)
    }

    /// Returns up to `limit` pending items, oldest first — the delivery
    /// worker's drain order.
    pub async fn pending(&self, limit: i64) -> Result<Vec<QueueItem>, AgentError> {
        let rows = sqlx::query(
            "SELECT id, kind, payload, enqueued_at, attempts, last_error, state FROM queue_items WHERE state = 'pending' ORDER BY enqueued_at ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AgentError::StoreCorruption {
            message: format!("pending query failed: {e}"),
        })?;

        rows.into_iter().map(row_to_item).collect()
    }

    /// Marks `id` delivered — it will never be returned by [`Self::pending`]
    /// again.
    pub async fn mark_delivered(&self, id: &str) -> Result<(), AgentError> {
        sqlx::query("UPDATE queue_items SET state = 'delivered' WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AgentError::StoreCorruption {
                message: format!("mark_delivered failed: {e}"),
            })?;
        Ok(())
    }

    /// Records a failed delivery attempt. The item stays `pending` (to be
    /// retried) unless `attempts` has reached `max_attempts`, in which case
    /// it moves to `failed` for operator review.
    pub async fn mark_failed(
        &self,
        id: &str,
        error: &str,
        max_attempts: u32,
    ) -> Result<(), AgentError> {
        let row = sqlx::query("SELECT attempts FROM queue_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AgentError::StoreCorruption {
                message: format!("mark_failed lookup failed: {e}"),
            })?;

        let attempts: i64 = row.map(|r| r.get::<i64, _>("attempts")).unwrap_or(0);
        let next_attempts = attempts + 1;
        let next_state = if next_attempts as u32 >= max_attempts {
            QueueItemState::Failed
        } else {
            QueueItemState::Pending
        };

        sqlx::query("UPDATE queue_items SET attempts = ?, last_error = ?, state = ? WHERE id = ?")
            .bind(next_attempts)
            .bind(error)
            .bind(next_state.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AgentError::StoreCorruption {
                message: format!("mark_failed update failed: {e}"),
            })?;
        Ok(())
    }

    /// Count of items in each terminal/non-terminal state, used by the
    /// backpressure alert in §5 (evidence queue high-water mark).
    pub async fn pending_count(&self) -> Result<i64, AgentError> {
        let row = sqlx::query("SELECT COUNT(*) as n FROM queue_items WHERE state = 'pending'")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AgentError::StoreCorruption {
                message: format!("pending_count failed: {e}"),
            })?;
        Ok(row.get::<i64, _>("n"))
    }
}

fn row_to_item(row: sqlx::sqlite::SqliteRow) -> Result<QueueItem, AgentError> {
    let kind_str: String = row.get("kind");
    let kind = QueueItemKind::parse(&kind_str).ok_or_else(|| AgentError::StoreCorruption {
        message: format!("unknown queue item kind: {kind_str}"),
    })?;
    let state_str: String = row.get("state");
    let enqueued_at_str: String = row.get("enqueued_at");
    let enqueued_at = chrono::DateTime::parse_from_rfc3339(&enqueued_at_str)
        .map_err(|e| AgentError::StoreCorruption {
            message: format!("corrupt enqueued_at timestamp: {e}"),
        })?
        .with_timezone(&Utc);

    Ok(QueueItem {
        id: row.get("id"),
        kind,
        payload: row.get("payload"),
        enqueued_at,
        attempts: row.get::<i64, _>("attempts") as u32,
        last_error: row.get("last_error"),
        state: QueueItemState::parse(&state_str),
    })
}
