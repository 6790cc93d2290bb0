//! # Sync Outbox Repository
//!
//! The durable queue behind offline-first replication.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     SINGLE TRANSACTION                           │
//! │                                                                  │
//! │  1. the mutation itself (sale insert, stock decrement, ...)      │
//! │  2. INSERT INTO sync_outbox (entity_type, entity_id, payload)    │
//! │                                                                  │
//! │  COMMIT ← both land or neither does                              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//! A crash or offline period can never lose a mutation: if the local write
//! is visible, its outbox row is too. The delivery worker in meridian-sync
//! drains the queue asynchronously and never blocks this write path.
//!
//! `seq` (AUTOINCREMENT) is one global order across all entity types, so a
//! sale is never delivered before the product updates enqueued ahead of it.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use meridian_core::{EntityType, SyncOperation, SyncQueueEntry};

const OUTBOX_COLUMNS: &str = "seq, id, entity_type, entity_id, operation, payload, \
     status, retry_count, error_message, created_at, attempted_at, synced_at";

/// Repository for sync outbox operations.
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
}

impl OutboxRepository {
    /// Creates a new OutboxRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OutboxRepository { pool }
    }

    // =========================================================================
    // Enqueue (write path, transactional)
    // =========================================================================

    /// Appends an entry inside the caller's write transaction.
    ///
    /// Returns the allocated global sequence number.
    pub async fn enqueue_tx(
        conn: &mut SqliteConnection,
        entity_type: EntityType,
        entity_id: &str,
        operation: SyncOperation,
        payload: &str,
    ) -> DbResult<i64> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        debug!(
            entity_type = ?entity_type,
            entity_id = %entity_id,
            operation = ?operation,
            "Queuing for sync"
        );

        let result = sqlx::query(
            "INSERT INTO sync_outbox ( \
                id, entity_type, entity_id, operation, payload, \
                status, retry_count, error_message, created_at, attempted_at, synced_at \
            ) VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, NULL, ?6, NULL, NULL)",
        )
        .bind(&id)
        .bind(entity_type)
        .bind(entity_id)
        .bind(operation)
        .bind(payload)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    // =========================================================================
    // Delivery loop support
    // =========================================================================

    /// Gets undelivered entries in global commit order.
    ///
    /// Returns entries with status PENDING or FAILED, oldest sequence first.
    /// Retry eligibility (backoff windows, retry caps) is the worker's
    /// decision, not the store's.
    pub async fn pending_batch(&self, limit: u32) -> DbResult<Vec<SyncQueueEntry>> {
        let entries = sqlx::query_as::<_, SyncQueueEntry>(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM sync_outbox \
             WHERE status != 'synced' ORDER BY seq ASC LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Marks an entry as successfully delivered.
    pub async fn mark_synced(&self, id: &str) -> DbResult<()> {
        let now = Utc::now();

        sqlx::query(
            "UPDATE sync_outbox SET status = 'synced', synced_at = ?2, attempted_at = ?2 \
             WHERE id = ?1",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records a delivery failure: FAILED status, retry_count + 1, and the
    /// error message for diagnosis. The entry stays queued for later sweeps.
    pub async fn mark_failed(&self, id: &str, error: &str) -> DbResult<()> {
        let now = Utc::now();

        sqlx::query(
            "UPDATE sync_outbox SET \
                status = 'failed', \
                retry_count = retry_count + 1, \
                error_message = ?2, \
                attempted_at = ?3 \
             WHERE id = ?1",
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Counts undelivered entries - the "pending sync" signal surfaced to
    /// the caller.
    pub async fn pending_count(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sync_outbox WHERE status != 'synced'")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Deletes SYNCED entries delivered before the cutoff.
    ///
    /// Only SYNCED entries are ever pruned; an undelivered entry lives until
    /// it is delivered, no matter how old.
    pub async fn prune_synced(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let result =
            sqlx::query("DELETE FROM sync_outbox WHERE status = 'synced' AND synced_at < ?1")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    /// Gets an entry by its ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<SyncQueueEntry>> {
        let entry = sqlx::query_as::<_, SyncQueueEntry>(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM sync_outbox WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    /// Lists every entry in sequence order (tests and diagnostics).
    pub async fn list_all(&self) -> DbResult<Vec<SyncQueueEntry>> {
        let entries = sqlx::query_as::<_, SyncQueueEntry>(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM sync_outbox ORDER BY seq ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}
