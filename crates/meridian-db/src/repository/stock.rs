//! # Stock Ledger Repository
//!
//! The append-only audit log of every stock delta and its cause.
//!
//! A movement's `previous_stock` must equal the counter value read
//! immediately before the write, inside the same transaction as the counter
//! update - that is what lets the movement history reconstruct the current
//! counter by replay. Rows are inserted, never updated, never deleted.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use meridian_core::StockMovement;

const MOVEMENT_COLUMNS: &str = "id, product_id, variant_id, movement_type, quantity, \
     previous_stock, new_stock, reference_id, reason, user_id, created_at";

/// Repository for the stock movement ledger.
#[derive(Debug, Clone)]
pub struct StockLedgerRepository {
    pool: SqlitePool,
}

impl StockLedgerRepository {
    /// Creates a new StockLedgerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StockLedgerRepository { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Lists movements of a product (both counters), newest first.
    pub async fn list_for_product(&self, product_id: &str) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE product_id = ?1 ORDER BY created_at DESC"
        ))
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Lists movements caused by a given entity (e.g. all lines of a sale).
    pub async fn list_for_reference(&self, reference_id: &str) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as::<_, StockMovement>(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE reference_id = ?1 ORDER BY created_at"
        ))
        .bind(reference_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    /// Sums the signed movement quantities for one counter.
    ///
    /// `variant_id = None` addresses the product counter;
    /// `Some(id)` addresses that variant's counter. Replaying this sum over
    /// the initial stock must always equal the live counter.
    pub async fn net_delta(&self, product_id: &str, variant_id: Option<&str>) -> DbResult<i64> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(quantity) FROM stock_movements \
             WHERE product_id = ?1 \
               AND ((?2 IS NULL AND variant_id IS NULL) OR variant_id = ?2)",
        )
        .bind(product_id)
        .bind(variant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total.unwrap_or(0))
    }

    /// Counts all movements (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stock_movements")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // =========================================================================
    // Transaction-composable operations
    // =========================================================================

    /// Appends one movement row. The only write this table ever sees.
    pub async fn append_tx(conn: &mut SqliteConnection, movement: &StockMovement) -> DbResult<()> {
        debug!(
            product_id = %movement.product_id,
            movement_type = ?movement.movement_type,
            quantity = %movement.quantity,
            "Appending stock movement"
        );

        sqlx::query(
            "INSERT INTO stock_movements ( \
                id, product_id, variant_id, movement_type, quantity, \
                previous_stock, new_stock, reference_id, reason, user_id, created_at \
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&movement.id)
        .bind(&movement.product_id)
        .bind(&movement.variant_id)
        .bind(movement.movement_type)
        .bind(movement.quantity)
        .bind(movement.previous_stock)
        .bind(movement.new_stock)
        .bind(&movement.reference_id)
        .bind(&movement.reason)
        .bind(&movement.user_id)
        .bind(movement.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

/// Generates a new movement ID.
pub fn generate_movement_id() -> String {
    Uuid::new_v4().to_string()
}
