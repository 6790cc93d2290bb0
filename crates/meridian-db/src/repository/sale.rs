//! # Sale Repository
//!
//! Database operations for sales and sale items.
//!
//! Sales are created fully formed (status COMPLETED) by the checkout
//! processor and only ever status-mutated afterwards; there is no delete
//! path. Sale numbers come from an atomic counter allocation, never from a
//! read-then-increment in application code.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use meridian_core::{Sale, SaleItem};

const SALE_COLUMNS: &str = "id, sale_number, status, subtotal_cents, discount_cents, \
     total_cents, amount_paid_cents, change_cents, payment_method, customer_id, \
     user_id, device_id, notes, sync_status, created_at, updated_at, completed_at, \
     cancelled_at, cancelled_by, cancel_reason";

const SALE_ITEM_COLUMNS: &str = "id, sale_id, product_id, variant_id, sku_snapshot, \
     name_snapshot, unit_price_cents, cost_cents, quantity, subtotal_cents, created_at";

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets a sale by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        let sale =
            sqlx::query_as::<_, Sale>(&format!("SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(sale)
    }

    /// Gets a sale by its business number.
    pub async fn get_by_number(&self, sale_number: i64) -> DbResult<Option<Sale>> {
        let sale = sqlx::query_as::<_, Sale>(&format!(
            "SELECT {SALE_COLUMNS} FROM sales WHERE sale_number = ?1"
        ))
        .bind(sale_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sale)
    }

    /// Gets all items of a sale.
    pub async fn get_items(&self, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        let items = sqlx::query_as::<_, SaleItem>(&format!(
            "SELECT {SALE_ITEM_COLUMNS} FROM sale_items WHERE sale_id = ?1 ORDER BY created_at"
        ))
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// Lists the most recent sales.
    pub async fn list_recent(&self, limit: u32) -> DbResult<Vec<Sale>> {
        let sales = sqlx::query_as::<_, Sale>(&format!(
            "SELECT {SALE_COLUMNS} FROM sales ORDER BY sale_number DESC LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(sales)
    }

    /// Marks a sale as acknowledged by the remote.
    /// Called by the sync worker after a successful delivery.
    pub async fn mark_synced(&self, id: &str) -> DbResult<()> {
        sqlx::query("UPDATE sales SET sync_status = 'synced' WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // =========================================================================
    // Transaction-composable operations
    // =========================================================================

    /// Allocates the next sale number.
    ///
    /// Single atomic UPSERT against the counters table, evaluated inside the
    /// caller's write transaction. Uniqueness and monotonicity hold without
    /// any application-side read-then-increment.
    pub async fn next_sale_number_tx(conn: &mut SqliteConnection) -> DbResult<i64> {
        let number: i64 = sqlx::query_scalar(
            "INSERT INTO counters (name, value) VALUES ('sale_number', 1) \
             ON CONFLICT(name) DO UPDATE SET value = value + 1 \
             RETURNING value",
        )
        .fetch_one(&mut *conn)
        .await?;

        Ok(number)
    }

    /// Fetches a sale inside a write transaction.
    pub async fn fetch_tx(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Sale>> {
        let sale =
            sqlx::query_as::<_, Sale>(&format!("SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;

        Ok(sale)
    }

    /// Fetches a sale's items inside a write transaction.
    pub async fn items_tx(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        let items = sqlx::query_as::<_, SaleItem>(&format!(
            "SELECT {SALE_ITEM_COLUMNS} FROM sale_items WHERE sale_id = ?1 ORDER BY created_at"
        ))
        .bind(sale_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(items)
    }

    /// Inserts a sale row.
    pub async fn insert_sale_tx(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
        debug!(id = %sale.id, sale_number = %sale.sale_number, "Inserting sale");

        sqlx::query(
            "INSERT INTO sales ( \
                id, sale_number, status, subtotal_cents, discount_cents, total_cents, \
                amount_paid_cents, change_cents, payment_method, customer_id, \
                user_id, device_id, notes, sync_status, created_at, updated_at, \
                completed_at, cancelled_at, cancelled_by, cancel_reason \
            ) VALUES ( \
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, \
                ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20 \
            )",
        )
        .bind(&sale.id)
        .bind(sale.sale_number)
        .bind(sale.status)
        .bind(sale.subtotal_cents)
        .bind(sale.discount_cents)
        .bind(sale.total_cents)
        .bind(sale.amount_paid_cents)
        .bind(sale.change_cents)
        .bind(sale.payment_method)
        .bind(&sale.customer_id)
        .bind(&sale.user_id)
        .bind(&sale.device_id)
        .bind(&sale.notes)
        .bind(sale.sync_status)
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .bind(sale.completed_at)
        .bind(sale.cancelled_at)
        .bind(&sale.cancelled_by)
        .bind(&sale.cancel_reason)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Inserts a sale item row.
    ///
    /// ## Snapshot Pattern
    /// sku, name, unit price and cost were copied from the catalog by the
    /// caller; the row never changes after this insert.
    pub async fn insert_item_tx(conn: &mut SqliteConnection, item: &SaleItem) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO sale_items ( \
                id, sale_id, product_id, variant_id, sku_snapshot, name_snapshot, \
                unit_price_cents, cost_cents, quantity, subtotal_cents, created_at \
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&item.id)
        .bind(&item.sale_id)
        .bind(&item.product_id)
        .bind(&item.variant_id)
        .bind(&item.sku_snapshot)
        .bind(&item.name_snapshot)
        .bind(item.unit_price_cents)
        .bind(item.cost_cents)
        .bind(item.quantity)
        .bind(item.subtotal_cents)
        .bind(item.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Transitions a COMPLETED sale to CANCELLED with cancellation metadata.
    ///
    /// Guarded on the current status so a concurrent cancellation of the
    /// same sale cannot apply twice.
    pub async fn mark_cancelled_tx(
        conn: &mut SqliteConnection,
        id: &str,
        cancelled_at: DateTime<Utc>,
        cancelled_by: &str,
        reason: &str,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE sales SET \
                status = 'cancelled', \
                cancelled_at = ?2, \
                cancelled_by = ?3, \
                cancel_reason = ?4, \
                sync_status = 'pending', \
                updated_at = ?2 \
             WHERE id = ?1 AND status = 'completed'",
        )
        .bind(id)
        .bind(cancelled_at)
        .bind(cancelled_by)
        .bind(reason)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Sale (completed)", id));
        }

        Ok(())
    }
}

/// Generates a new sale ID.
pub fn generate_sale_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a new sale item ID.
pub fn generate_sale_item_id() -> String {
    Uuid::new_v4().to_string()
}
