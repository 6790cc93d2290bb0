//! # Cart Repository
//!
//! Row access for the ephemeral, per-owner purchase lines.
//!
//! One row per `(owner_id, product_id, variant_id)`; the aggregator merges
//! quantities into the existing row instead of inserting a duplicate. The
//! stored `unit_price_cents`/`subtotal_cents` reflect the snapshot taken at
//! add time, while [`CartLine`] joins the live catalog row for display - a
//! deliberate, visible divergence when the catalog price changes after an
//! item was added.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use meridian_core::CartItem;

const CART_COLUMNS: &str = "id, owner_id, product_id, variant_id, quantity, \
     unit_price_cents, subtotal_cents, created_at, updated_at";

/// A cart row joined with live product/variant data for display.
///
/// `unit_price_cents`/`subtotal_cents` are the stored snapshot;
/// `live_unit_price_cents` is what the catalog would charge right now.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct CartLine {
    pub id: String,
    pub owner_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub subtotal_cents: i64,
    pub product_name: String,
    pub sku: String,
    pub variant_name: Option<String>,
    pub live_unit_price_cents: i64,
    pub available_stock: i64,
}

/// Repository for cart database operations.
#[derive(Debug, Clone)]
pub struct CartRepository {
    pool: SqlitePool,
}

impl CartRepository {
    /// Creates a new CartRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CartRepository { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets a cart line by its ID.
    pub async fn get_item(&self, id: &str) -> DbResult<Option<CartItem>> {
        let item = sqlx::query_as::<_, CartItem>(&format!(
            "SELECT {CART_COLUMNS} FROM cart_items WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(item)
    }

    /// Lists an owner's cart lines, oldest first.
    pub async fn list_for_owner(&self, owner_id: &str) -> DbResult<Vec<CartItem>> {
        let items = sqlx::query_as::<_, CartItem>(&format!(
            "SELECT {CART_COLUMNS} FROM cart_items WHERE owner_id = ?1 ORDER BY created_at"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// Lists an owner's cart joined with live product/variant data.
    pub async fn view_for_owner(&self, owner_id: &str) -> DbResult<Vec<CartLine>> {
        let lines = sqlx::query_as::<_, CartLine>(
            "SELECT \
                ci.id, ci.owner_id, ci.product_id, ci.variant_id, ci.quantity, \
                ci.unit_price_cents, ci.subtotal_cents, \
                p.name AS product_name, \
                p.sku AS sku, \
                v.name AS variant_name, \
                p.sale_price_cents + IFNULL(v.additional_price_cents, 0) \
                    AS live_unit_price_cents, \
                IFNULL(v.stock, p.stock) AS available_stock \
             FROM cart_items ci \
             JOIN products p ON p.id = ci.product_id \
             LEFT JOIN product_variants v ON v.id = ci.variant_id \
             WHERE ci.owner_id = ?1 \
             ORDER BY ci.created_at",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(lines)
    }

    // =========================================================================
    // Transaction-composable operations
    // =========================================================================

    /// Finds the line for `(owner, product, variant)` if one exists.
    pub async fn find_line_tx(
        conn: &mut SqliteConnection,
        owner_id: &str,
        product_id: &str,
        variant_id: Option<&str>,
    ) -> DbResult<Option<CartItem>> {
        let item = sqlx::query_as::<_, CartItem>(&format!(
            "SELECT {CART_COLUMNS} FROM cart_items \
             WHERE owner_id = ?1 AND product_id = ?2 \
               AND ((?3 IS NULL AND variant_id IS NULL) OR variant_id = ?3)"
        ))
        .bind(owner_id)
        .bind(product_id)
        .bind(variant_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(item)
    }

    /// Fetches a cart line by ID inside a transaction.
    pub async fn fetch_tx(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<CartItem>> {
        let item = sqlx::query_as::<_, CartItem>(&format!(
            "SELECT {CART_COLUMNS} FROM cart_items WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(item)
    }

    /// Lists an owner's cart lines inside a transaction.
    pub async fn list_for_owner_tx(
        conn: &mut SqliteConnection,
        owner_id: &str,
    ) -> DbResult<Vec<CartItem>> {
        let items = sqlx::query_as::<_, CartItem>(&format!(
            "SELECT {CART_COLUMNS} FROM cart_items WHERE owner_id = ?1 ORDER BY created_at"
        ))
        .bind(owner_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(items)
    }

    /// Counts an owner's distinct cart lines.
    pub async fn count_lines_tx(conn: &mut SqliteConnection, owner_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cart_items WHERE owner_id = ?1")
            .bind(owner_id)
            .fetch_one(&mut *conn)
            .await?;

        Ok(count)
    }

    /// Inserts a new cart line.
    pub async fn insert_tx(conn: &mut SqliteConnection, item: &CartItem) -> DbResult<()> {
        debug!(owner_id = %item.owner_id, product_id = %item.product_id, "Inserting cart line");

        sqlx::query(
            "INSERT INTO cart_items ( \
                id, owner_id, product_id, variant_id, quantity, \
                unit_price_cents, subtotal_cents, created_at, updated_at \
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&item.id)
        .bind(&item.owner_id)
        .bind(&item.product_id)
        .bind(&item.variant_id)
        .bind(item.quantity)
        .bind(item.unit_price_cents)
        .bind(item.subtotal_cents)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Sets a line's quantity and recomputed subtotal.
    /// The snapshot `unit_price_cents` is deliberately left untouched.
    pub async fn set_quantity_tx(
        conn: &mut SqliteConnection,
        id: &str,
        quantity: i64,
        subtotal_cents: i64,
    ) -> DbResult<()> {
        let now = chrono::Utc::now();

        sqlx::query(
            "UPDATE cart_items SET quantity = ?2, subtotal_cents = ?3, updated_at = ?4 \
             WHERE id = ?1",
        )
        .bind(id)
        .bind(quantity)
        .bind(subtotal_cents)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Deletes a single cart line.
    pub async fn delete_tx(conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM cart_items WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Deletes every line of an owner's cart.
    pub async fn clear_tx(conn: &mut SqliteConnection, owner_id: &str) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM cart_items WHERE owner_id = ?1")
            .bind(owner_id)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Helper to generate a new cart line ID.
pub fn generate_cart_item_id() -> String {
    Uuid::new_v4().to_string()
}
