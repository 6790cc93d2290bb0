//! # Product Repository
//!
//! Database operations for products and their variants, including the
//! guarded stock mutations the sale engine is built on.
//!
//! ## Guarded Decrements
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  inside the write transaction                                    │
//! │                                                                  │
//! │  1. SELECT stock            ← previous_stock for the ledger row  │
//! │  2. available < qty?        → Insufficient { available }         │
//! │  3. UPDATE ... SET stock = stock - qty                           │
//! │         WHERE id = ? AND stock >= qty                            │
//! │  4. rows_affected = 0?      → Insufficient (lost the race)       │
//! │                                                                  │
//! │  Two concurrent commits for the last unit: exactly one passes.   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//! Oversell is always a hard reject; the counter is never clamped to zero,
//! since clamping would silently break the ledger replay invariant.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use meridian_core::{Product, ProductVariant};

/// Outcome of a conditional stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDecrement {
    /// The counter moved; `previous`/`new` feed the ledger row.
    Applied { previous: i64, new: i64 },
    /// Available stock cannot satisfy the request. Nothing changed.
    Insufficient { available: i64 },
}

const PRODUCT_COLUMNS: &str = "id, sku, name, description, sale_price_cents, \
     purchase_price_cents, stock, min_stock_alert, is_active, sync_status, \
     created_at, updated_at";

const VARIANT_COLUMNS: &str =
    "id, product_id, name, additional_price_cents, stock, is_active, created_at, updated_at";

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets a product by its ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Gets a product by its SKU.
    pub async fn get_by_sku(&self, sku: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE sku = ?1"
        ))
        .bind(sku)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// Gets a variant by its ID.
    pub async fn get_variant(&self, id: &str) -> DbResult<Option<ProductVariant>> {
        let variant = sqlx::query_as::<_, ProductVariant>(&format!(
            "SELECT {VARIANT_COLUMNS} FROM product_variants WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(variant)
    }

    /// Lists active products sorted by name.
    pub async fn list_active(&self, limit: u32) -> DbResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE is_active = 1 ORDER BY name LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    /// Lists active products whose stock has fallen to the alert threshold.
    pub async fn list_low_stock(&self) -> DbResult<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products \
             WHERE is_active = 1 AND stock <= min_stock_alert \
             ORDER BY stock ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    /// Lists active variants of a product.
    pub async fn variants_of(&self, product_id: &str) -> DbResult<Vec<ProductVariant>> {
        let variants = sqlx::query_as::<_, ProductVariant>(&format!(
            "SELECT {VARIANT_COLUMNS} FROM product_variants \
             WHERE product_id = ?1 AND is_active = 1 ORDER BY name"
        ))
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(variants)
    }

    /// Counts active products (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Marks a product as acknowledged by the remote.
    /// Called by the sync worker after a successful delivery.
    pub async fn mark_synced(&self, id: &str) -> DbResult<()> {
        sqlx::query("UPDATE products SET sync_status = 'synced' WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // =========================================================================
    // Transaction-composable operations
    // =========================================================================

    /// Fetches a product inside a write transaction.
    pub async fn fetch_tx(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(product)
    }

    /// Fetches a variant inside a write transaction.
    pub async fn fetch_variant_tx(
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<ProductVariant>> {
        let variant = sqlx::query_as::<_, ProductVariant>(&format!(
            "SELECT {VARIANT_COLUMNS} FROM product_variants WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(variant)
    }

    /// Inserts a product.
    pub async fn insert_tx(conn: &mut SqliteConnection, product: &Product) -> DbResult<()> {
        debug!(sku = %product.sku, "Inserting product");

        sqlx::query(
            "INSERT INTO products ( \
                id, sku, name, description, sale_price_cents, purchase_price_cents, \
                stock, min_stock_alert, is_active, sync_status, created_at, updated_at \
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.sale_price_cents)
        .bind(product.purchase_price_cents)
        .bind(product.stock)
        .bind(product.min_stock_alert)
        .bind(product.is_active)
        .bind(product.sync_status)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Inserts a product variant.
    pub async fn insert_variant_tx(
        conn: &mut SqliteConnection,
        variant: &ProductVariant,
    ) -> DbResult<()> {
        debug!(product_id = %variant.product_id, name = %variant.name, "Inserting variant");

        sqlx::query(
            "INSERT INTO product_variants ( \
                id, product_id, name, additional_price_cents, stock, is_active, \
                created_at, updated_at \
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&variant.id)
        .bind(&variant.product_id)
        .bind(&variant.name)
        .bind(variant.additional_price_cents)
        .bind(variant.stock)
        .bind(variant.is_active)
        .bind(variant.created_at)
        .bind(variant.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Updates the editable fields of a product. The stock counter is NOT
    /// written here; it only moves through the guarded helpers below.
    pub async fn update_tx(conn: &mut SqliteConnection, product: &Product) -> DbResult<()> {
        debug!(id = %product.id, "Updating product");

        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE products SET \
                sku = ?2, \
                name = ?3, \
                description = ?4, \
                sale_price_cents = ?5, \
                purchase_price_cents = ?6, \
                min_stock_alert = ?7, \
                is_active = ?8, \
                sync_status = 'pending', \
                updated_at = ?9 \
            WHERE id = ?1",
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.sale_price_cents)
        .bind(product.purchase_price_cents)
        .bind(product.min_stock_alert)
        .bind(product.is_active)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", &product.id));
        }

        Ok(())
    }

    /// Soft-deletes a product by setting is_active = false.
    ///
    /// Historical sales still reference the row, and the deletion can
    /// propagate through sync as a tombstone.
    pub async fn soft_delete_tx(conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
        debug!(id = %id, "Soft-deleting product");

        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE products SET is_active = 0, sync_status = 'pending', updated_at = ?2 \
             WHERE id = ?1",
        )
        .bind(id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }

        Ok(())
    }

    /// Conditionally decrements a product's stock counter.
    ///
    /// The SELECT and the guarded UPDATE run on the same transaction
    /// connection, so `previous` is exactly the value the movement row must
    /// record.
    pub async fn try_decrement_stock_tx(
        conn: &mut SqliteConnection,
        id: &str,
        quantity: i64,
    ) -> DbResult<StockDecrement> {
        let available: i64 = sqlx::query_scalar("SELECT stock FROM products WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DbError::not_found("Product", id))?;

        if available < quantity {
            return Ok(StockDecrement::Insufficient { available });
        }

        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE products SET stock = stock - ?2, sync_status = 'pending', updated_at = ?3 \
             WHERE id = ?1 AND stock >= ?2",
        )
        .bind(id)
        .bind(quantity)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(StockDecrement::Insufficient { available });
        }

        debug!(id = %id, quantity = %quantity, previous = %available, "Decremented product stock");

        Ok(StockDecrement::Applied {
            previous: available,
            new: available - quantity,
        })
    }

    /// Increments a product's stock counter. Returns `(previous, new)`.
    pub async fn increment_stock_tx(
        conn: &mut SqliteConnection,
        id: &str,
        quantity: i64,
    ) -> DbResult<(i64, i64)> {
        let previous: i64 = sqlx::query_scalar("SELECT stock FROM products WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DbError::not_found("Product", id))?;

        let now = Utc::now();
        sqlx::query(
            "UPDATE products SET stock = stock + ?2, sync_status = 'pending', updated_at = ?3 \
             WHERE id = ?1",
        )
        .bind(id)
        .bind(quantity)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        debug!(id = %id, quantity = %quantity, previous = %previous, "Incremented product stock");

        Ok((previous, previous + quantity))
    }

    /// Conditionally decrements a variant's stock counter.
    pub async fn try_decrement_variant_stock_tx(
        conn: &mut SqliteConnection,
        id: &str,
        quantity: i64,
    ) -> DbResult<StockDecrement> {
        let available: i64 = sqlx::query_scalar("SELECT stock FROM product_variants WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DbError::not_found("Variant", id))?;

        if available < quantity {
            return Ok(StockDecrement::Insufficient { available });
        }

        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE product_variants SET stock = stock - ?2, updated_at = ?3 \
             WHERE id = ?1 AND stock >= ?2",
        )
        .bind(id)
        .bind(quantity)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(StockDecrement::Insufficient { available });
        }

        debug!(id = %id, quantity = %quantity, previous = %available, "Decremented variant stock");

        Ok(StockDecrement::Applied {
            previous: available,
            new: available - quantity,
        })
    }

    /// Increments a variant's stock counter. Returns `(previous, new)`.
    pub async fn increment_variant_stock_tx(
        conn: &mut SqliteConnection,
        id: &str,
        quantity: i64,
    ) -> DbResult<(i64, i64)> {
        let previous: i64 = sqlx::query_scalar("SELECT stock FROM product_variants WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DbError::not_found("Variant", id))?;

        let now = Utc::now();
        sqlx::query("UPDATE product_variants SET stock = stock + ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(quantity)
            .bind(now)
            .execute(&mut *conn)
            .await?;

        Ok((previous, previous + quantity))
    }

    /// Upserts a product from a remote snapshot, replacing every field
    /// (server-wins, no field merge). Used by the pull path.
    pub async fn upsert_remote_tx(conn: &mut SqliteConnection, product: &Product) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO products ( \
                id, sku, name, description, sale_price_cents, purchase_price_cents, \
                stock, min_stock_alert, is_active, sync_status, created_at, updated_at \
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'synced', ?10, ?11) \
            ON CONFLICT(id) DO UPDATE SET \
                sku = excluded.sku, \
                name = excluded.name, \
                description = excluded.description, \
                sale_price_cents = excluded.sale_price_cents, \
                purchase_price_cents = excluded.purchase_price_cents, \
                stock = excluded.stock, \
                min_stock_alert = excluded.min_stock_alert, \
                is_active = excluded.is_active, \
                sync_status = 'synced', \
                updated_at = excluded.updated_at",
        )
        .bind(&product.id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.sale_price_cents)
        .bind(product.purchase_price_cents)
        .bind(product.stock)
        .bind(product.min_stock_alert)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

/// Helper to generate a new product ID.
pub fn generate_product_id() -> String {
    Uuid::new_v4().to_string()
}
