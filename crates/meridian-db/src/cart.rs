//! # Cart Aggregator
//!
//! Builds and mutates the per-owner, pre-commit collection of purchase
//! lines.
//!
//! ## Price Snapshot
//! The unit price is captured as
//! `product.sale_price + variant.additional_price` at add time and kept on
//! the row. Later catalog price edits do not touch it; whether checkout
//! honors the snapshot or re-reads the live price is the checkout
//! processor's configured policy.
//!
//! ## Availability Checks
//! Cart-time checks are a courtesy to the cashier; they are re-run against
//! the live row inside the commit transaction, which is the only check that
//! counts.

use chrono::Utc;
use tracing::debug;

use crate::error::{DbError, EngineResult};
use crate::pool::Database;
use crate::repository::cart::{generate_cart_item_id, CartLine, CartRepository};
use crate::repository::product::ProductRepository;
use meridian_core::validation::{validate_id, validate_quantity};
use meridian_core::{CartItem, CoreError, MAX_CART_ITEMS, MAX_ITEM_QUANTITY};

/// Cart mutation operations.
#[derive(Debug, Clone)]
pub struct CartAggregator {
    db: Database,
}

impl CartAggregator {
    pub fn new(db: Database) -> Self {
        CartAggregator { db }
    }

    /// Adds a product (or variant) to an owner's cart.
    ///
    /// If a line for `(owner, product, variant)` already exists, the
    /// quantities merge into it and the original price snapshot is kept;
    /// otherwise a new line is inserted with a fresh snapshot.
    pub async fn add_item(
        &self,
        owner_id: &str,
        product_id: &str,
        variant_id: Option<&str>,
        quantity: i64,
    ) -> EngineResult<CartItem> {
        validate_id("owner_id", owner_id)?;
        validate_id("product_id", product_id)?;
        validate_quantity(quantity)?;

        let mut tx = self.db.pool().begin().await.map_err(DbError::from)?;

        let product = ProductRepository::fetch_tx(&mut tx, product_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()))?;

        let variant = match variant_id {
            Some(vid) => Some(
                ProductRepository::fetch_variant_tx(&mut tx, vid)
                    .await?
                    .filter(|v| v.is_active && v.product_id == product.id)
                    .ok_or_else(|| CoreError::VariantNotFound(vid.to_string()))?,
            ),
            None => None,
        };

        // Availability is the variant's counter when a variant is sold,
        // the product's otherwise.
        let available = variant.as_ref().map(|v| v.stock).unwrap_or(product.stock);

        let existing =
            CartRepository::find_line_tx(&mut tx, owner_id, product_id, variant_id).await?;

        let merged_quantity = existing.as_ref().map(|e| e.quantity).unwrap_or(0) + quantity;

        if merged_quantity > MAX_ITEM_QUANTITY {
            return Err(CoreError::QuantityTooLarge {
                requested: merged_quantity,
                max: MAX_ITEM_QUANTITY,
            }
            .into());
        }

        if merged_quantity > available {
            return Err(CoreError::InsufficientStock {
                product_id: product_id.to_string(),
                requested: merged_quantity,
                available,
            }
            .into());
        }

        let item = match existing {
            Some(line) => {
                // Merge: quantity and subtotal move, the snapshot price from
                // the first add stays.
                let subtotal = line.unit_price_cents * merged_quantity;
                CartRepository::set_quantity_tx(&mut tx, &line.id, merged_quantity, subtotal)
                    .await?;

                debug!(item_id = %line.id, quantity = %merged_quantity, "Merged cart line");

                CartItem {
                    quantity: merged_quantity,
                    subtotal_cents: subtotal,
                    updated_at: Utc::now(),
                    ..line
                }
            }
            None => {
                let line_count = CartRepository::count_lines_tx(&mut tx, owner_id).await?;
                if line_count as usize >= MAX_CART_ITEMS {
                    return Err(CoreError::CartTooLarge {
                        max: MAX_CART_ITEMS,
                    }
                    .into());
                }

                let unit_price_cents = product.sale_price_cents
                    + variant
                        .as_ref()
                        .map(|v| v.additional_price_cents)
                        .unwrap_or(0);

                let now = Utc::now();
                let item = CartItem {
                    id: generate_cart_item_id(),
                    owner_id: owner_id.to_string(),
                    product_id: product_id.to_string(),
                    variant_id: variant_id.map(str::to_string),
                    quantity,
                    unit_price_cents,
                    subtotal_cents: unit_price_cents * quantity,
                    created_at: now,
                    updated_at: now,
                };

                CartRepository::insert_tx(&mut tx, &item).await?;

                debug!(item_id = %item.id, quantity = %quantity, "Inserted cart line");

                item
            }
        };

        tx.commit().await.map_err(DbError::from)?;

        Ok(item)
    }

    /// Sets a line's quantity.
    ///
    /// A quantity of zero or less deletes the line. Otherwise the quantity
    /// is re-validated against current stock and the stored subtotal is
    /// recomputed from the snapshot price.
    pub async fn update_quantity(
        &self,
        item_id: &str,
        quantity: i64,
    ) -> EngineResult<Option<CartItem>> {
        validate_id("item_id", item_id)?;

        let mut tx = self.db.pool().begin().await.map_err(DbError::from)?;

        if quantity <= 0 {
            CartRepository::delete_tx(&mut tx, item_id).await?;
            tx.commit().await.map_err(DbError::from)?;

            debug!(item_id = %item_id, "Deleted cart line (quantity <= 0)");
            return Ok(None);
        }

        validate_quantity(quantity)?;

        let item = CartRepository::fetch_tx(&mut tx, item_id)
            .await?
            .ok_or_else(|| CoreError::CartItemNotFound(item_id.to_string()))?;

        let available = match &item.variant_id {
            Some(vid) => {
                ProductRepository::fetch_variant_tx(&mut tx, vid)
                    .await?
                    .ok_or_else(|| CoreError::VariantNotFound(vid.clone()))?
                    .stock
            }
            None => {
                ProductRepository::fetch_tx(&mut tx, &item.product_id)
                    .await?
                    .ok_or_else(|| CoreError::ProductNotFound(item.product_id.clone()))?
                    .stock
            }
        };

        if quantity > available {
            return Err(CoreError::InsufficientStock {
                product_id: item.product_id.clone(),
                requested: quantity,
                available,
            }
            .into());
        }

        let subtotal = item.unit_price_cents * quantity;
        CartRepository::set_quantity_tx(&mut tx, item_id, quantity, subtotal).await?;

        tx.commit().await.map_err(DbError::from)?;

        Ok(Some(CartItem {
            quantity,
            subtotal_cents: subtotal,
            updated_at: Utc::now(),
            ..item
        }))
    }

    /// Removes a single line unconditionally.
    pub async fn remove_item(&self, item_id: &str) -> EngineResult<()> {
        let mut conn = self.db.pool().acquire().await.map_err(DbError::from)?;
        CartRepository::delete_tx(&mut conn, item_id).await?;
        Ok(())
    }

    /// Clears an owner's cart unconditionally. Returns removed line count.
    pub async fn clear(&self, owner_id: &str) -> EngineResult<u64> {
        let mut conn = self.db.pool().acquire().await.map_err(DbError::from)?;
        let removed = CartRepository::clear_tx(&mut conn, owner_id).await?;
        debug!(owner_id = %owner_id, removed = %removed, "Cleared cart");
        Ok(removed)
    }

    /// Owner's cart joined with live catalog data for display.
    pub async fn view(&self, owner_id: &str) -> EngineResult<Vec<CartLine>> {
        Ok(self.db.carts().view_for_owner(owner_id).await?)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogManager, NewProduct, NewVariant};
    use crate::events::EventBus;
    use crate::pool::DbConfig;
    use meridian_core::Product;

    async fn setup() -> (Database, CartAggregator, CatalogManager) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let cart = CartAggregator::new(db.clone());
        let catalog = CatalogManager::new(db.clone(), EventBus::new(8));
        (db, cart, catalog)
    }

    async fn seed_product(
        catalog: &CatalogManager,
        sku: &str,
        price_cents: i64,
        stock: i64,
    ) -> Product {
        catalog
            .create_product(NewProduct {
                sku: sku.to_string(),
                name: format!("Product {}", sku),
                description: None,
                sale_price_cents: price_cents,
                purchase_price_cents: price_cents / 2,
                initial_stock: stock,
                min_stock_alert: 0,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_add_item_snapshots_price() {
        let (_db, cart, catalog) = setup().await;
        let product = seed_product(&catalog, "A", 1000, 5).await;

        let item = cart.add_item("till-1", &product.id, None, 2).await.unwrap();

        assert_eq!(item.unit_price_cents, 1000);
        assert_eq!(item.subtotal_cents, 2000);
    }

    #[tokio::test]
    async fn test_add_same_line_merges_and_keeps_snapshot() {
        let (_db, cart, catalog) = setup().await;
        let mut product = seed_product(&catalog, "A", 1000, 10).await;

        cart.add_item("till-1", &product.id, None, 2).await.unwrap();

        // Catalog price changes after the first add.
        product.sale_price_cents = 1500;
        catalog.update_product(&product).await.unwrap();

        let merged = cart.add_item("till-1", &product.id, None, 3).await.unwrap();

        assert_eq!(merged.quantity, 5);
        // Snapshot from the first add, not the new catalog price.
        assert_eq!(merged.unit_price_cents, 1000);
        assert_eq!(merged.subtotal_cents, 5000);
    }

    #[tokio::test]
    async fn test_add_rejects_insufficient_stock() {
        let (db, cart, catalog) = setup().await;
        let product = seed_product(&catalog, "A", 1000, 2).await;

        let err = cart.add_item("till-1", &product.id, None, 3).await;

        match err {
            Err(crate::error::EngineError::Domain(CoreError::InsufficientStock {
                requested,
                available,
                ..
            })) => {
                assert_eq!(requested, 3);
                assert_eq!(available, 2);
            }
            other => panic!("expected InsufficientStock, got {:?}", other),
        }

        assert!(db.carts().list_for_owner("till-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_variant_line_uses_variant_stock_and_price() {
        let (_db, cart, catalog) = setup().await;
        let product = seed_product(&catalog, "C", 500, 0).await;
        let variant = catalog
            .create_variant(NewVariant {
                product_id: product.id.clone(),
                name: "Large".to_string(),
                additional_price_cents: 200,
                initial_stock: 3,
            })
            .await
            .unwrap();

        // Product stock is zero but the variant has its own counter.
        let item = cart
            .add_item("till-1", &product.id, Some(&variant.id), 1)
            .await
            .unwrap();

        assert_eq!(item.unit_price_cents, 700);
        assert_eq!(item.variant_id.as_deref(), Some(variant.id.as_str()));
    }

    #[tokio::test]
    async fn test_update_quantity_zero_deletes_line() {
        let (db, cart, catalog) = setup().await;
        let product = seed_product(&catalog, "A", 1000, 5).await;

        let item = cart.add_item("till-1", &product.id, None, 2).await.unwrap();
        let result = cart.update_quantity(&item.id, 0).await.unwrap();

        assert!(result.is_none());
        assert!(db.carts().get_item(&item.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_quantity_revalidates_stock() {
        let (_db, cart, catalog) = setup().await;
        let product = seed_product(&catalog, "A", 1000, 2).await;

        let item = cart.add_item("till-1", &product.id, None, 1).await.unwrap();
        let err = cart.update_quantity(&item.id, 5).await;

        assert!(matches!(
            err,
            Err(crate::error::EngineError::Domain(
                CoreError::InsufficientStock { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn test_clear_removes_all_lines() {
        let (db, cart, catalog) = setup().await;
        let a = seed_product(&catalog, "A", 1000, 5).await;
        let b = seed_product(&catalog, "B", 500, 5).await;

        cart.add_item("till-1", &a.id, None, 1).await.unwrap();
        cart.add_item("till-1", &b.id, None, 1).await.unwrap();

        let removed = cart.clear("till-1").await.unwrap();
        assert_eq!(removed, 2);
        assert!(db.carts().list_for_owner("till-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_view_exposes_live_price_next_to_snapshot() {
        let (_db, cart, catalog) = setup().await;
        let mut product = seed_product(&catalog, "A", 1000, 5).await;

        cart.add_item("till-1", &product.id, None, 1).await.unwrap();

        product.sale_price_cents = 1200;
        catalog.update_product(&product).await.unwrap();

        let view = cart.view("till-1").await.unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].unit_price_cents, 1000);
        assert_eq!(view[0].live_unit_price_cents, 1200);
    }
}
