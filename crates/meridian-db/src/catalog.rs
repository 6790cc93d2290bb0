//! # Product Catalog Operations
//!
//! Lifecycle operations for products and variants. Every mutation enqueues
//! its outbox entry inside the same transaction, so catalog changes are
//! never lost to a crash or offline period.
//!
//! Stock counters are NOT edited here: after creation, a counter only moves
//! through the sale engine or the inventory service, each of which journals
//! a ledger row. The stock set at creation time is the baseline the ledger
//! replays on top of.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::{DbError, EngineResult};
use crate::events::{EventBus, PosEvent};
use crate::pool::Database;
use crate::repository::outbox::OutboxRepository;
use crate::repository::product::ProductRepository;
use meridian_core::validation::{validate_price_cents, validate_product_name, validate_sku};
use meridian_core::{
    CoreError, EntityType, Product, ProductVariant, SyncOperation, SyncStatus, ValidationError,
};

/// Input for creating a product.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub sale_price_cents: i64,
    pub purchase_price_cents: i64,
    pub initial_stock: i64,
    pub min_stock_alert: i64,
}

/// Input for creating a product variant.
#[derive(Debug, Clone)]
pub struct NewVariant {
    pub product_id: String,
    pub name: String,
    pub additional_price_cents: i64,
    pub initial_stock: i64,
}

/// Catalog lifecycle operations.
#[derive(Debug, Clone)]
pub struct CatalogManager {
    db: Database,
    events: EventBus,
}

impl CatalogManager {
    pub fn new(db: Database, events: EventBus) -> Self {
        CatalogManager { db, events }
    }

    /// Creates a product and queues it for sync.
    pub async fn create_product(&self, input: NewProduct) -> EngineResult<Product> {
        validate_sku(&input.sku)?;
        validate_product_name(&input.name)?;
        validate_price_cents("sale_price", input.sale_price_cents)?;
        validate_price_cents("purchase_price", input.purchase_price_cents)?;
        if input.initial_stock < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "initial_stock".to_string(),
            }
            .into());
        }

        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            sku: input.sku.trim().to_string(),
            name: input.name.trim().to_string(),
            description: input.description,
            sale_price_cents: input.sale_price_cents,
            purchase_price_cents: input.purchase_price_cents,
            stock: input.initial_stock,
            min_stock_alert: input.min_stock_alert.max(0),
            is_active: true,
            sync_status: SyncStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.db.pool().begin().await.map_err(DbError::from)?;

        ProductRepository::insert_tx(&mut tx, &product).await?;

        let payload = serde_json::to_string(&product).map_err(DbError::from)?;
        OutboxRepository::enqueue_tx(
            &mut tx,
            EntityType::Product,
            &product.id,
            SyncOperation::Insert,
            &payload,
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;

        info!(id = %product.id, sku = %product.sku, "Product created");

        self.events.emit(PosEvent::ProductAdded {
            product_id: product.id.clone(),
            sku: product.sku.clone(),
        });

        Ok(product)
    }

    /// Creates a variant of an existing product.
    pub async fn create_variant(&self, input: NewVariant) -> EngineResult<ProductVariant> {
        validate_product_name(&input.name)?;
        if input.initial_stock < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "initial_stock".to_string(),
            }
            .into());
        }

        let now = Utc::now();
        let variant = ProductVariant {
            id: Uuid::new_v4().to_string(),
            product_id: input.product_id.clone(),
            name: input.name.trim().to_string(),
            additional_price_cents: input.additional_price_cents,
            stock: input.initial_stock,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.db.pool().begin().await.map_err(DbError::from)?;

        let product = ProductRepository::fetch_tx(&mut tx, &input.product_id)
            .await?
            .ok_or_else(|| CoreError::ProductNotFound(input.product_id.clone()))?;

        ProductRepository::insert_variant_tx(&mut tx, &variant).await?;

        // Variants travel inside the parent product's sync payload.
        let payload = serde_json::to_string(&product).map_err(DbError::from)?;
        OutboxRepository::enqueue_tx(
            &mut tx,
            EntityType::Product,
            &product.id,
            SyncOperation::Update,
            &payload,
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;

        info!(id = %variant.id, product_id = %variant.product_id, "Variant created");

        Ok(variant)
    }

    /// Updates a product's editable fields (not its stock counter) and
    /// queues the new state for sync.
    pub async fn update_product(&self, product: &Product) -> EngineResult<()> {
        validate_sku(&product.sku)?;
        validate_product_name(&product.name)?;
        validate_price_cents("sale_price", product.sale_price_cents)?;
        validate_price_cents("purchase_price", product.purchase_price_cents)?;

        let mut tx = self.db.pool().begin().await.map_err(DbError::from)?;

        ProductRepository::update_tx(&mut tx, product).await?;

        let updated = ProductRepository::fetch_tx(&mut tx, &product.id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", &product.id))?;
        let payload = serde_json::to_string(&updated).map_err(DbError::from)?;
        OutboxRepository::enqueue_tx(
            &mut tx,
            EntityType::Product,
            &product.id,
            SyncOperation::Update,
            &payload,
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;

        info!(id = %product.id, "Product updated");

        Ok(())
    }

    /// Soft-deletes a product and queues a deletion for the remote.
    pub async fn deactivate_product(&self, id: &str) -> EngineResult<()> {
        let mut tx = self.db.pool().begin().await.map_err(DbError::from)?;

        ProductRepository::soft_delete_tx(&mut tx, id).await?;

        let deleted = ProductRepository::fetch_tx(&mut tx, id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", id))?;
        let payload = serde_json::to_string(&deleted).map_err(DbError::from)?;
        OutboxRepository::enqueue_tx(
            &mut tx,
            EntityType::Product,
            id,
            SyncOperation::Delete,
            &payload,
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;

        info!(id = %id, "Product deactivated");

        Ok(())
    }

    /// Lists active products with stock at or below their alert threshold.
    pub async fn list_low_stock(&self) -> EngineResult<Vec<Product>> {
        Ok(self.db.products().list_low_stock().await?)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DbConfig;
    use meridian_core::SyncEntryStatus;

    async fn setup() -> (Database, CatalogManager) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let catalog = CatalogManager::new(db.clone(), EventBus::new(8));
        (db, catalog)
    }

    fn new_product(sku: &str) -> NewProduct {
        NewProduct {
            sku: sku.to_string(),
            name: format!("Product {}", sku),
            description: None,
            sale_price_cents: 1000,
            purchase_price_cents: 600,
            initial_stock: 5,
            min_stock_alert: 2,
        }
    }

    #[tokio::test]
    async fn test_create_product_enqueues_outbox_entry() {
        let (db, catalog) = setup().await;

        let product = catalog.create_product(new_product("SKU-1")).await.unwrap();

        let entries = db.sync_outbox().list_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entity_type, EntityType::Product);
        assert_eq!(entries[0].entity_id, product.id);
        assert_eq!(entries[0].operation, SyncOperation::Insert);
        assert_eq!(entries[0].status, SyncEntryStatus::Pending);
    }

    #[tokio::test]
    async fn test_duplicate_sku_is_rejected() {
        let (_db, catalog) = setup().await;

        catalog.create_product(new_product("SKU-1")).await.unwrap();
        let err = catalog.create_product(new_product("SKU-1")).await;

        assert!(matches!(
            err,
            Err(crate::error::EngineError::Db(
                DbError::UniqueViolation { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn test_invalid_sku_rejected_before_any_write() {
        let (db, catalog) = setup().await;

        let mut input = new_product("bad sku!");
        input.sku = "bad sku!".to_string();
        assert!(catalog.create_product(input).await.is_err());

        assert_eq!(db.products().count().await.unwrap(), 0);
        assert_eq!(db.sync_outbox().pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_deactivate_queues_delete() {
        let (db, catalog) = setup().await;

        let product = catalog.create_product(new_product("SKU-1")).await.unwrap();
        catalog.deactivate_product(&product.id).await.unwrap();

        let entries = db.sync_outbox().list_all().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].operation, SyncOperation::Delete);

        let stored = db.products().get_by_id(&product.id).await.unwrap().unwrap();
        assert!(!stored.is_active);
    }

    #[tokio::test]
    async fn test_low_stock_listing() {
        let (_db, catalog) = setup().await;

        let mut low = new_product("LOW-1");
        low.initial_stock = 1;
        low.min_stock_alert = 2;
        catalog.create_product(low).await.unwrap();

        let mut ok = new_product("OK-1");
        ok.initial_stock = 50;
        ok.min_stock_alert = 2;
        catalog.create_product(ok).await.unwrap();

        let alerts = catalog.list_low_stock().await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].sku, "LOW-1");
    }
}
