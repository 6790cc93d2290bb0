//! # Inventory Operations
//!
//! Manual stock movements outside the sale flow: goods received from a
//! supplier (IN), shrinkage/damage (OUT), and corrections after a physical
//! count (ADJUSTMENT).
//!
//! Each operation is one transaction: guarded counter change, one ledger
//! row, and the sync entries for the changed product and the movement
//! itself. Decrements hard-reject when the counter cannot cover them.

use chrono::Utc;
use tracing::info;

use crate::error::{DbError, EngineResult};
use crate::events::{EventBus, PosEvent};
use crate::pool::Database;
use crate::repository::outbox::OutboxRepository;
use crate::repository::product::{ProductRepository, StockDecrement};
use crate::repository::stock::{generate_movement_id, StockLedgerRepository};
use meridian_core::validation::{validate_id, validate_quantity};
use meridian_core::{
    CoreError, EntityType, MovementType, Principal, StockMovement, SyncOperation, ValidationError,
};

/// Manual stock operations.
#[derive(Debug, Clone)]
pub struct InventoryService {
    db: Database,
    events: EventBus,
}

impl InventoryService {
    pub fn new(db: Database, events: EventBus) -> Self {
        InventoryService { db, events }
    }

    /// Records stock received from a supplier.
    pub async fn receive_stock(
        &self,
        principal: &Principal,
        product_id: &str,
        variant_id: Option<&str>,
        quantity: i64,
        reason: Option<&str>,
    ) -> EngineResult<StockMovement> {
        validate_quantity(quantity)?;
        self.apply(
            principal,
            product_id,
            variant_id,
            MovementType::In,
            quantity,
            reason,
        )
        .await
    }

    /// Records a manual removal (damage, loss).
    pub async fn remove_stock(
        &self,
        principal: &Principal,
        product_id: &str,
        variant_id: Option<&str>,
        quantity: i64,
        reason: Option<&str>,
    ) -> EngineResult<StockMovement> {
        validate_quantity(quantity)?;
        self.apply(
            principal,
            product_id,
            variant_id,
            MovementType::Out,
            -quantity,
            reason,
        )
        .await
    }

    /// Records a signed correction after a physical count.
    pub async fn adjust_stock(
        &self,
        principal: &Principal,
        product_id: &str,
        variant_id: Option<&str>,
        delta: i64,
        reason: Option<&str>,
    ) -> EngineResult<StockMovement> {
        if delta == 0 {
            return Err(ValidationError::MustBePositive {
                field: "delta".to_string(),
            }
            .into());
        }
        self.apply(
            principal,
            product_id,
            variant_id,
            MovementType::Adjustment,
            delta,
            reason,
        )
        .await
    }

    async fn apply(
        &self,
        principal: &Principal,
        product_id: &str,
        variant_id: Option<&str>,
        movement_type: MovementType,
        delta: i64,
        reason: Option<&str>,
    ) -> EngineResult<StockMovement> {
        validate_id("product_id", product_id)?;
        validate_id("user_id", &principal.user_id)?;

        let mut tx = self.db.pool().begin().await.map_err(DbError::from)?;

        let product = ProductRepository::fetch_tx(&mut tx, product_id)
            .await?
            .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()))?;

        if let Some(vid) = variant_id {
            ProductRepository::fetch_variant_tx(&mut tx, vid)
                .await?
                .filter(|v| v.product_id == product.id)
                .ok_or_else(|| CoreError::VariantNotFound(vid.to_string()))?;
        }

        let (previous_stock, new_stock) = if delta >= 0 {
            match variant_id {
                Some(vid) => {
                    ProductRepository::increment_variant_stock_tx(&mut tx, vid, delta).await?
                }
                None => ProductRepository::increment_stock_tx(&mut tx, product_id, delta).await?,
            }
        } else {
            let quantity = -delta;
            let decrement = match variant_id {
                Some(vid) => {
                    ProductRepository::try_decrement_variant_stock_tx(&mut tx, vid, quantity)
                        .await?
                }
                None => {
                    ProductRepository::try_decrement_stock_tx(&mut tx, product_id, quantity).await?
                }
            };
            match decrement {
                StockDecrement::Applied { previous, new } => (previous, new),
                StockDecrement::Insufficient { available } => {
                    return Err(CoreError::InsufficientStock {
                        product_id: product_id.to_string(),
                        requested: quantity,
                        available,
                    }
                    .into());
                }
            }
        };

        let movement = StockMovement {
            id: generate_movement_id(),
            product_id: product_id.to_string(),
            variant_id: variant_id.map(str::to_string),
            movement_type,
            quantity: delta,
            previous_stock,
            new_stock,
            reference_id: None,
            reason: reason.map(str::to_string),
            user_id: principal.user_id.clone(),
            created_at: Utc::now(),
        };
        StockLedgerRepository::append_tx(&mut tx, &movement).await?;

        // The movement has no parent entity to ride on, so it syncs itself,
        // after the product state it belongs to.
        let updated = ProductRepository::fetch_tx(&mut tx, product_id)
            .await?
            .ok_or_else(|| DbError::not_found("Product", product_id))?;
        let product_payload = serde_json::to_string(&updated).map_err(DbError::from)?;
        OutboxRepository::enqueue_tx(
            &mut tx,
            EntityType::Product,
            product_id,
            SyncOperation::Update,
            &product_payload,
        )
        .await?;

        let movement_payload = serde_json::to_string(&movement).map_err(DbError::from)?;
        OutboxRepository::enqueue_tx(
            &mut tx,
            EntityType::StockMovement,
            &movement.id,
            SyncOperation::Insert,
            &movement_payload,
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;

        info!(
            product_id = %product_id,
            movement_type = ?movement_type,
            delta = %delta,
            new_stock = %new_stock,
            "Stock movement recorded"
        );

        self.events.emit(PosEvent::StockAdjusted {
            product_id: product_id.to_string(),
            variant_id: variant_id.map(str::to_string),
            new_stock,
        });

        Ok(movement)
    }
}

// =============================================================================
// Tests
// =============================================================================
