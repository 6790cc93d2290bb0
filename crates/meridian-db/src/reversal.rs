//! # Sale Reversal Processor
//!
//! Cancels a completed sale, reversing its stock effects and journaling the
//! restoration in the ledger, under the same all-or-nothing guarantee as
//! checkout.
//!
//! Only COMPLETED sales can be cancelled; any other status is rejected with
//! no side effects. The status update itself is guarded on the current
//! status, so a concurrent double-cancel cannot restore stock twice.
//!
//! Customer aggregate statistics are NOT reversed here. That mirrors the
//! system's observed behavior; see DESIGN.md before "fixing" it.

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::error::{DbError, EngineResult};
use crate::events::{EventBus, PosEvent};
use crate::pool::Database;
use crate::repository::outbox::OutboxRepository;
use crate::repository::product::ProductRepository;
use crate::repository::sale::SaleRepository;
use crate::repository::stock::{generate_movement_id, StockLedgerRepository};
use meridian_core::validation::validate_id;
use meridian_core::{
    CoreError, EntityType, MovementType, Principal, Sale, SaleItem, StockMovement, SyncOperation,
};

#[derive(Serialize)]
struct SaleEnvelope<'a> {
    sale: &'a Sale,
    items: &'a [SaleItem],
}

/// Reverses committed sales.
#[derive(Debug, Clone)]
pub struct ReversalProcessor {
    db: Database,
    events: EventBus,
}

impl ReversalProcessor {
    pub fn new(db: Database, events: EventBus) -> Self {
        ReversalProcessor { db, events }
    }

    /// Cancels a COMPLETED sale.
    ///
    /// For each frozen line the corresponding counter is restored and a
    /// CANCELLATION movement appended; the sale transitions to CANCELLED
    /// with cancellation metadata; sync updates are enqueued. One
    /// transaction end to end.
    ///
    /// ## Errors
    /// - `SaleNotFound` - no such sale
    /// - `InvalidSaleStatus` - sale is not COMPLETED (no side effects)
    pub async fn cancel_sale(
        &self,
        principal: &Principal,
        sale_id: &str,
        reason: &str,
    ) -> EngineResult<Sale> {
        validate_id("sale_id", sale_id)?;
        validate_id("reason", reason)?;

        let result = self.cancel_inner(principal, sale_id, reason).await;

        if let Ok(sale) = &result {
            info!(
                sale_id = %sale.id,
                sale_number = %sale.sale_number,
                "Sale cancelled"
            );
            self.events.emit(PosEvent::SaleCancelled {
                sale_id: sale.id.clone(),
                sale_number: sale.sale_number,
            });
        }

        result
    }

    async fn cancel_inner(
        &self,
        principal: &Principal,
        sale_id: &str,
        reason: &str,
    ) -> EngineResult<Sale> {
        let mut tx = self.db.pool().begin().await.map_err(DbError::from)?;

        let sale = SaleRepository::fetch_tx(&mut tx, sale_id)
            .await?
            .ok_or_else(|| CoreError::SaleNotFound(sale_id.to_string()))?;

        if !sale.status.can_cancel() {
            return Err(CoreError::InvalidSaleStatus {
                sale_id: sale_id.to_string(),
                current_status: sale.status.to_string(),
            }
            .into());
        }

        let items = SaleRepository::items_tx(&mut tx, sale_id).await?;
        let now = Utc::now();

        let mut touched_products: Vec<String> = Vec::new();

        for item in &items {
            // Restore the counter the sale decremented: the variant's when
            // the line sold a variant, the product's otherwise.
            let (previous_stock, new_stock) = match &item.variant_id {
                Some(vid) => {
                    ProductRepository::increment_variant_stock_tx(&mut tx, vid, item.quantity)
                        .await?
                }
                None => {
                    ProductRepository::increment_stock_tx(&mut tx, &item.product_id, item.quantity)
                        .await?
                }
            };

            let movement = StockMovement {
                id: generate_movement_id(),
                product_id: item.product_id.clone(),
                variant_id: item.variant_id.clone(),
                movement_type: MovementType::Cancellation,
                quantity: item.quantity,
                previous_stock,
                new_stock,
                reference_id: Some(sale.id.clone()),
                reason: Some(reason.to_string()),
                user_id: principal.user_id.clone(),
                created_at: now,
            };
            StockLedgerRepository::append_tx(&mut tx, &movement).await?;

            if !touched_products.contains(&item.product_id) {
                touched_products.push(item.product_id.clone());
            }
        }

        // Guarded on status = completed: the concurrent loser of a
        // double-cancel fails here and rolls its restorations back.
        SaleRepository::mark_cancelled_tx(&mut tx, sale_id, now, &principal.user_id, reason)
            .await?;

        let cancelled = SaleRepository::fetch_tx(&mut tx, sale_id)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", sale_id))?;

        for product_id in &touched_products {
            let product = ProductRepository::fetch_tx(&mut tx, product_id)
                .await?
                .ok_or_else(|| DbError::not_found("Product", product_id))?;
            let payload = serde_json::to_string(&product).map_err(DbError::from)?;
            OutboxRepository::enqueue_tx(
                &mut tx,
                EntityType::Product,
                product_id,
                SyncOperation::Update,
                &payload,
            )
            .await?;
        }

        let envelope = SaleEnvelope {
            sale: &cancelled,
            items: &items,
        };
        let payload = serde_json::to_string(&envelope).map_err(DbError::from)?;
        OutboxRepository::enqueue_tx(
            &mut tx,
            EntityType::Sale,
            sale_id,
            SyncOperation::Update,
            &payload,
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;

        Ok(cancelled)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::CartAggregator;
    use crate::catalog::{CatalogManager, NewProduct, NewVariant};
    use crate::checkout::{CheckoutProcessor, CommitSaleRequest};
    use crate::error::EngineError;
    use crate::pool::DbConfig;
    use meridian_core::{PaymentMethod, Product, SaleStatus};

    struct Harness {
        db: Database,
        cart: CartAggregator,
        catalog: CatalogManager,
        checkout: CheckoutProcessor,
        reversal: ReversalProcessor,
    }

    async fn setup() -> Harness {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let events = EventBus::new(16);
        Harness {
            cart: CartAggregator::new(db.clone()),
            catalog: CatalogManager::new(db.clone(), events.clone()),
            checkout: CheckoutProcessor::new(db.clone(), events.clone()),
            reversal: ReversalProcessor::new(db.clone(), events),
            db,
        }
    }

    fn principal() -> Principal {
        Principal::new("cashier-1", "till-1")
    }

    async fn seed_product(h: &Harness, sku: &str, price: i64, stock: i64) -> Product {
        h.catalog
            .create_product(NewProduct {
                sku: sku.to_string(),
                name: format!("Product {}", sku),
                description: None,
                sale_price_cents: price,
                purchase_price_cents: price / 2,
                initial_stock: stock,
                min_stock_alert: 0,
            })
            .await
            .unwrap()
    }

    async fn commit(h: &Harness, owner: &str, amount_paid: i64) -> Sale {
        h.checkout
            .commit_sale(
                &principal(),
                CommitSaleRequest {
                    owner_id: owner.to_string(),
                    payment_method: PaymentMethod::Cash,
                    amount_paid_cents: amount_paid,
                    discount_cents: 0,
                    notes: None,
                    customer_id: None,
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_cancel_restores_stock_exactly() {
        let h = setup().await;
        let a = seed_product(&h, "A", 1000, 5).await;
        let c = seed_product(&h, "C", 500, 10).await;
        let b = h
            .catalog
            .create_variant(NewVariant {
                product_id: c.id.clone(),
                name: "B".to_string(),
                additional_price_cents: 200,
                initial_stock: 3,
            })
            .await
            .unwrap();

        h.cart.add_item("till-1", &a.id, None, 2).await.unwrap();
        h.cart
            .add_item("till-1", &c.id, Some(&b.id), 1)
            .await
            .unwrap();
        let sale = commit(&h, "till-1", 2700).await;

        let cancelled = h
            .reversal
            .cancel_sale(&principal(), &sale.id, "customer changed mind")
            .await
            .unwrap();

        assert_eq!(cancelled.status, SaleStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());
        assert_eq!(cancelled.cancelled_by.as_deref(), Some("cashier-1"));
        assert_eq!(
            cancelled.cancel_reason.as_deref(),
            Some("customer changed mind")
        );

        // Pre-commit stock restored exactly.
        let a_after = h.db.products().get_by_id(&a.id).await.unwrap().unwrap();
        assert_eq!(a_after.stock, 5);
        let b_after = h.db.products().get_variant(&b.id).await.unwrap().unwrap();
        assert_eq!(b_after.stock, 3);

        // One SALE and one CANCELLATION movement per line, netting zero.
        let movements = h
            .db
            .stock_ledger()
            .list_for_reference(&sale.id)
            .await
            .unwrap();
        assert_eq!(movements.len(), 4);
        let sales = movements
            .iter()
            .filter(|m| m.movement_type == MovementType::Sale)
            .count();
        let cancels = movements
            .iter()
            .filter(|m| m.movement_type == MovementType::Cancellation)
            .count();
        assert_eq!(sales, 2);
        assert_eq!(cancels, 2);
        let net: i64 = movements.iter().map(|m| m.quantity).sum();
        assert_eq!(net, 0);
    }

    #[tokio::test]
    async fn test_double_cancel_is_rejected_without_duplicate_restoration() {
        let h = setup().await;
        let a = seed_product(&h, "A", 1000, 5).await;
        h.cart.add_item("till-1", &a.id, None, 2).await.unwrap();
        let sale = commit(&h, "till-1", 2000).await;

        h.reversal
            .cancel_sale(&principal(), &sale.id, "first")
            .await
            .unwrap();

        let movements_before = h.db.stock_ledger().count().await.unwrap();

        let err = h
            .reversal
            .cancel_sale(&principal(), &sale.id, "second")
            .await;

        match err {
            Err(EngineError::Domain(CoreError::InvalidSaleStatus {
                current_status, ..
            })) => {
                assert_eq!(current_status, "cancelled");
            }
            other => panic!("expected InvalidSaleStatus, got {:?}", other),
        }

        // No duplicate restoration, stock still at the original level.
        let a_after = h.db.products().get_by_id(&a.id).await.unwrap().unwrap();
        assert_eq!(a_after.stock, 5);
        assert_eq!(h.db.stock_ledger().count().await.unwrap(), movements_before);
    }

    #[tokio::test]
    async fn test_cancel_unknown_sale() {
        let h = setup().await;

        let err = h
            .reversal
            .cancel_sale(&principal(), "no-such-sale", "why not")
            .await;

        assert!(matches!(
            err,
            Err(EngineError::Domain(CoreError::SaleNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_cancel_enqueues_sync_updates() {
        let h = setup().await;
        let a = seed_product(&h, "A", 1000, 5).await;
        h.cart.add_item("till-1", &a.id, None, 1).await.unwrap();
        let sale = commit(&h, "till-1", 1000).await;

        h.reversal
            .cancel_sale(&principal(), &sale.id, "damaged")
            .await
            .unwrap();

        let entries = h.db.sync_outbox().list_all().await.unwrap();
        let tail: Vec<_> = entries.iter().rev().take(2).collect();
        assert_eq!(tail[0].entity_type, EntityType::Sale);
        assert_eq!(tail[0].operation, SyncOperation::Update);
        assert_eq!(tail[1].entity_type, EntityType::Product);
        assert_eq!(tail[1].operation, SyncOperation::Update);
    }

    #[tokio::test]
    async fn test_commit_then_cancel_round_trips_the_ledger() {
        let h = setup().await;
        let a = seed_product(&h, "A", 1000, 7).await;

        h.cart.add_item("till-1", &a.id, None, 4).await.unwrap();
        let sale = commit(&h, "till-1", 4000).await;
        h.reversal
            .cancel_sale(&principal(), &sale.id, "round trip")
            .await
            .unwrap();

        let product = h.db.products().get_by_id(&a.id).await.unwrap().unwrap();
        let delta = h.db.stock_ledger().net_delta(&a.id, None).await.unwrap();

        assert_eq!(delta, 0);
        assert_eq!(product.stock, 7);
    }

    #[tokio::test]
    async fn test_customer_aggregates_are_not_reversed() {
        let h = setup().await;
        let a = seed_product(&h, "A", 1000, 5).await;
        let customer = h.db.customers().create("Dana", None).await.unwrap();

        h.cart.add_item("till-1", &a.id, None, 1).await.unwrap();
        let sale = h
            .checkout
            .commit_sale(
                &principal(),
                CommitSaleRequest {
                    owner_id: "till-1".to_string(),
                    payment_method: PaymentMethod::Cash,
                    amount_paid_cents: 1000,
                    discount_cents: 0,
                    notes: None,
                    customer_id: Some(customer.id.clone()),
                },
            )
            .await
            .unwrap();

        h.reversal
            .cancel_sale(&principal(), &sale.id, "kept as observed")
            .await
            .unwrap();

        let after = h
            .db
            .customers()
            .get_by_id(&customer.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.purchase_count, 1);
        assert_eq!(after.total_purchases_cents, 1000);
    }
}
