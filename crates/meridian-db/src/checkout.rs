//! # Checkout Processor
//!
//! Converts a cart into a committed sale, atomically.
//!
//! ## Commit Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     SINGLE TRANSACTION                          │
//! │                                                                 │
//! │  1. snapshot cart lines, compute subtotal/discount/total        │
//! │  2. allocate sale_number (atomic counter, storage layer)        │
//! │  3. insert sale (COMPLETED) + frozen sale_items                 │
//! │  4. per line: guarded stock decrement + SALE ledger row         │
//! │  5. customer aggregates (when customer_id present)              │
//! │  6. clear the owner's cart                                      │
//! │  7. outbox: PRODUCT updates, then the SALE that needs them      │
//! │                                                                 │
//! │  any failure → rollback, nothing of 2-7 is observable           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Availability is re-checked at commit time against the live row inside
//! the write transaction; cart-time checks are never trusted. Oversell is a
//! hard reject, the counter is never clamped.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{DbError, EngineError, EngineResult};
use crate::events::{EventBus, PosEvent};
use crate::pool::Database;
use crate::repository::cart::CartRepository;
use crate::repository::customer::CustomerRepository;
use crate::repository::outbox::OutboxRepository;
use crate::repository::product::{ProductRepository, StockDecrement};
use crate::repository::sale::{generate_sale_id, generate_sale_item_id, SaleRepository};
use crate::repository::stock::{generate_movement_id, StockLedgerRepository};
use meridian_core::validation::{validate_amount_paid, validate_id};
use meridian_core::{
    CartItem, CoreError, EntityType, MovementType, PaymentMethod, Principal, Product,
    ProductVariant, Sale, SaleItem, SaleStatus, StockMovement, SyncOperation, SyncStatus,
};

// =============================================================================
// Configuration
// =============================================================================

/// What a committed line pays when the catalog price changed after the item
/// was added to the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CartPricePolicy {
    /// Honor the snapshot taken at add time (default).
    #[default]
    FreezeAtAdd,
    /// Re-read the live catalog price inside the commit transaction.
    RefreshAtCheckout,
}

/// Checkout behavior configuration.
#[derive(Debug, Clone, Default)]
pub struct CheckoutConfig {
    pub price_policy: CartPricePolicy,
}

// =============================================================================
// Request / payload types
// =============================================================================

/// Input for committing an owner's cart.
#[derive(Debug, Clone)]
pub struct CommitSaleRequest {
    pub owner_id: String,
    pub payment_method: PaymentMethod,
    pub amount_paid_cents: i64,
    pub discount_cents: i64,
    pub notes: Option<String>,
    pub customer_id: Option<String>,
}

/// Outbox payload for a sale: the header plus its frozen lines.
#[derive(Serialize)]
struct SaleEnvelope<'a> {
    sale: &'a Sale,
    items: &'a [SaleItem],
}

/// A cart line resolved against the live catalog inside the transaction.
struct ResolvedLine {
    item: CartItem,
    product: Product,
    variant: Option<ProductVariant>,
    unit_price_cents: i64,
    subtotal_cents: i64,
}

// =============================================================================
// Checkout Processor
// =============================================================================

/// The core state transition: cart in, committed sale out.
#[derive(Debug, Clone)]
pub struct CheckoutProcessor {
    db: Database,
    events: EventBus,
    config: CheckoutConfig,
}

impl CheckoutProcessor {
    /// Creates a processor with the default configuration.
    pub fn new(db: Database, events: EventBus) -> Self {
        Self::with_config(db, events, CheckoutConfig::default())
    }

    /// Creates a processor with an explicit configuration.
    pub fn with_config(db: Database, events: EventBus, config: CheckoutConfig) -> Self {
        CheckoutProcessor { db, events, config }
    }

    /// Commits the owner's cart as a sale.
    ///
    /// ## Errors
    /// - `EmptyCart` - the owner has no cart lines
    /// - `InvalidDiscount` - discount is negative
    /// - `InsufficientStock` - a line cannot be satisfied at commit time
    /// - `CustomerNotFound` - customer_id does not resolve
    ///
    /// Every error leaves the store exactly as it was.
    pub async fn commit_sale(
        &self,
        principal: &Principal,
        request: CommitSaleRequest,
    ) -> EngineResult<Sale> {
        validate_id("owner_id", &request.owner_id)?;
        validate_id("user_id", &principal.user_id)?;
        validate_amount_paid(request.amount_paid_cents)?;

        let result = self.commit_inner(principal, &request).await;

        match &result {
            Ok(sale) => {
                info!(
                    sale_id = %sale.id,
                    sale_number = %sale.sale_number,
                    total = %sale.total_cents,
                    "Sale committed"
                );
                self.events.emit(PosEvent::SaleCompleted {
                    sale_id: sale.id.clone(),
                    sale_number: sale.sale_number,
                    total_cents: sale.total_cents,
                });
            }
            Err(EngineError::Domain(CoreError::InsufficientStock {
                product_id,
                requested,
                available,
            })) => {
                self.events.emit(PosEvent::InsufficientStock {
                    product_id: product_id.clone(),
                    requested: *requested,
                    available: *available,
                });
            }
            Err(_) => {}
        }

        result
    }

    async fn commit_inner(
        &self,
        principal: &Principal,
        request: &CommitSaleRequest,
    ) -> EngineResult<Sale> {
        let mut tx = self.db.pool().begin().await.map_err(DbError::from)?;

        // ---- 1. snapshot cart lines, compute totals -------------------------

        let lines = CartRepository::list_for_owner_tx(&mut tx, &request.owner_id).await?;
        if lines.is_empty() {
            return Err(CoreError::EmptyCart.into());
        }

        let mut resolved = Vec::with_capacity(lines.len());
        for item in lines {
            let product = ProductRepository::fetch_tx(&mut tx, &item.product_id)
                .await?
                .ok_or_else(|| CoreError::ProductNotFound(item.product_id.clone()))?;

            let variant = match &item.variant_id {
                Some(vid) => Some(
                    ProductRepository::fetch_variant_tx(&mut tx, vid)
                        .await?
                        .ok_or_else(|| CoreError::VariantNotFound(vid.clone()))?,
                ),
                None => None,
            };

            let unit_price_cents = match self.config.price_policy {
                CartPricePolicy::FreezeAtAdd => item.unit_price_cents,
                CartPricePolicy::RefreshAtCheckout => {
                    product.sale_price_cents
                        + variant
                            .as_ref()
                            .map(|v| v.additional_price_cents)
                            .unwrap_or(0)
                }
            };

            let subtotal_cents = unit_price_cents * item.quantity;
            resolved.push(ResolvedLine {
                item,
                product,
                variant,
                unit_price_cents,
                subtotal_cents,
            });
        }

        let subtotal_cents: i64 = resolved.iter().map(|l| l.subtotal_cents).sum();

        if request.discount_cents < 0 {
            return Err(CoreError::InvalidDiscount {
                discount_cents: request.discount_cents,
                subtotal_cents,
            }
            .into());
        }
        let discount_cents = request.discount_cents.min(subtotal_cents);
        let total_cents = subtotal_cents - discount_cents;
        let change_cents = (request.amount_paid_cents - total_cents).max(0);

        // ---- 2. allocate the sale number ------------------------------------

        let sale_number = SaleRepository::next_sale_number_tx(&mut tx).await?;
        let now = Utc::now();

        // ---- 3. insert the sale and its frozen lines ------------------------

        let sale = Sale {
            id: generate_sale_id(),
            sale_number,
            status: SaleStatus::Completed,
            subtotal_cents,
            discount_cents,
            total_cents,
            amount_paid_cents: request.amount_paid_cents,
            change_cents,
            payment_method: request.payment_method,
            customer_id: request.customer_id.clone(),
            user_id: principal.user_id.clone(),
            device_id: principal.device_id.clone(),
            notes: request.notes.clone(),
            sync_status: SyncStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
            cancelled_at: None,
            cancelled_by: None,
            cancel_reason: None,
        };
        SaleRepository::insert_sale_tx(&mut tx, &sale).await?;

        // ---- 4. per line: guarded decrement + ledger row --------------------

        let mut sale_items = Vec::with_capacity(resolved.len());
        let mut touched_products: Vec<String> = Vec::new();

        for line in &resolved {
            let quantity = line.item.quantity;

            // Commit-time availability check: the guarded decrement is
            // evaluated against the current row, inside this transaction.
            let decrement = match &line.variant {
                Some(variant) => {
                    ProductRepository::try_decrement_variant_stock_tx(&mut tx, &variant.id, quantity)
                        .await?
                }
                None => {
                    ProductRepository::try_decrement_stock_tx(&mut tx, &line.product.id, quantity)
                        .await?
                }
            };

            let (previous_stock, new_stock) = match decrement {
                StockDecrement::Applied { previous, new } => (previous, new),
                StockDecrement::Insufficient { available } => {
                    debug!(
                        product_id = %line.product.id,
                        requested = %quantity,
                        available = %available,
                        "Commit rejected: insufficient stock"
                    );
                    return Err(CoreError::InsufficientStock {
                        product_id: line.product.id.clone(),
                        requested: quantity,
                        available,
                    }
                    .into());
                }
            };

            let movement = StockMovement {
                id: generate_movement_id(),
                product_id: line.product.id.clone(),
                variant_id: line.item.variant_id.clone(),
                movement_type: MovementType::Sale,
                quantity: -quantity,
                previous_stock,
                new_stock,
                reference_id: Some(sale.id.clone()),
                reason: None,
                user_id: principal.user_id.clone(),
                created_at: now,
            };
            StockLedgerRepository::append_tx(&mut tx, &movement).await?;

            let name_snapshot = match &line.variant {
                Some(variant) => format!("{} ({})", line.product.name, variant.name),
                None => line.product.name.clone(),
            };

            let sale_item = SaleItem {
                id: generate_sale_item_id(),
                sale_id: sale.id.clone(),
                product_id: line.product.id.clone(),
                variant_id: line.item.variant_id.clone(),
                sku_snapshot: line.product.sku.clone(),
                name_snapshot,
                unit_price_cents: line.unit_price_cents,
                cost_cents: line.product.purchase_price_cents,
                quantity,
                subtotal_cents: line.subtotal_cents,
                created_at: now,
            };
            SaleRepository::insert_item_tx(&mut tx, &sale_item).await?;
            sale_items.push(sale_item);

            if !touched_products.contains(&line.product.id) {
                touched_products.push(line.product.id.clone());
            }
        }

        // ---- 5. customer aggregates -----------------------------------------

        if let Some(customer_id) = &request.customer_id {
            let updated =
                CustomerRepository::record_purchase_tx(&mut tx, customer_id, total_cents, now)
                    .await?;
            if !updated {
                return Err(CoreError::CustomerNotFound(customer_id.clone()).into());
            }
        }

        // ---- 6. clear the owner's cart --------------------------------------

        CartRepository::clear_tx(&mut tx, &request.owner_id).await?;

        // ---- 7. outbox: products first, then the sale that depends on them --

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
            sale: &sale,
            items: &sale_items,
        };
        let payload = serde_json::to_string(&envelope).map_err(DbError::from)?;
        OutboxRepository::enqueue_tx(
            &mut tx,
            EntityType::Sale,
            &sale.id,
            SyncOperation::Insert,
            &payload,
        )
        .await?;

        tx.commit().await.map_err(DbError::from)?;

        Ok(sale)
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
    use crate::pool::DbConfig;

    struct Harness {
        db: Database,
        cart: CartAggregator,
        catalog: CatalogManager,
        checkout: CheckoutProcessor,
        events: EventBus,
    }

    async fn setup() -> Harness {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let events = EventBus::new(16);
        Harness {
            cart: CartAggregator::new(db.clone()),
            catalog: CatalogManager::new(db.clone(), events.clone()),
            checkout: CheckoutProcessor::new(db.clone(), events.clone()),
            db,
            events,
        }
    }

    fn principal() -> Principal {
        Principal::new("cashier-1", "till-1")
    }

    fn request(owner: &str, amount_paid: i64, discount: i64) -> CommitSaleRequest {
        CommitSaleRequest {
            owner_id: owner.to_string(),
            payment_method: PaymentMethod::Cash,
            amount_paid_cents: amount_paid,
            discount_cents: discount,
            notes: None,
            customer_id: None,
        }
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

    #[tokio::test]
    async fn test_commit_sale_with_product_and_variant_lines() {
        let h = setup().await;

        // 2x product A (stock 5, price 1000) and 1x variant B of product C
        // (base 500 + 200, variant stock 3).
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

        let sale = h
            .checkout
            .commit_sale(&principal(), request("till-1", 2700, 0))
            .await
            .unwrap();

        assert_eq!(sale.status, SaleStatus::Completed);
        assert_eq!(sale.subtotal_cents, 2700);
        assert_eq!(sale.total_cents, 2700);
        assert_eq!(sale.change_cents, 0);
        assert!(sale.completed_at.is_some());

        // Stock: A 5 -> 3, variant B 3 -> 2.
        let a_after = h.db.products().get_by_id(&a.id).await.unwrap().unwrap();
        assert_eq!(a_after.stock, 3);
        let b_after = h.db.products().get_variant(&b.id).await.unwrap().unwrap();
        assert_eq!(b_after.stock, 2);

        // Two frozen lines.
        let items = h.db.sales().get_items(&sale.id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().any(|i| i.unit_price_cents == 1000));
        assert!(items.iter().any(|i| i.unit_price_cents == 700));

        // Two SALE movements referencing the sale.
        let movements = h
            .db
            .stock_ledger()
            .list_for_reference(&sale.id)
            .await
            .unwrap();
        assert_eq!(movements.len(), 2);
        assert!(movements
            .iter()
            .all(|m| m.movement_type == MovementType::Sale && m.new_stock >= 0));

        // Cart is gone.
        assert!(h
            .db
            .carts()
            .list_for_owner("till-1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_commit_rejects_insufficient_stock_without_side_effects() {
        let h = setup().await;
        let a = seed_product(&h, "A", 1000, 3).await;

        // Cart passes at add time with 3, then stock shrinks to 2 via a
        // competing sale from another owner.
        h.cart.add_item("till-1", &a.id, None, 3).await.unwrap();
        h.cart.add_item("till-2", &a.id, None, 1).await.unwrap();
        h.checkout
            .commit_sale(&principal(), request("till-2", 1000, 0))
            .await
            .unwrap();

        let before_movements = h.db.stock_ledger().count().await.unwrap();
        let before_outbox = h.db.sync_outbox().pending_count().await.unwrap();

        let err = h
            .checkout
            .commit_sale(&principal(), request("till-1", 3000, 0))
            .await;

        match err {
            Err(EngineError::Domain(CoreError::InsufficientStock {
                product_id,
                requested,
                available,
            })) => {
                assert_eq!(product_id, a.id);
                assert_eq!(requested, 3);
                assert_eq!(available, 2);
            }
            other => panic!("expected InsufficientStock, got {:?}", other),
        }

        // No sale, no movement, no stock change, no outbox entry, cart kept.
        let a_after = h.db.products().get_by_id(&a.id).await.unwrap().unwrap();
        assert_eq!(a_after.stock, 2);
        assert_eq!(h.db.stock_ledger().count().await.unwrap(), before_movements);
        assert_eq!(
            h.db.sync_outbox().pending_count().await.unwrap(),
            before_outbox
        );
        assert_eq!(h.db.carts().list_for_owner("till-1").await.unwrap().len(), 1);
        assert_eq!(h.db.sales().list_recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_cart_is_rejected() {
        let h = setup().await;

        let err = h
            .checkout
            .commit_sale(&principal(), request("till-1", 1000, 0))
            .await;

        assert!(matches!(
            err,
            Err(EngineError::Domain(CoreError::EmptyCart))
        ));
    }

    #[tokio::test]
    async fn test_negative_discount_is_rejected() {
        let h = setup().await;
        let a = seed_product(&h, "A", 1000, 5).await;
        h.cart.add_item("till-1", &a.id, None, 1).await.unwrap();

        let err = h
            .checkout
            .commit_sale(&principal(), request("till-1", 1000, -50))
            .await;

        assert!(matches!(
            err,
            Err(EngineError::Domain(CoreError::InvalidDiscount { .. }))
        ));

        // Nothing moved.
        let a_after = h.db.products().get_by_id(&a.id).await.unwrap().unwrap();
        assert_eq!(a_after.stock, 5);
    }

    #[tokio::test]
    async fn test_discount_clamps_to_subtotal_and_change_is_computed() {
        let h = setup().await;
        let a = seed_product(&h, "A", 1000, 5).await;
        h.cart.add_item("till-1", &a.id, None, 1).await.unwrap();

        let sale = h
            .checkout
            .commit_sale(&principal(), request("till-1", 500, 99_999))
            .await
            .unwrap();

        assert_eq!(sale.subtotal_cents, 1000);
        assert_eq!(sale.discount_cents, 1000);
        assert_eq!(sale.total_cents, 0);
        assert_eq!(sale.change_cents, 500);
    }

    #[tokio::test]
    async fn test_sale_numbers_are_unique_and_increasing() {
        let h = setup().await;
        let a = seed_product(&h, "A", 1000, 10).await;

        let mut numbers = Vec::new();
        for _ in 0..3 {
            h.cart.add_item("till-1", &a.id, None, 1).await.unwrap();
            let sale = h
                .checkout
                .commit_sale(&principal(), request("till-1", 1000, 0))
                .await
                .unwrap();
            numbers.push(sale.sale_number);
        }

        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_outbox_orders_product_updates_before_sale() {
        let h = setup().await;
        let a = seed_product(&h, "A", 1000, 5).await;
        h.cart.add_item("till-1", &a.id, None, 1).await.unwrap();

        let sale = h
            .checkout
            .commit_sale(&principal(), request("till-1", 1000, 0))
            .await
            .unwrap();

        let entries = h.db.sync_outbox().list_all().await.unwrap();
        // Seeding enqueued the PRODUCT insert; the commit appended a PRODUCT
        // update followed by the SALE insert, in that order.
        let tail: Vec<_> = entries.iter().rev().take(2).collect();
        assert_eq!(tail[0].entity_type, EntityType::Sale);
        assert_eq!(tail[0].entity_id, sale.id);
        assert_eq!(tail[0].operation, SyncOperation::Insert);
        assert_eq!(tail[1].entity_type, EntityType::Product);
        assert_eq!(tail[1].entity_id, a.id);
        assert_eq!(tail[1].operation, SyncOperation::Update);
        assert!(tail[1].seq < tail[0].seq);
    }

    #[tokio::test]
    async fn test_customer_aggregates_update_in_commit() {
        let h = setup().await;
        let a = seed_product(&h, "A", 1000, 5).await;
        let customer = h.db.customers().create("Dana", None).await.unwrap();

        h.cart.add_item("till-1", &a.id, None, 2).await.unwrap();

        let mut req = request("till-1", 2000, 0);
        req.customer_id = Some(customer.id.clone());
        h.checkout.commit_sale(&principal(), req).await.unwrap();

        let after = h
            .db
            .customers()
            .get_by_id(&customer.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.total_purchases_cents, 2000);
        assert_eq!(after.purchase_count, 1);
        assert!(after.last_purchase_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_customer_rolls_back_everything() {
        let h = setup().await;
        let a = seed_product(&h, "A", 1000, 5).await;
        h.cart.add_item("till-1", &a.id, None, 2).await.unwrap();

        let mut req = request("till-1", 2000, 0);
        req.customer_id = Some("no-such-customer".to_string());
        let err = h.checkout.commit_sale(&principal(), req).await;

        assert!(matches!(
            err,
            Err(EngineError::Domain(CoreError::CustomerNotFound(_)))
        ));

        // The decrement and the ledger row from earlier steps rolled back
        // together: neither is observable.
        let a_after = h.db.products().get_by_id(&a.id).await.unwrap().unwrap();
        assert_eq!(a_after.stock, 5);
        assert_eq!(h.db.stock_ledger().count().await.unwrap(), 0);
        assert!(h.db.sales().list_recent(10).await.unwrap().is_empty());
        assert_eq!(h.db.carts().list_for_owner("till-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_commits_for_last_unit() {
        let h = setup().await;
        let a = seed_product(&h, "A", 1000, 1).await;

        h.cart.add_item("till-1", &a.id, None, 1).await.unwrap();
        h.cart.add_item("till-2", &a.id, None, 1).await.unwrap();

        let c1 = h.checkout.clone();
        let c2 = h.checkout.clone();
        let p1 = principal();
        let p2 = Principal::new("cashier-2", "till-2");
        let (r1, r2) = tokio::join!(
            c1.commit_sale(&p1, request("till-1", 1000, 0)),
            c2.commit_sale(&p2, request("till-2", 1000, 0)),
        );

        let successes = [&r1, &r2].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);

        let failure = if r1.is_err() { r1 } else { r2 };
        assert!(matches!(
            failure,
            Err(EngineError::Domain(CoreError::InsufficientStock { .. }))
        ));

        let a_after = h.db.products().get_by_id(&a.id).await.unwrap().unwrap();
        assert_eq!(a_after.stock, 0);
    }

    #[tokio::test]
    async fn test_price_policy_refresh_at_checkout() {
        let h = setup().await;
        let refresh_checkout = CheckoutProcessor::with_config(
            h.db.clone(),
            h.events.clone(),
            CheckoutConfig {
                price_policy: CartPricePolicy::RefreshAtCheckout,
            },
        );

        let mut a = seed_product(&h, "A", 1000, 5).await;
        h.cart.add_item("till-1", &a.id, None, 1).await.unwrap();

        a.sale_price_cents = 1500;
        h.catalog.update_product(&a).await.unwrap();

        let sale = refresh_checkout
            .commit_sale(&principal(), request("till-1", 1500, 0))
            .await
            .unwrap();

        assert_eq!(sale.total_cents, 1500);
        let items = h.db.sales().get_items(&sale.id).await.unwrap();
        assert_eq!(items[0].unit_price_cents, 1500);
    }

    #[tokio::test]
    async fn test_frozen_prices_survive_catalog_edits() {
        let h = setup().await;
        let mut a = seed_product(&h, "A", 1000, 5).await;
        h.cart.add_item("till-1", &a.id, None, 1).await.unwrap();

        let sale = h
            .checkout
            .commit_sale(&principal(), request("till-1", 1000, 0))
            .await
            .unwrap();

        a.sale_price_cents = 9999;
        h.catalog.update_product(&a).await.unwrap();

        let items = h.db.sales().get_items(&sale.id).await.unwrap();
        assert_eq!(items[0].unit_price_cents, 1000);
        assert_eq!(items[0].cost_cents, 500);
    }

    #[tokio::test]
    async fn test_commit_emits_sale_completed_event() {
        let h = setup().await;
        let mut rx = h.events.subscribe();
        let a = seed_product(&h, "A", 1000, 5).await;
        h.cart.add_item("till-1", &a.id, None, 1).await.unwrap();

        let sale = h
            .checkout
            .commit_sale(&principal(), request("till-1", 1000, 0))
            .await
            .unwrap();

        // Skip the ProductAdded event from seeding.
        loop {
            match rx.recv().await.unwrap() {
                PosEvent::SaleCompleted {
                    sale_id,
                    total_cents,
                    ..
                } => {
                    assert_eq!(sale_id, sale.id);
                    assert_eq!(total_cents, 1000);
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_ledger_replay_matches_counter() {
        let h = setup().await;
        let a = seed_product(&h, "A", 1000, 5).await;

        h.cart.add_item("till-1", &a.id, None, 2).await.unwrap();
        h.checkout
            .commit_sale(&principal(), request("till-1", 2000, 0))
            .await
            .unwrap();
        h.cart.add_item("till-1", &a.id, None, 1).await.unwrap();
        h.checkout
            .commit_sale(&principal(), request("till-1", 1000, 0))
            .await
            .unwrap();

        let product = h.db.products().get_by_id(&a.id).await.unwrap().unwrap();
        let delta = h.db.stock_ledger().net_delta(&a.id, None).await.unwrap();

        // initial 5 + (-2) + (-1) == live counter
        assert_eq!(5 + delta, product.stock);
        assert_eq!(product.stock, 2);
    }
}
