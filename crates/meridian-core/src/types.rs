//! # Domain Types
//!
//! Core domain types for the sale-processing and inventory-consistency
//! engine.
//!
//! ## Type Hierarchy
//! ```text
//! Product ──┬── ProductVariant            catalog + stock counters
//!           │
//! CartItem ─┘                             ephemeral, per-owner, price snapshot
//!      │
//!      ▼  commit
//! Sale ──── SaleItem                      committed, immutable snapshots
//!      │
//!      ▼  every stock delta
//! StockMovement                           append-only audit ledger
//!      │
//!      ▼  every syncable mutation
//! SyncQueueEntry                          durable outbox row
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4 string - immutable, used for relations and sync
//! - Business ID where one exists (`sku`, `sale_number`) - human-readable

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;

// =============================================================================
// Sync Status (per-entity)
// =============================================================================

/// Replication state of a locally stored entity.
///
/// Local state is authoritative the instant its transaction commits;
/// this flag only tracks whether the remote has seen it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Not yet delivered to the remote authority.
    Pending,
    /// Acknowledged by the remote authority.
    Synced,
}

impl Default for SyncStatus {
    fn default() -> Self {
        SyncStatus::Pending
    }
}

// =============================================================================
// Product / ProductVariant
// =============================================================================

/// A product available for sale.
///
/// `stock` is the live counter; it is always non-negative and every
/// non-administrative change to it has exactly one [`StockMovement`] row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Stock Keeping Unit - business identifier, unique.
    pub sku: String,

    /// Display name.
    pub name: String,

    /// Optional description.
    pub description: Option<String>,

    /// Selling price in cents. Snapshotted into cart lines at add time.
    pub sale_price_cents: i64,

    /// Acquisition cost in cents. Frozen into sale items at commit time.
    pub purchase_price_cents: i64,

    /// Current stock level. Never negative.
    pub stock: i64,

    /// Threshold below which the product is considered low on stock.
    pub min_stock_alert: i64,

    /// Whether product is active (soft delete).
    pub is_active: bool,

    /// Replication state.
    pub sync_status: SyncStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns the selling price as Money.
    #[inline]
    pub fn sale_price(&self) -> Money {
        Money::from_cents(self.sale_price_cents)
    }

    /// Whether the requested quantity can currently be satisfied.
    pub fn can_satisfy(&self, quantity: i64) -> bool {
        self.stock >= quantity
    }

    /// Whether the stock level has fallen to the alert threshold.
    pub fn is_low_on_stock(&self) -> bool {
        self.stock <= self.min_stock_alert
    }
}

/// A sellable variation of a product (size, flavor, ...).
///
/// Carries its own stock counter; availability for a variant line is the
/// variant's stock, not the parent product's.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ProductVariant {
    pub id: String,
    pub product_id: String,
    pub name: String,

    /// Added on top of the parent product's sale price.
    pub additional_price_cents: i64,

    /// Current stock level of this variant. Never negative.
    pub stock: i64,

    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductVariant {
    /// Unit price of this variant given its parent product.
    pub fn unit_price(&self, product: &Product) -> Money {
        Money::from_cents(product.sale_price_cents + self.additional_price_cents)
    }
}

// =============================================================================
// Cart
// =============================================================================

/// An ephemeral purchase line, scoped to one owner.
///
/// `(owner_id, product_id, variant_id)` is unique; adding the same product
/// again merges quantities. `unit_price_cents` is a snapshot taken at add
/// time and is not re-derived when the catalog price changes later.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CartItem {
    pub id: String,
    pub owner_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,
    pub quantity: i64,

    /// Price snapshot: `product.sale_price + variant.additional_price`.
    pub unit_price_cents: i64,

    /// `unit_price_cents * quantity`, maintained on every mutation.
    pub subtotal_cents: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartItem {
    /// Returns the stored line subtotal as Money.
    #[inline]
    pub fn subtotal(&self) -> Money {
        Money::from_cents(self.subtotal_cents)
    }
}

// =============================================================================
// Sale Status
// =============================================================================

/// The status of a sale transaction.
///
/// COMPLETED → CANCELLED is the only allowed post-creation transition.
/// CANCELLED and REFUNDED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// Created but not finalized.
    Pending,
    /// Paid and finalized.
    Completed,
    /// Reversed by the reversal processor. Terminal.
    Cancelled,
    /// Refunded. Terminal.
    Refunded,
}

impl SaleStatus {
    /// Whether a sale in this status may be cancelled.
    pub fn can_cancel(&self) -> bool {
        matches!(self, SaleStatus::Completed)
    }

    /// Whether this status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SaleStatus::Cancelled | SaleStatus::Refunded)
    }

    /// Stable lowercase name, matching the stored column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Pending => "pending",
            SaleStatus::Completed => "completed",
            SaleStatus::Cancelled => "cancelled",
            SaleStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payment Method
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Physical cash payment.
    Cash,
    /// Card payment on an external terminal.
    Card,
    /// Bank transfer.
    Transfer,
    /// Deferred payment against a customer account.
    Credit,
}

// =============================================================================
// Sale
// =============================================================================

/// A committed sale transaction.
///
/// Created once, atomically, by the checkout processor; only status-mutated
/// by the reversal processor afterwards. Never physically deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Sale {
    pub id: String,

    /// Strictly increasing business number, allocated atomically at the
    /// storage layer.
    pub sale_number: i64,

    pub status: SaleStatus,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub amount_paid_cents: i64,
    pub change_cents: i64,
    pub payment_method: PaymentMethod,
    pub customer_id: Option<String>,

    /// Acting cashier.
    pub user_id: String,

    /// Terminal the sale was made on.
    pub device_id: String,

    pub notes: Option<String>,
    pub sync_status: SyncStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    // Cancellation metadata, set by the reversal processor.
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub cancel_reason: Option<String>,
}

impl Sale {
    /// Returns the grand total as Money.
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

// =============================================================================
// Sale Item
// =============================================================================

/// A line item of a committed sale.
///
/// Snapshot pattern: sku, name, unit price and cost are frozen at commit
/// time and never recomputed from current product state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    pub variant_id: Option<String>,

    /// SKU at time of sale (frozen).
    pub sku_snapshot: String,

    /// Product name at time of sale (frozen).
    pub name_snapshot: String,

    /// Unit price in cents at time of sale (frozen).
    pub unit_price_cents: i64,

    /// Unit cost in cents at time of sale (frozen).
    pub cost_cents: i64,

    pub quantity: i64,

    /// `unit_price_cents * quantity`.
    pub subtotal_cents: i64,

    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Stock Movement
// =============================================================================

/// The cause of a stock delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    /// Stock received from a supplier.
    In,
    /// Manual removal (damage, loss).
    Out,
    /// Manual correction after a physical count.
    Adjustment,
    /// Decrement caused by a committed sale.
    Sale,
    /// Increment caused by a customer return.
    Return,
    /// Increment caused by a sale cancellation.
    Cancellation,
    /// Stock moved between locations.
    Transfer,
}

/// One append-only audit entry for one stock delta.
///
/// `quantity` is signed. `previous_stock` is the counter value read inside
/// the same transaction immediately before the write, so replaying a
/// product's movements always reconstructs its current counter.
/// Rows are never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockMovement {
    pub id: String,
    pub product_id: String,

    /// Set when the delta applied to a variant counter rather than the
    /// product counter.
    pub variant_id: Option<String>,

    pub movement_type: MovementType,

    /// Signed delta: negative for SALE/OUT, positive for IN/CANCELLATION.
    pub quantity: i64,

    pub previous_stock: i64,
    pub new_stock: i64,

    /// Id of the causing entity (sale id, adjustment id, ...).
    pub reference_id: Option<String>,

    pub reason: Option<String>,

    /// Acting user.
    pub user_id: String,

    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Customer
// =============================================================================

/// A known customer with aggregate purchase statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub total_purchases_cents: i64,
    pub purchase_count: i64,
    pub last_purchase_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Sync Outbox
// =============================================================================

/// Type of entity carried by an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Product,
    Sale,
    Customer,
    StockMovement,
}

/// Mutation kind carried by an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncOperation {
    Insert,
    Update,
    Delete,
}

/// Delivery state of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum SyncEntryStatus {
    /// Awaiting first delivery attempt.
    Pending,
    /// Acknowledged by the remote; pruned after the retention window.
    Synced,
    /// Last attempt failed; retried on a later sweep.
    Failed,
}

/// A durable outbox row, created in the same local transaction as the
/// mutation it describes.
///
/// `seq` is a single global monotonic sequence: entries are delivered in
/// exactly the order their transactions committed, across all entity types,
/// so a sale is never delivered before the product updates it depends on.
/// `retry_count` only increases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SyncQueueEntry {
    pub seq: i64,
    pub id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: SyncOperation,

    /// Full entity serialized as JSON at enqueue time.
    pub payload: String,

    pub status: SyncEntryStatus,
    pub retry_count: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub synced_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Principal
// =============================================================================

/// The acting identity supplied by the caller on every write operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    /// Acting cashier/user.
    pub user_id: String,
    /// POS terminal identity.
    pub device_id: String,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Principal {
            user_id: user_id.into(),
            device_id: device_id.into(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
