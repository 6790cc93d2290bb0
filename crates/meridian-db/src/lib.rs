//! # meridian-db: Persistence and the Transactional Sale Engine
//!
//! SQLite storage for the local-first engine, plus the two core processors
//! that turn carts into durable sales and reverse them.
//!
//! ## Write-Path Guarantee
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   SINGLE TRANSACTION                        │
//! │                                                             │
//! │   cart lines ──► sale + sale_items                          │
//! │              ──► guarded stock decrements                   │
//! │              ──► stock_movements (one per line)             │
//! │              ──► customer aggregates                        │
//! │              ──► cart cleared                               │
//! │              ──► sync_outbox rows                           │
//! │                                                             │
//! │   COMMIT ← everything lands, or nothing does                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//! Any failure after the transaction opens rolls back every effect; a
//! decremented counter without its matching ledger row can never be
//! observed.
//!
//! ## Modules
//! - [`pool`] - connection pool, configuration, [`Database`] handle
//! - [`repository`] - row-level access per aggregate
//! - [`catalog`] - product/variant lifecycle operations
//! - [`cart`] - per-owner pre-commit purchase lines
//! - [`checkout`] - cart → committed sale, atomically
//! - [`reversal`] - completed sale → cancelled, stock restored
//! - [`inventory`] - manual stock operations (receive/adjust/remove)
//! - [`events`] - broadcast stream of operation outcomes

pub mod catalog;
pub mod cart;
pub mod checkout;
pub mod error;
pub mod events;
pub mod inventory;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod reversal;

pub use catalog::{CatalogManager, NewProduct, NewVariant};
pub use cart::CartAggregator;
pub use checkout::{CartPricePolicy, CheckoutConfig, CheckoutProcessor, CommitSaleRequest};
pub use error::{DbError, DbResult, EngineError, EngineResult};
pub use events::{EventBus, PosEvent};
pub use inventory::InventoryService;
pub use pool::{Database, DbConfig};
pub use reversal::ReversalProcessor;
