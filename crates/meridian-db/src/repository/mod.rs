//! # Repositories
//!
//! Row-level access, one repository per aggregate.
//!
//! Two calling conventions:
//! - `&self` methods borrow the repository's pool and are for standalone
//!   reads and single-statement writes.
//! - `*_tx` associated functions take a `&mut SqliteConnection` so the
//!   processors can compose them inside one write transaction. Everything
//!   the checkout/reversal sequences touch goes through these.

pub mod cart;
pub mod customer;
pub mod outbox;
pub mod product;
pub mod sale;
pub mod stock;

pub use cart::{CartLine, CartRepository};
pub use customer::CustomerRepository;
pub use outbox::OutboxRepository;
pub use product::{ProductRepository, StockDecrement};
pub use sale::SaleRepository;
pub use stock::StockLedgerRepository;
