//! # meridian-core: Pure Business Logic for Meridian POS
//!
//! This crate is the heart of the sale-processing engine. It contains the
//! domain model and business rules as pure types and functions with zero I/O
//! dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                 ★ meridian-core (THIS CRATE) ★            │
//! │                                                           │
//! │   ┌───────────┐  ┌───────────┐  ┌─────────────────────┐   │
//! │   │   types   │  │   money   │  │     validation      │   │
//! │   │  Product  │  │   Money   │  │   quantity checks   │   │
//! │   │   Sale    │  │  (cents)  │  │   discount checks   │   │
//! │   └───────────┘  └───────────┘  └─────────────────────┘   │
//! │                                                           │
//! │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS      │
//! └──────────────────────────┬────────────────────────────────┘
//!                            │
//!            meridian-db (persistence + sale engine)
//!                            │
//!            meridian-sync (outbox delivery, pull)
//! ```
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Integer Money**: All monetary values are in cents (i64)
//! 4. **Explicit Errors**: All errors are typed, never strings or panics

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum quantity of a single line in a cart.
///
/// Prevents accidental over-ordering (e.g., typing 1000 instead of 10).
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Maximum distinct lines allowed in a single cart.
pub const MAX_CART_ITEMS: usize = 100;
