//! # Error Types
//!
//! Domain-specific error types for meridian-core.
//!
//! ## Error Hierarchy
//! ```text
//! meridian-core errors (this file)
//! ├── CoreError        - Business rule violations
//! └── ValidationError  - Input validation failures
//!
//! meridian-db errors (separate crate)
//! ├── DbError          - Database operation failures
//! └── EngineError      - CoreError | DbError, returned by the processors
//!
//! meridian-sync errors (separate crate)
//! └── SyncError        - Delivery/pull failures, confined to the queue
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (ids, requested/available counts)
//! 3. Errors are enum variants, never String

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These represent business rule violations detected on the write path.
/// They fail the operation synchronously; no partial state is ever left
/// behind (the surrounding transaction rolls back).
#[derive(Debug, Error)]
pub enum CoreError {
    /// Commit was requested for an owner whose cart has no lines.
    #[error("Cart is empty")]
    EmptyCart,

    /// Requested quantity exceeds the currently available stock.
    ///
    /// Raised both at cart time and re-checked at commit time inside the
    /// write transaction, since stock can change between add and checkout.
    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: String,
        requested: i64,
        available: i64,
    },

    /// Discount is negative. Discounts above the subtotal are clamped, not
    /// rejected.
    #[error("Invalid discount {discount_cents} for subtotal {subtotal_cents}")]
    InvalidDiscount {
        discount_cents: i64,
        subtotal_cents: i64,
    },

    /// Product cannot be found (or is soft-deleted).
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Product variant cannot be found (or is soft-deleted).
    #[error("Variant not found: {0}")]
    VariantNotFound(String),

    /// Sale not found.
    #[error("Sale not found: {0}")]
    SaleNotFound(String),

    /// Cart line not found.
    #[error("Cart item not found: {0}")]
    CartItemNotFound(String),

    /// Customer not found.
    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    /// Sale is not in a state that allows the requested operation.
    ///
    /// COMPLETED → CANCELLED is the only allowed post-creation transition;
    /// CANCELLED and REFUNDED are terminal.
    #[error("Sale {sale_id} is {current_status}, cannot perform operation")]
    InvalidSaleStatus {
        sale_id: String,
        current_status: String,
    },

    /// Line quantity exceeds the configured maximum.
    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: i64, max: i64 },

    /// Cart has exceeded maximum allowed lines.
    #[error("Cart cannot have more than {max} items")]
    CartTooLarge { max: usize },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Rejected before any mutation begins.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Numeric value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g., bad characters in a SKU).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_stock_message() {
        let err = CoreError::InsufficientStock {
            product_id: "prod-1".to_string(),
            requested: 3,
            available: 2,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for prod-1: requested 3, available 2"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "owner_id".to_string(),
        };
        assert_eq!(err.to_string(), "owner_id is required");

        let err = ValidationError::MustBePositive {
            field: "quantity".to_string(),
        };
        assert_eq!(err.to_string(), "quantity must be positive");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::MustBePositive {
            field: "quantity".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
