//! # Error Types
//!
//! Domain-specific error types for ceres-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  ceres-core errors (this file)                                         │
//! │  ├── CoreError        - Business rule violations and soft failures     │
//! │  └── ValidationError  - Input shape failures                           │
//! │                                                                         │
//! │  ceres-db errors (separate crate)                                      │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  ceres-engine errors                                                   │
//! │  └── EngineError      - What callers see (ConversionFailed, NotFound)  │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → EngineError → Caller    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every error is rejected before state is mutated. Operations on entities
//! work on a copy and only swap it in once every check has passed.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::commission::{CommissionBase, PayStatus};
use crate::money::Money;
use crate::opportunity::Stage;
use crate::types::PaymentMethod;

// =============================================================================
// Error Kind
// =============================================================================

/// Coarse classification used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input shape. Fix the request and resubmit.
    Validation,
    /// The request is well formed but breaks a business rule.
    BusinessRule,
    /// Logged and skipped. The surrounding operation still succeeds.
    SoftFailure,
}

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The discount on a line item would exceed the product's limit.
    ///
    /// ## User Workflow
    /// ```text
    /// Seller types unit price 70.00 (anchor 100.00, max 20%)
    ///      │
    ///      ▼
    /// derived discount = 30%
    ///      │
    ///      ▼
    /// DiscountExceedsLimit { requested: 30, max: 20 }
    ///      │
    ///      ▼
    /// Line item keeps its previous price and discount
    /// ```
    #[error("Discount {requested}% on product {product_id} exceeds the limit of {max}%")]
    DiscountExceedsLimit {
        product_id: String,
        requested: Decimal,
        max: Decimal,
    },

    /// The whole-order discount exceeds the configured ceiling.
    #[error("Final discount {requested}% exceeds the limit of {max}%")]
    FinalDiscountExceedsLimit { requested: Decimal, max: Decimal },

    /// A proposal has neither line items nor a manual gross value.
    #[error("Proposal has no line items and no manual value")]
    NoItemsNoManualValue,

    /// A manual gross value was supplied while line items exist.
    #[error("Manual value cannot be set while the proposal has line items")]
    ManualValueWithItems,

    /// The value adjustment would push the gross value below zero.
    #[error("Gross value cannot be negative (got {value})")]
    NegativeGrossValue { value: Money },

    /// A direct sale was submitted without line items.
    #[error("Sale requires at least one line item")]
    ItemsRequired,

    #[error("At least one payment method is required")]
    MissingPaymentMethod,

    #[error("At most {max} payment methods are allowed, got {given}")]
    TooManyPaymentMethods { max: usize, given: usize },

    #[error("Payment method {0} was selected twice")]
    DuplicatePaymentMethod(PaymentMethod),

    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Inactive products cannot be added to proposals.
    #[error("Product {0} is inactive")]
    ProductInactive(String),

    #[error("Line item for product {0} not found")]
    LineItemNotFound(String),

    /// A product appears at most once per proposal; edit the quantity instead.
    #[error("Product {0} is already on this proposal")]
    DuplicateLineItem(String),

    /// The requested stage move is not allowed.
    ///
    /// ## When This Occurs
    /// - Leaving `won` or `lost` without an administrative correction
    /// - Moving to `won` without going through sale conversion
    #[error("Cannot move opportunity from {from} to {to}")]
    InvalidStageTransition { from: Stage, to: Stage },

    /// Content edits on a won or lost opportunity.
    #[error("Opportunity {id} is {stage} and can no longer be edited")]
    OpportunityClosed { id: String, stage: Stage },

    #[error("Only administrators may {action}")]
    AdminOnly { action: String },

    #[error("Sale {0} is canceled")]
    SaleCanceled(String),

    /// No active commission rule matched the sale.
    #[error("No commission rule applies to sale {sale_id}")]
    NoApplicableRule { sale_id: String },

    /// A service-based rule matched but the sale has no service line of
    /// that kind.
    #[error("Sale {sale_id} has no {base} service total")]
    ServiceTotalUnavailable { sale_id: String, base: CommissionBase },

    #[error("Commission cannot move from {from} to {to}")]
    InvalidPayStatusTransition { from: PayStatus, to: PayStatus },

    /// Arithmetic left the representable range.
    #[error("Amount is out of range")]
    AmountOverflow,

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Classifies the error for callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) | CoreError::AmountOverflow => ErrorKind::Validation,
            CoreError::NoApplicableRule { .. } | CoreError::ServiceTotalUnavailable { .. } => {
                ErrorKind::SoftFailure
            }
            _ => ErrorKind::BusinessRule,
        }
    }

    /// Soft failures are logged for manual follow-up and never abort the
    /// operation that triggered them.
    pub fn is_soft(&self) -> bool {
        self.kind() == ErrorKind::SoftFailure
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when user input doesn't meet requirements.
/// Used for early validation before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., invalid UUID, unparsable decimal).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
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
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_messages() {
        let err = CoreError::DiscountExceedsLimit {
            product_id: "p-1".to_string(),
            requested: dec!(30),
            max: dec!(20),
        };
        assert_eq!(
            err.to_string(),
            "Discount 30% on product p-1 exceeds the limit of 20%"
        );

        let err = CoreError::InvalidStageTransition {
            from: Stage::Won,
            to: Stage::Lead,
        };
        assert_eq!(err.to_string(), "Cannot move opportunity from won to lead");
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "client_id".to_string(),
        };
        assert_eq!(err.to_string(), "client_id is required");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::MustBePositive {
            field: "quantity".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
        assert_eq!(core_err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(CoreError::NoItemsNoManualValue.kind(), ErrorKind::BusinessRule);
        assert_eq!(CoreError::MissingPaymentMethod.kind(), ErrorKind::BusinessRule);

        let soft = CoreError::NoApplicableRule {
            sale_id: "s-1".to_string(),
        };
        assert!(soft.is_soft());

        let soft = CoreError::ServiceTotalUnavailable {
            sale_id: "s-1".to_string(),
            base: CommissionBase::Spraying,
        };
        assert_eq!(soft.kind(), ErrorKind::SoftFailure);
    }
}
