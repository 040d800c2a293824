//! # Validation Module
//!
//! Input validation for engine operations.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: THIS MODULE (shape)                                          │
//! │  ├── quantity range, percent range, ids, titles                        │
//! │  └── rejected before any state is touched                              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Domain modules (business rules)                              │
//! │  ├── discount limits, stage moves, payment methods                     │
//! │  └── CoreError::DiscountExceedsLimit, InvalidStageTransition, ...      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK / NOT NULL constraints                                      │
//! │  └── UNIQUE (sale per opportunity, live commission per sale)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use rust_decimal::Decimal;

use crate::error::ValidationError;
use crate::money::{Money, Percent};
use crate::MAX_ITEM_QUANTITY;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a display name or title.
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most 200 characters
///
/// Returns the trimmed value.
pub fn validate_name(field: &str, value: &str) -> ValidationResult<String> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > 200 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 200,
        });
    }

    Ok(value.to_string())
}

/// Validates an identifier coming from a collaborator (client, seller).
///
/// These are opaque to the engine; only emptiness is checked.
pub fn validate_reference(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line-item quantity.
///
/// ## Rules
/// - Must be positive (> 0)
/// - Must not exceed MAX_ITEM_QUANTITY (9999)
///
/// ## User Workflow
/// ```text
/// Seller enters quantity: 0
///      │
///      ▼
/// validate_quantity(0) ← THIS FUNCTION
///      │
///      ├── qty <= 0?    → "quantity must be positive"
///      ├── qty > 9999?  → "quantity must be between 1 and 9999"
///      └── OK → line item is added / updated
/// ```
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates an exact unit price (zero allowed for free items).
pub fn validate_unit_price(price: Decimal) -> ValidationResult<()> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(ValidationError::MustNotBeNegative {
            field: "unit_price".to_string(),
        });
    }
    Ok(())
}

/// Validates a non-negative money amount (prices, costs, service totals).
pub fn validate_amount(field: &str, amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates and wraps a percentage field.
pub fn validate_percent(field: &str, value: Decimal) -> ValidationResult<Percent> {
    Percent::for_field(field, value)
}

/// Validates a win probability (0-100).
pub fn validate_probability(probability: i64) -> ValidationResult<()> {
    if !(0..=100).contains(&probability) {
        return Err(ValidationError::OutOfRange {
            field: "probability".to_string(),
            min: 0,
            max: 100,
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("title", "  Tractor deal ").unwrap(), "Tractor deal");
        assert!(validate_name("title", "").is_err());
        assert!(validate_name("title", "   ").is_err());
        assert!(validate_name("title", &"A".repeat(201)).is_err());
    }

    #[test]
    fn test_validate_reference() {
        assert!(validate_reference("client_id", "c-1").is_ok());
        assert!(validate_reference("client_id", " ").is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(1).is_ok());
        assert!(validate_quantity(9999).is_ok());

        assert!(validate_quantity(0).is_err());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(10_000).is_err());
    }

    #[test]
    fn test_validate_unit_price() {
        assert!(validate_unit_price(dec!(0)).is_ok());
        assert!(validate_unit_price(dec!(99.999)).is_ok());
        assert!(validate_unit_price(dec!(-0.01)).is_err());
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount("unit_cost", Money::zero()).is_ok());
        assert!(validate_amount("unit_cost", Money::from_cents(-1)).is_err());
    }

    #[test]
    fn test_validate_percent_names_field() {
        let err = validate_percent("final_discount_percent", dec!(101)).unwrap_err();
        assert!(err.to_string().starts_with("final_discount_percent"));
    }

    #[test]
    fn test_validate_probability() {
        assert!(validate_probability(0).is_ok());
        assert!(validate_probability(100).is_ok());
        assert!(validate_probability(101).is_err());
        assert!(validate_probability(-5).is_err());
    }
}
