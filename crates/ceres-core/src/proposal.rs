//! # Proposal Aggregator
//!
//! Turns a set of line items into the proposal's gross value.
//!
//! ```text
//!   items non-empty:  gross = Σ subtotal + value_adjustment
//!   items empty:      gross = manual_value + value_adjustment
//!                     (no manual value → NoItemsNoManualValue)
//! ```
//!
//! The gross value is always derived. Nothing caches it between edits; the
//! opportunity calls [`recalculate`] after every mutation.

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::pricing::LineItem;

/// Sum of line-item subtotals.
pub fn items_total(items: &[LineItem]) -> CoreResult<Money> {
    Money::checked_sum(items.iter().map(|item| item.subtotal))
}

/// Computes the authoritative gross value of a proposal.
///
/// ## Errors
/// - [`CoreError::NoItemsNoManualValue`] when there are no items and no
///   manual value
/// - [`CoreError::ManualValueWithItems`] when both are present
/// - [`CoreError::NegativeGrossValue`] when the adjustment pushes the total
///   below zero
/// - [`CoreError::AmountOverflow`] when the total does not fit in cents
///
/// ```rust
/// use ceres_core::money::Money;
/// use ceres_core::proposal::recalculate;
///
/// // Manual-value proposal with a rebate
/// let gross = recalculate(&[], Money::from_cents(-2000), Some(Money::from_cents(50000))).unwrap();
/// assert_eq!(gross.cents(), 48000);
/// ```
pub fn recalculate(
    items: &[LineItem],
    value_adjustment: Money,
    manual_value: Option<Money>,
) -> CoreResult<Money> {
    let base = match (items.is_empty(), manual_value) {
        (false, Some(_)) => return Err(CoreError::ManualValueWithItems),
        (false, None) => items_total(items)?,
        (true, Some(manual)) => manual,
        (true, None) => return Err(CoreError::NoItemsNoManualValue),
    };

    let gross = base.checked_add(value_adjustment)?;
    if gross.is_negative() {
        return Err(CoreError::NegativeGrossValue { value: gross });
    }
    Ok(gross)
}

/// Like [`recalculate`], but an empty proposal without a manual value is a
/// legitimate open state (the seller has not priced anything yet) and yields
/// `None` instead of an error.
pub fn derive_gross(
    items: &[LineItem],
    value_adjustment: Money,
    manual_value: Option<Money>,
) -> CoreResult<Option<Money>> {
    if items.is_empty() && manual_value.is_none() {
        return Ok(None);
    }
    recalculate(items, value_adjustment, manual_value).map(Some)
}

// =============================================================================
// Unit Tests
// =============================================================================
