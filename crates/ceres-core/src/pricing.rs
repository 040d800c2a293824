//! # Line-Item Pricing
//!
//! Price and discount of a line item are two views of the same number,
//! both measured against the item's **anchor price** (the product's list
//! price when the item was added).
//!
//! ## Cross-Derivation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   set_unit_price(p)                  set_discount_percent(d)            │
//! │        │                                   │                            │
//! │        ▼                                   ▼                            │
//! │   d = (anchor − p) / anchor × 100     p = anchor × (1 − d/100)          │
//! │        │   (0 when p ≥ anchor)             │                            │
//! │        └──────────────┬────────────────────┘                            │
//! │                       ▼                                                 │
//! │              d ≤ max_discount_percent ?  ── no ──► DiscountExceedsLimit │
//! │                       │ yes                        (item untouched)     │
//! │                       ▼                                                 │
//! │   subtotal = round(quantity × unit_price × (1 − d/100), 2)             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Neither the price nor the discount is ever rounded. Only the subtotal
//! becomes money, so repeated edits cannot drift.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::{Money, Percent};
use crate::types::Product;
use crate::validation::{validate_quantity, validate_unit_price};

// =============================================================================
// Line Item
// =============================================================================

/// One product row on a proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LineItem {
    pub product_id: String,

    /// Product name when the item was added.
    pub product_name: String,

    /// Product category when the item was added. Drives the dominant
    /// category used by commission resolution.
    pub category: String,

    pub quantity: i64,

    /// List price when the item was added.
    pub anchor_price: Money,

    /// Effective unit price (exact, never rounded).
    #[ts(type = "string")]
    pub unit_price: Decimal,

    pub discount_percent: Percent,

    /// Product discount ceiling when the item was added.
    pub max_discount_percent: Percent,

    /// `round(quantity × unit_price × (1 − discount_percent/100), 2)`
    pub subtotal: Money,
}

/// A partial edit of a line item.
///
/// Fields are applied in order quantity, discount, price, so when both a
/// price and a discount are supplied the price wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LineItemPatch {
    pub quantity: Option<i64>,
    #[ts(type = "string | null")]
    pub unit_price: Option<Decimal>,
    pub discount_percent: Option<Percent>,
}

impl LineItemPatch {
    pub fn is_empty(&self) -> bool {
        self.quantity.is_none() && self.unit_price.is_none() && self.discount_percent.is_none()
    }
}

// =============================================================================
// Pure Derivations
// =============================================================================

/// `round(quantity × unit_price × (1 − discount/100), 2)`
pub fn compute_subtotal(quantity: i64, unit_price: Decimal, discount: Percent) -> CoreResult<Money> {
    let amount = Decimal::from(quantity)
        .checked_mul(unit_price)
        .and_then(|v| v.checked_mul(discount.complement()))
        .ok_or(CoreError::AmountOverflow)?;
    Money::from_decimal(amount)
}

/// Discount implied by a unit price against an anchor.
///
/// A price at or above the anchor is a markup and implies no discount. A
/// zero anchor (free item) also implies no discount.
pub fn derive_discount(anchor: Money, unit_price: Decimal) -> Decimal {
    let anchor = anchor.to_decimal();
    if anchor <= Decimal::ZERO || unit_price >= anchor {
        return Decimal::ZERO;
    }
    (anchor - unit_price) / anchor * Decimal::ONE_HUNDRED
}

/// Unit price implied by a discount against an anchor.
pub fn derive_unit_price(anchor: Money, discount: Percent) -> Decimal {
    anchor.to_decimal() * discount.complement()
}

fn check_limit(product_id: &str, discount: Decimal, max: Percent) -> CoreResult<Percent> {
    if discount > max.value() {
        return Err(CoreError::DiscountExceedsLimit {
            product_id: product_id.to_string(),
            requested: discount.normalize(),
            max: max.value().normalize(),
        });
    }
    Ok(Percent::for_field("discount_percent", discount)?)
}

// =============================================================================
// Operations
// =============================================================================

/// Builds a line item for `product`.
///
/// The anchor is the product's current list price. Without overrides the
/// item starts at the list price with no discount. A single override is
/// cross-derived into the other field. When both are given both are kept as
/// entered.
///
/// ## Errors
/// - [`CoreError::ProductInactive`] for inactive products
/// - [`CoreError::Validation`] for a bad quantity or negative price
/// - [`CoreError::DiscountExceedsLimit`] when the resulting discount is above
///   the product's limit
pub fn add_item(
    product: &Product,
    quantity: i64,
    override_price: Option<Decimal>,
    override_discount: Option<Percent>,
) -> CoreResult<LineItem> {
    if !product.is_active() {
        return Err(CoreError::ProductInactive(product.id.clone()));
    }
    validate_quantity(quantity)?;
    if let Some(price) = override_price {
        validate_unit_price(price)?;
    }

    let anchor = product.list_price;
    let (unit_price, discount) = match (override_price, override_discount) {
        (None, None) => (anchor.to_decimal(), Decimal::ZERO),
        (Some(price), None) => (price, derive_discount(anchor, price)),
        (None, Some(discount)) => (derive_unit_price(anchor, discount), discount.value()),
        (Some(price), Some(discount)) => (price, discount.value()),
    };
    let discount = check_limit(&product.id, discount, product.max_discount_percent)?;

    Ok(LineItem {
        product_id: product.id.clone(),
        product_name: product.name.clone(),
        category: product.category.clone(),
        quantity,
        anchor_price: anchor,
        unit_price,
        discount_percent: discount,
        max_discount_percent: product.max_discount_percent,
        subtotal: compute_subtotal(quantity, unit_price, discount)?,
    })
}

impl LineItem {
    /// Changes the effective unit price and re-derives the discount.
    pub fn set_unit_price(&mut self, unit_price: Decimal) -> CoreResult<()> {
        validate_unit_price(unit_price)?;
        let discount = check_limit(
            &self.product_id,
            derive_discount(self.anchor_price, unit_price),
            self.max_discount_percent,
        )?;
        let subtotal = compute_subtotal(self.quantity, unit_price, discount)?;

        self.unit_price = unit_price;
        self.discount_percent = discount;
        self.subtotal = subtotal;
        Ok(())
    }

    /// Changes the discount and re-derives the unit price.
    pub fn set_discount_percent(&mut self, discount: Percent) -> CoreResult<()> {
        let discount = check_limit(&self.product_id, discount.value(), self.max_discount_percent)?;
        let unit_price = derive_unit_price(self.anchor_price, discount);
        let subtotal = compute_subtotal(self.quantity, unit_price, discount)?;

        self.unit_price = unit_price;
        self.discount_percent = discount;
        self.subtotal = subtotal;
        Ok(())
    }

    /// Changes the quantity. Price and discount are left alone.
    pub fn set_quantity(&mut self, quantity: i64) -> CoreResult<()> {
        validate_quantity(quantity)?;
        let subtotal = compute_subtotal(quantity, self.unit_price, self.discount_percent)?;

        self.quantity = quantity;
        self.subtotal = subtotal;
        Ok(())
    }

    /// Applies a patch atomically: either every field is applied or the
    /// item is left as it was.
    pub fn apply(&mut self, patch: &LineItemPatch) -> CoreResult<()> {
        let mut next = self.clone();
        if let Some(quantity) = patch.quantity {
            next.set_quantity(quantity)?;
        }
        if let Some(discount) = patch.discount_percent {
            next.set_discount_percent(discount)?;
        }
        if let Some(price) = patch.unit_price {
            next.set_unit_price(price)?;
        }
        *self = next;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
