//! # Money Module
//!
//! Provides the `Money` and `Percent` types used by every pricing and
//! commission calculation.
//!
//! ## Two Kinds of Numbers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  WHAT IS ROUNDED, AND WHEN                                              │
//! │                                                                         │
//! │  Money (i64 cents)         subtotal, grossValue, totalCost, profit,     │
//! │                            valueAdjustment, commission amount           │
//! │                                                                         │
//! │  Decimal (exact)           effective unit price, every percentage       │
//! │                                                                         │
//! │  Decimal ──► Money::from_decimal() ──► 2 places, half-up               │
//! │                                                                         │
//! │  A unit price edited ten times is never rounded ten times. It becomes   │
//! │  money exactly once, when a subtotal or total is produced.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use ceres_core::money::{Money, Percent};
//! use rust_decimal::Decimal;
//!
//! let gross = Money::from_cents(30000); // 300.00
//! let final_discount = Percent::new(Decimal::from(5)).unwrap();
//!
//! let discounted = gross.discounted_by(final_discount).unwrap();
//! assert_eq!(discounted.cents(), 28500); // 285.00
//! ```

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};

/// Currency amounts carry two decimal places.
pub const DECIMAL_PLACES: u32 = 2;

/// Tolerance for comparing two amounts that went through different
/// derivation paths (one cent).
pub const MONEY_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Rounds a decimal amount to currency precision using half-up
/// (midpoint away from zero).
///
/// ```rust
/// use ceres_core::money::round_money;
/// use rust_decimal::Decimal;
///
/// assert_eq!(round_money(Decimal::new(1005, 3)), Decimal::new(101, 2)); // 1.005 → 1.01
/// assert_eq!(round_money(Decimal::new(-1005, 3)), Decimal::new(-101, 2));
/// ```
#[inline]
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in cents.
///
/// ## Design Decisions
/// - **i64 (signed)**: value adjustments and rebates can be negative
/// - **Single field tuple struct**: zero-cost abstraction over i64
/// - **No float constructor**: amounts enter as cents or as exact decimals
///
/// ## Where Money Flows
/// ```text
/// Product.list_price ──► LineItem.anchor_price
///                              │
/// LineItem.subtotal ──► Σ ──► Opportunity.gross_value ──► Sale.gross_value
///                                                               │
///                              Commission.amount ◄── base × % ──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    ///
    /// ```rust
    /// use ceres_core::money::Money;
    ///
    /// let price = Money::from_cents(27000); // 270.00
    /// assert_eq!(price.cents(), 27000);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from major and minor units.
    ///
    /// For negative amounts only the major unit carries the sign:
    /// `from_major_minor(-5, 50)` is -5.50.
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Converts an exact decimal amount to money, rounding half-up to
    /// two places.
    ///
    /// ## Errors
    /// [`CoreError::AmountOverflow`] when the amount does not fit in i64 cents.
    ///
    /// ```rust
    /// use ceres_core::money::Money;
    /// use rust_decimal::Decimal;
    ///
    /// let m = Money::from_decimal(Decimal::new(28_495, 3)).unwrap(); // 28.495
    /// assert_eq!(m.cents(), 2850);
    /// ```
    pub fn from_decimal(amount: Decimal) -> CoreResult<Money> {
        round_money(amount)
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|cents| cents.to_i64())
            .map(Money)
            .ok_or(CoreError::AmountOverflow)
    }

    /// Returns the exact decimal value (two decimal places).
    #[inline]
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, DECIMAL_PLACES)
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn minor_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Adds two amounts, failing instead of wrapping.
    ///
    /// ```rust
    /// use ceres_core::money::Money;
    ///
    /// assert_eq!(Money::from_cents(150).checked_add(Money::from_cents(50)).unwrap().cents(), 200);
    /// assert!(Money::from_cents(i64::MAX).checked_add(Money::from_cents(1)).is_err());
    /// ```
    #[inline]
    pub fn checked_add(self, other: Money) -> CoreResult<Money> {
        self.0.checked_add(other.0).map(Money).ok_or(CoreError::AmountOverflow)
    }

    #[inline]
    pub fn checked_sub(self, other: Money) -> CoreResult<Money> {
        self.0.checked_sub(other.0).map(Money).ok_or(CoreError::AmountOverflow)
    }

    /// Multiplies money by a quantity.
    #[inline]
    pub fn checked_mul(self, qty: i64) -> CoreResult<Money> {
        self.0.checked_mul(qty).map(Money).ok_or(CoreError::AmountOverflow)
    }

    /// Sums amounts, failing on the first overflow.
    pub fn checked_sum(amounts: impl IntoIterator<Item = Money>) -> CoreResult<Money> {
        amounts
            .into_iter()
            .try_fold(Money::zero(), |total, amount| total.checked_add(amount))
    }

    /// Returns `percent` of this amount, rounded half-up.
    ///
    /// Used for commission amounts and margin-based profit.
    ///
    /// ```rust
    /// use ceres_core::money::{Money, Percent};
    /// use rust_decimal::Decimal;
    ///
    /// let gross = Money::from_cents(28500);
    /// let rate = Percent::new(Decimal::from(10)).unwrap();
    /// assert_eq!(gross.apply_percent(rate).unwrap().cents(), 2850);
    /// ```
    pub fn apply_percent(&self, percent: Percent) -> CoreResult<Money> {
        let value = self
            .to_decimal()
            .checked_mul(percent.fraction())
            .ok_or(CoreError::AmountOverflow)?;
        Money::from_decimal(value)
    }

    /// Returns this amount reduced by `percent`, rounded half-up.
    ///
    /// `round(amount × (1 − percent/100), 2)`
    pub fn discounted_by(&self, percent: Percent) -> CoreResult<Money> {
        let value = self
            .to_decimal()
            .checked_mul(percent.complement())
            .ok_or(CoreError::AmountOverflow)?;
        Money::from_decimal(value)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Plain `-1234.50` rendering. Currency symbols and localisation belong to
/// whatever renders documents.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.major().abs(), self.minor_part())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

// =============================================================================
// Percent Type
// =============================================================================

/// A percentage in `[0, 100]`, kept as an exact decimal.
///
/// Discounts, commission rates and margins all use this type. The value is
/// never rounded: a discount derived from an edited price may carry many
/// decimal places so that the price can be derived back exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(try_from = "Decimal", into = "Decimal")]
#[ts(export)]
pub struct Percent(#[ts(type = "string")] Decimal);

impl Percent {
    /// Validates and wraps a percentage.
    ///
    /// ```rust
    /// use ceres_core::money::Percent;
    /// use rust_decimal::Decimal;
    ///
    /// assert!(Percent::new(Decimal::from(10)).is_ok());
    /// assert!(Percent::new(Decimal::from(101)).is_err());
    /// assert!(Percent::new(Decimal::from(-1)).is_err());
    /// ```
    pub fn new(value: Decimal) -> Result<Self, ValidationError> {
        Self::for_field("percent", value)
    }

    /// Same as [`Percent::new`] but names the offending field in the error.
    pub fn for_field(field: &str, value: Decimal) -> Result<Self, ValidationError> {
        if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                min: 0,
                max: 100,
            });
        }
        Ok(Percent(value))
    }

    #[inline]
    pub const fn zero() -> Self {
        Percent(Decimal::ZERO)
    }

    #[inline]
    pub fn value(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// `percent / 100`
    #[inline]
    pub fn fraction(&self) -> Decimal {
        self.0 / Decimal::ONE_HUNDRED
    }

    /// `1 − percent / 100`
    #[inline]
    pub fn complement(&self) -> Decimal {
        Decimal::ONE - self.fraction()
    }
}

impl Default for Percent {
    fn default() -> Self {
        Percent::zero()
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0.normalize())
    }
}

impl TryFrom<Decimal> for Percent {
    type Error = ValidationError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Percent::new(value)
    }
}

impl From<Percent> for Decimal {
    fn from(percent: Percent) -> Self {
        percent.0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
