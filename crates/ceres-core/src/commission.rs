//! # Commission Rules and Ledger Entries
//!
//! Resolves which configured rule pays the seller of a sale, and governs the
//! pay-status lifecycle of the resulting commission.
//!
//! ## Rule Precedence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Tier 1  scope = product    rule.product_id ∈ products on the sale      │
//! │  Tier 2  scope = category   rule.category == dominant category          │
//! │  Tier 3  scope = global                                                 │
//! │                                                                         │
//! │  Inactive rules are ignored. Inside a tier the earliest created rule    │
//! │  wins; equal timestamps fall back to the lowest id.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Pay Status
//! ```text
//!   pending ──► approved ──► paid
//!      │            │
//!      └─────┬──────┘
//!            ▼
//!        canceled
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::{Money, Percent};
use crate::sale::Sale;
use crate::types::{new_id, ServiceKind};

// =============================================================================
// Rule Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    Global,
    Category,
    Product,
}

/// Which figure of the sale the commission percentage multiplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CommissionBase {
    Profit,
    Gross,
    Maintenance,
    Revision,
    Spraying,
}

impl CommissionBase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionBase::Profit => "profit",
            CommissionBase::Gross => "gross",
            CommissionBase::Maintenance => "maintenance",
            CommissionBase::Revision => "revision",
            CommissionBase::Spraying => "spraying",
        }
    }

    /// The service kind a service base draws from.
    pub fn service_kind(&self) -> Option<ServiceKind> {
        match self {
            CommissionBase::Maintenance => Some(ServiceKind::Maintenance),
            CommissionBase::Revision => Some(ServiceKind::Revision),
            CommissionBase::Spraying => Some(ServiceKind::Spraying),
            CommissionBase::Profit | CommissionBase::Gross => None,
        }
    }
}

impl fmt::Display for CommissionBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admin-maintained commission rule. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CommissionRule {
    pub id: String,
    pub scope: RuleScope,
    /// Set when `scope = product`.
    pub product_id: Option<String>,
    /// Set when `scope = category`.
    pub category: Option<String>,
    pub base: CommissionBase,
    pub percent: Percent,
    pub active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl CommissionRule {
    fn matches(&self, sale: &Sale, dominant_category: Option<&str>) -> bool {
        if !self.active {
            return false;
        }
        match self.scope {
            RuleScope::Product => self
                .product_id
                .as_deref()
                .is_some_and(|id| sale.items.iter().any(|item| item.product_id == id)),
            RuleScope::Category => {
                dominant_category.is_some() && self.category.as_deref() == dominant_category
            }
            RuleScope::Global => true,
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Outcome of rule resolution for one sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Resolution {
    pub rule_id: String,
    pub base: CommissionBase,
    pub percent: Percent,
    /// The sale figure the percentage applies to.
    pub base_amount: Money,
}

/// Earliest created wins; ties fall back to the lowest id.
fn select_winner<'a>(rules: impl Iterator<Item = &'a CommissionRule>) -> Option<&'a CommissionRule> {
    rules.min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
}

/// Picks the applicable rule for `sale` and the amount it applies to.
///
/// ## Errors
/// Both errors are soft failures: the sale stands, no commission is created.
/// - [`CoreError::NoApplicableRule`] when no active rule matches
/// - [`CoreError::ServiceTotalUnavailable`] when the winning rule uses a
///   service base and the sale has no service of that kind
pub fn resolve(sale: &Sale, rules: &[CommissionRule]) -> CoreResult<Resolution> {
    let dominant = sale.dominant_category();

    let winner = [RuleScope::Product, RuleScope::Category, RuleScope::Global]
        .into_iter()
        .find_map(|scope| {
            select_winner(
                rules
                    .iter()
                    .filter(|rule| rule.scope == scope && rule.matches(sale, dominant)),
            )
        })
        .ok_or_else(|| CoreError::NoApplicableRule {
            sale_id: sale.id.clone(),
        })?;

    let base_amount = match winner.base.service_kind() {
        None if winner.base == CommissionBase::Profit => sale.estimated_profit,
        None => sale.gross_value,
        Some(kind) => sale
            .service_total(kind)
            .ok_or_else(|| CoreError::ServiceTotalUnavailable {
                sale_id: sale.id.clone(),
                base: winner.base,
            })?,
    };

    Ok(Resolution {
        rule_id: winner.id.clone(),
        base: winner.base,
        percent: winner.percent,
        base_amount,
    })
}

// =============================================================================
// Pay Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PayStatus {
    Pending,
    Approved,
    Paid,
    Canceled,
}

impl PayStatus {
    pub const ALL: [PayStatus; 4] = [
        PayStatus::Pending,
        PayStatus::Approved,
        PayStatus::Paid,
        PayStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PayStatus::Pending => "pending",
            PayStatus::Approved => "approved",
            PayStatus::Paid => "paid",
            PayStatus::Canceled => "canceled",
        }
    }

    pub fn can_transition_to(&self, to: PayStatus) -> bool {
        matches!(
            (self, to),
            (PayStatus::Pending, PayStatus::Approved)
                | (PayStatus::Approved, PayStatus::Paid)
                | (PayStatus::Pending, PayStatus::Canceled)
                | (PayStatus::Approved, PayStatus::Canceled)
        )
    }
}

impl Default for PayStatus {
    fn default() -> Self {
        PayStatus::Pending
    }
}

impl fmt::Display for PayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PayStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "pay_status".to_string(),
                allowed: PayStatus::ALL.iter().map(|s| s.as_str().to_string()).collect(),
            })
    }
}

// =============================================================================
// Commission
// =============================================================================

/// One commission per sale. At most one non-canceled row exists per sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Commission {
    pub id: String,
    pub sale_id: String,
    pub seller_id: String,
    pub rule_id: Option<String>,
    pub base: CommissionBase,
    pub percent: Percent,
    pub base_amount: Money,
    /// `round(base_amount × percent/100, 2)`
    pub amount: Money,
    pub pay_status: PayStatus,
    /// Stamped once, when the commission is paid.
    #[ts(as = "Option<String>")]
    pub pay_status_date: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Commission {
    /// Creates a pending commission for the sale's seller.
    ///
    /// A profit base below zero (a sale closed under cost) keeps the
    /// negative `base_amount` on record but pays nothing.
    pub fn record(
        sale: &Sale,
        seller_id: &str,
        resolution: &Resolution,
        now: DateTime<Utc>,
    ) -> CoreResult<Self> {
        let amount = resolution.base_amount.apply_percent(resolution.percent)?;
        Ok(Self {
            id: new_id(),
            sale_id: sale.id.clone(),
            seller_id: seller_id.to_string(),
            rule_id: Some(resolution.rule_id.clone()),
            base: resolution.base,
            percent: resolution.percent,
            base_amount: resolution.base_amount,
            amount: amount.max(Money::zero()),
            pay_status: PayStatus::Pending,
            pay_status_date: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Advances the pay status. Returns `false` for a same-status update.
    pub fn transition(&mut self, to: PayStatus, now: DateTime<Utc>) -> CoreResult<bool> {
        if to == self.pay_status {
            return Ok(false);
        }
        if !self.pay_status.can_transition_to(to) {
            return Err(CoreError::InvalidPayStatusTransition {
                from: self.pay_status,
                to,
            });
        }

        self.pay_status = to;
        if to == PayStatus::Paid && self.pay_status_date.is_none() {
            self.pay_status_date = Some(now);
        }
        self.updated_at = now;
        Ok(true)
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        self.pay_status == PayStatus::Canceled
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
