//! # Opportunity State Machine
//!
//! An opportunity is a proposal moving through sales stages. It owns its
//! line items and derives its gross value after every edit.
//!
//! ## Stages
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   lead ◄──► qualified ◄──► proposal ◄──► closing        (any ↔ any)    │
//! │     │           │             │             │                           │
//! │     └───────────┴──────┬──────┴─────────────┘                           │
//! │                        │                                                │
//! │          transition()  │  convert to sale (ceres-engine)                │
//! │                ▼       ▼                                                │
//! │              lost     won          terminal, content frozen             │
//! │                                                                         │
//! │   correct_stage(): admin only, never targets won, never unfreezes       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `won` is only reachable through [`Opportunity::mark_won`], which the
//! engine calls inside the same transaction that writes the sale.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::{Money, Percent};
use crate::pricing::{self, LineItem, LineItemPatch};
use crate::proposal;
use crate::sale::validate_payment_methods;
use crate::types::{new_id, Actor, PaymentMethod, Product};
use crate::validation::{validate_amount, validate_name, validate_probability, validate_reference};

// =============================================================================
// Stage
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Lead,
    Qualified,
    Proposal,
    Closing,
    Won,
    Lost,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Lead,
        Stage::Qualified,
        Stage::Proposal,
        Stage::Closing,
        Stage::Won,
        Stage::Lost,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Lead => "lead",
            Stage::Qualified => "qualified",
            Stage::Proposal => "proposal",
            Stage::Closing => "closing",
            Stage::Won => "won",
            Stage::Lost => "lost",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Won | Stage::Lost)
    }
}

impl Default for Stage {
    fn default() -> Self {
        Stage::Lead
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "stage".to_string(),
                allowed: Stage::ALL.iter().map(|s| s.as_str().to_string()).collect(),
            })
    }
}

// =============================================================================
// Opportunity
// =============================================================================

/// Input for creating an opportunity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewOpportunity {
    pub client_id: String,
    pub seller_id: String,
    pub title: String,
    #[serde(default)]
    pub probability: i64,
    pub estimated_margin_percent: Option<Percent>,
    /// Gross value for a proposal priced without products.
    pub manual_value: Option<Money>,
    #[serde(default)]
    pub value_adjustment: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Opportunity {
    pub id: String,
    pub client_id: String,
    pub seller_id: String,
    pub title: String,
    pub stage: Stage,

    /// Line items in the order they were added. A product appears once.
    pub items: Vec<LineItem>,

    /// Signed manual surcharge (positive) or rebate (negative).
    pub value_adjustment: Money,

    /// Gross value entered by hand when the proposal has no items.
    pub manual_value: Option<Money>,

    /// Derived. `None` while the proposal has neither items nor a manual value.
    pub gross_value: Option<Money>,

    pub probability: i64,
    pub estimated_margin_percent: Option<Percent>,

    /// Set once, when the opportunity is converted.
    pub sale_id: Option<String>,

    /// Optimistic lock counter, bumped by every successful save.
    pub version: i64,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    /// Set when the opportunity is won or lost. Content stays frozen from
    /// then on, even if an administrator later corrects the stage.
    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Opportunity {
    /// Creates an opportunity in the `lead` stage.
    pub fn create(input: NewOpportunity, now: DateTime<Utc>) -> CoreResult<Self> {
        validate_reference("client_id", &input.client_id)?;
        validate_reference("seller_id", &input.seller_id)?;
        let title = validate_name("title", &input.title)?;
        validate_probability(input.probability)?;
        if let Some(manual) = input.manual_value {
            validate_amount("manual_value", manual)?;
        }

        let gross_value = proposal::derive_gross(&[], input.value_adjustment, input.manual_value)?;

        Ok(Self {
            id: new_id(),
            client_id: input.client_id,
            seller_id: input.seller_id,
            title,
            stage: Stage::Lead,
            items: Vec::new(),
            value_adjustment: input.value_adjustment,
            manual_value: input.manual_value,
            gross_value,
            probability: input.probability,
            estimated_margin_percent: input.estimated_margin_percent,
            sale_id: None,
            version: 0,
            created_at: now,
            updated_at: now,
            closed_at: None,
        })
    }

    /// Content may be edited only while the opportunity is open.
    pub fn is_editable(&self) -> bool {
        !self.stage.is_terminal() && self.closed_at.is_none()
    }

    fn ensure_editable(&self) -> CoreResult<()> {
        if !self.is_editable() {
            return Err(CoreError::OpportunityClosed {
                id: self.id.clone(),
                stage: self.stage,
            });
        }
        Ok(())
    }

    /// Recomputes the gross value of `next` and swaps it in. Nothing on
    /// `self` changes if the recomputation fails.
    fn commit(&mut self, mut next: Opportunity, now: DateTime<Utc>) -> CoreResult<()> {
        next.gross_value =
            proposal::derive_gross(&next.items, next.value_adjustment, next.manual_value)?;
        next.updated_at = now;
        *self = next;
        Ok(())
    }

    pub fn item(&self, product_id: &str) -> Option<&LineItem> {
        self.items.iter().find(|item| item.product_id == product_id)
    }

    // =========================================================================
    // Line Items
    // =========================================================================

    /// Adds a product to the proposal.
    pub fn add_item(
        &mut self,
        product: &Product,
        quantity: i64,
        override_price: Option<Decimal>,
        override_discount: Option<Percent>,
        now: DateTime<Utc>,
    ) -> CoreResult<&LineItem> {
        self.ensure_editable()?;
        if self.item(&product.id).is_some() {
            return Err(CoreError::DuplicateLineItem(product.id.clone()));
        }
        if self.manual_value.is_some() {
            return Err(CoreError::ManualValueWithItems);
        }

        let item = pricing::add_item(product, quantity, override_price, override_discount)?;
        let mut next = self.clone();
        next.items.push(item);
        self.commit(next, now)?;

        let index = self.items.len() - 1;
        Ok(&self.items[index])
    }

    /// Edits quantity, price or discount of one line item.
    pub fn update_item(
        &mut self,
        product_id: &str,
        patch: &LineItemPatch,
        now: DateTime<Utc>,
    ) -> CoreResult<&LineItem> {
        self.ensure_editable()?;
        let index = self
            .items
            .iter()
            .position(|item| item.product_id == product_id)
            .ok_or_else(|| CoreError::LineItemNotFound(product_id.to_string()))?;

        let mut next = self.clone();
        next.items[index].apply(patch)?;
        self.commit(next, now)?;
        Ok(&self.items[index])
    }

    pub fn remove_item(&mut self, product_id: &str, now: DateTime<Utc>) -> CoreResult<LineItem> {
        self.ensure_editable()?;
        let index = self
            .items
            .iter()
            .position(|item| item.product_id == product_id)
            .ok_or_else(|| CoreError::LineItemNotFound(product_id.to_string()))?;

        let mut next = self.clone();
        let removed = next.items.remove(index);
        self.commit(next, now)?;
        Ok(removed)
    }

    pub fn set_value_adjustment(&mut self, adjustment: Money, now: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_editable()?;
        let mut next = self.clone();
        next.value_adjustment = adjustment;
        self.commit(next, now)
    }

    /// Sets or clears the manual gross value. Only allowed while the
    /// proposal has no line items.
    pub fn set_manual_value(&mut self, value: Option<Money>, now: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_editable()?;
        if value.is_some() && !self.items.is_empty() {
            return Err(CoreError::ManualValueWithItems);
        }
        if let Some(manual) = value {
            validate_amount("manual_value", manual)?;
        }
        let mut next = self.clone();
        next.manual_value = value;
        self.commit(next, now)
    }

    pub fn set_probability(&mut self, probability: i64, now: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_editable()?;
        validate_probability(probability)?;
        self.probability = probability;
        self.updated_at = now;
        Ok(())
    }

    pub fn set_estimated_margin(&mut self, margin: Option<Percent>, now: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_editable()?;
        self.estimated_margin_percent = margin;
        self.updated_at = now;
        Ok(())
    }

    // =========================================================================
    // Stage Transitions
    // =========================================================================

    /// Moves the opportunity to another stage.
    ///
    /// Returns `false` when `to` is the current stage. Entering `lost`
    /// freezes the content.
    ///
    /// ## Errors
    /// [`CoreError::InvalidStageTransition`] when leaving a terminal stage or
    /// targeting `won` (which requires sale conversion).
    pub fn transition(&mut self, to: Stage, now: DateTime<Utc>) -> CoreResult<bool> {
        if to == self.stage {
            return Ok(false);
        }
        if self.stage.is_terminal() || to == Stage::Won {
            return Err(CoreError::InvalidStageTransition {
                from: self.stage,
                to,
            });
        }

        self.stage = to;
        if to == Stage::Lost {
            self.closed_at = Some(now);
        }
        self.updated_at = now;
        Ok(true)
    }

    /// Administrative stage correction. May leave a terminal stage, never
    /// enters `won`, and never unfreezes content or recomputes totals.
    pub fn correct_stage(&mut self, to: Stage, actor: &Actor, now: DateTime<Utc>) -> CoreResult<bool> {
        if !actor.is_admin() {
            return Err(CoreError::AdminOnly {
                action: "correct an opportunity stage".to_string(),
            });
        }
        if to == Stage::Won {
            return Err(CoreError::InvalidStageTransition {
                from: self.stage,
                to,
            });
        }
        if to == self.stage {
            return Ok(false);
        }

        self.stage = to;
        if to == Stage::Lost && self.closed_at.is_none() {
            self.closed_at = Some(now);
        }
        self.updated_at = now;
        Ok(true)
    }

    /// Checks every precondition for entering `won` and returns the gross
    /// value the sale will be built from. Does not modify the opportunity.
    ///
    /// ## Errors
    /// - [`CoreError::OpportunityClosed`] if the opportunity is not open
    /// - payment method errors from [`validate_payment_methods`]
    /// - [`CoreError::NoItemsNoManualValue`] if nothing is priced
    pub fn check_ready_to_win(
        &self,
        payment_methods: &[PaymentMethod],
        max_payment_methods: usize,
    ) -> CoreResult<Money> {
        self.ensure_editable()?;
        validate_payment_methods(payment_methods, max_payment_methods)?;
        proposal::recalculate(&self.items, self.value_adjustment, self.manual_value)
    }

    /// Freezes the opportunity at `won` and records the sale it became.
    pub fn mark_won(&mut self, sale_id: &str, now: DateTime<Utc>) -> CoreResult<()> {
        self.ensure_editable()?;
        self.stage = Stage::Won;
        self.sale_id = Some(sale_id.to_string());
        self.closed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProductStatus, Role};
    use rust_decimal_macros::dec;

    fn product(id: &str, list_cents: i64) -> Product {
        Product {
            id: id.to_string(),
            name: format!("Product {id}"),
            list_price: Money::from_cents(list_cents),
            unit_cost: Money::from_cents(list_cents / 2),
            max_discount_percent: Percent::new(dec!(20)).unwrap(),
            category: "tractors".to_string(),
            status: ProductStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn opportunity() -> Opportunity {
        Opportunity::create(
            NewOpportunity {
                client_id: "client-1".to_string(),
                seller_id: "seller-1".to_string(),
                title: "Harvest season".to_string(),
                probability: 40,
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn pct(value: Decimal) -> Percent {
        Percent::new(value).unwrap()
    }

    #[test]
    fn test_create_starts_as_lead_without_value() {
        let opp = opportunity();
        assert_eq!(opp.stage, Stage::Lead);
        assert_eq!(opp.gross_value, None);
        assert!(opp.is_editable());
    }

    #[test]
    fn test_create_validates_input() {
        let result = Opportunity::create(
            NewOpportunity {
                client_id: "".to_string(),
                seller_id: "seller-1".to_string(),
                title: "x".to_string(),
                ..Default::default()
            },
            Utc::now(),
        );
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_scenario_gross_value() {
        let now = Utc::now();
        let mut opp = opportunity();

        opp.add_item(&product("a", 10000), 3, Some(dec!(100)), Some(pct(dec!(10))), now)
            .unwrap();
        assert_eq!(opp.gross_value, Some(Money::from_cents(27000)));

        opp.add_item(&product("b", 5000), 1, Some(dec!(50)), Some(Percent::zero()), now)
            .unwrap();
        assert_eq!(opp.gross_value, Some(Money::from_cents(32000)));

        opp.set_value_adjustment(Money::from_cents(-2000), now).unwrap();
        assert_eq!(opp.gross_value, Some(Money::from_cents(30000)));
    }

    #[test]
    fn test_gross_never_stale_after_item_edits() {
        let now = Utc::now();
        let mut opp = opportunity();
        opp.add_item(&product("a", 10000), 1, None, None, now).unwrap();
        opp.add_item(&product("b", 2500), 2, None, None, now).unwrap();

        let patch = LineItemPatch {
            quantity: Some(2),
            ..Default::default()
        };
        opp.update_item("a", &patch, now).unwrap();
        assert_eq!(opp.gross_value, Some(Money::from_cents(25000)));

        opp.remove_item("b", now).unwrap();
        assert_eq!(opp.gross_value, Some(Money::from_cents(20000)));

        opp.remove_item("a", now).unwrap();
        assert_eq!(opp.gross_value, None);
    }

    #[test]
    fn test_duplicate_and_missing_items() {
        let now = Utc::now();
        let mut opp = opportunity();
        opp.add_item(&product("a", 10000), 1, None, None, now).unwrap();

        assert!(matches!(
            opp.add_item(&product("a", 10000), 1, None, None, now),
            Err(CoreError::DuplicateLineItem(_))
        ));
        assert!(matches!(
            opp.remove_item("zzz", now),
            Err(CoreError::LineItemNotFound(_))
        ));
    }

    #[test]
    fn test_negative_adjustment_rejected_without_change() {
        let now = Utc::now();
        let mut opp = opportunity();
        opp.add_item(&product("a", 1000), 1, None, None, now).unwrap();
        let before = opp.clone();

        assert!(matches!(
            opp.set_value_adjustment(Money::from_cents(-5000), now),
            Err(CoreError::NegativeGrossValue { .. })
        ));
        assert_eq!(opp, before);
    }

    #[test]
    fn test_manual_value_path() {
        let now = Utc::now();
        let mut opp = opportunity();
        opp.set_manual_value(Some(Money::from_cents(150000)), now).unwrap();
        assert_eq!(opp.gross_value, Some(Money::from_cents(150000)));

        assert!(matches!(
            opp.add_item(&product("a", 1000), 1, None, None, now),
            Err(CoreError::ManualValueWithItems)
        ));

        opp.set_manual_value(None, now).unwrap();
        opp.add_item(&product("a", 1000), 1, None, None, now).unwrap();
        assert!(matches!(
            opp.set_manual_value(Some(Money::from_cents(1)), now),
            Err(CoreError::ManualValueWithItems)
        ));
    }

    #[test]
    fn test_transitions_between_open_stages() {
        let now = Utc::now();
        let mut opp = opportunity();
        assert!(opp.transition(Stage::Closing, now).unwrap());
        assert!(opp.transition(Stage::Qualified, now).unwrap());
        assert!(!opp.transition(Stage::Qualified, now).unwrap());
    }

    #[test]
    fn test_won_only_through_conversion() {
        let mut opp = opportunity();
        assert!(matches!(
            opp.transition(Stage::Won, Utc::now()),
            Err(CoreError::InvalidStageTransition { .. })
        ));
        assert_eq!(opp.stage, Stage::Lead);
    }

    #[test]
    fn test_lost_is_terminal_and_frozen() {
        let now = Utc::now();
        let mut opp = opportunity();
        opp.transition(Stage::Lost, now).unwrap();
        assert!(opp.closed_at.is_some());

        assert!(matches!(
            opp.transition(Stage::Proposal, now),
            Err(CoreError::InvalidStageTransition { .. })
        ));
        assert!(matches!(
            opp.add_item(&product("a", 1000), 1, None, None, now),
            Err(CoreError::OpportunityClosed { .. })
        ));
    }

    #[test]
    fn test_correct_stage_is_admin_only_and_keeps_content_frozen() {
        let now = Utc::now();
        let mut opp = opportunity();
        opp.transition(Stage::Lost, now).unwrap();

        let seller = Actor::new("seller-1", Role::Seller);
        assert!(matches!(
            opp.correct_stage(Stage::Proposal, &seller, now),
            Err(CoreError::AdminOnly { .. })
        ));

        let admin = Actor::new("admin-1", Role::Admin);
        assert!(matches!(
            opp.correct_stage(Stage::Won, &admin, now),
            Err(CoreError::InvalidStageTransition { .. })
        ));
        assert!(opp.correct_stage(Stage::Proposal, &admin, now).unwrap());
        assert_eq!(opp.stage, Stage::Proposal);
        assert!(!opp.is_editable());
    }

    #[test]
    fn test_ready_to_win_preconditions() {
        let now = Utc::now();
        let mut opp = opportunity();

        assert!(matches!(
            opp.check_ready_to_win(&[PaymentMethod::Pix], 2),
            Err(CoreError::NoItemsNoManualValue)
        ));

        opp.add_item(&product("a", 1000), 1, None, None, now).unwrap();
        assert!(matches!(
            opp.check_ready_to_win(&[], 2),
            Err(CoreError::MissingPaymentMethod)
        ));

        let gross = opp.check_ready_to_win(&[PaymentMethod::Pix], 2).unwrap();
        assert_eq!(gross.cents(), 1000);
        assert_eq!(opp.stage, Stage::Lead);
    }

    #[test]
    fn test_mark_won_freezes() {
        let now = Utc::now();
        let mut opp = opportunity();
        opp.add_item(&product("a", 1000), 1, None, None, now).unwrap();
        opp.mark_won("sale-1", now).unwrap();

        assert_eq!(opp.stage, Stage::Won);
        assert_eq!(opp.sale_id.as_deref(), Some("sale-1"));
        assert!(matches!(
            opp.set_value_adjustment(Money::from_cents(1), now),
            Err(CoreError::OpportunityClosed { .. })
        ));
    }

    #[test]
    fn test_stage_parse() {
        assert_eq!("closing".parse::<Stage>().unwrap(), Stage::Closing);
        assert!("open".parse::<Stage>().is_err());
    }
}
