//! # Sale Finalizer
//!
//! Snapshots priced line items into an immutable sale record.
//!
//! ## Finalize Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  won opportunity ──► base = opportunity.gross_value                     │
//! │  direct sale     ──► base = Σ subtotal                                  │
//! │                           │                                             │
//! │                           ▼                                             │
//! │  gross_value     = round(base × (1 − final_discount/100), 2)            │
//! │  total_cost      = Σ quantity × product.unit_cost (read at sale time)   │
//! │  estimated_profit                                                       │
//! │     with items   = gross_value − total_cost                             │
//! │     manual value = gross_value × estimated_margin/100                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Line items are copied, never referenced. Later edits replace the whole
//! item set through [`Sale::replace_items`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::{Money, Percent};
use crate::pricing::LineItem;
use crate::proposal::items_total;
use crate::types::{new_id, PaymentMethod, ServiceKind};
use crate::validation::{validate_amount, validate_reference};

// =============================================================================
// Sale Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    Closed,
    Canceled,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Closed => "closed",
            SaleStatus::Canceled => "canceled",
        }
    }
}

impl Default for SaleStatus {
    fn default() -> Self {
        SaleStatus::Closed
    }
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Sale Line Items
// =============================================================================

/// A frozen copy of a proposal line item, plus the unit cost read at
/// finalize time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleLineItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    pub product_name: String,
    pub category: String,
    pub quantity: i64,
    pub anchor_price: Money,
    #[ts(type = "string")]
    pub unit_price: Decimal,
    pub discount_percent: Percent,
    pub subtotal: Money,
    pub unit_cost: Money,
}

impl SaleLineItem {
    fn snapshot(sale_id: &str, item: &LineItem, unit_cost: Money) -> Self {
        Self {
            id: new_id(),
            sale_id: sale_id.to_string(),
            product_id: item.product_id.clone(),
            product_name: item.product_name.clone(),
            category: item.category.clone(),
            quantity: item.quantity,
            anchor_price: item.anchor_price,
            unit_price: item.unit_price,
            discount_percent: item.discount_percent,
            subtotal: item.subtotal,
            unit_cost,
        }
    }

    pub fn total_cost(&self) -> CoreResult<Money> {
        self.unit_cost.checked_mul(self.quantity)
    }
}

// =============================================================================
// Service Lines
// =============================================================================

/// Input for a service sold together with a sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewServiceLine {
    pub service_item_id: Option<String>,
    pub kind: ServiceKind,
    pub description: String,
    pub total: Money,
}

/// A service attached to a sale. Its total is the base for
/// maintenance/revision/spraying commissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ServiceLine {
    pub id: String,
    pub sale_id: String,
    pub service_item_id: Option<String>,
    pub kind: ServiceKind,
    pub description: String,
    pub total: Money,
}

// =============================================================================
// Sale
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleTotals {
    pub gross_value: Money,
    pub total_cost: Money,
    pub estimated_profit: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Sale {
    pub id: String,
    /// The opportunity this sale was converted from. `None` for direct sales.
    pub opportunity_id: Option<String>,
    pub client_id: String,
    pub seller_id: String,
    pub items: Vec<SaleLineItem>,
    pub services: Vec<ServiceLine>,
    /// Carried over from the opportunity so that item replacement keeps it.
    pub value_adjustment: Money,
    pub final_discount_percent: Percent,
    pub gross_value: Money,
    pub total_cost: Money,
    pub estimated_profit: Money,
    pub estimated_margin_percent: Option<Percent>,
    pub payment_methods: Vec<PaymentMethod>,
    pub payment_received: bool,
    pub status: SaleStatus,
    pub idempotency_key: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// Everything the finalizer needs, gathered by the caller inside its
/// transaction.
#[derive(Debug, Clone)]
pub struct FinalizeInput {
    pub opportunity_id: Option<String>,
    pub client_id: String,
    pub seller_id: String,
    pub items: Vec<LineItem>,
    /// Current unit cost per product id.
    pub unit_costs: HashMap<String, Money>,
    /// Value the final discount is applied to.
    pub base_value: Money,
    pub value_adjustment: Money,
    pub final_discount_percent: Percent,
    pub payment_methods: Vec<PaymentMethod>,
    pub estimated_margin_percent: Option<Percent>,
    pub services: Vec<NewServiceLine>,
    pub idempotency_key: Option<String>,
}

/// Checks the payment method selection: at least one, at most `max`, no
/// repeats.
pub fn validate_payment_methods(methods: &[PaymentMethod], max: usize) -> CoreResult<()> {
    if methods.is_empty() {
        return Err(CoreError::MissingPaymentMethod);
    }
    if methods.len() > max {
        return Err(CoreError::TooManyPaymentMethods {
            max,
            given: methods.len(),
        });
    }
    let mut seen = HashSet::new();
    for method in methods {
        if !seen.insert(*method) {
            return Err(CoreError::DuplicatePaymentMethod(*method));
        }
    }
    Ok(())
}

/// Computes the money totals of a sale.
pub fn compute_totals(
    items: &[SaleLineItem],
    base_value: Money,
    final_discount: Percent,
    estimated_margin: Option<Percent>,
) -> CoreResult<SaleTotals> {
    if base_value.is_negative() {
        return Err(CoreError::NegativeGrossValue { value: base_value });
    }
    let gross_value = base_value.discounted_by(final_discount)?;
    let total_cost = items
        .iter()
        .map(SaleLineItem::total_cost)
        .try_fold(Money::zero(), |total, cost| total.checked_add(cost?))?;

    let estimated_profit = if items.is_empty() {
        gross_value.apply_percent(estimated_margin.unwrap_or_default())?
    } else {
        gross_value.checked_sub(total_cost)?
    };

    Ok(SaleTotals {
        gross_value,
        total_cost,
        estimated_profit,
    })
}

fn snapshot_items(
    sale_id: &str,
    items: &[LineItem],
    unit_costs: &HashMap<String, Money>,
) -> CoreResult<Vec<SaleLineItem>> {
    items
        .iter()
        .map(|item| {
            let cost = unit_costs
                .get(&item.product_id)
                .copied()
                .ok_or_else(|| CoreError::ProductNotFound(item.product_id.clone()))?;
            Ok(SaleLineItem::snapshot(sale_id, item, cost))
        })
        .collect()
}

/// Builds a sale from priced items.
///
/// ## Errors
/// - payment method errors
/// - [`CoreError::ProductNotFound`] when a unit cost is missing
/// - [`CoreError::NegativeGrossValue`] for a negative base
pub fn finalize(
    input: FinalizeInput,
    max_payment_methods: usize,
    now: DateTime<Utc>,
) -> CoreResult<Sale> {
    validate_reference("client_id", &input.client_id)?;
    validate_reference("seller_id", &input.seller_id)?;
    validate_payment_methods(&input.payment_methods, max_payment_methods)?;
    for service in &input.services {
        validate_amount("service total", service.total)?;
    }

    let sale_id = new_id();
    let items = snapshot_items(&sale_id, &input.items, &input.unit_costs)?;
    let totals = compute_totals(
        &items,
        input.base_value,
        input.final_discount_percent,
        input.estimated_margin_percent,
    )?;
    let services = input
        .services
        .into_iter()
        .map(|service| ServiceLine {
            id: new_id(),
            sale_id: sale_id.clone(),
            service_item_id: service.service_item_id,
            kind: service.kind,
            description: service.description,
            total: service.total,
        })
        .collect();

    Ok(Sale {
        id: sale_id,
        opportunity_id: input.opportunity_id,
        client_id: input.client_id,
        seller_id: input.seller_id,
        items,
        services,
        value_adjustment: input.value_adjustment,
        final_discount_percent: input.final_discount_percent,
        gross_value: totals.gross_value,
        total_cost: totals.total_cost,
        estimated_profit: totals.estimated_profit,
        estimated_margin_percent: input.estimated_margin_percent,
        payment_methods: input.payment_methods,
        payment_received: false,
        status: SaleStatus::Closed,
        idempotency_key: input.idempotency_key,
        created_at: now,
        updated_at: now,
    })
}

impl Sale {
    #[inline]
    pub fn is_canceled(&self) -> bool {
        self.status == SaleStatus::Canceled
    }

    pub fn items_total(&self) -> Money {
        self.items.iter().map(|item| item.subtotal).sum()
    }

    /// Category with the largest combined subtotal. Ties go to the category
    /// that appears first in line order.
    pub fn dominant_category(&self) -> Option<&str> {
        let mut totals: Vec<(&str, Money)> = Vec::new();
        for item in &self.items {
            match totals.iter_mut().find(|(category, _)| *category == item.category) {
                Some((_, total)) => *total += item.subtotal,
                None => totals.push((item.category.as_str(), item.subtotal)),
            }
        }

        let mut best: Option<(&str, Money)> = None;
        for (category, total) in totals {
            if best.map_or(true, |(_, best_total)| total > best_total) {
                best = Some((category, total));
            }
        }
        best.map(|(category, _)| category)
    }

    /// Combined total of the service lines of one kind, or `None` when the
    /// sale has no such service.
    pub fn service_total(&self, kind: ServiceKind) -> Option<Money> {
        let mut lines = self.services.iter().filter(|s| s.kind == kind).peekable();
        lines.peek()?;
        Some(lines.map(|s| s.total).sum())
    }

    /// Replaces the whole item set and recomputes totals. The base becomes
    /// the new items' subtotal plus the carried value adjustment. An empty
    /// replacement is rejected.
    pub fn replace_items(
        &mut self,
        items: &[LineItem],
        unit_costs: &HashMap<String, Money>,
        final_discount: Percent,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        if self.is_canceled() {
            return Err(CoreError::SaleCanceled(self.id.clone()));
        }
        if items.is_empty() {
            return Err(CoreError::ItemsRequired);
        }
        let snapshot = snapshot_items(&self.id, items, unit_costs)?;
        let base = items_total(items)?.checked_add(self.value_adjustment)?;
        let totals = compute_totals(&snapshot, base, final_discount, self.estimated_margin_percent)?;

        self.items = snapshot;
        self.final_discount_percent = final_discount;
        self.gross_value = totals.gross_value;
        self.total_cost = totals.total_cost;
        self.estimated_profit = totals.estimated_profit;
        self.updated_at = now;
        Ok(())
    }

    /// Marks the sale canceled. Returns `false` if it already was.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_canceled() {
            return false;
        }
        self.status = SaleStatus::Canceled;
        self.updated_at = now;
        true
    }

    pub fn set_payment_received(&mut self, received: bool, now: DateTime<Utc>) -> CoreResult<()> {
        if self.is_canceled() {
            return Err(CoreError::SaleCanceled(self.id.clone()));
        }
        self.payment_received = received;
        self.updated_at = now;
        Ok(())
    }

    /// Plain view for document and export consumers.
    pub fn document_snapshot(&self) -> DocumentSnapshot {
        DocumentSnapshot {
            sale_id: self.id.clone(),
            client_id: self.client_id.clone(),
            seller_id: self.seller_id.clone(),
            items: self
                .items
                .iter()
                .map(|item| DocumentLine {
                    product_name: item.product_name.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    discount_percent: item.discount_percent,
                    subtotal: item.subtotal,
                })
                .collect(),
            services: self
                .services
                .iter()
                .map(|service| DocumentService {
                    kind: service.kind,
                    description: service.description.clone(),
                    total: service.total,
                })
                .collect(),
            totals: DocumentTotals {
                items_total: self.items_total(),
                value_adjustment: self.value_adjustment,
                final_discount_percent: self.final_discount_percent,
                gross_value: self.gross_value,
            },
            payment_methods: self.payment_methods.clone(),
            payment_received: self.payment_received,
            status: self.status,
            created_at: self.created_at,
        }
    }
}

// =============================================================================
// Document Snapshot
// =============================================================================

/// `{client, items, totals, paymentMethods}` view read by PDF/export
/// renderers.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DocumentSnapshot {
    pub sale_id: String,
    pub client_id: String,
    pub seller_id: String,
    pub items: Vec<DocumentLine>,
    pub services: Vec<DocumentService>,
    pub totals: DocumentTotals,
    pub payment_methods: Vec<PaymentMethod>,
    pub payment_received: bool,
    pub status: SaleStatus,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DocumentLine {
    pub product_name: String,
    pub quantity: i64,
    #[ts(type = "string")]
    pub unit_price: Decimal,
    pub discount_percent: Percent,
    pub subtotal: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DocumentService {
    pub kind: ServiceKind,
    pub description: String,
    pub total: Money,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DocumentTotals {
    pub items_total: Money,
    pub value_adjustment: Money,
    pub final_discount_percent: Percent,
    pub gross_value: Money,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(product_id: &str, category: &str, qty: i64, price: Decimal) -> LineItem {
        let unit_price = price;
        LineItem {
            product_id: product_id.to_string(),
            product_name: product_id.to_uppercase(),
            category: category.to_string(),
            quantity: qty,
            anchor_price: Money::from_decimal(price).unwrap(),
            unit_price,
            discount_percent: Percent::zero(),
            max_discount_percent: Percent::new(dec!(10)).unwrap(),
            subtotal: Money::from_decimal(unit_price * Decimal::from(qty)).unwrap(),
        }
    }

    fn input(items: Vec<LineItem>, base_cents: i64, final_discount: Decimal) -> FinalizeInput {
        let unit_costs = items
            .iter()
            .map(|item| (item.product_id.clone(), Money::from_cents(2000)))
            .collect();
        FinalizeInput {
            opportunity_id: None,
            client_id: "client-1".to_string(),
            seller_id: "seller-1".to_string(),
            items,
            unit_costs,
            base_value: Money::from_cents(base_cents),
            value_adjustment: Money::zero(),
            final_discount_percent: Percent::new(final_discount).unwrap(),
            payment_methods: vec![PaymentMethod::Pix],
            estimated_margin_percent: None,
            services: Vec::new(),
            idempotency_key: None,
        }
    }

    #[test]
    fn test_final_discount_scenario() {
        let items = vec![line("a", "tractors", 3, dec!(90)), line("b", "parts", 1, dec!(50))];
        let sale = finalize(input(items, 30000, dec!(5)), 2, Utc::now()).unwrap();

        assert_eq!(sale.gross_value.cents(), 28500);
        assert_eq!(sale.total_cost.cents(), 8000);
        assert_eq!(sale.estimated_profit.cents(), 20500);
        assert_eq!(sale.status, SaleStatus::Closed);
        assert!(!sale.payment_received);
        assert!(sale.items.iter().all(|item| item.sale_id == sale.id));
    }

    #[test]
    fn test_manual_value_profit_uses_margin() {
        let mut request = input(Vec::new(), 100000, dec!(0));
        request.estimated_margin_percent = Some(Percent::new(dec!(12.5)).unwrap());
        let sale = finalize(request, 2, Utc::now()).unwrap();

        assert_eq!(sale.gross_value.cents(), 100000);
        assert!(sale.total_cost.is_zero());
        assert_eq!(sale.estimated_profit.cents(), 12500);
    }

    #[test]
    fn test_unit_cost_overflow_fails() {
        let mut request = input(vec![line("a", "tractors", 3, dec!(10))], 3000, dec!(0));
        request
            .unit_costs
            .insert("a".to_string(), Money::from_cents(i64::MAX / 2));
        assert!(matches!(
            finalize(request, 2, Utc::now()),
            Err(CoreError::AmountOverflow)
        ));
    }

    #[test]
    fn test_missing_cost_fails() {
        let mut request = input(vec![line("a", "tractors", 1, dec!(10))], 1000, dec!(0));
        request.unit_costs.clear();
        assert!(matches!(
            finalize(request, 2, Utc::now()),
            Err(CoreError::ProductNotFound(_))
        ));
    }

    #[test]
    fn test_payment_method_rules() {
        assert!(matches!(
            validate_payment_methods(&[], 2),
            Err(CoreError::MissingPaymentMethod)
        ));
        assert!(matches!(
            validate_payment_methods(&[PaymentMethod::Cash, PaymentMethod::Cash], 2),
            Err(CoreError::DuplicatePaymentMethod(PaymentMethod::Cash))
        ));
        assert!(matches!(
            validate_payment_methods(
                &[PaymentMethod::Cash, PaymentMethod::Pix, PaymentMethod::Financing],
                2
            ),
            Err(CoreError::TooManyPaymentMethods { max: 2, given: 3 })
        ));
        assert!(validate_payment_methods(&[PaymentMethod::Cash, PaymentMethod::Financing], 2).is_ok());
    }

    #[test]
    fn test_dominant_category() {
        let items = vec![
            line("a", "parts", 1, dec!(100)),
            line("b", "tractors", 1, dec!(150)),
            line("c", "parts", 1, dec!(60)),
        ];
        let sale = finalize(input(items, 31000, dec!(0)), 2, Utc::now()).unwrap();
        assert_eq!(sale.dominant_category(), Some("parts"));

        let tied = vec![line("a", "sprayers", 1, dec!(100)), line("b", "parts", 1, dec!(100))];
        let sale = finalize(input(tied, 20000, dec!(0)), 2, Utc::now()).unwrap();
        assert_eq!(sale.dominant_category(), Some("sprayers"));
    }

    #[test]
    fn test_service_total() {
        let mut request = input(vec![line("a", "parts", 1, dec!(10))], 1000, dec!(0));
        request.services = vec![
            NewServiceLine {
                service_item_id: None,
                kind: ServiceKind::Spraying,
                description: "North field".to_string(),
                total: Money::from_cents(40000),
            },
            NewServiceLine {
                service_item_id: None,
                kind: ServiceKind::Spraying,
                description: "South field".to_string(),
                total: Money::from_cents(10000),
            },
        ];
        let sale = finalize(request, 2, Utc::now()).unwrap();
        assert_eq!(sale.service_total(ServiceKind::Spraying), Some(Money::from_cents(50000)));
        assert_eq!(sale.service_total(ServiceKind::Revision), None);
    }

    #[test]
    fn test_replace_items_recomputes_totals() {
        let mut request = input(vec![line("a", "parts", 1, dec!(100))], 9000, dec!(0));
        request.value_adjustment = Money::from_cents(-1000);
        let mut sale = finalize(request, 2, Utc::now()).unwrap();

        let replacement = vec![line("b", "parts", 2, dec!(100))];
        let costs = HashMap::from([("b".to_string(), Money::from_cents(3000))]);
        let ten = Percent::new(dec!(10)).unwrap();
        sale.replace_items(&replacement, &costs, ten, Utc::now()).unwrap();

        // (200.00 − 10.00) × 0.9
        assert_eq!(sale.gross_value.cents(), 17100);
        assert_eq!(sale.total_cost.cents(), 6000);
        assert_eq!(sale.items.len(), 1);
        assert_eq!(sale.items[0].product_id, "b");
    }

    #[test]
    fn test_cancel_and_payment_received() {
        let mut sale = finalize(input(vec![line("a", "parts", 1, dec!(10))], 1000, dec!(0)), 2, Utc::now()).unwrap();
        sale.set_payment_received(true, Utc::now()).unwrap();
        assert!(sale.payment_received);

        assert!(sale.cancel(Utc::now()));
        assert!(!sale.cancel(Utc::now()));
        assert!(matches!(
            sale.set_payment_received(false, Utc::now()),
            Err(CoreError::SaleCanceled(_))
        ));
    }

    #[test]
    fn test_document_snapshot() {
        let sale = finalize(input(vec![line("a", "parts", 2, dec!(10))], 2000, dec!(0)), 2, Utc::now()).unwrap();
        let doc = sale.document_snapshot();
        assert_eq!(doc.items.len(), 1);
        assert_eq!(doc.items[0].product_name, "A");
        assert_eq!(doc.totals.gross_value.cents(), 2000);
        assert_eq!(doc.payment_methods, vec![PaymentMethod::Pix]);
    }
}
