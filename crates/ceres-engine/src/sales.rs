//! # Sale Operations
//!
//! Opportunity conversion, walk-in sales and later edits of a sale.
//!
//! ## Conversion
//! ```text
//! win_opportunity(id)
//!   │
//!   ├── tx ────────────────────────────────────────────────────────┐
//!   │    load opportunity                                          │
//!   │    already won with a sale? ──► return it (created = false,  │
//!   │      resolving a commission that never got recorded)         │
//!   │    check_ready_to_win (payment methods, items/manual value)  │
//!   │    read current unit costs                                   │
//!   │    finalize ──► INSERT sale, sale_items, sale_services       │
//!   │    mark_won ──► UPDATE opportunity (version checked)         │
//!   │    COMMIT                                                    │
//!   ├──────────────────────────────────────────────────────────────┘
//!   │    any failure: ConversionFailed, stage unchanged, no sale
//!   │    UNIQUE(opportunity_id) lost to a concurrent call: return winner
//!   │
//!   ├── publish OpportunityWon, SaleCreated
//!   └── ensure_commission (failures leave the sale standing; hard ones
//!       are reported in SaleOutcome::commission_error)
//! ```

use std::collections::{HashMap, HashSet};

use ceres_core::sale::{finalize, FinalizeInput};
use ceres_core::validation::validate_percent;
use ceres_core::{
    pricing, proposal, Commission, CoreError, DocumentSnapshot, EngineEvent, LineItem, Money,
    NewServiceLine, Opportunity, PayStatus, PaymentMethod, Percent, Sale, ValidationError,
};
use ceres_db::repository as repo;
use ceres_db::DbError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{error, info, warn};

use crate::engine::{commit, SalesEngine};
use crate::error::{EngineError, EngineResult};
use crate::opportunities::load_opportunity;

// =============================================================================
// Requests & Outcomes
// =============================================================================

/// Closing terms chosen when an opportunity is won.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub payment_methods: Vec<PaymentMethod>,
    #[serde(default)]
    pub final_discount_percent: Decimal,
    #[serde(default)]
    pub services: Vec<NewServiceLine>,
}

/// One product row of a direct sale or an item replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleItemInput {
    pub product_id: String,
    pub quantity: i64,
    /// Effective unit price; derived from the discount when absent.
    pub unit_price: Option<Decimal>,
    pub discount_percent: Option<Decimal>,
}

impl SaleItemInput {
    /// Item at list price with no discount.
    pub fn at_list_price(product_id: impl Into<String>, quantity: i64) -> Self {
        SaleItemInput {
            product_id: product_id.into(),
            quantity,
            unit_price: None,
            discount_percent: None,
        }
    }
}

/// A walk-in sale that bypasses the opportunity pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectSaleRequest {
    pub client_id: String,
    pub seller_id: String,
    pub items: Vec<SaleItemInput>,
    #[serde(default)]
    pub services: Vec<NewServiceLine>,
    pub payment_methods: Vec<PaymentMethod>,
    #[serde(default)]
    pub final_discount_percent: Decimal,
    /// Only used when the sale has no items.
    pub estimated_margin_percent: Option<Decimal>,
    /// Repeat submissions with the same key return the first sale.
    pub idempotency_key: Option<String>,
}

/// Result of a sale-creating operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleOutcome {
    pub sale: Sale,
    /// The sale's commission. `None` when no rule applied.
    pub commission: Option<Commission>,
    /// `false` when an earlier call already created this sale.
    pub created: bool,
    /// Set when the sale committed but recording its commission failed.
    /// Retrying the same request resolves the commission again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commission_error: Option<String>,
}

impl SaleOutcome {
    fn new(sale: Sale, created: bool, commission: CommissionAttempt) -> Self {
        SaleOutcome {
            sale,
            commission: commission.commission,
            created,
            commission_error: commission.error,
        }
    }
}

struct CommissionAttempt {
    commission: Option<Commission>,
    error: Option<String>,
}

enum Conversion {
    Existing(Sale),
    Created { opportunity: Opportunity, sale: Sale },
}

enum DirectSale {
    Existing(Sale),
    Created(Sale),
}

// =============================================================================
// Helpers
// =============================================================================

/// Prices each input against the catalog as it is now.
async fn price_items(conn: &mut SqliteConnection, inputs: &[SaleItemInput]) -> EngineResult<Vec<LineItem>> {
    let mut seen = HashSet::with_capacity(inputs.len());
    let mut items = Vec::with_capacity(inputs.len());

    for input in inputs {
        if !seen.insert(input.product_id.as_str()) {
            return Err(CoreError::DuplicateLineItem(input.product_id.clone()).into());
        }
        let discount = input
            .discount_percent
            .map(|d| validate_percent("discount_percent", d))
            .transpose()?;
        let product = repo::product::get(conn, &input.product_id)
            .await?
            .ok_or_else(|| CoreError::ProductNotFound(input.product_id.clone()))?;

        items.push(pricing::add_item(&product, input.quantity, input.unit_price, discount)?);
    }
    Ok(items)
}

async fn unit_costs_for(conn: &mut SqliteConnection, items: &[LineItem]) -> EngineResult<HashMap<String, Money>> {
    let ids: Vec<String> = items.iter().map(|item| item.product_id.clone()).collect();
    Ok(repo::product::unit_costs(conn, &ids).await?)
}

/// Checks service lines that point at the service catalog and fills in a
/// missing description from the catalog name.
async fn check_services(
    conn: &mut SqliteConnection,
    services: Vec<NewServiceLine>,
) -> EngineResult<Vec<NewServiceLine>> {
    let mut checked = Vec::with_capacity(services.len());
    for mut service in services {
        if let Some(item_id) = &service.service_item_id {
            let item = repo::product::get_service_item(conn, item_id)
                .await?
                .ok_or_else(|| EngineError::not_found("ServiceItem", item_id.as_str()))?;
            if item.kind != service.kind {
                return Err(ValidationError::InvalidFormat {
                    field: "services.kind".to_string(),
                    reason: format!("service item {} is {}, not {}", item.id, item.kind, service.kind),
                }
                .into());
            }
            if service.description.trim().is_empty() {
                service.description = item.name;
            }
        }
        checked.push(service);
    }
    Ok(checked)
}

fn is_lost_race(err: &EngineError) -> bool {
    matches!(err, EngineError::Db(e) if e.is_unique_violation() || matches!(e, DbError::Conflict { .. }))
}

impl SalesEngine {
    /// Validates a whole-order discount against `[0, 100]` and the
    /// configured ceiling.
    fn final_discount(&self, requested: Decimal) -> EngineResult<Percent> {
        let percent = validate_percent("final_discount_percent", requested)?;
        let max = self.config.sales.max_final_discount_percent;
        if percent.value() > max {
            return Err(CoreError::FinalDiscountExceedsLimit {
                requested: requested.normalize(),
                max: max.normalize(),
            }
            .into());
        }
        Ok(percent)
    }

    /// Outcome of a repeated request. A sale that never got a commission
    /// (an earlier attempt failed after the sale committed) is resolved
    /// again; canceled history is left alone until `recommission`.
    async fn existing_outcome(&self, sale: Sale) -> EngineResult<SaleOutcome> {
        let attempt = match self.db.commissions().for_sale(&sale.id).await? {
            Some(commission) => CommissionAttempt {
                commission: Some(commission),
                error: None,
            },
            None if sale.is_canceled() => CommissionAttempt {
                commission: None,
                error: None,
            },
            None => self.commission_after_sale(&sale).await,
        };
        Ok(SaleOutcome::new(sale, false, attempt))
    }

    /// Runs commission resolution for a committed sale. A failure here
    /// never undoes the sale; it is logged and reported in the outcome.
    async fn commission_after_sale(&self, sale: &Sale) -> CommissionAttempt {
        match self.ensure_commission(sale).await {
            Ok(commission) => CommissionAttempt {
                commission,
                error: None,
            },
            Err(err) => {
                error!(sale_id = %sale.id, error = %err, "Commission recording failed; sale stands");
                CommissionAttempt {
                    commission: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    // =========================================================================
    // Conversion
    // =========================================================================

    /// Converts an opportunity into a sale and moves it to `won`, as one
    /// unit. Safe to retry: a converted opportunity returns its sale.
    ///
    /// ## Errors
    /// - [`EngineError::NotFound`] for an unknown opportunity
    /// - [`EngineError::ConversionFailed`] for everything else; the stage is
    ///   unchanged and no sale exists
    pub async fn win_opportunity(&self, opportunity_id: &str, request: ConversionRequest) -> EngineResult<SaleOutcome> {
        match self.convert(opportunity_id, request).await {
            Ok(Conversion::Existing(sale)) => {
                info!(opportunity_id, sale_id = %sale.id, "Opportunity already converted");
                self.existing_outcome(sale).await
            }
            Ok(Conversion::Created { opportunity, sale }) => {
                info!(
                    opportunity_id,
                    sale_id = %sale.id,
                    gross_value = %sale.gross_value,
                    items = sale.items.len(),
                    "Opportunity won"
                );
                self.publish(EngineEvent::opportunity_won(&opportunity, &sale));
                self.publish(EngineEvent::sale_created(&sale));

                let attempt = self.commission_after_sale(&sale).await;
                Ok(SaleOutcome::new(sale, true, attempt))
            }
            Err(err @ EngineError::NotFound { entity: "Opportunity", .. }) => Err(err),
            Err(err) if is_lost_race(&err) => {
                let winner = self.db.sales().get_by_opportunity(opportunity_id).await?;
                match winner {
                    Some(sale) => {
                        info!(opportunity_id, sale_id = %sale.id, "Concurrent conversion already committed");
                        self.existing_outcome(sale).await
                    }
                    None => Err(EngineError::conversion_failed(opportunity_id, err)),
                }
            }
            Err(err) => {
                warn!(opportunity_id, error = %err, "Opportunity conversion rejected");
                Err(EngineError::conversion_failed(opportunity_id, err))
            }
        }
    }

    async fn convert(&self, opportunity_id: &str, request: ConversionRequest) -> EngineResult<Conversion> {
        let mut tx = self.begin().await?;
        let mut opportunity = load_opportunity(&mut tx, opportunity_id).await?;

        if let Some(sale_id) = opportunity.sale_id.clone() {
            let sale = repo::sale::fetch(&mut tx, &sale_id).await?;
            return Ok(Conversion::Existing(sale));
        }

        let final_discount = self.final_discount(request.final_discount_percent)?;
        let gross_value = opportunity
            .check_ready_to_win(&request.payment_methods, self.config.sales.max_payment_methods)?;
        let unit_costs = unit_costs_for(&mut tx, &opportunity.items).await?;
        let services = check_services(&mut tx, request.services).await?;
        let now = self.now();

        let sale = finalize(
            FinalizeInput {
                opportunity_id: Some(opportunity.id.clone()),
                client_id: opportunity.client_id.clone(),
                seller_id: opportunity.seller_id.clone(),
                items: opportunity.items.clone(),
                unit_costs,
                base_value: gross_value,
                value_adjustment: opportunity.value_adjustment,
                final_discount_percent: final_discount,
                payment_methods: request.payment_methods,
                estimated_margin_percent: opportunity.estimated_margin_percent,
                services,
                idempotency_key: None,
            },
            self.config.sales.max_payment_methods,
            now,
        )?;

        repo::sale::insert(&mut tx, &sale).await?;
        opportunity.mark_won(&sale.id, now)?;
        repo::opportunity::save(&mut tx, &mut opportunity).await?;
        commit(tx).await?;

        Ok(Conversion::Created { opportunity, sale })
    }

    // =========================================================================
    // Direct Sales
    // =========================================================================

    /// Records a walk-in sale. With an idempotency key, a repeated request
    /// returns the sale created by the first one.
    pub async fn create_sale_direct(&self, request: DirectSaleRequest) -> EngineResult<SaleOutcome> {
        let key = request.idempotency_key.clone();

        match self.create_direct(request).await {
            Ok(DirectSale::Created(sale)) => {
                info!(
                    sale_id = %sale.id,
                    seller_id = %sale.seller_id,
                    gross_value = %sale.gross_value,
                    items = sale.items.len(),
                    "Direct sale created"
                );
                self.publish(EngineEvent::sale_created(&sale));

                let attempt = self.commission_after_sale(&sale).await;
                Ok(SaleOutcome::new(sale, true, attempt))
            }
            Ok(DirectSale::Existing(existing)) => {
                info!(sale_id = %existing.id, "Direct sale already recorded for this key");
                self.existing_outcome(existing).await
            }
            Err(err) if is_lost_race(&err) => {
                let Some(key) = key else { return Err(err) };
                let mut conn = self.db.pool().acquire().await.map_err(DbError::from)?;
                match repo::sale::get_by_idempotency_key(&mut conn, &key).await? {
                    Some(sale) => {
                        drop(conn);
                        info!(sale_id = %sale.id, "Concurrent direct sale already committed");
                        self.existing_outcome(sale).await
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn create_direct(&self, request: DirectSaleRequest) -> EngineResult<DirectSale> {
        let final_discount = self.final_discount(request.final_discount_percent)?;
        let margin = request
            .estimated_margin_percent
            .map(|m| validate_percent("estimated_margin_percent", m))
            .transpose()?;
        if self.config.sales.require_items_for_direct_sale && request.items.is_empty() {
            return Err(CoreError::ItemsRequired.into());
        }

        let mut tx = self.begin().await?;

        if let Some(key) = &request.idempotency_key {
            if let Some(existing) = repo::sale::get_by_idempotency_key(&mut tx, key).await? {
                return Ok(DirectSale::Existing(existing));
            }
        }

        let items = price_items(&mut tx, &request.items).await?;
        let unit_costs = unit_costs_for(&mut tx, &items).await?;
        let services = check_services(&mut tx, request.services).await?;

        let sale = finalize(
            FinalizeInput {
                opportunity_id: None,
                client_id: request.client_id,
                seller_id: request.seller_id,
                base_value: proposal::items_total(&items)?,
                items,
                unit_costs,
                value_adjustment: Money::zero(),
                final_discount_percent: final_discount,
                payment_methods: request.payment_methods,
                estimated_margin_percent: margin,
                services,
                idempotency_key: request.idempotency_key,
            },
            self.config.sales.max_payment_methods,
            self.now(),
        )?;

        repo::sale::insert(&mut tx, &sale).await?;
        commit(tx).await?;
        Ok(DirectSale::Created(sale))
    }

    // =========================================================================
    // Sale Edits
    // =========================================================================

    pub async fn get_sale(&self, sale_id: &str) -> EngineResult<Sale> {
        self.db
            .sales()
            .get(sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", sale_id))
    }

    /// Plain view for document rendering and exports.
    pub async fn document_snapshot(&self, sale_id: &str) -> EngineResult<DocumentSnapshot> {
        Ok(self.get_sale(sale_id).await?.document_snapshot())
    }

    /// Replaces the whole item set of a sale and recomputes its totals.
    /// The commission is left as recorded; use
    /// [`recommission`](Self::recommission) after canceling it to re-resolve.
    pub async fn replace_sale_items(
        &self,
        sale_id: &str,
        items: Vec<SaleItemInput>,
        final_discount_percent: Decimal,
    ) -> EngineResult<Sale> {
        let final_discount = self.final_discount(final_discount_percent)?;

        let mut tx = self.begin().await?;
        let mut sale = repo::sale::get(&mut tx, sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", sale_id))?;

        let priced = price_items(&mut tx, &items).await?;
        let unit_costs = unit_costs_for(&mut tx, &priced).await?;
        sale.replace_items(&priced, &unit_costs, final_discount, self.now())?;

        repo::sale::replace_items(&mut tx, &sale).await?;
        commit(tx).await?;

        info!(
            sale_id,
            items = sale.items.len(),
            gross_value = %sale.gross_value,
            "Sale items replaced"
        );
        Ok(sale)
    }

    /// Cancels the sale and, in the same transaction, its commission unless
    /// that commission was already paid.
    pub async fn cancel_sale(&self, sale_id: &str) -> EngineResult<Sale> {
        let mut tx = self.begin().await?;
        let mut sale = repo::sale::get(&mut tx, sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", sale_id))?;

        let now = self.now();
        if !sale.cancel(now) {
            return Ok(sale);
        }
        repo::sale::update(&mut tx, &sale).await?;

        if let Some(mut commission) = repo::commission::live_for_sale(&mut tx, sale_id).await? {
            if commission.pay_status.can_transition_to(PayStatus::Canceled) {
                commission.transition(PayStatus::Canceled, now)?;
                repo::commission::update_status(&mut tx, &commission).await?;
            } else {
                warn!(
                    sale_id,
                    commission_id = %commission.id,
                    pay_status = %commission.pay_status,
                    "Sale canceled but its commission is already paid"
                );
            }
        }
        commit(tx).await?;

        info!(sale_id, "Sale canceled");
        Ok(sale)
    }

    pub async fn set_payment_received(&self, sale_id: &str, received: bool) -> EngineResult<Sale> {
        let mut tx = self.begin().await?;
        let mut sale = repo::sale::get(&mut tx, sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", sale_id))?;

        sale.set_payment_received(received, self.now())?;
        repo::sale::update(&mut tx, &sale).await?;
        commit(tx).await?;

        info!(sale_id, received, "Payment status updated");
        Ok(sale)
    }
}
