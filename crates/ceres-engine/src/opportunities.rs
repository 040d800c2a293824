//! # Opportunity Operations
//!
//! Every edit loads the opportunity inside a transaction, applies the
//! ceres-core rule in memory and saves with an optimistic version check.
//! A rejected edit writes nothing; the stored gross value is always the one
//! recomputed by the edit that produced it.

use ceres_core::validation::{validate_percent, validate_probability};
use ceres_core::{
    Actor, CoreError, CoreResult, LineItemPatch, Money, NewOpportunity, Opportunity, Stage,
};
use ceres_db::repository as repo;
use ceres_db::OpportunityFilter;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::engine::{commit, SalesEngine};
use crate::error::{EngineError, EngineResult};

pub(crate) async fn load_opportunity(conn: &mut SqliteConnection, id: &str) -> EngineResult<Opportunity> {
    repo::opportunity::get(conn, id)
        .await?
        .ok_or_else(|| EngineError::not_found("Opportunity", id))
}

impl SalesEngine {
    /// Applies `edit` to the stored opportunity and saves it in one
    /// transaction.
    async fn edit_opportunity<F>(&self, id: &str, edit: F) -> EngineResult<Opportunity>
    where
        F: FnOnce(&mut Opportunity, DateTime<Utc>) -> CoreResult<()>,
    {
        let mut tx = self.begin().await?;
        let mut opportunity = load_opportunity(&mut tx, id).await?;

        edit(&mut opportunity, self.now())?;

        repo::opportunity::save(&mut tx, &mut opportunity).await?;
        commit(tx).await?;

        debug!(
            id = %opportunity.id,
            gross_value = ?opportunity.gross_value,
            version = opportunity.version,
            "Opportunity updated"
        );
        Ok(opportunity)
    }

    pub async fn create_opportunity(&self, input: NewOpportunity) -> EngineResult<Opportunity> {
        let opportunity = Opportunity::create(input, self.now())?;

        let mut conn = self.db.pool().acquire().await.map_err(ceres_db::DbError::from)?;
        repo::opportunity::insert(&mut conn, &opportunity).await?;

        info!(
            id = %opportunity.id,
            seller_id = %opportunity.seller_id,
            client_id = %opportunity.client_id,
            "Opportunity created"
        );
        Ok(opportunity)
    }

    pub async fn get_opportunity(&self, id: &str) -> EngineResult<Opportunity> {
        self.db
            .opportunities()
            .get(id)
            .await?
            .ok_or_else(|| EngineError::not_found("Opportunity", id))
    }

    pub async fn list_opportunities(&self, filter: &OpportunityFilter) -> EngineResult<Vec<Opportunity>> {
        Ok(self.db.opportunities().list(filter).await?)
    }

    // =========================================================================
    // Line Items
    // =========================================================================

    /// Prices `product_id` from the catalog as it is right now and appends
    /// it to the proposal.
    pub async fn add_line_item(
        &self,
        opportunity_id: &str,
        product_id: &str,
        quantity: i64,
        override_price: Option<Decimal>,
        override_discount: Option<Decimal>,
    ) -> EngineResult<Opportunity> {
        let override_discount = override_discount
            .map(|d| validate_percent("discount_percent", d))
            .transpose()?;

        let mut tx = self.begin().await?;
        let mut opportunity = load_opportunity(&mut tx, opportunity_id).await?;
        let product = repo::product::get(&mut tx, product_id)
            .await?
            .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()))?;

        opportunity.add_item(&product, quantity, override_price, override_discount, self.now())?;

        repo::opportunity::save(&mut tx, &mut opportunity).await?;
        commit(tx).await?;

        debug!(
            id = %opportunity.id,
            product_id = %product_id,
            quantity,
            gross_value = ?opportunity.gross_value,
            "Line item added"
        );
        Ok(opportunity)
    }

    /// Changes quantity, unit price or discount of one line item. Price and
    /// discount are cross-derived against the item's anchor price.
    pub async fn update_line_item(
        &self,
        opportunity_id: &str,
        product_id: &str,
        patch: LineItemPatch,
    ) -> EngineResult<Opportunity> {
        self.edit_opportunity(opportunity_id, |opp, now| {
            opp.update_item(product_id, &patch, now).map(|_| ())
        })
        .await
    }

    pub async fn remove_line_item(&self, opportunity_id: &str, product_id: &str) -> EngineResult<Opportunity> {
        self.edit_opportunity(opportunity_id, |opp, now| {
            opp.remove_item(product_id, now).map(|_| ())
        })
        .await
    }

    // =========================================================================
    // Header Fields
    // =========================================================================

    pub async fn set_value_adjustment(&self, opportunity_id: &str, adjustment: Money) -> EngineResult<Opportunity> {
        self.edit_opportunity(opportunity_id, |opp, now| {
            opp.set_value_adjustment(adjustment, now)
        })
        .await
    }

    /// Sets or clears the manual gross value of an opportunity without items.
    pub async fn set_manual_value(&self, opportunity_id: &str, value: Option<Money>) -> EngineResult<Opportunity> {
        self.edit_opportunity(opportunity_id, |opp, now| opp.set_manual_value(value, now))
            .await
    }

    pub async fn set_probability(&self, opportunity_id: &str, probability: i64) -> EngineResult<Opportunity> {
        validate_probability(probability)?;
        self.edit_opportunity(opportunity_id, |opp, now| {
            opp.set_probability(probability, now)
        })
        .await
    }

    pub async fn set_estimated_margin(
        &self,
        opportunity_id: &str,
        margin: Option<Decimal>,
    ) -> EngineResult<Opportunity> {
        let margin = margin
            .map(|m| validate_percent("estimated_margin_percent", m))
            .transpose()?;
        self.edit_opportunity(opportunity_id, |opp, now| opp.set_estimated_margin(margin, now))
            .await
    }

    // =========================================================================
    // Stages
    // =========================================================================

    /// Moves the opportunity to another non-terminal stage or to `lost`.
    /// `won` is reached only through [`win_opportunity`](Self::win_opportunity).
    pub async fn transition_stage(&self, opportunity_id: &str, to: Stage) -> EngineResult<Opportunity> {
        let mut tx = self.begin().await?;
        let mut opportunity = load_opportunity(&mut tx, opportunity_id).await?;
        let from = opportunity.stage;

        if !opportunity.transition(to, self.now())? {
            return Ok(opportunity);
        }

        repo::opportunity::save(&mut tx, &mut opportunity).await?;
        commit(tx).await?;

        info!(id = %opportunity.id, %from, %to, "Opportunity stage changed");
        Ok(opportunity)
    }

    /// Administrative stage correction; may leave `lost`, never enters `won`.
    pub async fn correct_stage(&self, opportunity_id: &str, to: Stage, actor: &Actor) -> EngineResult<Opportunity> {
        let mut tx = self.begin().await?;
        let mut opportunity = load_opportunity(&mut tx, opportunity_id).await?;
        let from = opportunity.stage;

        if !opportunity.correct_stage(to, actor, self.now())? {
            return Ok(opportunity);
        }

        repo::opportunity::save(&mut tx, &mut opportunity).await?;
        commit(tx).await?;

        info!(
            id = %opportunity.id,
            %from,
            %to,
            admin = %actor.user_id,
            "Opportunity stage corrected"
        );
        Ok(opportunity)
    }
}
