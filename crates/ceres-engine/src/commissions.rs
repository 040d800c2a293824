//! # Commission Operations
//!
//! Resolution runs right after a sale commits. A sale has at most one live
//! (non-canceled) commission; the partial unique index on `commissions`
//! settles concurrent attempts and the loser returns the winner's row.
//!
//! ```text
//! pending ──► approved ──► paid        (paid stamps pay_status_date)
//!    │            │
//!    └────────────┴──► canceled        (recommission may then resolve again)
//! ```

use ceres_core::commission::resolve;
use ceres_core::{Actor, Commission, CoreError, EngineEvent, PayStatus, Sale};
use ceres_db::repository as repo;
use ceres_db::CommissionFilter;
use tracing::{info, warn};

use crate::engine::{commit, SalesEngine};
use crate::error::{EngineError, EngineResult};

enum Recorded {
    Existing(Commission),
    Created(Commission),
    Skipped,
}

impl SalesEngine {
    /// Makes sure `sale` has a commission.
    ///
    /// Returns the live commission if one exists. Otherwise resolves the
    /// active rules (read now, never cached) and records a pending
    /// commission. `Ok(None)` means no rule applied; the sale is unaffected.
    pub async fn ensure_commission(&self, sale: &Sale) -> EngineResult<Option<Commission>> {
        if sale.is_canceled() {
            return Err(CoreError::SaleCanceled(sale.id.clone()).into());
        }

        match self.record_commission(sale).await {
            Ok(Recorded::Existing(commission)) => Ok(Some(commission)),
            Ok(Recorded::Created(commission)) => {
                info!(
                    commission_id = %commission.id,
                    sale_id = %sale.id,
                    base = %commission.base,
                    percent = %commission.percent,
                    amount = %commission.amount,
                    "Commission recorded"
                );
                self.publish(EngineEvent::commission_created(&commission));
                Ok(Some(commission))
            }
            Ok(Recorded::Skipped) => Ok(None),
            Err(EngineError::Db(err)) if err.is_unique_violation() => {
                let mut conn = self.db.pool().acquire().await.map_err(ceres_db::DbError::from)?;
                let winner = repo::commission::live_for_sale(&mut conn, &sale.id).await?;
                if winner.is_none() {
                    return Err(err.into());
                }
                Ok(winner)
            }
            Err(err) => Err(err),
        }
    }

    async fn record_commission(&self, sale: &Sale) -> EngineResult<Recorded> {
        let mut tx = self.begin().await?;

        if let Some(existing) = repo::commission::live_for_sale(&mut tx, &sale.id).await? {
            return Ok(Recorded::Existing(existing));
        }

        let rules = repo::rule::active_rules(&mut tx).await?;
        let resolution = match resolve(sale, &rules) {
            Ok(resolution) => resolution,
            Err(err) if err.is_soft() => {
                warn!(
                    sale_id = %sale.id,
                    active_rules = rules.len(),
                    reason = %err,
                    "No commission recorded; needs manual follow-up"
                );
                return Ok(Recorded::Skipped);
            }
            Err(err) => return Err(err.into()),
        };

        let commission = Commission::record(sale, &sale.seller_id, &resolution, self.now())?;
        repo::commission::insert(&mut tx, &commission).await?;
        commit(tx).await?;

        Ok(Recorded::Created(commission))
    }

    /// Resolves a commission again for a sale whose previous commission was
    /// canceled. A sale that still has a live commission returns it as is.
    pub async fn recommission(&self, sale_id: &str) -> EngineResult<Option<Commission>> {
        let sale = self.get_sale(sale_id).await?;
        self.ensure_commission(&sale).await
    }

    /// The sale's commission, preferring the live one over canceled history.
    pub async fn get_commission(&self, sale_id: &str) -> EngineResult<Option<Commission>> {
        Ok(self.db.commissions().for_sale(sale_id).await?)
    }

    pub async fn list_commissions(&self, filter: &CommissionFilter) -> EngineResult<Vec<Commission>> {
        Ok(self.db.commissions().list(filter).await?)
    }

    /// Moves a commission through its pay lifecycle. Admin only.
    ///
    /// ## Errors
    /// - [`CoreError::AdminOnly`] for non-admin actors
    /// - [`CoreError::InvalidPayStatusTransition`] for backward moves or
    ///   anything out of `paid` or `canceled`
    pub async fn update_commission_pay_status(
        &self,
        commission_id: &str,
        status: PayStatus,
        actor: &Actor,
    ) -> EngineResult<Commission> {
        if !actor.is_admin() {
            return Err(CoreError::AdminOnly {
                action: "update commission pay status".to_string(),
            }
            .into());
        }

        let mut tx = self.begin().await?;
        let mut commission = repo::commission::get(&mut tx, commission_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Commission", commission_id))?;
        let from = commission.pay_status;

        if !commission.transition(status, self.now())? {
            return Ok(commission);
        }
        repo::commission::update_status(&mut tx, &commission).await?;
        commit(tx).await?;

        info!(
            commission_id,
            %from,
            to = %status,
            admin = %actor.user_id,
            "Commission pay status changed"
        );
        Ok(commission)
    }
}
