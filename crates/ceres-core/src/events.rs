//! # Domain Events
//!
//! Notifications published after a business operation commits. Consumers
//! (push, WhatsApp, dashboards) receive typed payloads, one per event kind.
//!
//! ```json
//! { "type": "commission_created", "commission_id": "…", "sale_id": "…",
//!   "seller_id": "…", "amount": 2850 }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::commission::{Commission, CommissionBase};
use crate::money::Money;
use crate::opportunity::Opportunity;
use crate::sale::Sale;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OpportunityWon {
    pub opportunity_id: String,
    pub sale_id: String,
    pub client_id: String,
    pub seller_id: String,
    pub gross_value: Money,
    #[ts(as = "String")]
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleCreated {
    pub sale_id: String,
    pub opportunity_id: Option<String>,
    pub client_id: String,
    pub seller_id: String,
    pub gross_value: Money,
    pub item_count: usize,
    #[ts(as = "String")]
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CommissionCreated {
    pub commission_id: String,
    pub sale_id: String,
    pub seller_id: String,
    pub base: CommissionBase,
    pub amount: Money,
    #[ts(as = "String")]
    pub occurred_at: DateTime<Utc>,
}

/// Everything the engine announces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export)]
pub enum EngineEvent {
    OpportunityWon(OpportunityWon),
    SaleCreated(SaleCreated),
    CommissionCreated(CommissionCreated),
}

impl EngineEvent {
    pub fn opportunity_won(opportunity: &Opportunity, sale: &Sale) -> Self {
        EngineEvent::OpportunityWon(OpportunityWon {
            opportunity_id: opportunity.id.clone(),
            sale_id: sale.id.clone(),
            client_id: opportunity.client_id.clone(),
            seller_id: opportunity.seller_id.clone(),
            gross_value: sale.gross_value,
            occurred_at: opportunity.updated_at,
        })
    }

    pub fn sale_created(sale: &Sale) -> Self {
        EngineEvent::SaleCreated(SaleCreated {
            sale_id: sale.id.clone(),
            opportunity_id: sale.opportunity_id.clone(),
            client_id: sale.client_id.clone(),
            seller_id: sale.seller_id.clone(),
            gross_value: sale.gross_value,
            item_count: sale.items.len(),
            occurred_at: sale.created_at,
        })
    }

    pub fn commission_created(commission: &Commission) -> Self {
        EngineEvent::CommissionCreated(CommissionCreated {
            commission_id: commission.id.clone(),
            sale_id: commission.sale_id.clone(),
            seller_id: commission.seller_id.clone(),
            base: commission.base,
            amount: commission.amount,
            occurred_at: commission.created_at,
        })
    }

    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::OpportunityWon(_) => "opportunity_won",
            EngineEvent::SaleCreated(_) => "sale_created",
            EngineEvent::CommissionCreated(_) => "commission_created",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_is_tagged() {
        let event = EngineEvent::CommissionCreated(CommissionCreated {
            commission_id: "c-1".to_string(),
            sale_id: "s-1".to_string(),
            seller_id: "u-1".to_string(),
            base: CommissionBase::Gross,
            amount: Money::from_cents(2850),
            occurred_at: Utc::now(),
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "commission_created");
        assert_eq!(json["amount"], 2850);
        assert_eq!(json["base"], "gross");
        assert_eq!(event.name(), "commission_created");
    }
}
