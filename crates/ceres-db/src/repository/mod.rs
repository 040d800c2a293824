//! # Repository Module
//!
//! Database repository implementations for Ceres.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Layout                                    │
//! │                                                                         │
//! │  opportunity.rs                                                         │
//! │  ├── pub async fn get(conn, id)        ◄── free functions on a          │
//! │  ├── pub async fn insert(conn, opp)        &mut SqliteConnection,       │
//! │  ├── pub async fn save(conn, opp)          composable in one tx         │
//! │  │                                                                      │
//! │  └── OpportunityRepository { pool }    ◄── acquires a connection and    │
//! │      ├── get(&self, id)                    delegates, for one-shot use  │
//! │      └── ...                                                            │
//! │                                                                         │
//! │  Money is stored as INTEGER cents, unit prices and percentages as       │
//! │  exact decimal TEXT. Row structs decode columns; `into_*` converts.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`ProductRepository`](product::ProductRepository) - Products and service items
//! - [`RuleRepository`](rule::RuleRepository) - Commission rules
//! - [`OpportunityRepository`](opportunity::OpportunityRepository) - Opportunities and their line items
//! - [`SaleRepository`](sale::SaleRepository) - Sales, sale items, service lines
//! - [`CommissionRepository`](commission::CommissionRepository) - Commission ledger

use std::str::FromStr;

use ceres_core::money::Percent;
use rust_decimal::Decimal;

use crate::error::{DbError, DbResult};

pub mod commission;
pub mod opportunity;
pub mod product;
pub mod rule;
pub mod sale;

/// Decodes an exact decimal stored as TEXT.
pub(crate) fn parse_decimal(field: &str, raw: &str) -> DbResult<Decimal> {
    Decimal::from_str(raw).map_err(|e| DbError::invalid_data(field, e))
}

/// Decodes a percentage stored as TEXT, re-checking its range.
pub(crate) fn parse_percent(field: &str, raw: &str) -> DbResult<Percent> {
    let value = parse_decimal(field, raw)?;
    Percent::new(value).map_err(|e| DbError::invalid_data(field, e))
}

pub(crate) fn parse_optional_percent(field: &str, raw: Option<&str>) -> DbResult<Option<Percent>> {
    raw.map(|raw| parse_percent(field, raw)).transpose()
}
