//! # ceres-core: Pure Quote-to-Cash Logic for Ceres
//!
//! This crate is the **heart** of the Ceres sales engine. It contains the
//! pricing, stage, sale and commission rules as pure functions with zero I/O
//! dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Ceres Architecture                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                CRM host (forms, PDFs, dashboards)               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ in-process calls                       │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    ceres-engine (SalesEngine)                   │   │
//! │  │   create_opportunity, add_line_item, win_opportunity, ...       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ ceres-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌──────────┐ ┌─────────────┐ ┌──────┐ ┌────────┐ │   │
//! │  │   │  money  │ │ pricing  │ │ opportunity │ │ sale │ │commis- │ │   │
//! │  │   │ Percent │ │ LineItem │ │   Stage     │ │      │ │ sion   │ │   │
//! │  │   └─────────┘ └──────────┘ └─────────────┘ └──────┘ └────────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    ceres-db (Database Layer)                    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Integer-cent `Money`, exact `Percent`, half-up rounding
//! - [`pricing`] - Line items and price/discount cross-derivation
//! - [`proposal`] - Gross value aggregation
//! - [`opportunity`] - Proposal lifecycle and stage rules
//! - [`sale`] - Sale finalizer, totals and document snapshot
//! - [`commission`] - Rule resolution and pay-status lifecycle
//! - [`events`] - Typed notifications
//! - [`types`] - Catalog and identity types
//! - [`error`] / [`validation`] - Error taxonomy and input checks
//!
//! ## Example Usage
//!
//! ```rust
//! use ceres_core::money::{Money, Percent};
//! use ceres_core::pricing::compute_subtotal;
//! use rust_decimal::Decimal;
//!
//! // qty=3, unit price 100, discount 10%
//! let discount = Percent::new(Decimal::from(10)).unwrap();
//! let subtotal = compute_subtotal(3, Decimal::from(100), discount).unwrap();
//! assert_eq!(subtotal, Money::from_cents(27000));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod commission;
pub mod error;
pub mod events;
pub mod money;
pub mod opportunity;
pub mod pricing;
pub mod proposal;
pub mod sale;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use commission::{Commission, CommissionBase, CommissionRule, PayStatus, Resolution, RuleScope};
pub use error::{CoreError, CoreResult, ErrorKind, ValidationError};
pub use events::EngineEvent;
pub use money::{Money, Percent};
pub use opportunity::{NewOpportunity, Opportunity, Stage};
pub use pricing::{LineItem, LineItemPatch};
pub use sale::{DocumentSnapshot, NewServiceLine, Sale, SaleLineItem, SaleStatus, ServiceLine};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum quantity of a single line item.
pub const MAX_ITEM_QUANTITY: i64 = 9999;

/// Payment methods a sale may be split across.
pub const MAX_PAYMENT_METHODS: usize = 2;
