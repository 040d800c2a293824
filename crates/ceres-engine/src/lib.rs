//! # ceres-engine: Quote-to-Cash Engine for Ceres
//!
//! Exposes the operations an agricultural-equipment dealer CRM calls while
//! a deal moves from proposal to sale to commission.
//!
//! ## Operation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  create_opportunity ──► add_line_item / update_line_item / ...         │
//! │          │                 (gross value recomputed on every edit)      │
//! │          ▼                                                              │
//! │  transition_stage  lead → qualified → proposal → closing               │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  win_opportunity ─────────────── one transaction ──────────────┐       │
//! │          │   sale + sale items + opportunity stage = won       │       │
//! │          ▼                                                     │       │
//! │  ensure_commission ─── product > category > global rule ──────┘       │
//! │          │                                                              │
//! │          ▼                                                              │
//! │  update_commission_pay_status  pending → approved → paid               │
//! │                                                                         │
//! │  create_sale_direct (walk-in) joins the flow at the sale step.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use ceres_engine::{EngineConfig, SalesEngine};
//!
//! ceres_engine::init_tracing();
//! let engine = SalesEngine::open(EngineConfig::load(None)?).await?;
//! let opp = engine.create_opportunity(new_opportunity).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod commissions;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod opportunities;
pub mod sales;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::EngineConfig;
pub use engine::SalesEngine;
pub use error::{EngineError, EngineResult};
pub use events::{ChannelSink, EventSink, NoOpSink, RecordingSink};
pub use sales::{ConversionRequest, DirectSaleRequest, SaleItemInput, SaleOutcome};

use tracing_subscriber::EnvFilter;

/// Default log filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,ceres=debug,sqlx=warn";

/// Installs a global `tracing` subscriber honoring `RUST_LOG`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
