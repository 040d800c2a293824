//! # ceres-db: Database Layer for Ceres
//!
//! This crate provides database access for the Ceres sales engine.
//! It uses SQLite for storage with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Ceres Data Flow                                  │
//! │                                                                         │
//! │  SalesEngine::win_opportunity                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     ceres-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │               │    │ product, rule  │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ opportunity    │    │ 001_init.sql │  │   │
//! │  │   │ begin() → tx  │    │ sale           │    │              │  │   │
//! │  │   │               │    │ commission     │    │              │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two Ways In
//!
//! Every repository module exposes free functions taking
//! `&mut SqliteConnection`, so the engine can compose several of them inside
//! one transaction. The `*Repository` structs wrap those functions for
//! single-statement use against the pool.
//!
//! ```rust,ignore
//! use ceres_db::{Database, DbConfig};
//! use ceres_db::repository::{opportunity, sale};
//!
//! let db = Database::new(DbConfig::new("ceres.db")).await?;
//!
//! // Pool-level access
//! let opp = db.opportunities().get("opp-id").await?;
//!
//! // Transactional access
//! let mut tx = db.begin().await?;
//! sale::insert(&mut tx, &new_sale).await?;
//! opportunity::save(&mut tx, &mut opp).await?;
//! tx.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::commission::{CommissionFilter, CommissionRepository};
pub use repository::opportunity::{OpportunityFilter, OpportunityRepository};
pub use repository::product::ProductRepository;
pub use repository::rule::RuleRepository;
pub use repository::sale::SaleRepository;
