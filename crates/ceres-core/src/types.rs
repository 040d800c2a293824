//! # Domain Types
//!
//! Catalog and identity types shared by every part of the engine.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │  ServiceItem    │   │     Actor       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  user_id        │       │
//! │  │  list_price     │   │  kind           │   │  role           │       │
//! │  │  unit_cost      │   │  default_price  │   └─────────────────┘       │
//! │  │  max_discount   │   └─────────────────┘                              │
//! │  │  category       │                                                    │
//! │  └─────────────────┘                                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ ProductStatus   │   │  ServiceKind    │   │ PaymentMethod   │       │
//! │  │  Active         │   │  Maintenance    │   │  Cash, Pix,     │       │
//! │  │  Inactive       │   │  Revision       │   │  cards, slip,   │       │
//! │  └─────────────────┘   │  Spraying       │   │  transfer,      │       │
//! │                        └─────────────────┘   │  Financing      │       │
//! │                                              └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Products and service items are owned by catalog management. The engine
//! only reads them, and always at the moment of computation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::{Money, Percent};

/// Generates a new entity identifier (UUID v4 string).
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// =============================================================================
// Product
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Active,
    Inactive,
}

impl Default for ProductStatus {
    fn default() -> Self {
        ProductStatus::Active
    }
}

/// A catalog product.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Product {
    /// Unique identifier (UUID v4).
    pub id: String,

    pub name: String,

    /// List price. Becomes the anchor price of a line item when the product
    /// is added to a proposal.
    pub list_price: Money,

    /// Current unit cost. Read again at sale time, never cached.
    pub unit_cost: Money,

    /// Highest discount a seller may grant on this product.
    pub max_discount_percent: Percent,

    pub category: String,

    pub status: ProductStatus,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == ProductStatus::Active
    }
}

// =============================================================================
// Services
// =============================================================================

/// Kind of service that can be sold alongside equipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Maintenance,
    Revision,
    Spraying,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 3] = [
        ServiceKind::Maintenance,
        ServiceKind::Revision,
        ServiceKind::Spraying,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Maintenance => "maintenance",
            ServiceKind::Revision => "revision",
            ServiceKind::Spraying => "spraying",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ServiceItem {
    pub id: String,
    pub name: String,
    pub kind: ServiceKind,
    pub default_price: Money,
    pub active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Payment Method
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Pix,
    CreditCard,
    DebitCard,
    BankSlip,
    BankTransfer,
    Financing,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 7] = [
        PaymentMethod::Cash,
        PaymentMethod::Pix,
        PaymentMethod::CreditCard,
        PaymentMethod::DebitCard,
        PaymentMethod::BankSlip,
        PaymentMethod::BankTransfer,
        PaymentMethod::Financing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Pix => "pix",
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::DebitCard => "debit_card",
            PaymentMethod::BankSlip => "bank_slip",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Financing => "financing",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentMethod::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "payment_method".to_string(),
                allowed: PaymentMethod::ALL.iter().map(|m| m.as_str().to_string()).collect(),
            })
    }
}

// =============================================================================
// Identity
// =============================================================================

/// Caller role, supplied by the host's identity/session collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Seller,
    Technician,
}

/// The authenticated caller of an engine operation.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    #[inline]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
