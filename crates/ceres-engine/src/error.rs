//! # Engine Error Types
//!
//! What callers of [`SalesEngine`](crate::SalesEngine) match on.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Core           │  │  Db             │  │  ConversionFailed       │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Validation     │  │  UniqueViolation│  │  anything that stopped  │ │
//! │  │  DiscountExceeds│  │  Conflict       │  │  opportunity → sale;    │ │
//! │  │  NoItems...     │  │  PoolExhausted  │  │  stage left unchanged   │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  NotFound       │  │  Forbidden      │  │  Config                 │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use ceres_core::{CoreError, ErrorKind};
use ceres_db::DbError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected by a validation or business rule. Nothing was written.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage failure. The operation's transaction was rolled back.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Converting an opportunity into a sale failed as a whole. The
    /// opportunity keeps its previous stage and no sale exists.
    #[error("Could not convert opportunity {opportunity_id} into a sale: {source}")]
    ConversionFailed {
        opportunity_id: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub(crate) fn conversion_failed(opportunity_id: &str, source: EngineError) -> Self {
        EngineError::ConversionFailed {
            opportunity_id: opportunity_id.to_string(),
            source: Box::new(source),
        }
    }

    /// True for transient storage failures; the caller may retry the whole
    /// operation. The engine never retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Db(err) => err.is_transient(),
            EngineError::ConversionFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// The domain error behind this failure, looking through
    /// `ConversionFailed`.
    pub fn core(&self) -> Option<&CoreError> {
        match self {
            EngineError::Core(err) => Some(err),
            EngineError::ConversionFailed { source, .. } => source.core(),
            _ => None,
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.core().map(CoreError::kind)
    }
}

impl From<ceres_core::ValidationError> for EngineError {
    fn from(err: ceres_core::ValidationError) -> Self {
        EngineError::Core(CoreError::from(err))
    }
}
