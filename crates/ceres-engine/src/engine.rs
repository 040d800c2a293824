//! # SalesEngine
//!
//! The handle the CRM host holds. Operations are split by area:
//!
//! - [`opportunities`](crate::opportunities) - proposal editing and stages
//! - [`sales`](crate::sales) - conversion, direct sales, sale edits
//! - [`commissions`](crate::commissions) - resolution and the ledger
//!
//! ## Unit of Work
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  engine op                                                             │
//! │    │                                                                    │
//! │    ├── tx = db.begin()                                                 │
//! │    ├── load entities through tx                                        │
//! │    ├── apply ceres-core rules in memory (may reject: nothing written)  │
//! │    ├── write through tx                                                │
//! │    ├── tx.commit()            ← all or nothing                         │
//! │    └── publish events         ← after commit, never rolls back        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use ceres_core::EngineEvent;
use ceres_db::{Database, DbError};
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::events::{ChannelSink, EventSink, NoOpSink};

/// Quote-to-cash operations over one database.
///
/// Cheap to clone: clones share the pool and the event sink.
#[derive(Clone)]
pub struct SalesEngine {
    pub(crate) db: Database,
    pub(crate) config: EngineConfig,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for SalesEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesEngine")
            .field("db", &self.db)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SalesEngine {
    /// Creates an engine over an open database. Events are discarded until
    /// a sink is attached with [`with_event_sink`](Self::with_event_sink).
    pub fn new(db: Database, config: EngineConfig) -> Self {
        SalesEngine {
            db,
            config,
            events: Arc::new(NoOpSink),
        }
    }

    /// Opens the database described by `config` (running migrations) and
    /// builds the engine on top of it.
    pub async fn open(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let db = Database::new(config.db_config()).await?;
        info!(path = %config.database.path.display(), "Sales engine ready");
        Ok(Self::new(db, config))
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Attaches a [`ChannelSink`] sized by `[events] channel_capacity` and
    /// returns the receiving end for the notification worker.
    pub fn with_channel_sink(self) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (sink, receiver) = ChannelSink::new(self.config.events.channel_capacity);
        (self.with_event_sink(Arc::new(sink)), receiver)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    pub(crate) async fn begin(&self) -> EngineResult<Transaction<'static, Sqlite>> {
        Ok(self.db.begin().await?)
    }

    pub(crate) fn publish(&self, event: EngineEvent) {
        self.events.publish(event);
    }
}

/// Commits `tx`, mapping the sqlx error into the engine's taxonomy.
pub(crate) async fn commit(tx: Transaction<'static, Sqlite>) -> EngineResult<()> {
    tx.commit()
        .await
        .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
    Ok(())
}
