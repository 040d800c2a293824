//! # Event Delivery
//!
//! Notifications leave the engine through an [`EventSink`] after the
//! business transaction has committed. Delivery is fire-and-forget: a sink
//! cannot fail the operation that produced the event.
//!
//! ```text
//! win_opportunity ──► tx.commit() ──► sink.publish(OpportunityWon)
//!                                 └─► sink.publish(SaleCreated)
//!                                       │
//!                                       ▼
//!                     ChannelSink ──► mpsc (bounded) ──► push / WhatsApp worker
//!                         │
//!                         └── full or closed: warn! and drop
//! ```

use std::sync::Mutex;

use ceres_core::EngineEvent;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Receiver of engine notifications.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: EngineEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn publish(&self, event: EngineEvent) {
        debug!(event = event.name(), "Event discarded (no sink configured)");
    }
}

/// Forwards events into a bounded channel without ever waiting.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<EngineEvent>,
}

impl ChannelSink {
    /// Creates the sink and the receiving end for the consumer task.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (ChannelSink { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: EngineEvent) {
        let name = event.name();
        match self.sender.try_send(event) {
            Ok(()) => debug!(event = name, "Event queued"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(event = name, "Event channel full, dropping event")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(event = name, "Event channel closed, dropping event")
            }
        }
    }
}

/// Keeps every event in memory. Handy for tests and for hosts that poll.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns and clears the recorded events.
    pub fn take(&self) -> Vec<EngineEvent> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: EngineEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
