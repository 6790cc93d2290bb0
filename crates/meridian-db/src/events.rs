//! # Outcome Events
//!
//! A broadcast stream of operation outcomes, consumed by the presentation
//! layer (out of scope here). The processors emit after their transaction
//! commits (or after a rejection), so a subscriber never observes an event
//! for state that later rolled back.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Outcome notifications produced by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PosEvent {
    /// A product was created in the catalog.
    ProductAdded { product_id: String, sku: String },

    /// A sale committed successfully.
    SaleCompleted {
        sale_id: String,
        sale_number: i64,
        total_cents: i64,
    },

    /// A completed sale was cancelled and its stock restored.
    SaleCancelled { sale_id: String, sale_number: i64 },

    /// A commit was rejected because stock could not satisfy a line.
    InsufficientStock {
        product_id: String,
        requested: i64,
        available: i64,
    },

    /// A manual stock operation changed a counter.
    StockAdjusted {
        product_id: String,
        variant_id: Option<String>,
        new_stock: i64,
    },

    /// An unclassified failure surfaced to the caller.
    Error { message: String },
}

/// Broadcast bus for [`PosEvent`].
///
/// Cloning shares the underlying channel. Emission never blocks and never
/// fails the operation: with no subscribers the event is simply dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PosEvent>,
}

impl EventBus {
    /// Creates a bus retaining up to `capacity` undelivered events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        EventBus { tx }
    }

    /// Subscribes to the outcome stream.
    pub fn subscribe(&self) -> broadcast::Receiver<PosEvent> {
        self.tx.subscribe()
    }

    /// Emits an event to all current subscribers.
    pub fn emit(&self, event: PosEvent) {
        // A send error only means there are no subscribers right now.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(PosEvent::SaleCompleted {
            sale_id: "s1".into(),
            sale_number: 1,
            total_cents: 2700,
        });

        match rx.recv().await.unwrap() {
            PosEvent::SaleCompleted { sale_number, .. } => assert_eq!(sale_number, 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let bus = EventBus::new(8);
        bus.emit(PosEvent::Error {
            message: "nobody listening".into(),
        });
    }
}
