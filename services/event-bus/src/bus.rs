//! Bus trait and message types

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use types::events::OrderEvent;

/// Errors surfaced by a bus transport
#[derive(Error, Debug)]
pub enum BusError {
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

/// A message delivered to a subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    /// An order event from intake
    Event(OrderEvent),

    /// The transport (re)established its subscription. Events may have
    /// been missed; the consumer should reconcile from the order store
    /// before processing further events.
    Reconnected,
}

/// Publish/subscribe transport for order events
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish one event to the order channel.
    async fn publish(&self, event: &OrderEvent) -> Result<(), BusError>;

    /// Open a subscription. The receiver yields events in publish order
    /// (per connection) plus `Reconnected` markers.
    fn subscribe(&self) -> mpsc::Receiver<BusMessage>;
}
