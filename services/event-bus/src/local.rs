//! In-process broker
//!
//! Backs the bus with a tokio broadcast channel. Used when intake and the
//! engine run in one process, and by every test that exercises the
//! intake → engine flow.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;
use types::events::OrderEvent;

use crate::bus::{BusError, BusMessage, EventBus};

/// In-process event broker
pub struct LocalBus {
    tx: broadcast::Sender<OrderEvent>,
}

impl LocalBus {
    /// Create a broker able to buffer `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, event: &OrderEvent) -> Result<(), BusError> {
        // A send error only means nobody is subscribed yet; pub/sub
        // semantics treat that as a successful publish.
        let _ = self.tx.send(event.clone());
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<BusMessage> {
        let mut source = self.tx.subscribe();
        let (out_tx, out_rx) = mpsc::channel(1024);

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(event) => {
                        if out_tx.send(BusMessage::Event(event)).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // The subscriber fell behind and lost events; a
                        // reconnect marker tells it to reconcile.
                        warn!(missed, "Local bus subscriber lagged");
                        if out_tx.send(BusMessage::Reconnected).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        out_rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::StockTxId;

    #[tokio::test]
    async fn test_publish_subscribe_roundtrip() {
        let bus = LocalBus::default();
        let mut rx = bus.subscribe();

        let event = OrderEvent::cancel_order(StockTxId::new(), 42);
        bus.publish(&event).await.unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg, BusMessage::Event(event));
    }

    #[tokio::test]
    async fn test_all_subscribers_receive() {
        let bus = LocalBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let event = OrderEvent::cancel_order(StockTxId::new(), 7);
        bus.publish(&event).await.unwrap();

        assert_eq!(rx1.recv().await.unwrap(), BusMessage::Event(event.clone()));
        assert_eq!(rx2.recv().await.unwrap(), BusMessage::Event(event));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = LocalBus::default();
        let event = OrderEvent::cancel_order(StockTxId::new(), 1);
        assert!(bus.publish(&event).await.is_ok());
    }

    #[tokio::test]
    async fn test_events_arrive_in_publish_order() {
        let bus = LocalBus::default();
        let mut rx = bus.subscribe();

        let e1 = OrderEvent::cancel_order(StockTxId::new(), 1);
        let e2 = OrderEvent::cancel_order(StockTxId::new(), 2);
        bus.publish(&e1).await.unwrap();
        bus.publish(&e2).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), BusMessage::Event(e1));
        assert_eq!(rx.recv().await.unwrap(), BusMessage::Event(e2));
    }
}
