//! Redis pub/sub transport
//!
//! Publishes order events on a configurable channel over a multiplexed
//! connection. The subscriber runs its own task: on any disconnect it
//! retries with exponential backoff and emits a `Reconnected` marker
//! after every successful (re)subscribe so the consumer can reconcile
//! missed events from the order store.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use types::events::OrderEvent;

use crate::bus::{BusError, BusMessage, EventBus};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

impl From<redis::RedisError> for BusError {
    fn from(err: redis::RedisError) -> Self {
        BusError::Transport(err.to_string())
    }
}

/// Redis-backed event bus
pub struct RedisBus {
    client: redis::Client,
    publish_conn: redis::aio::MultiplexedConnection,
    channel: String,
}

impl RedisBus {
    /// Connect to Redis and prepare the publish connection
    pub async fn connect(url: &str, channel: impl Into<String>) -> Result<Self, BusError> {
        let client = redis::Client::open(url)?;
        let publish_conn = client.get_multiplexed_async_connection().await?;
        let channel = channel.into();
        info!(%channel, "Connected to Redis event bus");
        Ok(Self {
            client,
            publish_conn,
            channel,
        })
    }

    /// The channel this bus publishes and subscribes on
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, event: &OrderEvent) -> Result<(), BusError> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.publish_conn.clone();
        conn.publish::<_, _, ()>(&self.channel, payload).await?;
        Ok(())
    }

    fn subscribe(&self) -> mpsc::Receiver<BusMessage> {
        let (tx, rx) = mpsc::channel(1024);
        let client = self.client.clone();
        let channel = self.channel.clone();
        tokio::spawn(subscriber_loop(client, channel, tx));
        rx
    }
}

/// Reconnecting subscription loop. Runs until the receiver is dropped.
async fn subscriber_loop(
    client: redis::Client,
    channel: String,
    tx: mpsc::Sender<BusMessage>,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match client.get_async_pubsub().await {
            Ok(mut pubsub) => {
                if let Err(err) = pubsub.subscribe(&channel).await {
                    warn!(%channel, error = %err, "Subscribe failed");
                } else {
                    info!(%channel, "Subscribed to order channel");
                    backoff = INITIAL_BACKOFF;
                    if tx.send(BusMessage::Reconnected).await.is_err() {
                        return;
                    }

                    let mut stream = pubsub.on_message();
                    while let Some(msg) = stream.next().await {
                        let payload: String = match msg.get_payload() {
                            Ok(payload) => payload,
                            Err(err) => {
                                warn!(error = %err, "Unreadable bus payload");
                                continue;
                            }
                        };
                        match serde_json::from_str::<OrderEvent>(&payload) {
                            Ok(event) => {
                                if tx.send(BusMessage::Event(event)).await.is_err() {
                                    return;
                                }
                            }
                            Err(err) => {
                                warn!(error = %err, payload, "Dropping malformed bus event")
                            }
                        }
                    }
                    warn!(%channel, "Subscription stream ended, reconnecting");
                }
            }
            Err(err) => {
                warn!(error = %err, "Redis connection failed");
            }
        }

        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
