//! History writer
//!
//! The only component that makes a record externally visible as
//! COMPLETED. Writes are idempotent upserts on the history service, so a
//! replayed archive call is harmless. A write that keeps failing is
//! escalated through the log, never silenced: the upstream store will be
//! caught up by the next replay of the same record.

use std::sync::Arc;
use tracing::{debug, error};
use types::order::Order;
use types::trade::WalletMovement;

use crate::clients::HistoryApi;
use crate::retry::{with_retry, RetryPolicy};

/// Appends finalized records to the immutable history
pub struct HistoryWriter {
    api: Arc<dyn HistoryApi>,
    retry: RetryPolicy,
}

impl HistoryWriter {
    pub fn new(api: Arc<dyn HistoryApi>, retry: RetryPolicy) -> Self {
        Self { api, retry }
    }

    /// Archive one completed order record
    pub async fn archive_order(&self, order: &Order) {
        match with_retry(&self.retry, "record_stock_tx", || {
            self.api.record_stock_tx(order)
        })
        .await
        {
            Ok(()) => {
                debug!(stock_tx_id = %order.stock_tx_id, "Order archived");
            }
            Err(err) => {
                error!(
                    stock_tx_id = %order.stock_tx_id,
                    error = %err,
                    "History archive failed, record missing until replayed"
                );
            }
        }
    }

    /// Archive one wallet movement
    pub async fn archive_movement(&self, movement: &WalletMovement) {
        match with_retry(&self.retry, "record_wallet_tx", || {
            self.api.record_wallet_tx(movement)
        })
        .await
        {
            Ok(()) => {
                debug!(wallet_tx_id = %movement.wallet_tx_id, "Wallet movement archived");
            }
            Err(err) => {
                error!(
                    wallet_tx_id = %movement.wallet_tx_id,
                    error = %err,
                    "History archive failed, record missing until replayed"
                );
            }
        }
    }
}
