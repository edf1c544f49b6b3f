//! Order event wire shapes for the event bus
//!
//! JSON-encoded, UTF-8, tagged by the `event` field. Delivery is
//! at-least-once, so consumers deduplicate by (stock_tx_id, kind).

use crate::ids::{StockId, StockTxId, UserId};
use crate::money::{Price, Quantity};
use crate::order::{Order, OrderType, Side};
use serde::{Deserialize, Serialize};

/// An event published by order intake and consumed by the matching engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum OrderEvent {
    /// A new order was recorded and should enter the book
    #[serde(rename = "NEW_ORDER")]
    NewOrder {
        stock_tx_id: StockTxId,
        stock_id: StockId,
        user_id: UserId,
        side: Side,
        order_type: OrderType,
        quantity: Quantity,
        price: Option<Price>,
        created_at: i64,
    },

    /// An order was cancelled; any residual should leave the book
    #[serde(rename = "CANCEL_ORDER")]
    CancelOrder {
        stock_tx_id: StockTxId,
        updated_at: i64,
    },
}

impl OrderEvent {
    /// Build the placement event for an order
    pub fn new_order(order: &Order) -> Self {
        Self::NewOrder {
            stock_tx_id: order.stock_tx_id,
            stock_id: order.stock_id,
            user_id: order.user_id,
            side: order.side,
            order_type: order.order_type,
            quantity: order.remaining_qty,
            price: order.limit_price,
            created_at: order.created_at,
        }
    }

    /// Build the cancellation event for an order
    pub fn cancel_order(stock_tx_id: StockTxId, updated_at: i64) -> Self {
        Self::CancelOrder {
            stock_tx_id,
            updated_at,
        }
    }

    /// The transaction id this event concerns
    pub fn stock_tx_id(&self) -> StockTxId {
        match self {
            OrderEvent::NewOrder { stock_tx_id, .. } => *stock_tx_id,
            OrderEvent::CancelOrder { stock_tx_id, .. } => *stock_tx_id,
        }
    }

    /// Event kind as a string label for logging and dedup keys
    pub fn kind(&self) -> &'static str {
        match self {
            OrderEvent::NewOrder { .. } => "NEW_ORDER",
            OrderEvent::CancelOrder { .. } => "CANCEL_ORDER",
        }
    }
}
