//! Request and response bodies

use serde::{Deserialize, Serialize};
use types::ids::{StockId, StockTxId};
use types::money::{Price, Quantity};
use types::order::{OrderStatus, OrderType, Side};

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrderRequest {
    pub stock_id: StockId,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Quantity,
    #[serde(default)]
    pub price: Option<Price>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedOrder {
    pub stock_tx_id: StockTxId,
    pub order_status: OrderStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelOrderRequest {
    pub stock_tx_id: StockTxId,
}
