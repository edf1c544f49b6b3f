//! Order lifecycle types
//!
//! An order moves IN_PROGRESS → PARTIALLY_COMPLETE* → {COMPLETED,
//! CANCELLED}. Fills never increase `remaining_qty`, and terminal orders
//! are immutable. Each fill mints a child order carrying the executed
//! quantity and price; children are the unit of history archival.

use crate::ids::{StockId, StockTxId, UserId, WalletTxId};
use crate::money::{Price, Quantity};
use serde::{Deserialize, Serialize};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order (bid)
    BUY,
    /// Sell order (ask)
    SELL,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::BUY => Side::SELL,
            Side::SELL => Side::BUY,
        }
    }
}

/// Order pricing type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Trade at the best available price
    MARKET,
    /// Trade at the limit price or better
    LIMIT,
}

/// Order status
///
/// `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted and awaiting matching
    #[serde(rename = "IN_PROGRESS")]
    InProgress,

    /// Some quantity filled, remainder still resting
    #[serde(rename = "PARTIALLY_COMPLETE")]
    PartiallyComplete,

    /// Fully filled (terminal)
    #[serde(rename = "COMPLETED")]
    Completed,

    /// Cancelled with quantity remaining (terminal)
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl OrderStatus {
    /// Check if the status is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

/// A stock order
///
/// `version` is an optimistic-locking counter bumped on every store
/// update; conditional updates compare it to detect concurrent writers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub stock_tx_id: StockTxId,
    pub stock_id: StockId,
    pub user_id: UserId,
    pub side: Side,
    pub order_type: OrderType,
    /// Present iff order_type is LIMIT for placed orders. Child orders
    /// record their execution price here regardless of order type.
    pub limit_price: Option<Price>,
    pub original_qty: Quantity,
    pub remaining_qty: Quantity,
    /// Set on child orders minted by a fill
    pub parent_tx_id: Option<StockTxId>,
    /// Set once a completed leg has caused a wallet movement
    pub wallet_tx_id: Option<WalletTxId>,
    pub status: OrderStatus,
    /// Diagnostic note, e.g. why a residual was cancelled
    pub message: Option<String>,
    pub created_at: i64, // Unix nanos
    pub updated_at: i64, // Unix nanos
    pub version: u64,
}

impl Order {
    /// Create a new order in IN_PROGRESS
    pub fn new(
        user_id: UserId,
        stock_id: StockId,
        side: Side,
        order_type: OrderType,
        quantity: Quantity,
        limit_price: Option<Price>,
        timestamp: i64,
    ) -> Self {
        Self {
            stock_tx_id: StockTxId::new(),
            stock_id,
            user_id,
            side,
            order_type,
            limit_price,
            original_qty: quantity,
            remaining_qty: quantity,
            parent_tx_id: None,
            wallet_tx_id: None,
            status: OrderStatus::InProgress,
            message: None,
            created_at: timestamp,
            updated_at: timestamp,
            version: 0,
        }
    }

    /// Check the quantity invariant: 0 <= remaining <= original
    pub fn check_invariant(&self) -> bool {
        self.remaining_qty <= self.original_qty
            && (self.status != OrderStatus::Completed || self.remaining_qty.is_zero())
    }

    /// Check if the order is fully filled
    pub fn is_filled(&self) -> bool {
        self.remaining_qty.is_zero()
    }

    /// Quantity filled so far
    pub fn filled_qty(&self) -> Quantity {
        self.original_qty - self.remaining_qty
    }

    /// Apply a fill, decrementing the remainder and adjusting status
    ///
    /// # Panics
    /// Panics if the fill exceeds the remaining quantity or the order is
    /// already terminal
    pub fn apply_fill(&mut self, qty: Quantity, timestamp: i64) {
        assert!(!self.status.is_terminal(), "Cannot fill a terminal order");
        assert!(qty <= self.remaining_qty, "Fill would exceed remaining quantity");

        self.remaining_qty = self.remaining_qty - qty;
        self.status = if self.remaining_qty.is_zero() {
            OrderStatus::Completed
        } else {
            OrderStatus::PartiallyComplete
        };
        self.updated_at = timestamp;
        self.version += 1;

        assert!(self.check_invariant(), "Invariant violated after fill");
    }

    /// Cancel the order for its remaining quantity
    ///
    /// # Panics
    /// Panics if the order is already terminal
    pub fn cancel(&mut self, message: Option<String>, timestamp: i64) {
        assert!(!self.status.is_terminal(), "Cannot cancel a terminal order");

        self.status = OrderStatus::Cancelled;
        self.message = message;
        self.updated_at = timestamp;
        self.version += 1;
    }

    /// Mint the child order for one executed leg
    ///
    /// The child carries a fresh id, points back to this order, and is
    /// born COMPLETED with the traded quantity and execution price.
    pub fn spawn_child(&self, qty: Quantity, execution_price: Price, timestamp: i64) -> Order {
        Order {
            stock_tx_id: StockTxId::new(),
            stock_id: self.stock_id,
            user_id: self.user_id,
            side: self.side,
            order_type: self.order_type,
            limit_price: Some(execution_price),
            original_qty: qty,
            remaining_qty: Quantity::zero(),
            parent_tx_id: Some(self.stock_tx_id),
            wallet_tx_id: None,
            status: OrderStatus::Completed,
            message: None,
            created_at: timestamp,
            updated_at: timestamp,
            version: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_order(side: Side, qty: u64) -> Order {
        Order::new(
            UserId::new(1),
            StockId::new(1),
            side,
            OrderType::LIMIT,
            Quantity::new(qty),
            Some(Price::from_u64(50)),
            1_708_123_456_789_000_000,
        )
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::BUY.opposite(), Side::SELL);
        assert_eq!(Side::SELL.opposite(), Side::BUY);
    }

    #[test]
    fn test_order_creation() {
        let order = test_order(Side::BUY, 100);
        assert_eq!(order.status, OrderStatus::InProgress);
        assert_eq!(order.remaining_qty, Quantity::new(100));
        assert!(order.check_invariant());
        assert!(order.parent_tx_id.is_none());
    }

    #[test]
    fn test_partial_then_full_fill() {
        let mut order = test_order(Side::SELL, 100);

        order.apply_fill(Quantity::new(40), 1_708_123_456_790_000_000);
        assert_eq!(order.status, OrderStatus::PartiallyComplete);
        assert_eq!(order.remaining_qty, Quantity::new(60));
        assert_eq!(order.filled_qty(), Quantity::new(40));

        order.apply_fill(Quantity::new(60), 1_708_123_456_791_000_000);
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.is_filled());
        assert!(order.check_invariant());
    }

    #[test]
    #[should_panic(expected = "Fill would exceed remaining quantity")]
    fn test_overfill_panics() {
        let mut order = test_order(Side::BUY, 10);
        order.apply_fill(Quantity::new(11), 0);
    }

    #[test]
    fn test_cancel() {
        let mut order = test_order(Side::BUY, 10);
        order.cancel(None, 1_708_123_456_790_000_000);
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert!(order.status.is_terminal());
        assert_eq!(order.remaining_qty, Quantity::new(10));
    }

    #[test]
    #[should_panic(expected = "Cannot cancel a terminal order")]
    fn test_cancel_terminal_panics() {
        let mut order = test_order(Side::BUY, 10);
        order.apply_fill(Quantity::new(10), 0);
        order.cancel(None, 0);
    }

    #[test]
    fn test_spawn_child() {
        let parent = test_order(Side::SELL, 100);
        let child = parent.spawn_child(
            Quantity::new(40),
            Price::from_u64(50),
            1_708_123_456_790_000_000,
        );

        assert_eq!(child.parent_tx_id, Some(parent.stock_tx_id));
        assert_eq!(child.status, OrderStatus::Completed);
        assert_eq!(child.original_qty, Quantity::new(40));
        assert!(child.remaining_qty.is_zero());
        assert_eq!(child.limit_price, Some(Price::from_u64(50)));
        assert_ne!(child.stock_tx_id, parent.stock_tx_id);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
        assert_eq!(
            serde_json::to_string(&OrderStatus::PartiallyComplete).unwrap(),
            "\"PARTIALLY_COMPLETE\""
        );
    }

    #[test]
    fn test_order_serialization_roundtrip() {
        let order = test_order(Side::BUY, 10);
        let json = serde_json::to_string(&order).unwrap();
        let deserialized: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(order, deserialized);
    }
}
