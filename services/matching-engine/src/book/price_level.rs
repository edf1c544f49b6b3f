//! Price level with a FIFO queue
//!
//! A price level holds every resting order at one price, in arrival
//! order, which is what enforces time priority within a price. Arrival
//! order is (created_at, stock_tx_id): the id breaks created_at ties and
//! is itself time-sortable.

use std::collections::VecDeque;
use types::ids::StockTxId;
use types::money::Quantity;
use types::order::Order;

/// All resting orders at one price, oldest first
#[derive(Debug, Clone, Default)]
pub struct PriceLevel {
    orders: VecDeque<Order>,
}

impl PriceLevel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an order keeping (created_at, stock_tx_id) order
    ///
    /// Orders almost always arrive in time order, so this walks from the
    /// back. Out-of-order arrival happens during reconciliation replays.
    pub fn insert(&mut self, order: Order) {
        let key = (order.created_at, order.stock_tx_id);
        let pos = self
            .orders
            .iter()
            .rposition(|o| (o.created_at, o.stock_tx_id) <= key)
            .map(|p| p + 1)
            .unwrap_or(0);
        self.orders.insert(pos, order);
    }

    /// The oldest order at this level
    pub fn front(&self) -> Option<&Order> {
        self.orders.front()
    }

    /// Mutable access to the oldest order
    pub fn front_mut(&mut self) -> Option<&mut Order> {
        self.orders.front_mut()
    }

    /// Pop the oldest order
    pub fn pop_front(&mut self) -> Option<Order> {
        self.orders.pop_front()
    }

    /// Remove an order by id, returning it if present
    pub fn remove(&mut self, id: &StockTxId) -> Option<Order> {
        let pos = self.orders.iter().position(|o| &o.stock_tx_id == id)?;
        self.orders.remove(pos)
    }

    /// Total resting quantity at this level
    pub fn total_quantity(&self) -> Quantity {
        self.orders
            .iter()
            .fold(Quantity::zero(), |acc, o| acc + o.remaining_qty)
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}
