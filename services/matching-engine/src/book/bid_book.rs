//! Bid (buy-side) book
//!
//! Buy orders sorted by price descending, FIFO within a price. BTreeMap
//! keeps iteration deterministic.

use std::collections::BTreeMap;
use types::ids::StockTxId;
use types::money::{Price, Quantity};
use types::order::Order;

use super::price_level::PriceLevel;

/// Buy side of an order book, best (highest) bid first
#[derive(Debug, Clone, Default)]
pub struct BidBook {
    levels: BTreeMap<Price, PriceLevel>,
}

impl BidBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a resting buy order at its limit price
    pub fn insert(&mut self, price: Price, order: Order) {
        self.levels.entry(price).or_default().insert(order);
    }

    /// Remove an order, pruning the level if it empties
    pub fn remove(&mut self, price: Price, id: &StockTxId) -> Option<Order> {
        let level = self.levels.get_mut(&price)?;
        let removed = level.remove(id)?;
        if level.is_empty() {
            self.levels.remove(&price);
        }
        Some(removed)
    }

    /// Best bid price
    pub fn best_price(&self) -> Option<Price> {
        self.levels.keys().next_back().copied()
    }

    /// The oldest order at the best bid
    pub fn best_order(&self) -> Option<&Order> {
        self.levels.values().next_back().and_then(|l| l.front())
    }

    /// Mutable access to the best level
    pub fn best_level_mut(&mut self) -> Option<(Price, &mut PriceLevel)> {
        self.levels.iter_mut().next_back().map(|(p, l)| (*p, l))
    }

    /// Drop the level at `price` if it has no orders left
    pub fn prune_if_empty(&mut self, price: Price) {
        if self.levels.get(&price).is_some_and(|l| l.is_empty()) {
            self.levels.remove(&price);
        }
    }

    /// Total resting quantity across all levels
    pub fn total_quantity(&self) -> Quantity {
        self.levels
            .values()
            .fold(Quantity::zero(), |acc, l| acc + l.total_quantity())
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn order_count(&self) -> usize {
        self.levels.values().map(|l| l.order_count()).sum()
    }
}
