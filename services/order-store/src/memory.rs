//! In-memory store engine
//!
//! Keeps the primary map plus the user and (stock, side, status) indexes
//! in one RwLock-guarded structure so index maintenance is atomic with
//! the write that caused it.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::debug;
use types::ids::{StockId, StockTxId, UserId};
use types::order::{Order, OrderStatus, Side};

use crate::store::{OrderStore, OrderUpdate, StoreError};

type StatusKey = (StockId, Side, OrderStatus);

#[derive(Default)]
struct Inner {
    orders: HashMap<StockTxId, Order>,
    by_user: HashMap<UserId, Vec<StockTxId>>,
    by_stock: HashMap<StatusKey, BTreeSet<StockTxId>>,
}

impl Inner {
    fn status_key(order: &Order) -> StatusKey {
        (order.stock_id, order.side, order.status)
    }

    fn index_insert(&mut self, order: &Order) {
        self.by_user
            .entry(order.user_id)
            .or_default()
            .push(order.stock_tx_id);
        self.by_stock
            .entry(Self::status_key(order))
            .or_default()
            .insert(order.stock_tx_id);
    }

    fn index_move(&mut self, old_key: StatusKey, order: &Order) {
        if old_key != Self::status_key(order) {
            if let Some(set) = self.by_stock.get_mut(&old_key) {
                set.remove(&order.stock_tx_id);
                if set.is_empty() {
                    self.by_stock.remove(&old_key);
                }
            }
            self.by_stock
                .entry(Self::status_key(order))
                .or_default()
                .insert(order.stock_tx_id);
        }
    }

    fn index_remove(&mut self, order: &Order) {
        if let Some(ids) = self.by_user.get_mut(&order.user_id) {
            ids.retain(|id| id != &order.stock_tx_id);
        }
        if let Some(set) = self.by_stock.get_mut(&Self::status_key(order)) {
            set.remove(&order.stock_tx_id);
        }
    }
}

/// In-memory `OrderStore` implementation
///
/// The reference engine for the store contract; also what the test suites
/// drive. A database-backed engine substitutes behind the same trait.
#[derive(Default)]
pub struct MemoryOrderStore {
    inner: RwLock<Inner>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.orders.contains_key(&order.stock_tx_id) {
            return Err(StoreError::Duplicate(order.stock_tx_id));
        }
        debug!(stock_tx_id = %order.stock_tx_id, status = ?order.status, "Inserting order");
        inner.index_insert(&order);
        inner.orders.insert(order.stock_tx_id, order);
        Ok(())
    }

    async fn get(&self, id: StockTxId) -> Result<Option<Order>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.orders.get(&id).cloned())
    }

    async fn orders_for_user(&self, user: UserId) -> Result<Vec<Order>, StoreError> {
        let inner = self.inner.read().await;
        let mut orders: Vec<Order> = inner
            .by_user
            .get(&user)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.orders.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        orders.sort_by_key(|o| (o.created_at, o.stock_tx_id));
        Ok(orders)
    }

    async fn open_orders_for_stock(&self, stock: StockId) -> Result<Vec<Order>, StoreError> {
        let inner = self.inner.read().await;
        let mut orders = Vec::new();
        for side in [Side::BUY, Side::SELL] {
            for status in [OrderStatus::InProgress, OrderStatus::PartiallyComplete] {
                if let Some(ids) = inner.by_stock.get(&(stock, side, status)) {
                    orders.extend(ids.iter().filter_map(|id| inner.orders.get(id).cloned()));
                }
            }
        }
        orders.sort_by_key(|o| (o.created_at, o.stock_tx_id));
        Ok(orders)
    }

    async fn cas_update(
        &self,
        id: StockTxId,
        expected: OrderStatus,
        update: OrderUpdate,
    ) -> Result<Order, StoreError> {
        let mut inner = self.inner.write().await;
        let current = inner.orders.get(&id).ok_or(StoreError::NotFound(id))?;
        if current.status != expected {
            return Err(StoreError::Conflict {
                expected,
                found: current.status,
            });
        }
        let old_key = Inner::status_key(current);

        let order = inner
            .orders
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        order.status = update.status;
        order.remaining_qty = update.remaining_qty;
        if update.message.is_some() {
            order.message = update.message;
        }
        if update.wallet_tx_id.is_some() {
            order.wallet_tx_id = update.wallet_tx_id;
        }
        order.updated_at = update.updated_at;
        order.version += 1;

        let updated = order.clone();
        inner.index_move(old_key, &updated);
        debug!(
            stock_tx_id = %id,
            status = ?updated.status,
            remaining = %updated.remaining_qty,
            version = updated.version,
            "Order updated"
        );
        Ok(updated)
    }

    async fn remove(&self, id: StockTxId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let order = inner.orders.remove(&id).ok_or(StoreError::NotFound(id))?;
        inner.index_remove(&order);
        Ok(())
    }
}
