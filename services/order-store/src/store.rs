//! Store trait and error types

use async_trait::async_trait;
use thiserror::Error;
use types::errors::CoreError;
use types::ids::{StockId, StockTxId, UserId, WalletTxId};
use types::money::Quantity;
use types::order::{Order, OrderStatus};

/// Errors surfaced by an order store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("order not found: {0}")]
    NotFound(StockTxId),

    #[error("duplicate order id: {0}")]
    Duplicate(StockTxId),

    #[error("compare-and-set lost: expected {expected:?}, found {found:?}")]
    Conflict {
        expected: OrderStatus,
        found: OrderStatus,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => CoreError::NotFound(format!("order {id}")),
            StoreError::Duplicate(id) => CoreError::Internal(format!("duplicate order {id}")),
            StoreError::Conflict { expected, found } => {
                CoreError::Conflict(format!("expected {expected:?}, found {found:?}"))
            }
            StoreError::Unavailable(msg) => CoreError::UpstreamUnavailable(msg),
        }
    }
}

/// Fields applied by a conditional update
///
/// `updated_at` always advances; the store bumps the order's version.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub status: OrderStatus,
    pub remaining_qty: Quantity,
    pub message: Option<String>,
    pub wallet_tx_id: Option<WalletTxId>,
    pub updated_at: i64,
}

impl OrderUpdate {
    /// Update that only transitions status/remaining quantity
    pub fn transition(status: OrderStatus, remaining_qty: Quantity, updated_at: i64) -> Self {
        Self {
            status,
            remaining_qty,
            message: None,
            wallet_tx_id: None,
            updated_at,
        }
    }
}

/// Authoritative record of every order
///
/// Implementations provide their own durability and concurrency control;
/// callers rely only on the index and compare-and-set contract.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a new order. Fails on duplicate id.
    async fn insert(&self, order: Order) -> Result<(), StoreError>;

    /// Fetch one order by transaction id.
    async fn get(&self, id: StockTxId) -> Result<Option<Order>, StoreError>;

    /// All orders belonging to a user, oldest first.
    async fn orders_for_user(&self, user: UserId) -> Result<Vec<Order>, StoreError>;

    /// Non-terminal orders for one stock in created_at order.
    ///
    /// This is the reconciliation feed the matching engine replays to
    /// rebuild a book after a restart or a bus reconnect.
    async fn open_orders_for_stock(&self, stock: StockId) -> Result<Vec<Order>, StoreError>;

    /// Conditionally update an order.
    ///
    /// The update applies only if the current status equals `expected`;
    /// otherwise `Conflict` is returned and the caller re-reads and
    /// re-decides. Returns the updated order.
    async fn cas_update(
        &self,
        id: StockTxId,
        expected: OrderStatus,
        update: OrderUpdate,
    ) -> Result<Order, StoreError>;

    /// Remove an order outright.
    ///
    /// Only used by settlement to roll back child orders whose trade was
    /// compensated before ever settling.
    async fn remove(&self, id: StockTxId) -> Result<(), StoreError>;
}
