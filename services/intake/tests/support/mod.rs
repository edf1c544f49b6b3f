//! Test doubles and wiring for end-to-end trading flows
//!
//! Composes the real store, bus, engine, and settlement pool with
//! in-memory wallet/portfolio/history services.

use async_trait::async_trait;
use event_bus::{EventBus, LocalBus};
use intake::state::AppState;
use matching_engine::{EngineConfig, MatchingEngine};
use order_store::{MemoryOrderStore, OrderStore};
use rust_decimal::Decimal;
use settlement::retry::RetryPolicy;
use settlement::{
    ClientError, CoordinatorConfig, HistoryApi, HistoryWriter, PortfolioApi, SettlementCoordinator,
    Settler, WalletApi,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use types::ids::{StockId, StockTxId, UserId};
use types::money::Quantity;
use types::order::{Order, OrderStatus};
use types::trade::{PortfolioHolding, WalletMovement};

#[derive(Default)]
pub struct FakeWallet {
    balances: Mutex<HashMap<UserId, Decimal>>,
    applied: Mutex<HashSet<String>>,
}

impl FakeWallet {
    pub fn deposit(&self, user: UserId, amount: u64) {
        *self.balances.lock().unwrap().entry(user).or_default() += Decimal::from(amount);
    }

    pub fn balance_of(&self, user: UserId) -> Decimal {
        self.balances
            .lock()
            .unwrap()
            .get(&user)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl WalletApi for FakeWallet {
    async fn debit(
        &self,
        user: UserId,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<Decimal, ClientError> {
        if !self
            .applied
            .lock()
            .unwrap()
            .insert(idempotency_key.to_string())
        {
            return Ok(self.balance_of(user));
        }
        let mut balances = self.balances.lock().unwrap();
        let balance = balances.entry(user).or_default();
        if *balance < amount {
            return Err(ClientError::Rejected {
                status: 400,
                message: "insufficient funds".into(),
            });
        }
        *balance -= amount;
        Ok(*balance)
    }

    async fn credit(
        &self,
        user: UserId,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<Decimal, ClientError> {
        if !self
            .applied
            .lock()
            .unwrap()
            .insert(idempotency_key.to_string())
        {
            return Ok(self.balance_of(user));
        }
        let mut balances = self.balances.lock().unwrap();
        let balance = balances.entry(user).or_default();
        *balance += amount;
        Ok(*balance)
    }

    async fn balance(&self, user: UserId) -> Result<Decimal, ClientError> {
        Ok(self.balance_of(user))
    }
}

#[derive(Default)]
pub struct FakePortfolio {
    holdings: Mutex<HashMap<(UserId, StockId), i64>>,
    applied: Mutex<HashSet<String>>,
}

impl FakePortfolio {
    pub fn grant(&self, user: UserId, stock: StockId, qty: i64) {
        *self.holdings.lock().unwrap().entry((user, stock)).or_insert(0) += qty;
    }

    pub fn holding_of(&self, user: UserId, stock: StockId) -> i64 {
        self.holdings
            .lock()
            .unwrap()
            .get(&(user, stock))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_held(&self, stock: StockId) -> i64 {
        self.holdings
            .lock()
            .unwrap()
            .iter()
            .filter(|((_, s), _)| *s == stock)
            .map(|(_, qty)| *qty)
            .sum()
    }
}

#[async_trait]
impl PortfolioApi for FakePortfolio {
    async fn adjust_holding(
        &self,
        user: UserId,
        stock: StockId,
        delta: i64,
        idempotency_key: &str,
    ) -> Result<(), ClientError> {
        if !self
            .applied
            .lock()
            .unwrap()
            .insert(idempotency_key.to_string())
        {
            return Ok(());
        }
        let mut holdings = self.holdings.lock().unwrap();
        let holding = holdings.entry((user, stock)).or_insert(0);
        if *holding + delta < 0 {
            return Err(ClientError::Rejected {
                status: 400,
                message: "insufficient shares".into(),
            });
        }
        *holding += delta;
        Ok(())
    }

    async fn list_holdings(&self, user: UserId) -> Result<Vec<PortfolioHolding>, ClientError> {
        Ok(self
            .holdings
            .lock()
            .unwrap()
            .iter()
            .filter(|((u, _), qty)| *u == user && **qty > 0)
            .map(|((_, stock), qty)| PortfolioHolding {
                user_id: user,
                stock_id: *stock,
                quantity_owned: Quantity::new(*qty as u64),
            })
            .collect())
    }

    async fn create_stock(&self, _name: &str) -> Result<StockId, ClientError> {
        Ok(StockId::new(1))
    }
}

#[derive(Default)]
pub struct FakeHistory {
    pub orders: Mutex<Vec<Order>>,
    pub movements: Mutex<Vec<WalletMovement>>,
}

impl FakeHistory {
    pub fn movement_count(&self) -> usize {
        self.movements.lock().unwrap().len()
    }

    pub fn completed_children(&self) -> Vec<Order> {
        self.orders
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.parent_tx_id.is_some())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HistoryApi for FakeHistory {
    async fn record_stock_tx(&self, order: &Order) -> Result<(), ClientError> {
        let mut orders = self.orders.lock().unwrap();
        if let Some(existing) = orders
            .iter_mut()
            .find(|o| o.stock_tx_id == order.stock_tx_id)
        {
            *existing = order.clone();
        } else {
            orders.push(order.clone());
        }
        Ok(())
    }

    async fn record_wallet_tx(&self, movement: &WalletMovement) -> Result<(), ClientError> {
        let mut movements = self.movements.lock().unwrap();
        if let Some(existing) = movements
            .iter_mut()
            .find(|m| m.wallet_tx_id == movement.wallet_tx_id)
        {
            *existing = movement.clone();
        } else {
            movements.push(movement.clone());
        }
        Ok(())
    }

    async fn list_stock_tx(&self, user: UserId) -> Result<Vec<Order>, ClientError> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.user_id == user)
            .cloned()
            .collect())
    }

    async fn list_wallet_tx(&self, user: UserId) -> Result<Vec<WalletMovement>, ClientError> {
        Ok(self
            .movements
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.user_id == user)
            .cloned()
            .collect())
    }
}

pub struct TestCore {
    pub state: AppState,
    pub store: Arc<MemoryOrderStore>,
    pub wallet: Arc<FakeWallet>,
    pub portfolio: Arc<FakePortfolio>,
    pub history: Arc<FakeHistory>,
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

/// Wire the full core: real store, bus, engine, and settlement pool over
/// fake external services.
pub fn start_core() -> TestCore {
    let store = Arc::new(MemoryOrderStore::new());
    let wallet = Arc::new(FakeWallet::default());
    let portfolio = Arc::new(FakePortfolio::default());
    let history = Arc::new(FakeHistory::default());
    let bus = Arc::new(LocalBus::default());

    let settler = Arc::new(Settler::new(
        store.clone(),
        wallet.clone(),
        portfolio.clone(),
        HistoryWriter::new(history.clone(), fast_retry()),
        fast_retry(),
    ));
    let job_tx = SettlementCoordinator::spawn(
        settler,
        CoordinatorConfig {
            workers: 2,
            queue_depth: 64,
        },
    );

    let engine = Arc::new(MatchingEngine::new(
        store.clone(),
        job_tx,
        EngineConfig::default(),
    ));
    tokio::spawn(engine.run(bus.subscribe()));

    let state = AppState::new(
        store.clone(),
        bus,
        wallet.clone(),
        portfolio.clone(),
    );

    TestCore {
        state,
        store,
        wallet,
        portfolio,
        history,
    }
}

/// Poll until the order reaches `status` or time runs out.
pub async fn wait_for_status(core: &TestCore, id: StockTxId, status: OrderStatus) -> Order {
    for _ in 0..300 {
        if let Some(order) = core.store.get(id).await.unwrap() {
            if order.status == status {
                return order;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("order {id} never reached {status:?}");
}

/// Poll until the history holds `count` wallet movements.
pub async fn wait_for_movements(core: &TestCore, count: usize) {
    for _ in 0..300 {
        if core.history.movement_count() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "history never reached {count} movements, has {}",
        core.history.movement_count()
    );
}

/// Shares conservation: holdings plus escrow (remaining on resting SELL
/// orders) must equal the total ever issued for the stock.
pub async fn assert_share_conservation(core: &TestCore, stock: StockId, issued: i64) {
    let open = core.store.open_orders_for_stock(stock).await.unwrap();
    let escrowed: u64 = open
        .iter()
        .filter(|o| o.side == types::order::Side::SELL)
        .map(|o| o.remaining_qty.as_u64())
        .sum();
    let held = core.portfolio.total_held(stock);
    assert_eq!(
        held + escrowed as i64,
        issued,
        "share conservation violated: held {held} + escrowed {escrowed} != issued {issued}"
    );
}
