//! Engine coordinator and per-stock workers
//!
//! A router task consumes bus messages and dispatches each to the worker
//! task owning that stock's book. Workers apply events serially, run the
//! match loop, and push settlement jobs through a bounded channel; a full
//! channel blocks the worker, pausing matching for that stock until
//! settlement drains.

use dashmap::DashMap;
use event_bus::BusMessage;
use order_store::OrderStore;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use types::clock::now_nanos;
use types::events::OrderEvent;
use types::ids::{StockId, StockTxId};
use types::money::{Price, Quantity};
use types::order::{Order, OrderType, Side};
use types::trade::SettlementJob;

use crate::book::{AskBook, BidBook};
use crate::matching::crossing;
use crate::matching::executor::{self, MatchError};

/// Engine tunables
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Depth of each per-stock command queue
    pub worker_queue_depth: usize,
    /// How many recently applied event ids each worker remembers
    pub dedup_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_queue_depth: 1024,
            dedup_window: 10_000,
        }
    }
}

/// Outcome of submitting one order to a book
#[derive(Debug)]
pub enum SubmitResult {
    /// No match; the order rests
    Rested,
    /// Some quantity traded and the remainder rests
    PartiallyFilled { trades: usize },
    /// The full quantity traded
    Filled { trades: usize },
    /// MARKET residual that cannot trade; it never rests
    NoLiquidity { trades: usize, residual: Quantity },
}

/// Reasons a stock worker halts its book
#[derive(Error, Debug)]
enum WorkerError {
    #[error("matching invariant violated: {0}")]
    Invariant(#[from] MatchError),

    #[error("book crossed after match loop")]
    BookCrossed,

    #[error("settlement channel closed")]
    SettlementClosed,
}

/// Sliding window of recently applied event ids
struct DedupWindow {
    seen: HashSet<StockTxId>,
    order: VecDeque<StockTxId>,
    capacity: usize,
}

impl DedupWindow {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn contains(&self, id: &StockTxId) -> bool {
        self.seen.contains(id)
    }

    /// Record an id; returns false if it was already present
    fn insert(&mut self, id: StockTxId) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }
}

/// The paired books for one stock plus a locate index for cancels
struct StockBook {
    bids: BidBook,
    asks: AskBook,
    locate: HashMap<StockTxId, (Side, Price)>,
}

impl StockBook {
    fn new() -> Self {
        Self {
            bids: BidBook::new(),
            asks: AskBook::new(),
            locate: HashMap::new(),
        }
    }

    /// Insert a LIMIT order with remaining quantity into its side
    fn insert_resting(&mut self, order: Order) {
        let Some(price) = order.limit_price else {
            warn!(stock_tx_id = %order.stock_tx_id, "Refusing to rest an order without a price");
            return;
        };
        self.locate.insert(order.stock_tx_id, (order.side, price));
        match order.side {
            Side::BUY => self.bids.insert(price, order),
            Side::SELL => self.asks.insert(price, order),
        }
    }

    /// Remove a resting order by id, if present
    fn remove(&mut self, id: &StockTxId) -> Option<Order> {
        let (side, price) = self.locate.remove(id)?;
        match side {
            Side::BUY => self.bids.remove(price, id),
            Side::SELL => self.asks.remove(price, id),
        }
    }

    fn contains(&self, id: &StockTxId) -> bool {
        self.locate.contains_key(id)
    }

    /// Best price opposing `side`
    fn opposing_best(&self, side: Side) -> Option<Price> {
        match side {
            Side::BUY => self.asks.best_price(),
            Side::SELL => self.bids.best_price(),
        }
    }

    /// Oldest order at the best opposing price
    fn opposing_front(&self, side: Side) -> Option<&Order> {
        match side {
            Side::BUY => self.asks.best_order(),
            Side::SELL => self.bids.best_order(),
        }
    }

    /// Run the match loop for `taker`, collecting one bundle per fill.
    ///
    /// A LIMIT residual is inserted into the book; a MARKET residual is
    /// reported as `NoLiquidity` and never rests.
    fn submit(
        &mut self,
        mut taker: Order,
        now: i64,
        jobs: &mut Vec<SettlementJob>,
    ) -> Result<SubmitResult, MatchError> {
        let mut trades = 0usize;

        while !taker.remaining_qty.is_zero() {
            let Some(best_price) = self.opposing_best(taker.side) else {
                break;
            };
            if !crossing::taker_crosses(&taker, best_price) {
                break;
            }
            let resting = match self.opposing_front(taker.side) {
                Some(order) => order.clone(),
                None => break,
            };
            // The resting side is always LIMIT; execution happens at its price.
            let Some(price) = resting.limit_price else {
                return Err(MatchError::RestingWithoutPrice);
            };

            let qty = taker.remaining_qty.min(resting.remaining_qty);
            let bundle = if taker.side == Side::BUY {
                executor::execute_match(&taker, &resting, qty, price, now)?
            } else {
                executor::execute_match(&resting, &taker, qty, price, now)?
            };
            jobs.push(SettlementJob::Trade(Box::new(bundle)));
            trades += 1;

            taker.apply_fill(qty, now);
            self.fill_opposing_front(taker.side, qty, now);
        }

        if taker.remaining_qty.is_zero() {
            return Ok(SubmitResult::Filled { trades });
        }

        match taker.order_type {
            OrderType::LIMIT => {
                self.insert_resting(taker);
                if trades == 0 {
                    Ok(SubmitResult::Rested)
                } else {
                    Ok(SubmitResult::PartiallyFilled { trades })
                }
            }
            OrderType::MARKET => Ok(SubmitResult::NoLiquidity {
                trades,
                residual: taker.remaining_qty,
            }),
        }
    }

    /// Decrement the front order opposing `taker_side`, dropping it from
    /// the book when fully consumed.
    fn fill_opposing_front(&mut self, taker_side: Side, qty: Quantity, now: i64) {
        let mut consumed: Option<StockTxId> = None;
        let mut filled_price: Option<Price> = None;

        let level = match taker_side {
            Side::BUY => self.asks.best_level_mut(),
            Side::SELL => self.bids.best_level_mut(),
        };
        if let Some((price, level)) = level {
            filled_price = Some(price);
            if let Some(front) = level.front_mut() {
                front.apply_fill(qty, now);
                if front.remaining_qty.is_zero() {
                    consumed = level.pop_front().map(|o| o.stock_tx_id);
                }
            }
        }

        if let Some(id) = consumed {
            self.locate.remove(&id);
        }
        if let Some(price) = filled_price {
            match taker_side {
                Side::BUY => self.asks.prune_if_empty(price),
                Side::SELL => self.bids.prune_if_empty(price),
            }
        }
    }

    /// Check that the top of book does not cross
    fn is_crossed(&self) -> bool {
        match (self.bids.best_price(), self.asks.best_price()) {
            (Some(bid), Some(ask)) => bid >= ask,
            _ => false,
        }
    }
}

enum WorkerCommand {
    Apply(OrderEvent),
    Reconcile,
}

/// Owns one stock's book and applies its events serially
struct StockWorker {
    stock_id: StockId,
    book: StockBook,
    seen: DedupWindow,
    store: Arc<dyn OrderStore>,
    job_tx: mpsc::Sender<SettlementJob>,
}

impl StockWorker {
    fn new(
        stock_id: StockId,
        store: Arc<dyn OrderStore>,
        job_tx: mpsc::Sender<SettlementJob>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            stock_id,
            book: StockBook::new(),
            seen: DedupWindow::new(config.dedup_window),
            store,
            job_tx,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<WorkerCommand>) {
        if let Err(err) = self.reconcile().await {
            error!(stock_id = %self.stock_id, error = %err, "Book halted during startup");
            return;
        }
        while let Some(cmd) = rx.recv().await {
            let result = match cmd {
                WorkerCommand::Apply(event) => self.apply(event).await,
                WorkerCommand::Reconcile => self.reconcile().await,
            };
            if let Err(err) = result {
                // Alarm: this stock stops matching until the process is
                // restarted and the book rebuilds from the store.
                error!(stock_id = %self.stock_id, error = %err, "Book halted");
                return;
            }
        }
    }

    async fn apply(&mut self, event: OrderEvent) -> Result<(), WorkerError> {
        match event {
            OrderEvent::NewOrder { stock_tx_id, .. } => self.apply_new_order(stock_tx_id).await,
            OrderEvent::CancelOrder { stock_tx_id, .. } => {
                if self.book.remove(&stock_tx_id).is_some() {
                    debug!(%stock_tx_id, "Removed cancelled residual from book");
                } else {
                    // Already fully matched or never rested; replays and
                    // crossed cancels both land here.
                    debug!(%stock_tx_id, "Cancel ignored, order not resting");
                }
                Ok(())
            }
        }
    }

    async fn apply_new_order(&mut self, stock_tx_id: StockTxId) -> Result<(), WorkerError> {
        if self.seen.contains(&stock_tx_id) {
            debug!(%stock_tx_id, "Duplicate placement event dropped");
            return Ok(());
        }
        if self.book.contains(&stock_tx_id) {
            debug!(%stock_tx_id, "Order already resting, replay dropped");
            self.seen.insert(stock_tx_id);
            return Ok(());
        }

        // The store is authoritative; the event payload is only a signal.
        // Read failures leave the event unmarked so a redelivery can
        // still apply it.
        let order = match self.store.get(stock_tx_id).await {
            Ok(Some(order)) => order,
            Ok(None) => {
                warn!(%stock_tx_id, "Placement event for unknown order dropped");
                return Ok(());
            }
            Err(err) => {
                warn!(%stock_tx_id, error = %err, "Store read failed, dropping event");
                return Ok(());
            }
        };
        if order.status.is_terminal() || order.remaining_qty.is_zero() {
            debug!(%stock_tx_id, status = ?order.status, "Order already settled, replay dropped");
            self.seen.insert(stock_tx_id);
            return Ok(());
        }

        self.seen.insert(stock_tx_id);
        self.run_submit(order).await
    }

    async fn run_submit(&mut self, taker: Order) -> Result<(), WorkerError> {
        let taker_id = taker.stock_tx_id;
        let taker_user = taker.user_id;
        let taker_side = taker.side;
        let now = now_nanos();

        let mut jobs = Vec::new();
        let result = self.book.submit(taker, now, &mut jobs)?;

        for job in jobs {
            if self.job_tx.send(job).await.is_err() {
                return Err(WorkerError::SettlementClosed);
            }
        }

        match result {
            SubmitResult::Rested => {
                debug!(stock_tx_id = %taker_id, "Order resting");
            }
            SubmitResult::PartiallyFilled { trades } => {
                debug!(stock_tx_id = %taker_id, trades, "Order partially filled, remainder resting");
            }
            SubmitResult::Filled { trades } => {
                debug!(stock_tx_id = %taker_id, trades, "Order fully filled");
            }
            SubmitResult::NoLiquidity { trades, residual } => {
                info!(stock_tx_id = %taker_id, trades, %residual, "No opposing liquidity, cancelling residual");
                let job = SettlementJob::CancelResidual {
                    stock_tx_id: taker_id,
                    user_id: taker_user,
                    stock_id: self.stock_id,
                    side: taker_side,
                    residual,
                    reason: "NO_LIQUIDITY".to_string(),
                };
                if self.job_tx.send(job).await.is_err() {
                    return Err(WorkerError::SettlementClosed);
                }
            }
        }

        if self.book.is_crossed() {
            return Err(WorkerError::BookCrossed);
        }
        Ok(())
    }

    /// Rebuild the book from the store's non-terminal orders.
    ///
    /// Runs at startup and after every bus reconnect. Only LIMIT orders
    /// rest; a crossed top after rebuild (events missed while
    /// disconnected) is uncrossed by resubmitting the newer order.
    async fn reconcile(&mut self) -> Result<(), WorkerError> {
        let orders = match self.store.open_orders_for_stock(self.stock_id).await {
            Ok(orders) => orders,
            Err(err) => {
                warn!(stock_id = %self.stock_id, error = %err, "Reconcile read failed, keeping current book");
                return Ok(());
            }
        };

        self.book = StockBook::new();
        let mut resting = 0usize;
        for order in orders {
            if order.order_type == OrderType::LIMIT && !order.remaining_qty.is_zero() {
                // Mark as applied: a placement event still queued for a
                // rebuilt order must not enter it a second time, even if
                // the uncross below consumes it first.
                self.seen.insert(order.stock_tx_id);
                self.book.insert_resting(order);
                resting += 1;
            }
        }
        info!(stock_id = %self.stock_id, resting, "Book rebuilt from order store");

        while self.book.is_crossed() {
            let newer = {
                let bid = self.book.bids.best_order();
                let ask = self.book.asks.best_order();
                match (bid, ask) {
                    (Some(b), Some(a)) => {
                        if (b.created_at, b.stock_tx_id) > (a.created_at, a.stock_tx_id) {
                            b.stock_tx_id
                        } else {
                            a.stock_tx_id
                        }
                    }
                    _ => break,
                }
            };
            match self.book.remove(&newer) {
                Some(order) => self.run_submit(order).await?,
                None => break,
            }
        }
        Ok(())
    }
}

/// Routes bus messages to per-stock workers
///
/// Workers are spawned on demand and each owns its book exclusively; no
/// lock is shared across stocks.
pub struct MatchingEngine {
    store: Arc<dyn OrderStore>,
    job_tx: mpsc::Sender<SettlementJob>,
    workers: DashMap<StockId, mpsc::Sender<WorkerCommand>>,
    config: EngineConfig,
}

impl MatchingEngine {
    pub fn new(
        store: Arc<dyn OrderStore>,
        job_tx: mpsc::Sender<SettlementJob>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            job_tx,
            workers: DashMap::new(),
            config,
        }
    }

    /// Consume bus messages until the subscription closes
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<BusMessage>) {
        info!("Matching engine started");
        while let Some(msg) = rx.recv().await {
            match msg {
                BusMessage::Event(event) => self.route_event(event).await,
                BusMessage::Reconnected => self.reconcile_all().await,
            }
        }
        info!("Matching engine stopped, bus subscription closed");
    }

    async fn route_event(&self, event: OrderEvent) {
        let stock_id = match &event {
            OrderEvent::NewOrder { stock_id, .. } => *stock_id,
            OrderEvent::CancelOrder { stock_tx_id, .. } => {
                match self.store.get(*stock_tx_id).await {
                    Ok(Some(order)) => order.stock_id,
                    Ok(None) => {
                        warn!(%stock_tx_id, "Cancel event for unknown order dropped");
                        return;
                    }
                    Err(err) => {
                        warn!(%stock_tx_id, error = %err, "Store read failed, dropping cancel");
                        return;
                    }
                }
            }
        };

        let tx = self.worker_sender(stock_id);
        if tx.send(WorkerCommand::Apply(event)).await.is_err() {
            error!(%stock_id, "Stock worker halted, event dropped");
        }
    }

    async fn reconcile_all(&self) {
        info!("Bus reconnected, reconciling all books");
        let senders: Vec<(StockId, mpsc::Sender<WorkerCommand>)> = self
            .workers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        for (stock_id, tx) in senders {
            if tx.send(WorkerCommand::Reconcile).await.is_err() {
                error!(%stock_id, "Stock worker halted, reconcile skipped");
            }
        }
    }

    fn worker_sender(&self, stock_id: StockId) -> mpsc::Sender<WorkerCommand> {
        self.workers
            .entry(stock_id)
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(self.config.worker_queue_depth);
                let worker = StockWorker::new(
                    stock_id,
                    Arc::clone(&self.store),
                    self.job_tx.clone(),
                    &self.config,
                );
                tokio::spawn(worker.run(rx));
                tx
            })
            .value()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use order_store::MemoryOrderStore;
    use types::ids::UserId;
    use types::order::OrderStatus;
    use types::trade::TradeBundle;

    fn order(
        user: i64,
        side: Side,
        order_type: OrderType,
        qty: u64,
        price: Option<u64>,
        ts: i64,
    ) -> Order {
        Order::new(
            UserId::new(user),
            StockId::new(1),
            side,
            order_type,
            Quantity::new(qty),
            price.map(Price::from_u64),
            ts,
        )
    }

    fn bundles(jobs: &[SettlementJob]) -> Vec<&TradeBundle> {
        jobs.iter()
            .filter_map(|j| match j {
                SettlementJob::Trade(b) => Some(b.as_ref()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_limit_orders_rest_without_cross() {
        let mut book = StockBook::new();
        let mut jobs = Vec::new();

        let buy = order(1, Side::BUY, OrderType::LIMIT, 10, Some(40), 100);
        let sell = order(2, Side::SELL, OrderType::LIMIT, 10, Some(50), 200);

        assert!(matches!(
            book.submit(buy, 100, &mut jobs).unwrap(),
            SubmitResult::Rested
        ));
        assert!(matches!(
            book.submit(sell, 200, &mut jobs).unwrap(),
            SubmitResult::Rested
        ));
        assert!(jobs.is_empty());
        assert!(!book.is_crossed());
    }

    #[test]
    fn test_full_match_at_resting_price() {
        let mut book = StockBook::new();
        let mut jobs = Vec::new();

        let sell = order(1, Side::SELL, OrderType::LIMIT, 10, Some(150), 100);
        book.submit(sell, 100, &mut jobs).unwrap();

        let buy = order(2, Side::BUY, OrderType::LIMIT, 10, Some(160), 200);
        let result = book.submit(buy, 200, &mut jobs).unwrap();

        assert!(matches!(result, SubmitResult::Filled { trades: 1 }));
        let trades = bundles(&jobs);
        assert_eq!(trades.len(), 1);
        // Execution at the resting (older) order's price, not the taker's
        assert_eq!(trades[0].trade.execution_price, Price::from_u64(150));
        assert_eq!(trades[0].trade.qty, Quantity::new(10));
        assert!(book.bids.is_empty());
        assert!(book.asks.is_empty());
    }

    #[test]
    fn test_partial_fill_leaves_remainder_resting() {
        let mut book = StockBook::new();
        let mut jobs = Vec::new();

        let sell = order(1, Side::SELL, OrderType::LIMIT, 100, Some(50), 100);
        let sell_id = sell.stock_tx_id;
        book.submit(sell, 100, &mut jobs).unwrap();

        let buy = order(2, Side::BUY, OrderType::MARKET, 40, None, 200);
        let result = book.submit(buy, 200, &mut jobs).unwrap();

        assert!(matches!(result, SubmitResult::Filled { trades: 1 }));
        let trades = bundles(&jobs);
        assert_eq!(trades[0].sell_parent.new_remaining, Quantity::new(60));
        assert_eq!(
            trades[0].sell_parent.new_status,
            OrderStatus::PartiallyComplete
        );
        assert_eq!(trades[0].buy_parent.new_status, OrderStatus::Completed);

        assert!(book.contains(&sell_id));
        assert_eq!(book.asks.total_quantity(), Quantity::new(60));
    }

    #[test]
    fn test_price_time_priority() {
        let mut book = StockBook::new();
        let mut jobs = Vec::new();

        let s1 = order(1, Side::SELL, OrderType::LIMIT, 10, Some(50), 100);
        let s1_id = s1.stock_tx_id;
        let s2 = order(2, Side::SELL, OrderType::LIMIT, 10, Some(50), 200);
        let s2_id = s2.stock_tx_id;
        book.submit(s1, 100, &mut jobs).unwrap();
        book.submit(s2, 200, &mut jobs).unwrap();

        let buy = order(3, Side::BUY, OrderType::MARKET, 10, None, 300);
        book.submit(buy, 300, &mut jobs).unwrap();

        let trades = bundles(&jobs);
        assert_eq!(trades.len(), 1);
        // The earlier sell wins the match
        assert_eq!(trades[0].sell_parent.stock_tx_id, s1_id);
        assert!(book.contains(&s2_id));
        assert!(!book.contains(&s1_id));
    }

    #[test]
    fn test_market_walks_the_book() {
        let mut book = StockBook::new();
        let mut jobs = Vec::new();

        book.submit(order(1, Side::SELL, OrderType::LIMIT, 50, Some(100), 100), 100, &mut jobs)
            .unwrap();
        book.submit(order(2, Side::SELL, OrderType::LIMIT, 30, Some(101), 200), 200, &mut jobs)
            .unwrap();
        book.submit(order(3, Side::SELL, OrderType::LIMIT, 20, Some(102), 300), 300, &mut jobs)
            .unwrap();

        let buy = order(4, Side::BUY, OrderType::MARKET, 80, None, 400);
        let result = book.submit(buy, 400, &mut jobs).unwrap();

        assert!(matches!(result, SubmitResult::Filled { trades: 2 }));
        let trades = bundles(&jobs);
        // One discrete trade per level, each at that level's price
        assert_eq!(trades[0].trade.execution_price, Price::from_u64(100));
        assert_eq!(trades[0].trade.qty, Quantity::new(50));
        assert_eq!(trades[1].trade.execution_price, Price::from_u64(101));
        assert_eq!(trades[1].trade.qty, Quantity::new(30));
        assert_eq!(book.asks.total_quantity(), Quantity::new(20));
    }

    #[test]
    fn test_market_without_liquidity_reports_residual() {
        let mut book = StockBook::new();
        let mut jobs = Vec::new();

        let buy = order(1, Side::BUY, OrderType::MARKET, 10, None, 100);
        let result = book.submit(buy, 100, &mut jobs).unwrap();

        match result {
            SubmitResult::NoLiquidity { trades, residual } => {
                assert_eq!(trades, 0);
                assert_eq!(residual, Quantity::new(10));
            }
            other => panic!("expected NoLiquidity, got {other:?}"),
        }
        assert!(book.bids.is_empty(), "MARKET orders never rest");
    }

    #[test]
    fn test_limit_sell_crosses_down_to_best_bid() {
        let mut book = StockBook::new();
        let mut jobs = Vec::new();

        book.submit(order(1, Side::BUY, OrderType::LIMIT, 10, Some(55), 100), 100, &mut jobs)
            .unwrap();
        let sell = order(2, Side::SELL, OrderType::LIMIT, 10, Some(50), 200);
        let result = book.submit(sell, 200, &mut jobs).unwrap();

        assert!(matches!(result, SubmitResult::Filled { trades: 1 }));
        // Resting bid's price wins
        assert_eq!(
            bundles(&jobs)[0].trade.execution_price,
            Price::from_u64(55)
        );
    }

    #[test]
    fn test_dedup_window_eviction() {
        let mut window = DedupWindow::new(2);
        let a = StockTxId::new();
        let b = StockTxId::new();
        let c = StockTxId::new();

        assert!(window.insert(a));
        assert!(!window.insert(a));
        assert!(window.insert(b));
        assert!(window.insert(c)); // evicts a
        assert!(window.insert(a));
    }

    async fn insert_and_apply(worker: &mut StockWorker, store: &MemoryOrderStore, order: Order) {
        let event = OrderEvent::new_order(&order);
        store.insert(order).await.unwrap();
        worker.apply(event).await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_matches_via_events() {
        let store = Arc::new(MemoryOrderStore::new());
        let (job_tx, mut job_rx) = mpsc::channel(16);
        let mut worker = StockWorker::new(
            StockId::new(1),
            store.clone(),
            job_tx,
            &EngineConfig::default(),
        );

        insert_and_apply(
            &mut worker,
            &store,
            order(1, Side::SELL, OrderType::LIMIT, 10, Some(150), 100),
        )
        .await;
        insert_and_apply(
            &mut worker,
            &store,
            order(2, Side::BUY, OrderType::MARKET, 10, None, 200),
        )
        .await;

        let job = job_rx.recv().await.unwrap();
        match job {
            SettlementJob::Trade(bundle) => {
                assert_eq!(bundle.trade.qty, Quantity::new(10));
                assert_eq!(bundle.trade.execution_price, Price::from_u64(150));
            }
            other => panic!("expected trade, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_worker_drops_duplicate_placement() {
        let store = Arc::new(MemoryOrderStore::new());
        let (job_tx, mut job_rx) = mpsc::channel(16);
        let mut worker = StockWorker::new(
            StockId::new(1),
            store.clone(),
            job_tx,
            &EngineConfig::default(),
        );

        let sell = order(1, Side::SELL, OrderType::LIMIT, 10, Some(150), 100);
        let event = OrderEvent::new_order(&sell);
        store.insert(sell).await.unwrap();
        worker.apply(event.clone()).await.unwrap();
        worker.apply(event).await.unwrap(); // replay

        assert_eq!(worker.book.asks.order_count(), 1);
        assert!(job_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_worker_cancel_removes_residual() {
        let store = Arc::new(MemoryOrderStore::new());
        let (job_tx, _job_rx) = mpsc::channel(16);
        let mut worker = StockWorker::new(
            StockId::new(1),
            store.clone(),
            job_tx,
            &EngineConfig::default(),
        );

        let buy = order(1, Side::BUY, OrderType::LIMIT, 10, Some(30), 100);
        let id = buy.stock_tx_id;
        insert_and_apply(&mut worker, &store, buy).await;
        assert!(worker.book.contains(&id));

        worker
            .apply(OrderEvent::cancel_order(id, 200))
            .await
            .unwrap();
        assert!(!worker.book.contains(&id));

        // Idempotent: a second cancel is a no-op
        worker
            .apply(OrderEvent::cancel_order(id, 300))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_worker_ignores_terminal_orders() {
        let store = Arc::new(MemoryOrderStore::new());
        let (job_tx, mut job_rx) = mpsc::channel(16);
        let mut worker = StockWorker::new(
            StockId::new(1),
            store.clone(),
            job_tx,
            &EngineConfig::default(),
        );

        let mut sell = order(1, Side::SELL, OrderType::LIMIT, 10, Some(150), 100);
        let event = OrderEvent::new_order(&sell);
        sell.cancel(None, 150);
        store.insert(sell).await.unwrap();

        worker.apply(event).await.unwrap();
        assert!(worker.book.asks.is_empty());
        assert!(job_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reconcile_rebuilds_book_from_store() {
        let store = Arc::new(MemoryOrderStore::new());
        let (job_tx, _job_rx) = mpsc::channel(16);
        let mut worker = StockWorker::new(
            StockId::new(1),
            store.clone(),
            job_tx,
            &EngineConfig::default(),
        );

        let sell = order(1, Side::SELL, OrderType::LIMIT, 10, Some(150), 100);
        let buy = order(2, Side::BUY, OrderType::LIMIT, 5, Some(140), 200);
        store.insert(sell).await.unwrap();
        store.insert(buy).await.unwrap();
        // A MARKET order never rests, terminal or not
        store
            .insert(order(3, Side::BUY, OrderType::MARKET, 5, None, 300))
            .await
            .unwrap();

        worker.reconcile().await.unwrap();

        assert_eq!(worker.book.asks.order_count(), 1);
        assert_eq!(worker.book.bids.order_count(), 1);
        assert!(!worker.book.is_crossed());
    }

    #[tokio::test]
    async fn test_reconcile_uncrosses_stale_book() {
        let store = Arc::new(MemoryOrderStore::new());
        let (job_tx, mut job_rx) = mpsc::channel(16);
        let mut worker = StockWorker::new(
            StockId::new(1),
            store.clone(),
            job_tx,
            &EngineConfig::default(),
        );

        // Crossing limits in the store mean a placement event was missed
        store
            .insert(order(1, Side::SELL, OrderType::LIMIT, 10, Some(50), 100))
            .await
            .unwrap();
        store
            .insert(order(2, Side::BUY, OrderType::LIMIT, 10, Some(55), 200))
            .await
            .unwrap();

        worker.reconcile().await.unwrap();

        let job = job_rx.recv().await.unwrap();
        match job {
            SettlementJob::Trade(bundle) => {
                // The older sell was resting; the newer buy took at 50
                assert_eq!(bundle.trade.execution_price, Price::from_u64(50));
            }
            other => panic!("expected trade, got {other:?}"),
        }
        assert!(!worker.book.is_crossed());
    }

    #[tokio::test]
    async fn test_reconciled_orders_ignore_queued_placement_events() {
        let store = Arc::new(MemoryOrderStore::new());
        let (job_tx, mut job_rx) = mpsc::channel(16);
        let mut worker = StockWorker::new(
            StockId::new(1),
            store.clone(),
            job_tx,
            &EngineConfig::default(),
        );

        // Both orders hit the store before the worker existed; their
        // placement events are still queued behind the reconcile.
        let sell = order(1, Side::SELL, OrderType::LIMIT, 10, Some(50), 100);
        let buy = order(2, Side::BUY, OrderType::LIMIT, 10, Some(55), 200);
        let sell_event = OrderEvent::new_order(&sell);
        let buy_event = OrderEvent::new_order(&buy);
        store.insert(sell).await.unwrap();
        store.insert(buy).await.unwrap();

        worker.reconcile().await.unwrap();
        worker.apply(sell_event).await.unwrap();
        worker.apply(buy_event).await.unwrap();

        // Exactly one trade from the uncross, no double entry
        assert!(job_rx.recv().await.is_some());
        assert!(job_rx.try_recv().is_err());
        assert!(worker.book.bids.is_empty());
        assert!(worker.book.asks.is_empty());
    }
}
