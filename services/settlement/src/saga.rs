//! The settlement saga
//!
//! One trade settles in four steps, in order:
//!
//! 1. debit the buyer's wallet
//! 2. consume the seller's escrowed shares (sell-leg store update)
//! 3. credit the buyer's shares (portfolio) and record the buy leg
//! 4. credit the seller's wallet
//!
//! A step that fails permanently triggers the compensations of every
//! completed step in reverse order, leaving wallets, holdings, and the
//! order store exactly at their pre-trade state. Forward steps retry
//! transient failures a bounded number of times; compensations retry
//! until they succeed.
//!
//! Escrowed shares are represented by the resting SELL order's remaining
//! quantity: placement moved them out of the holding, so step 2 is the
//! conditional store update that decrements the parent and records the
//! sell child. When a store update finds the parent concurrently
//! CANCELLED, the match wins for its quantity and the escrow the cancel
//! over-released is clawed back.

use order_store::{OrderStore, OrderUpdate, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use types::clock::now_nanos;
use types::ids::{StockId, StockTxId, UserId};
use types::money::Quantity;
use types::order::{Order, OrderStatus, Side};
use types::trade::{ParentFill, Trade, TradeBundle, WalletMovement};

use crate::clients::{ClientError, PortfolioApi, WalletApi};
use crate::history::HistoryWriter;
use crate::retry::{retry_forever, with_retry, RetryPolicy, Transient};

/// How a settlement attempt ended
#[derive(Debug, Clone, PartialEq)]
pub enum SagaOutcome {
    /// All four steps succeeded; the trade is final
    Settled,
    /// A step failed permanently and every prior step was compensated
    Aborted { step: &'static str },
}

#[derive(Error, Debug)]
enum SagaError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("settlement invariant breach: {0}")]
    Invariant(String),
}

impl Transient for SagaError {
    fn is_transient(&self) -> bool {
        match self {
            SagaError::Store(err) => err.is_transient(),
            SagaError::Client(err) => err.is_transient(),
            SagaError::Invariant(_) => false,
        }
    }
}

/// Executes the settlement saga for one trade at a time
pub struct Settler {
    store: Arc<dyn OrderStore>,
    wallet: Arc<dyn WalletApi>,
    portfolio: Arc<dyn PortfolioApi>,
    history: HistoryWriter,
    retry: RetryPolicy,
}

impl Settler {
    pub fn new(
        store: Arc<dyn OrderStore>,
        wallet: Arc<dyn WalletApi>,
        portfolio: Arc<dyn PortfolioApi>,
        history: HistoryWriter,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            wallet,
            portfolio,
            history,
            retry,
        }
    }

    /// Settle one trade. Never leaves a partial state behind: the trade
    /// either settles fully or aborts with every effect undone.
    pub async fn settle(&self, bundle: &TradeBundle) -> SagaOutcome {
        let trade = &bundle.trade;
        let cost = trade.cost();
        let qty = trade.qty;
        let buy_key = trade.buy_tx_id.to_string();
        let sell_key = trade.sell_tx_id.to_string();

        debug!(
            buy_tx_id = %trade.buy_tx_id,
            sell_tx_id = %trade.sell_tx_id,
            qty = %qty,
            price = %trade.execution_price,
            "Settling trade"
        );

        // Step 1: debit buyer
        if let Err(err) = with_retry(&self.retry, "debit_buyer", || {
            self.wallet.debit(trade.buyer_id, cost, &buy_key)
        })
        .await
        {
            warn!(buy_tx_id = %trade.buy_tx_id, error = %err, "Buyer debit failed, dropping trade");
            return SagaOutcome::Aborted {
                step: "debit_buyer",
            };
        }

        // Step 2: consume seller escrow
        let sell_clawback = match self.apply_leg(&bundle.sell_parent, &bundle.sell_child, qty).await
        {
            Ok(clawback) => clawback,
            Err(err) => {
                warn!(sell_tx_id = %trade.sell_tx_id, error = %err, "Seller share debit failed, compensating");
                self.compensate_buyer_debit(trade, cost).await;
                return SagaOutcome::Aborted {
                    step: "debit_seller_shares",
                };
            }
        };

        // Step 3: credit buyer shares, then record the buy leg
        if let Err(err) = with_retry(&self.retry, "credit_buyer_shares", || {
            self.portfolio
                .adjust_holding(trade.buyer_id, trade.stock_id, qty.as_u64() as i64, &buy_key)
        })
        .await
        {
            warn!(buy_tx_id = %trade.buy_tx_id, error = %err, "Buyer share credit failed, compensating");
            self.compensate_leg(&bundle.sell_parent, &bundle.sell_child, qty, sell_clawback)
                .await;
            self.compensate_buyer_debit(trade, cost).await;
            return SagaOutcome::Aborted {
                step: "credit_buyer_shares",
            };
        }
        let buy_clawback = match self.apply_leg(&bundle.buy_parent, &bundle.buy_child, qty).await {
            Ok(clawback) => clawback,
            Err(err) => {
                warn!(buy_tx_id = %trade.buy_tx_id, error = %err, "Buy leg record failed, compensating");
                self.compensate_buyer_share_credit(trade, qty).await;
                self.compensate_leg(&bundle.sell_parent, &bundle.sell_child, qty, sell_clawback)
                    .await;
                self.compensate_buyer_debit(trade, cost).await;
                return SagaOutcome::Aborted {
                    step: "record_buy_leg",
                };
            }
        };

        // Step 4: credit seller
        if let Err(err) = with_retry(&self.retry, "credit_seller", || {
            self.wallet.credit(trade.seller_id, cost, &sell_key)
        })
        .await
        {
            warn!(sell_tx_id = %trade.sell_tx_id, error = %err, "Seller credit failed, compensating");
            self.compensate_leg(&bundle.buy_parent, &bundle.buy_child, qty, buy_clawback)
                .await;
            self.compensate_buyer_share_credit(trade, qty).await;
            self.compensate_leg(&bundle.sell_parent, &bundle.sell_child, qty, sell_clawback)
                .await;
            self.compensate_buyer_debit(trade, cost).await;
            return SagaOutcome::Aborted {
                step: "credit_seller",
            };
        }

        self.finalize(bundle).await;
        SagaOutcome::Settled
    }

    /// Cancel the unfillable residual of an order and release any SELL
    /// escrow for it. Idempotent.
    pub async fn cancel_residual(
        &self,
        stock_tx_id: StockTxId,
        user_id: UserId,
        stock_id: StockId,
        side: Side,
        residual: Quantity,
        reason: &str,
    ) {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let current = match self.store.get(stock_tx_id).await {
                Ok(Some(order)) => order,
                Ok(None) => {
                    warn!(%stock_tx_id, "Residual cancel for unknown order dropped");
                    return;
                }
                Err(err) if attempts < self.retry.max_attempts => {
                    warn!(%stock_tx_id, error = %err, "Store read failed, retrying residual cancel");
                    tokio::time::sleep(self.retry.initial_backoff).await;
                    continue;
                }
                Err(err) => {
                    warn!(%stock_tx_id, error = %err, "Giving up on residual cancel");
                    return;
                }
            };
            if current.status.is_terminal() {
                break;
            }
            // Keep the remaining quantity as found: trades for this order
            // may still be settling and will account for their own fills.
            let update = OrderUpdate {
                status: OrderStatus::Cancelled,
                remaining_qty: current.remaining_qty,
                message: Some(reason.to_string()),
                wallet_tx_id: None,
                updated_at: now_nanos(),
            };
            match self.store.cas_update(stock_tx_id, current.status, update).await {
                Ok(_) => {
                    info!(%stock_tx_id, reason, "Residual cancelled");
                    break;
                }
                Err(StoreError::Conflict { .. }) => continue,
                Err(err) if attempts < self.retry.max_attempts => {
                    warn!(%stock_tx_id, error = %err, "Residual cancel failed, retrying");
                    tokio::time::sleep(self.retry.initial_backoff).await;
                }
                Err(err) => {
                    warn!(%stock_tx_id, error = %err, "Giving up on residual cancel");
                    return;
                }
            }
        }

        if side == Side::SELL && !residual.is_zero() {
            let key = format!("{stock_tx_id}:release");
            retry_forever(&self.retry, "release_residual_escrow", || {
                self.portfolio
                    .adjust_holding(user_id, stock_id, residual.as_u64() as i64, &key)
            })
            .await;
        }
    }

    // ── Forward steps ───────────────────────────────────────────────

    /// Apply one leg's store effects: parent CAS to its post-trade state
    /// plus the child insert. Returns whether a crossed cancel was
    /// detected (escrow claw-back already performed for SELL legs).
    async fn apply_leg(
        &self,
        fill: &ParentFill,
        child: &Order,
        qty: Quantity,
    ) -> Result<bool, SagaError> {
        let was_cancelled = self.apply_parent_fill(fill, qty).await?;

        match with_retry(&self.retry, "insert_child", || {
            self.store.insert(child.clone())
        })
        .await
        {
            Ok(()) => {}
            // A replayed saga already inserted it
            Err(StoreError::Duplicate(_)) => {}
            Err(err) => {
                self.revert_parent_fill(fill, qty).await;
                return Err(err.into());
            }
        }

        if was_cancelled && child.side == Side::SELL {
            // The cancel released escrow for the full remaining quantity,
            // but this match won first for its share. Claw it back.
            let key = format!("{}:reescrow", child.stock_tx_id);
            retry_forever(&self.retry, "reescrow_after_cancel", || {
                self.portfolio.adjust_holding(
                    fill.user_id,
                    child.stock_id,
                    -(qty.as_u64() as i64),
                    &key,
                )
            })
            .await;
        }

        Ok(was_cancelled)
    }

    /// CAS the parent to its post-trade state. On conflict, re-read and
    /// re-decide: the fill applies to whatever state the store holds
    /// now, including a concurrent cancel (the match wins its quantity).
    async fn apply_parent_fill(&self, fill: &ParentFill, qty: Quantity) -> Result<bool, SagaError> {
        let update = OrderUpdate::transition(fill.new_status, fill.new_remaining, now_nanos());
        let first = with_retry(&self.retry, "apply_parent_fill", || {
            self.store
                .cas_update(fill.stock_tx_id, fill.prev_status, update.clone())
        })
        .await;

        match first {
            Ok(_) => Ok(false),
            Err(StoreError::Conflict { .. }) => self.re_decide_fill(fill, qty).await,
            Err(err) => Err(err.into()),
        }
    }

    async fn re_decide_fill(&self, fill: &ParentFill, qty: Quantity) -> Result<bool, SagaError> {
        let id = fill.stock_tx_id;
        loop {
            let current = with_retry(&self.retry, "read_parent", || self.store.get(id))
                .await?
                .ok_or_else(|| SagaError::Invariant(format!("parent order {id} missing")))?;

            let was_cancelled = current.status == OrderStatus::Cancelled;
            let new_remaining = current.remaining_qty.checked_sub(qty).ok_or_else(|| {
                SagaError::Invariant(format!(
                    "fill of {qty} exceeds remaining {} on {id}",
                    current.remaining_qty
                ))
            })?;
            let new_status = if new_remaining.is_zero() {
                OrderStatus::Completed
            } else if was_cancelled {
                OrderStatus::Cancelled
            } else {
                OrderStatus::PartiallyComplete
            };

            let update = OrderUpdate::transition(new_status, new_remaining, now_nanos());
            match with_retry(&self.retry, "apply_parent_fill_redecide", || {
                self.store.cas_update(id, current.status, update.clone())
            })
            .await
            {
                Ok(_) => {
                    debug!(%id, ?new_status, %new_remaining, was_cancelled, "Fill applied after re-read");
                    return Ok(was_cancelled);
                }
                Err(StoreError::Conflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    // ── Compensations ───────────────────────────────────────────────

    async fn compensate_buyer_debit(&self, trade: &Trade, cost: rust_decimal::Decimal) {
        let key = format!("{}:comp", trade.buy_tx_id);
        retry_forever(&self.retry, "compensate_buyer_debit", || {
            self.wallet.credit(trade.buyer_id, cost, &key)
        })
        .await;
    }

    async fn compensate_buyer_share_credit(&self, trade: &Trade, qty: Quantity) {
        let key = format!("{}:shares:comp", trade.buy_tx_id);
        retry_forever(&self.retry, "compensate_buyer_share_credit", || {
            self.portfolio.adjust_holding(
                trade.buyer_id,
                trade.stock_id,
                -(qty.as_u64() as i64),
                &key,
            )
        })
        .await;
    }

    /// Undo one leg's store effects (and any escrow claw-back)
    async fn compensate_leg(
        &self,
        fill: &ParentFill,
        child: &Order,
        qty: Quantity,
        clawback_done: bool,
    ) {
        if clawback_done && child.side == Side::SELL {
            // The claw-back assumed the trade would settle; give the
            // shares back to match the cancel's release.
            let key = format!("{}:reescrow:undo", child.stock_tx_id);
            retry_forever(&self.retry, "undo_reescrow", || {
                self.portfolio.adjust_holding(
                    fill.user_id,
                    child.stock_id,
                    qty.as_u64() as i64,
                    &key,
                )
            })
            .await;
        }
        self.remove_child(child).await;
        self.revert_parent_fill(fill, qty).await;
    }

    async fn remove_child(&self, child: &Order) {
        retry_forever(&self.retry, "remove_child", || async {
            match self.store.remove(child.stock_tx_id).await {
                Ok(()) | Err(StoreError::NotFound(_)) => Ok::<(), StoreError>(()),
                Err(err) => Err(err),
            }
        })
        .await;
    }

    /// Re-escrow: put the filled quantity back on the parent
    async fn revert_parent_fill(&self, fill: &ParentFill, qty: Quantity) {
        let id = fill.stock_tx_id;
        retry_forever(&self.retry, "revert_parent_fill", || async {
            let current = self
                .store
                .get(id)
                .await?
                .ok_or(StoreError::NotFound(id))?;
            let new_remaining = current.remaining_qty + qty;
            let new_status = match current.status {
                OrderStatus::Cancelled => OrderStatus::Cancelled,
                _ => {
                    if new_remaining == current.original_qty {
                        OrderStatus::InProgress
                    } else {
                        OrderStatus::PartiallyComplete
                    }
                }
            };
            let update = OrderUpdate::transition(new_status, new_remaining, now_nanos());
            self.store.cas_update(id, current.status, update).await?;
            Ok::<(), StoreError>(())
        })
        .await;
    }

    // ── Finalization ────────────────────────────────────────────────

    /// Persist the wallet movement pair, link it to the children, and
    /// archive the completed records.
    async fn finalize(&self, bundle: &TradeBundle) {
        let now = now_nanos();
        let trade = &bundle.trade;
        let cost = trade.cost();

        let debit = WalletMovement::debit(trade.buyer_id, trade.buy_tx_id, cost, now);
        let credit = WalletMovement::credit(trade.seller_id, trade.sell_tx_id, cost, now);

        let mut buy_child = bundle.buy_child.clone();
        let mut sell_child = bundle.sell_child.clone();
        buy_child.wallet_tx_id = Some(debit.wallet_tx_id);
        sell_child.wallet_tx_id = Some(credit.wallet_tx_id);

        for child in [&buy_child, &sell_child] {
            let update = OrderUpdate {
                status: OrderStatus::Completed,
                remaining_qty: Quantity::zero(),
                message: None,
                wallet_tx_id: child.wallet_tx_id,
                updated_at: now,
            };
            if let Err(err) = with_retry(&self.retry, "link_wallet_tx", || {
                self.store
                    .cas_update(child.stock_tx_id, OrderStatus::Completed, update.clone())
            })
            .await
            {
                warn!(stock_tx_id = %child.stock_tx_id, error = %err, "Failed to link wallet movement");
            }
        }

        self.history.archive_order(&buy_child).await;
        self.history.archive_order(&sell_child).await;
        self.history.archive_movement(&debit).await;
        self.history.archive_movement(&credit).await;

        // Parents whose remainder just reached zero are final too
        for parent in [&bundle.buy_parent, &bundle.sell_parent] {
            if parent.new_remaining.is_zero() {
                if let Ok(Some(order)) = self.store.get(parent.stock_tx_id).await {
                    if order.status == OrderStatus::Completed {
                        self.history.archive_order(&order).await;
                    }
                }
            }
        }

        info!(
            buy_tx_id = %trade.buy_tx_id,
            sell_tx_id = %trade.sell_tx_id,
            qty = %trade.qty,
            price = %trade.execution_price,
            "Trade settled"
        );
    }
}
