//! Placement and cancellation logic
//!
//! Kept free of HTTP concerns so the flows can be driven end to end in
//! tests. Ordering matters: a SELL escrows its shares before the order
//! is recorded, and the order is recorded before its event is published,
//! so the store never references shares that were not reserved and the
//! engine never sees an order the store does not know.

use tracing::{info, warn};
use types::clock::now_nanos;
use types::errors::CoreError;
use types::events::OrderEvent;
use types::ids::UserId;
use types::order::{Order, OrderStatus, OrderType, Side};
use order_store::{OrderUpdate, StoreError};

use crate::models::{PlaceOrderRequest, PlacedOrder};
use crate::state::AppState;

/// Validate, escrow, record, and announce a new order.
pub async fn place_order(
    state: &AppState,
    user: UserId,
    req: PlaceOrderRequest,
) -> Result<PlacedOrder, CoreError> {
    if req.quantity.is_zero() {
        return Err(CoreError::InvalidInput("quantity must be > 0".into()));
    }
    match req.order_type {
        OrderType::LIMIT => {
            if req.price.is_none() {
                return Err(CoreError::InvalidInput(
                    "price is required for LIMIT orders".into(),
                ));
            }
        }
        OrderType::MARKET => {
            if req.price.is_some() {
                return Err(CoreError::InvalidInput(
                    "price is not allowed for MARKET orders".into(),
                ));
            }
        }
    }

    let order = Order::new(
        user,
        req.stock_id,
        req.side,
        req.order_type,
        req.quantity,
        req.price,
        now_nanos(),
    );

    match req.side {
        Side::BUY => {
            // Advisory funds check for LIMIT buys; settlement re-checks
            // authoritatively when the trade executes.
            if let Some(price) = req.price {
                let required = price.notional(req.quantity);
                match state.wallet.balance(user).await {
                    Ok(available) if available < required => {
                        return Err(CoreError::InsufficientFunds {
                            required: required.to_string(),
                            available: available.to_string(),
                        });
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%user, error = %err, "Funds pre-check unavailable, deferring to settlement");
                    }
                }
            }
        }
        Side::SELL => {
            // Confirm ownership, then escrow the shares out of the
            // holding so they cannot be double-sold while resting.
            let holdings = state
                .portfolio
                .list_holdings(user)
                .await
                .map_err(|err| CoreError::UpstreamUnavailable(err.to_string()))?;
            let owned = holdings
                .iter()
                .find(|h| h.stock_id == req.stock_id)
                .map(|h| h.quantity_owned.as_u64())
                .unwrap_or(0);
            if owned < req.quantity.as_u64() {
                return Err(CoreError::InsufficientShares {
                    required: req.quantity.as_u64(),
                    owned,
                });
            }

            let escrow_key = format!("{}:escrow", order.stock_tx_id);
            state
                .portfolio
                .adjust_holding(
                    user,
                    req.stock_id,
                    -(req.quantity.as_u64() as i64),
                    &escrow_key,
                )
                .await
                .map_err(|err| CoreError::UpstreamUnavailable(err.to_string()))?;
        }
    }

    if let Err(err) = state.store.insert(order.clone()).await {
        // Undo the escrow before surfacing the failure
        if order.side == Side::SELL {
            release_escrow(state, &order, order.remaining_qty.as_u64()).await;
        }
        return Err(err.into());
    }

    if let Err(err) = state.bus.publish(&OrderEvent::new_order(&order)).await {
        // The order is durably recorded; the engine picks it up on its
        // next reconcile.
        warn!(stock_tx_id = %order.stock_tx_id, error = %err, "Publish failed, order awaits reconciliation");
    }

    info!(
        stock_tx_id = %order.stock_tx_id,
        user_id = %user,
        stock_id = %order.stock_id,
        side = ?order.side,
        order_type = ?order.order_type,
        qty = %order.original_qty,
        "Order placed"
    );

    Ok(PlacedOrder {
        stock_tx_id: order.stock_tx_id,
        order_status: OrderStatus::InProgress,
    })
}

/// Cancel an order for its remaining quantity.
///
/// Idempotent from the caller's point of view: a repeat cancel reports
/// ALREADY_TERMINAL and changes nothing. A match racing this cancel is
/// resolved by the engine: the match wins its quantity and the cancel
/// applies to the residual.
pub async fn cancel_order(
    state: &AppState,
    user: UserId,
    stock_tx_id: types::ids::StockTxId,
) -> Result<(), CoreError> {
    let order = state
        .store
        .get(stock_tx_id)
        .await?
        .filter(|o| o.user_id == user)
        .ok_or_else(|| CoreError::NotFound(format!("order {stock_tx_id}")))?;

    if order.status.is_terminal() {
        return Err(CoreError::AlreadyTerminal);
    }

    let now = now_nanos();
    let mut current = order.clone();
    let cancelled = loop {
        if current.status.is_terminal() {
            return Err(CoreError::AlreadyTerminal);
        }
        let update = OrderUpdate {
            status: OrderStatus::Cancelled,
            remaining_qty: current.remaining_qty,
            message: None,
            wallet_tx_id: None,
            updated_at: now,
        };
        match state
            .store
            .cas_update(stock_tx_id, current.status, update)
            .await
        {
            Ok(updated) => break updated,
            Err(StoreError::Conflict { .. }) => {
                current = state
                    .store
                    .get(stock_tx_id)
                    .await?
                    .ok_or_else(|| CoreError::NotFound(format!("order {stock_tx_id}")))?;
            }
            Err(err) => return Err(err.into()),
        }
    };

    if order.side == Side::SELL && !cancelled.remaining_qty.is_zero() {
        release_escrow(state, &order, cancelled.remaining_qty.as_u64()).await;
    }

    if let Err(err) = state
        .bus
        .publish(&OrderEvent::cancel_order(stock_tx_id, now))
        .await
    {
        warn!(%stock_tx_id, error = %err, "Cancel publish failed, engine reconciles later");
    }

    info!(%stock_tx_id, user_id = %user, "Order cancelled");
    Ok(())
}

/// Return escrowed shares to the seller's holding.
///
/// Shares are money: keep trying a few times before escalating. The key
/// is shared with the settlement-side release of the same order, so
/// whichever path runs first wins and the other is a no-op.
async fn release_escrow(state: &AppState, order: &Order, qty: u64) {
    let key = format!("{}:release", order.stock_tx_id);
    for attempt in 1..=3u32 {
        match state
            .portfolio
            .adjust_holding(order.user_id, order.stock_id, qty as i64, &key)
            .await
        {
            Ok(()) => return,
            Err(err) if attempt < 3 => {
                warn!(stock_tx_id = %order.stock_tx_id, attempt, error = %err, "Escrow release failed, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(50 * attempt as u64)).await;
            }
            Err(err) => {
                tracing::error!(
                    stock_tx_id = %order.stock_tx_id,
                    error = %err,
                    "Escrow release failed, shares held until operator action"
                );
            }
        }
    }
}
