//! Trade, settlement handoff, and wallet movement types
//!
//! A `Trade` records one executed match and is never mutated. The
//! `TradeBundle` is what the matching engine hands to settlement: the
//! trade, both freshly minted child orders, and both parents' pre/post
//! states so the saga can apply and compensate store updates.

use crate::ids::{StockId, StockTxId, UserId, WalletTxId};
use crate::money::{Price, Quantity};
use crate::order::{Order, OrderStatus, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One executed match between a buy and a sell order
///
/// `buy_tx_id` and `sell_tx_id` reference the child orders minted for
/// each leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub buy_tx_id: StockTxId,
    pub sell_tx_id: StockTxId,
    pub stock_id: StockId,
    pub qty: Quantity,
    pub execution_price: Price,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub executed_at: i64, // Unix nanos
}

impl Trade {
    /// Total cash value of the trade (qty × price)
    pub fn cost(&self) -> Decimal {
        self.execution_price.notional(self.qty)
    }
}

/// Pre/post state of a parent order across one fill
///
/// Settlement applies the post state with a compare-and-set against the
/// pre state and reverts to the pre state when compensating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentFill {
    pub stock_tx_id: StockTxId,
    pub user_id: UserId,
    pub prev_status: OrderStatus,
    pub prev_remaining: Quantity,
    pub new_status: OrderStatus,
    pub new_remaining: Quantity,
}

impl ParentFill {
    /// Build the fill record for `qty` shares taken from `order`
    /// (captured before the in-memory decrement).
    pub fn for_fill(order: &Order, qty: Quantity) -> Self {
        let new_remaining = order.remaining_qty - qty;
        let new_status = if new_remaining.is_zero() {
            OrderStatus::Completed
        } else {
            OrderStatus::PartiallyComplete
        };
        Self {
            stock_tx_id: order.stock_tx_id,
            user_id: order.user_id,
            prev_status: order.status,
            prev_remaining: order.remaining_qty,
            new_status,
            new_remaining,
        }
    }
}

/// Engine → settlement handoff for one trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeBundle {
    pub trade: Trade,
    pub buy_child: Order,
    pub sell_child: Order,
    pub buy_parent: ParentFill,
    pub sell_parent: ParentFill,
}

/// Work handed from the matching engine to the settlement coordinator
///
/// Besides executed trades, the engine forwards residual cancellations
/// (a MARKET order that found no opposing liquidity) so that the store
/// update and any escrow release happen where all external effects live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SettlementJob {
    /// Settle one executed trade
    Trade(Box<TradeBundle>),

    /// Cancel the unfillable residual of an order
    CancelResidual {
        stock_tx_id: StockTxId,
        user_id: UserId,
        stock_id: StockId,
        side: Side,
        residual: Quantity,
        reason: String,
    },
}

/// A debit or credit against a user wallet
///
/// Exactly two exist per settled trade: a debit of the buyer and a credit
/// of the seller, both linked to the child order that caused them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletMovement {
    pub wallet_tx_id: WalletTxId,
    pub stock_tx_id: StockTxId,
    pub user_id: UserId,
    pub is_debit: bool,
    pub amount: Decimal,
    pub timestamp: i64, // Unix nanos
}

impl WalletMovement {
    /// Record a debit caused by `stock_tx_id`
    pub fn debit(user_id: UserId, stock_tx_id: StockTxId, amount: Decimal, timestamp: i64) -> Self {
        Self {
            wallet_tx_id: WalletTxId::new(),
            stock_tx_id,
            user_id,
            is_debit: true,
            amount,
            timestamp,
        }
    }

    /// Record a credit caused by `stock_tx_id`
    pub fn credit(user_id: UserId, stock_tx_id: StockTxId, amount: Decimal, timestamp: i64) -> Self {
        Self {
            wallet_tx_id: WalletTxId::new(),
            stock_tx_id,
            user_id,
            is_debit: false,
            amount,
            timestamp,
        }
    }
}

/// Shares of one stock owned by one user, excluding escrowed shares
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioHolding {
    pub user_id: UserId,
    pub stock_id: StockId,
    pub quantity_owned: Quantity,
}
