//! Trade construction
//!
//! Builds the settlement handoff for one match: the trade record, a
//! freshly minted child order per leg, and both parents' pre/post fill
//! states. The execution price is always the resting order's price,
//! passed in by the match loop.

use thiserror::Error;
use types::money::{Price, Quantity};
use types::order::Order;
use types::trade::{ParentFill, Trade, TradeBundle};

/// Match construction errors
///
/// These are invariant guards; any occurrence halts the stock's worker.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("match quantity must be positive")]
    ZeroQuantity,

    #[error("match quantity {qty} exceeds a remainder (buy {buy}, sell {sell})")]
    ExceedsRemainder { qty: u64, buy: u64, sell: u64 },

    #[error("orders reference different stocks")]
    StockMismatch,

    #[error("resting order has no price")]
    RestingWithoutPrice,
}

/// Build the `TradeBundle` for `qty` shares between `buy` and `sell`.
///
/// Both orders are the parents as they stand immediately before this
/// fill; the caller applies the in-memory decrements afterwards.
pub fn execute_match(
    buy: &Order,
    sell: &Order,
    qty: Quantity,
    price: Price,
    executed_at: i64,
) -> Result<TradeBundle, MatchError> {
    if qty.is_zero() {
        return Err(MatchError::ZeroQuantity);
    }
    if qty > buy.remaining_qty || qty > sell.remaining_qty {
        return Err(MatchError::ExceedsRemainder {
            qty: qty.as_u64(),
            buy: buy.remaining_qty.as_u64(),
            sell: sell.remaining_qty.as_u64(),
        });
    }
    if buy.stock_id != sell.stock_id {
        return Err(MatchError::StockMismatch);
    }

    let buy_child = buy.spawn_child(qty, price, executed_at);
    let sell_child = sell.spawn_child(qty, price, executed_at);

    let trade = Trade {
        buy_tx_id: buy_child.stock_tx_id,
        sell_tx_id: sell_child.stock_tx_id,
        stock_id: buy.stock_id,
        qty,
        execution_price: price,
        buyer_id: buy.user_id,
        seller_id: sell.user_id,
        executed_at,
    };

    Ok(TradeBundle {
        trade,
        buy_child,
        sell_child,
        buy_parent: ParentFill::for_fill(buy, qty),
        sell_parent: ParentFill::for_fill(sell, qty),
    })
}
