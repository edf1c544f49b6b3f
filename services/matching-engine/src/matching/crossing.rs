//! Crossing detection
//!
//! A taker crosses a resting order when either side is a MARKET order or
//! the limit prices overlap. Only LIMIT orders rest, so the resting side
//! always has a concrete price.

use types::money::Price;
use types::order::{Order, OrderType, Side};

/// Check whether `taker` can trade against a resting order priced at
/// `resting_price` on the opposite side.
pub fn taker_crosses(taker: &Order, resting_price: Price) -> bool {
    match taker.order_type {
        OrderType::MARKET => true,
        OrderType::LIMIT => match taker.limit_price {
            Some(limit) => match taker.side {
                Side::BUY => limit >= resting_price,
                Side::SELL => limit <= resting_price,
            },
            // A LIMIT order without a price never reaches the engine;
            // treat it as uncrossable rather than trading it blind.
            None => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::{StockId, UserId};
    use types::money::Quantity;

    fn taker(side: Side, order_type: OrderType, limit: Option<u64>) -> Order {
        Order::new(
            UserId::new(1),
            StockId::new(1),
            side,
            order_type,
            Quantity::new(10),
            limit.map(Price::from_u64),
            0,
        )
    }

    #[test]
    fn test_limit_buy_crosses_at_or_above_ask() {
        let buy = taker(Side::BUY, OrderType::LIMIT, Some(50));
        assert!(taker_crosses(&buy, Price::from_u64(50)));
        assert!(taker_crosses(&buy, Price::from_u64(49)));
        assert!(!taker_crosses(&buy, Price::from_u64(51)));
    }

    #[test]
    fn test_limit_sell_crosses_at_or_below_bid() {
        let sell = taker(Side::SELL, OrderType::LIMIT, Some(50));
        assert!(taker_crosses(&sell, Price::from_u64(50)));
        assert!(taker_crosses(&sell, Price::from_u64(51)));
        assert!(!taker_crosses(&sell, Price::from_u64(49)));
    }

    #[test]
    fn test_market_always_crosses() {
        let buy = taker(Side::BUY, OrderType::MARKET, None);
        assert!(taker_crosses(&buy, Price::from_u64(1)));
        assert!(taker_crosses(&buy, Price::from_u64(1_000_000)));
    }

    #[test]
    fn test_priceless_limit_never_crosses() {
        let buy = taker(Side::BUY, OrderType::LIMIT, None);
        assert!(!taker_crosses(&buy, Price::from_u64(50)));
    }
}
