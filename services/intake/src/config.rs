//! Environment configuration
//!
//! Every knob has a default suitable for the docker-compose layout the
//! services deploy in. `ORDER_BUS=local` selects the in-process broker
//! instead of Redis, for single-process development runs.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the intake API listens on
    pub port: u16,
    /// Redis URL for the order event bus, or "local" for in-process
    pub order_bus: String,
    /// Pub/sub channel carrying order events
    pub order_channel: String,
    /// Base URL of the wallet/portfolio service
    pub wallet_portfolio_url: String,
    /// Base URL of the history service
    pub order_history_url: String,
    /// Settlement shard worker count
    pub settlement_workers: usize,
    /// Depth of the engine → settlement queue
    pub settlement_queue_depth: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_or("PORT", "8084").parse().unwrap_or(8084),
            order_bus: env_or("ORDER_BUS", "redis://redis:6379"),
            order_channel: env_or("REDIS_ORDER_CHANNEL", "new-orders"),
            wallet_portfolio_url: env_or("WALLET_PORTFOLIO_URL", "http://wallet-service:8083"),
            order_history_url: env_or("ORDER_HISTORY_URL", "http://order-history-service:8082"),
            settlement_workers: env_or("SETTLEMENT_WORKERS", "4").parse().unwrap_or(4),
            settlement_queue_depth: env_or("SETTLEMENT_QUEUE_DEPTH", "256")
                .parse()
                .unwrap_or(256),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
