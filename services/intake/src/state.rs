//! Shared application state

use event_bus::EventBus;
use order_store::OrderStore;
use settlement::{PortfolioApi, WalletApi};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn OrderStore>,
    pub bus: Arc<dyn EventBus>,
    pub wallet: Arc<dyn WalletApi>,
    pub portfolio: Arc<dyn PortfolioApi>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn OrderStore>,
        bus: Arc<dyn EventBus>,
        wallet: Arc<dyn WalletApi>,
        portfolio: Arc<dyn PortfolioApi>,
    ) -> Self {
        Self {
            store,
            bus,
            wallet,
            portfolio,
        }
    }
}
