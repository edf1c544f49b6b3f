use std::net::SocketAddr;
use std::sync::Arc;

use event_bus::{EventBus, LocalBus, RedisBus};
use intake::config::Config;
use intake::router::create_router;
use intake::state::AppState;
use matching_engine::{EngineConfig, MatchingEngine};
use order_store::MemoryOrderStore;
use settlement::{
    CoordinatorConfig, HistoryWriter, HttpHistory, HttpWalletPortfolio, SettlementCoordinator,
    Settler,
};
use settlement::retry::RetryPolicy;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    tracing::info!(?config, "Starting order core");

    let store = Arc::new(MemoryOrderStore::new());
    let http = reqwest::Client::new();
    let wallet_portfolio = Arc::new(HttpWalletPortfolio::new(
        http.clone(),
        config.wallet_portfolio_url.clone(),
    ));
    let history = Arc::new(HttpHistory::new(http, config.order_history_url.clone()));

    // Settlement pool
    let settler = Arc::new(Settler::new(
        store.clone(),
        wallet_portfolio.clone(),
        wallet_portfolio.clone(),
        HistoryWriter::new(history, RetryPolicy::default()),
        RetryPolicy::default(),
    ));
    let job_tx = SettlementCoordinator::spawn(
        settler,
        CoordinatorConfig {
            workers: config.settlement_workers,
            queue_depth: config.settlement_queue_depth,
        },
    );

    // Event bus
    let bus: Arc<dyn EventBus> = if config.order_bus == "local" {
        Arc::new(LocalBus::default())
    } else {
        Arc::new(RedisBus::connect(&config.order_bus, config.order_channel.clone()).await?)
    };

    // Matching engine
    let engine = Arc::new(MatchingEngine::new(
        store.clone(),
        job_tx,
        EngineConfig::default(),
    ));
    tokio::spawn(engine.run(bus.subscribe()));

    // Intake API
    let state = AppState::new(store, bus, wallet_portfolio.clone(), wallet_portfolio);
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
