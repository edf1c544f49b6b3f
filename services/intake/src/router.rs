use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::order;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/engine/placeStockOrder", post(order::place_stock_order))
        .route(
            "/engine/cancelStockTransaction",
            post(order::cancel_stock_transaction),
        )
        .route("/health", get(order::health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
