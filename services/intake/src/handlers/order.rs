use axum::{extract::State, Json};
use types::response::ApiResponse;

use crate::auth::GatewayUser;
use crate::error::AppError;
use crate::models::{CancelOrderRequest, PlaceOrderRequest, PlacedOrder};
use crate::service;
use crate::state::AppState;

pub async fn place_stock_order(
    State(state): State<AppState>,
    user: GatewayUser,
    Json(payload): Json<PlaceOrderRequest>,
) -> Result<Json<ApiResponse<PlacedOrder>>, AppError> {
    let placed = service::place_order(&state, user.user_id, payload).await?;
    Ok(Json(ApiResponse::ok(placed)))
}

pub async fn cancel_stock_transaction(
    State(state): State<AppState>,
    user: GatewayUser,
    Json(payload): Json<CancelOrderRequest>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    service::cancel_order(&state, user.user_id, payload.stock_tx_id).await?;
    Ok(Json(ApiResponse::ok_empty()))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "UP", "service": "order-core"}))
}
