//! Error to HTTP response mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use types::errors::CoreError;
use types::response::ApiResponse;

/// Wrapper giving the shared taxonomy an HTTP shape
#[derive(Debug)]
pub struct AppError(pub CoreError);

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::InvalidInput(_)
            | CoreError::InsufficientFunds { .. }
            | CoreError::InsufficientShares { .. }
            | CoreError::NoLiquidity => StatusCode::BAD_REQUEST,
            CoreError::Unauthenticated => StatusCode::UNAUTHORIZED,
            CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::AlreadyTerminal | CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body: ApiResponse<()> = ApiResponse::err(self.0.to_string());
        (status, Json(body)).into_response()
    }
}
