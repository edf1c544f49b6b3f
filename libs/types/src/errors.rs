//! Error taxonomy shared across the core services

use thiserror::Error;

/// Error taxonomy for the trading core
///
/// Each variant maps to one client-visible error code; the intake layer
/// translates them to HTTP statuses.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing or invalid identity")]
    Unauthenticated,

    #[error("Action not permitted: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Order is already in a terminal state")]
    AlreadyTerminal,

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: String, available: String },

    #[error("Insufficient shares: required {required}, owned {owned}")]
    InsufficientShares { required: u64, owned: u64 },

    #[error("No opposing liquidity for market order")]
    NoLiquidity,

    #[error("Concurrent update conflict: {0}")]
    Conflict(String),

    #[error("Upstream service unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable error code string for the response envelope and logs
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidInput(_) => "INVALID_INPUT",
            CoreError::Unauthenticated => "UNAUTHENTICATED",
            CoreError::Forbidden(_) => "FORBIDDEN",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::AlreadyTerminal => "ALREADY_TERMINAL",
            CoreError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            CoreError::InsufficientShares { .. } => "INSUFFICIENT_SHARES",
            CoreError::NoLiquidity => "NO_LIQUIDITY",
            CoreError::Conflict(_) => "CONFLICT",
            CoreError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            CoreError::Internal(_) => "INTERNAL",
        }
    }

    /// Whether a retry of the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::UpstreamUnavailable(_) | CoreError::Conflict(_)
        )
    }
}
