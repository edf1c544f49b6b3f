//! Gateway-injected identity
//!
//! The API gateway authenticates bearer tokens upstream and forwards the
//! caller's identity as `X-User-ID` / `X-User-Type` headers. This core
//! trusts those headers; requests without them are unauthenticated.

use crate::error::AppError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use types::errors::CoreError;
use types::ids::UserId;

/// Caller capability forwarded by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserType {
    Customer,
    Company,
}

/// The authenticated caller, as asserted by the gateway
pub struct GatewayUser {
    pub user_id: UserId,
    pub user_type: UserType,
}

#[async_trait]
impl<S> FromRequestParts<S> for GatewayUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("X-User-ID")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<i64>().ok())
            .map(UserId::new)
            .ok_or(AppError(CoreError::Unauthenticated))?;

        let user_type = match parts
            .headers
            .get("X-User-Type")
            .and_then(|v| v.to_str().ok())
        {
            Some("COMPANY") => UserType::Company,
            _ => UserType::Customer,
        };

        Ok(GatewayUser { user_id, user_type })
    }
}
