//! Wallet, portfolio, and history service clients
//!
//! The wallet/portfolio pair is one upstream service; history is another.
//! All calls are HTTP+JSON, authenticated by the `X-User-ID` header the
//! gateway would inject, and return the `{success, data?, message?}`
//! envelope. Side-effecting calls carry an idempotency key so a retried
//! request is applied at most once.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use types::ids::{StockId, UserId};
use types::order::Order;
use types::response::ApiResponse;
use types::trade::{PortfolioHolding, WalletMovement};

use crate::retry::Transient;

/// Errors surfaced by an upstream service client
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// The service answered with a non-success envelope or status
    #[error("upstream rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The service could not be reached or timed out
    #[error("upstream transport error: {0}")]
    Transport(String),

    /// The response body did not match the expected shape
    #[error("upstream response malformed: {0}")]
    Decode(String),
}

impl Transient for ClientError {
    fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport(_) => true,
            ClientError::Rejected { status, .. } => *status >= 500 || *status == 429,
            ClientError::Decode(_) => false,
        }
    }
}

/// Wallet service operations
#[async_trait]
pub trait WalletApi: Send + Sync {
    /// Remove `amount` from the user's wallet. Returns the resulting
    /// balance. Rejected when funds are insufficient.
    async fn debit(
        &self,
        user: UserId,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<Decimal, ClientError>;

    /// Add `amount` to the user's wallet. Returns the resulting balance.
    async fn credit(
        &self,
        user: UserId,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<Decimal, ClientError>;

    /// Current wallet balance.
    async fn balance(&self, user: UserId) -> Result<Decimal, ClientError>;
}

/// Portfolio service operations
#[async_trait]
pub trait PortfolioApi: Send + Sync {
    /// Adjust a holding by `delta` shares. Negative deltas escrow or
    /// consume shares; positive deltas credit them. Rejected when a
    /// negative delta exceeds the holding.
    async fn adjust_holding(
        &self,
        user: UserId,
        stock: StockId,
        delta: i64,
        idempotency_key: &str,
    ) -> Result<(), ClientError>;

    /// All holdings of a user.
    async fn list_holdings(&self, user: UserId) -> Result<Vec<PortfolioHolding>, ClientError>;

    /// Register a new stock in the catalog. Gateway policy restricts
    /// this to COMPANY users.
    async fn create_stock(&self, name: &str) -> Result<StockId, ClientError>;
}

/// History service operations; all writes are idempotent upserts
#[async_trait]
pub trait HistoryApi: Send + Sync {
    /// Upsert a completed order record, keyed by stock_tx_id.
    async fn record_stock_tx(&self, order: &Order) -> Result<(), ClientError>;

    /// Upsert a wallet movement record, keyed by wallet_tx_id.
    async fn record_wallet_tx(&self, movement: &WalletMovement) -> Result<(), ClientError>;

    /// Archived order records for a user.
    async fn list_stock_tx(&self, user: UserId) -> Result<Vec<Order>, ClientError>;

    /// Archived wallet movements for a user.
    async fn list_wallet_tx(&self, user: UserId) -> Result<Vec<WalletMovement>, ClientError>;
}

// ── Request bodies ──────────────────────────────────────────────────

#[derive(Serialize)]
struct MoneyRequest<'a> {
    amount: Decimal,
    idempotency_key: &'a str,
}

#[derive(Serialize)]
struct AdjustHoldingRequest<'a> {
    stock_id: StockId,
    delta_shares: i64,
    idempotency_key: &'a str,
}

#[derive(Serialize)]
struct CreateStockRequest<'a> {
    stock_name: &'a str,
}

#[derive(Deserialize)]
struct BalanceData {
    balance: Decimal,
}

#[derive(Deserialize)]
struct CreateStockData {
    stock_id: StockId,
}

// ── HTTP implementations ────────────────────────────────────────────

async fn read_envelope<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<Option<T>, ClientError> {
    let status = response.status().as_u16();
    let envelope: ApiResponse<T> = response
        .json()
        .await
        .map_err(|e| ClientError::Decode(e.to_string()))?;
    if !envelope.success {
        return Err(ClientError::Rejected {
            status,
            message: envelope
                .message
                .unwrap_or_else(|| "request rejected".to_string()),
        });
    }
    Ok(envelope.data)
}

fn require_data<T>(data: Option<T>) -> Result<T, ClientError> {
    data.ok_or_else(|| ClientError::Decode("missing data field".to_string()))
}

/// HTTP client for the combined wallet/portfolio service
pub struct HttpWalletPortfolio {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWalletPortfolio {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        user: UserId,
        body: &B,
    ) -> Result<Option<T>, ClientError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("X-User-ID", user.as_i64())
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        read_envelope(response).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        user: UserId,
    ) -> Result<Option<T>, ClientError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("X-User-ID", user.as_i64())
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        read_envelope(response).await
    }
}

#[async_trait]
impl WalletApi for HttpWalletPortfolio {
    async fn debit(
        &self,
        user: UserId,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<Decimal, ClientError> {
        let body = MoneyRequest {
            amount,
            idempotency_key,
        };
        let data: Option<BalanceData> =
            self.post("/deductMoneyFromWallet", user, &body).await?;
        Ok(require_data(data)?.balance)
    }

    async fn credit(
        &self,
        user: UserId,
        amount: Decimal,
        idempotency_key: &str,
    ) -> Result<Decimal, ClientError> {
        let body = MoneyRequest {
            amount,
            idempotency_key,
        };
        let data: Option<BalanceData> = self.post("/addMoneyToWallet", user, &body).await?;
        Ok(require_data(data)?.balance)
    }

    async fn balance(&self, user: UserId) -> Result<Decimal, ClientError> {
        let data: Option<BalanceData> = self.get("/getWalletBalance", user).await?;
        Ok(require_data(data)?.balance)
    }
}

#[async_trait]
impl PortfolioApi for HttpWalletPortfolio {
    async fn adjust_holding(
        &self,
        user: UserId,
        stock: StockId,
        delta: i64,
        idempotency_key: &str,
    ) -> Result<(), ClientError> {
        let body = AdjustHoldingRequest {
            stock_id: stock,
            delta_shares: delta,
            idempotency_key,
        };
        let _: Option<serde_json::Value> =
            self.post("/updateStockPortfolio", user, &body).await?;
        Ok(())
    }

    async fn list_holdings(&self, user: UserId) -> Result<Vec<PortfolioHolding>, ClientError> {
        let data: Option<Vec<PortfolioHolding>> = self.get("/getStockPortfolio", user).await?;
        Ok(data.unwrap_or_default())
    }

    async fn create_stock(&self, name: &str) -> Result<StockId, ClientError> {
        let body = CreateStockRequest { stock_name: name };
        let response = self
            .client
            .post(format!("{}/createStock", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let data: Option<CreateStockData> = read_envelope(response).await?;
        Ok(require_data(data)?.stock_id)
    }
}

/// HTTP client for the history service
pub struct HttpHistory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpHistory {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl HistoryApi for HttpHistory {
    async fn record_stock_tx(&self, order: &Order) -> Result<(), ClientError> {
        let response = self
            .client
            .post(format!("{}/internal/recordStockTransaction", self.base_url))
            .json(order)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let _: Option<serde_json::Value> = read_envelope(response).await?;
        Ok(())
    }

    async fn record_wallet_tx(&self, movement: &WalletMovement) -> Result<(), ClientError> {
        let response = self
            .client
            .post(format!("{}/internal/recordWalletTransaction", self.base_url))
            .json(movement)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let _: Option<serde_json::Value> = read_envelope(response).await?;
        Ok(())
    }

    async fn list_stock_tx(&self, user: UserId) -> Result<Vec<Order>, ClientError> {
        let response = self
            .client
            .get(format!("{}/getStockTransactions", self.base_url))
            .header("X-User-ID", user.as_i64())
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let data: Option<Vec<Order>> = read_envelope(response).await?;
        Ok(data.unwrap_or_default())
    }

    async fn list_wallet_tx(&self, user: UserId) -> Result<Vec<WalletMovement>, ClientError> {
        let response = self
            .client
            .get(format!("{}/getWalletTransactions", self.base_url))
            .header("X-User-ID", user.as_i64())
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let data: Option<Vec<WalletMovement>> = read_envelope(response).await?;
        Ok(data.unwrap_or_default())
    }
}
