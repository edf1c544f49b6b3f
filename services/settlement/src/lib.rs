//! Trade settlement
//!
//! Moves money and shares for each executed trade as a four-step saga
//! with compensating actions, then finalizes the trade in the immutable
//! history. External effects go through the wallet, portfolio, and
//! history service clients; every call is idempotency-keyed so retries
//! never double-apply.

pub mod clients;
pub mod coordinator;
pub mod history;
pub mod retry;
pub mod saga;

pub use clients::{ClientError, HistoryApi, HttpHistory, HttpWalletPortfolio, PortfolioApi, WalletApi};
pub use coordinator::{CoordinatorConfig, SettlementCoordinator};
pub use history::HistoryWriter;
pub use saga::{SagaOutcome, Settler};
