//! Matching engine
//!
//! Runs the continuous double auction. Each stock has one in-memory
//! order book owned by a single worker task; stocks match in parallel,
//! events within a stock apply serially. The engine is crash-restartable:
//! books rebuild by replaying non-terminal orders from the order store.

pub mod book;
pub mod engine;
pub mod matching;

pub use engine::{EngineConfig, MatchingEngine, SubmitResult};
