//! At-least-once order event transport
//!
//! Connects order intake to the matching engine. Two transports exist:
//! an in-process broker for single-process deployments and tests, and a
//! Redis pub/sub transport whose subscriber reconnects with backoff.
//! Both may redeliver; consumers deduplicate.

pub mod bus;
pub mod local;
pub mod redis_bus;

pub use bus::{BusError, BusMessage, EventBus};
pub use local::LocalBus;
pub use redis_bus::RedisBus;
