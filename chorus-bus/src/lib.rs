//! chorus-bus - Redis-Streams bus adapter for Chorus
//!
//! A thin abstraction over an ordered, append-only log with consumer groups.
//! Delivery is at-least-once: duplicates are possible and consumers must be
//! idempotent on message `id`. Within one stream, consumption is ordered per
//! consumer.

pub mod backoff;
pub mod error;
pub mod memory;
pub mod reader;
pub mod redis_bus;
pub mod transport;

pub use backoff::Backoff;
pub use error::BusError;
pub use memory::InProcessBus;
pub use reader::ValidatingReader;
pub use redis_bus::RedisBus;
pub use transport::{BusTransport, GroupStart, StreamEntry};
