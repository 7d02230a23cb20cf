//! The bus contract services program against.
//!
//! `RedisBus` implements it over Redis Streams; `InProcessBus` implements it
//! in memory so integration tests run without a server.

use crate::error::BusError;
use async_trait::async_trait;

/// Where a new consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStart {
    /// Only entries appended after group creation (`$`).
    Tail,
    /// The whole retained stream (`0-0`).
    Beginning,
}

impl GroupStart {
    pub fn as_redis_id(&self) -> &'static str {
        match self {
            Self::Tail => "$",
            Self::Beginning => "0-0",
        }
    }
}

/// One stream entry: the broker-assigned id plus the JSON payload carried in
/// the `data` field.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub entry_id: String,
    pub data: String,
}

/// Ordered, append-only log with consumer groups. At-least-once delivery;
/// duplicates possible; consumers must be idempotent on message `id`.
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Append a record; returns the broker-assigned entry id.
    async fn publish(&self, stream: &str, data: &str) -> Result<String, BusError>;

    /// Read up to `max` new entries for this consumer, blocking up to
    /// `block_ms` when the stream is idle.
    async fn group_read(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        max: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, BusError>;

    /// Acknowledge a delivered entry.
    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), BusError>;

    /// Newest `count` entries, newest first.
    async fn tail_range(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>, BusError>;

    /// Create the consumer group if missing; "already exists" is success.
    async fn ensure_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<(), BusError>;

    /// Whether the adapter is currently riding out transient failures.
    fn degraded(&self) -> bool;
}
