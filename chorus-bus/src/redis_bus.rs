//! Redis Streams implementation of [`BusTransport`].
//!
//! Entries carry the JSON document in a single `data` field. Transient
//! failures are retried with exponential backoff and surfaced through the
//! `degraded` flag; pending acks survive restarts because delivery tracking
//! lives in the consumer group, not in this process.

use crate::backoff::Backoff;
use crate::error::BusError;
use crate::transport::{BusTransport, GroupStart, StreamEntry};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Attempts per operation before the transient error is handed to the caller.
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug)]
pub struct RedisBus {
    client: redis::Client,
    conn: RwLock<Option<MultiplexedConnection>>,
    degraded: AtomicBool,
    /// Entries dropped inside the adapter (missing/undecodable `data`).
    invalid_dropped: AtomicU64,
}

impl RedisBus {
    /// Create a bus against the given `redis://` URL. Does not connect yet;
    /// a bad URL is the only fatal error here.
    pub fn new(redis_url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| BusError::fatal(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            conn: RwLock::new(None),
            degraded: AtomicBool::new(false),
            invalid_dropped: AtomicU64::new(0),
        })
    }

    pub fn invalid_dropped(&self) -> u64 {
        self.invalid_dropped.load(Ordering::Relaxed)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, BusError> {
        if let Some(conn) = self.conn.read().await.as_ref() {
            return Ok(conn.clone());
        }
        let mut guard = self.conn.write().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(BusError::from)?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn invalidate(&self) {
        *self.conn.write().await = None;
    }

    /// Run `op` with a live connection, retrying transient failures with
    /// backoff. The degraded flag tracks whether we are currently failing.
    async fn retrying<T, F, Fut>(&self, mut op: F) -> Result<T, BusError>
    where
        F: FnMut(MultiplexedConnection) -> Fut,
        Fut: Future<Output = Result<T, BusError>>,
    {
        let mut backoff = Backoff::default();
        let mut attempt = 0u32;
        loop {
            let result = match self.connection().await {
                Ok(conn) => op(conn).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(value) => {
                    self.degraded.store(false, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    attempt += 1;
                    self.degraded.store(true, Ordering::Relaxed);
                    self.invalidate().await;
                    let delay = backoff.next_delay();
                    tracing::warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64,
                        "bus operation failed; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        self.degraded.store(true, Ordering::Relaxed);
                        self.invalidate().await;
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl BusTransport for RedisBus {
    async fn publish(&self, stream: &str, data: &str) -> Result<String, BusError> {
        self.retrying(|mut conn| async move {
            let id: String = redis::cmd("XADD")
                .arg(stream)
                .arg("*")
                .arg("data")
                .arg(data)
                .query_async(&mut conn)
                .await?;
            Ok(id)
        })
        .await
    }

    async fn group_read(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        max: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, BusError> {
        let reply: StreamReadReply = self
            .retrying(|mut conn| async move {
                let opts = StreamReadOptions::default()
                    .group(group, consumer)
                    .count(max)
                    .block(block_ms as usize);
                let reply: StreamReadReply =
                    conn.xread_options(&[stream], &[">"], &opts).await?;
                Ok(reply)
            })
            .await?;

        let mut entries = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                match id.get::<String>("data") {
                    Some(data) => entries.push(StreamEntry {
                        entry_id: id.id,
                        data,
                    }),
                    None => {
                        // Entries without a data field never surface to
                        // callers; ack so the group does not redeliver them.
                        self.invalid_dropped.fetch_add(1, Ordering::Relaxed);
                        let _ = self.ack(stream, group, &id.id).await;
                    }
                }
            }
        }
        Ok(entries)
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), BusError> {
        self.retrying(|mut conn| async move {
            let _: i64 = conn.xack(stream, group, &[entry_id]).await?;
            Ok(())
        })
        .await
    }

    async fn tail_range(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>, BusError> {
        let reply: StreamRangeReply = self
            .retrying(|mut conn| async move {
                let reply: StreamRangeReply =
                    conn.xrevrange_count(stream, "+", "-", count).await?;
                Ok(reply)
            })
            .await?;

        let entries = reply
            .ids
            .into_iter()
            .filter_map(|id| {
                let data = id.get::<String>("data");
                if data.is_none() {
                    self.invalid_dropped.fetch_add(1, Ordering::Relaxed);
                }
                data.map(|data| StreamEntry {
                    entry_id: id.id,
                    data,
                })
            })
            .collect();
        Ok(entries)
    }

    async fn ensure_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<(), BusError> {
        self.retrying(|mut conn| async move {
            let created: Result<String, redis::RedisError> = conn
                .xgroup_create_mkstream(stream, group, start.as_redis_id())
                .await;
            match created {
                Ok(_) => Ok(()),
                // Group creation is idempotent.
                Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
                Err(e) => Err(BusError::from(e)),
            }
        })
        .await
    }

    fn degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }
}
