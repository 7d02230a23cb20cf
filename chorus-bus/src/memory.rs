//! In-process [`BusTransport`] for tests and local development.
//!
//! Mirrors the Redis Streams semantics the services rely on: ordered
//! append-only streams, per-group read cursors, pending-until-acked entries,
//! and blocking reads with a timeout.

use crate::error::BusError;
use crate::transport::{BusTransport, GroupStart, StreamEntry};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

#[derive(Debug, Default)]
struct GroupState {
    next_index: usize,
    pending: HashSet<String>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: Vec<StreamEntry>,
    groups: HashMap<String, GroupState>,
}

#[derive(Default)]
struct Inner {
    streams: HashMap<String, StreamState>,
    seq: u64,
}

/// Shared in-memory bus; clone handles freely across tasks.
#[derive(Clone, Default)]
pub struct InProcessBus {
    inner: Arc<Mutex<Inner>>,
    appended: Arc<Notify>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently retained on a stream.
    pub async fn stream_len(&self, stream: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.streams.get(stream).map_or(0, |s| s.entries.len())
    }

    /// Unacked entries for a group (test hook).
    pub async fn pending_count(&self, stream: &str, group: &str) -> usize {
        let inner = self.inner.lock().await;
        inner
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map_or(0, |g| g.pending.len())
    }

    async fn take_ready(
        &self,
        stream: &str,
        group: &str,
        max: usize,
    ) -> Result<Vec<StreamEntry>, BusError> {
        let mut inner = self.inner.lock().await;
        let state = inner
            .streams
            .get_mut(stream)
            .ok_or_else(|| BusError::fatal(format!("stream {stream} does not exist")))?;
        let group_state = state
            .groups
            .get_mut(group)
            .ok_or_else(|| BusError::fatal(format!("group {group} not created on {stream}")))?;

        let mut batch = Vec::new();
        while group_state.next_index < state.entries.len() && batch.len() < max {
            let entry = state.entries[group_state.next_index].clone();
            group_state.pending.insert(entry.entry_id.clone());
            group_state.next_index += 1;
            batch.push(entry);
        }
        Ok(batch)
    }
}

#[async_trait]
impl BusTransport for InProcessBus {
    async fn publish(&self, stream: &str, data: &str) -> Result<String, BusError> {
        let mut inner = self.inner.lock().await;
        inner.seq += 1;
        let entry_id = format!("{}-0", inner.seq);
        inner
            .streams
            .entry(stream.to_string())
            .or_default()
            .entries
            .push(StreamEntry {
                entry_id: entry_id.clone(),
                data: data.to_string(),
            });
        drop(inner);
        self.appended.notify_waiters();
        Ok(entry_id)
    }

    async fn group_read(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        max: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, BusError> {
        let batch = self.take_ready(stream, group, max).await?;
        if !batch.is_empty() || block_ms == 0 {
            return Ok(batch);
        }
        // One blocking wait, then a final poll; good enough to mirror
        // XREADGROUP BLOCK for consumers that loop anyway.
        let _ = tokio::time::timeout(
            Duration::from_millis(block_ms),
            self.appended.notified(),
        )
        .await;
        self.take_ready(stream, group, max).await
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), BusError> {
        let mut inner = self.inner.lock().await;
        if let Some(group_state) = inner
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        {
            group_state.pending.remove(entry_id);
        }
        Ok(())
    }

    async fn tail_range(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>, BusError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .streams
            .get(stream)
            .map(|s| s.entries.iter().rev().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn ensure_group(
        &self,
        stream: &str,
        group: &str,
        start: GroupStart,
    ) -> Result<(), BusError> {
        let mut inner = self.inner.lock().await;
        let state = inner.streams.entry(stream.to_string()).or_default();
        let start_index = match start {
            GroupStart::Tail => state.entries.len(),
            GroupStart::Beginning => 0,
        };
        state.groups.entry(group.to_string()).or_insert(GroupState {
            next_index: start_index,
            pending: HashSet::new(),
        });
        Ok(())
    }

    fn degraded(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_then_group_read_and_ack() {
        let bus = InProcessBus::new();
        bus.ensure_group("s", "g", GroupStart::Beginning).await.unwrap();
        bus.publish("s", "one").await.unwrap();
        bus.publish("s", "two").await.unwrap();

        let batch = bus.group_read("s", "g", "c1", 10, 0).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].data, "one");
        assert_eq!(bus.pending_count("s", "g").await, 2);

        bus.ack("s", "g", &batch[0].entry_id).await.unwrap();
        assert_eq!(bus.pending_count("s", "g").await, 1);

        // Nothing new to deliver.
        let empty = bus.group_read("s", "g", "c1", 10, 0).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_group_start_tail_skips_history() {
        let bus = InProcessBus::new();
        bus.publish("s", "old").await.unwrap();
        bus.ensure_group("s", "g", GroupStart::Tail).await.unwrap();
        bus.publish("s", "new").await.unwrap();

        let batch = bus.group_read("s", "g", "c1", 10, 0).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].data, "new");
    }

    #[tokio::test]
    async fn test_ensure_group_is_idempotent() {
        let bus = InProcessBus::new();
        bus.ensure_group("s", "g", GroupStart::Beginning).await.unwrap();
        bus.publish("s", "x").await.unwrap();
        let _ = bus.group_read("s", "g", "c1", 10, 0).await.unwrap();
        // Re-creating must not rewind the cursor.
        bus.ensure_group("s", "g", GroupStart::Beginning).await.unwrap();
        let again = bus.group_read("s", "g", "c1", 10, 0).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_blocking_read_wakes_on_publish() {
        let bus = InProcessBus::new();
        bus.ensure_group("s", "g", GroupStart::Beginning).await.unwrap();

        let reader = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.group_read("s", "g", "c1", 10, 2_000).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.publish("s", "late").await.unwrap();

        let batch = reader.await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].data, "late");
    }

    #[tokio::test]
    async fn test_tail_range_newest_first() {
        let bus = InProcessBus::new();
        for i in 0..5 {
            bus.publish("s", &format!("m{i}")).await.unwrap();
        }
        let tail = bus.tail_range("s", 2).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].data, "m4");
        assert_eq!(tail[1].data, "m3");
    }
}
