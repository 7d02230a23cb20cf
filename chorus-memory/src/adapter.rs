//! Bounded, degrading front door to any [`MemoryStore`].
//!
//! Concurrency is capped by a semaphore, every call carries a deadline, and
//! failures turn into empty results plus a degraded flag. Posting continues
//! without memory; nothing here can take a worker down.

use crate::item::MemoryItem;
use crate::policy::MemoryPolicy;
use crate::redaction;
use crate::store::{MemoryError, MemoryStore};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;
pub const DEFAULT_DEADLINE_MS: u64 = 500;

/// What happened to a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Accepted { redacted: bool },
    Rejected { reason: &'static str },
}

/// Counters surfaced on `/stats`.
#[derive(Debug, Default)]
pub struct MemoryCounters {
    pub reads_attempted: AtomicU64,
    pub reads_succeeded: AtomicU64,
    pub reads_failed: AtomicU64,
    pub writes_attempted: AtomicU64,
    pub writes_accepted: AtomicU64,
    pub writes_rejected: AtomicU64,
    pub writes_redacted: AtomicU64,
    pub writes_failed: AtomicU64,
}

pub struct MemoryAdapter {
    store: Arc<dyn MemoryStore>,
    policy: MemoryPolicy,
    permits: Arc<Semaphore>,
    deadline: Duration,
    degraded: AtomicBool,
    pub counters: MemoryCounters,
    /// Per-room recent write timestamps for the write budget.
    write_times: Mutex<std::collections::HashMap<String, VecDeque<i64>>>,
}

impl MemoryAdapter {
    pub fn new(store: Arc<dyn MemoryStore>, policy: MemoryPolicy) -> Self {
        Self::with_limits(
            store,
            policy,
            DEFAULT_MAX_CONCURRENCY,
            Duration::from_millis(DEFAULT_DEADLINE_MS),
        )
    }

    pub fn with_limits(
        store: Arc<dyn MemoryStore>,
        policy: MemoryPolicy,
        max_concurrency: usize,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            policy,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            deadline,
            degraded: AtomicBool::new(false),
            counters: MemoryCounters::default(),
            write_times: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn policy(&self) -> &MemoryPolicy {
        &self.policy
    }

    pub async fn total(&self) -> usize {
        self.store.total().await
    }

    pub async fn counts_by_namespace(&self) -> std::collections::BTreeMap<String, usize> {
        self.store.counts_by_namespace().await
    }

    /// Best-effort search: on any failure returns empty and flips the
    /// degraded flag.
    pub async fn search(&self, namespace: &str, query: &str, top_k: usize) -> Vec<MemoryItem> {
        self.counters.reads_attempted.fetch_add(1, Ordering::Relaxed);
        let result = self
            .bounded(self.store.search(namespace, query, top_k))
            .await;
        match result {
            Ok(items) => {
                self.counters.reads_succeeded.fetch_add(1, Ordering::Relaxed);
                self.degraded.store(false, Ordering::Relaxed);
                items
            }
            Err(e) => {
                self.counters.reads_failed.fetch_add(1, Ordering::Relaxed);
                self.degraded.store(true, Ordering::Relaxed);
                tracing::warn!(error = %e, namespace, "memory search failed; continuing without memory");
                Vec::new()
            }
        }
    }

    /// Policy-checked, redacted write with the per-room budget applied.
    pub async fn add(&self, room_id: &str, mut item: MemoryItem, now_ms: i64) -> WriteOutcome {
        self.counters.writes_attempted.fetch_add(1, Ordering::Relaxed);

        let (redacted_content, notes) = redaction::apply_redactions(&item.content);
        let was_redacted = !notes.is_empty();
        if redaction::is_empty_after_redaction(&redacted_content) {
            self.counters.writes_rejected.fetch_add(1, Ordering::Relaxed);
            return WriteOutcome::Rejected { reason: "pii_only" };
        }
        item.content = redacted_content;
        item.redactions = notes;

        if let Err(reason) = self.policy.admit(&mut item) {
            self.counters.writes_rejected.fetch_add(1, Ordering::Relaxed);
            return WriteOutcome::Rejected { reason };
        }

        if !self.within_write_budget(room_id, now_ms).await {
            self.counters.writes_rejected.fetch_add(1, Ordering::Relaxed);
            return WriteOutcome::Rejected {
                reason: "write_budget",
            };
        }

        let namespace = item.namespace.clone();
        match self.bounded(self.store.add(&namespace, item)).await {
            Ok(()) => {
                if was_redacted {
                    self.counters.writes_redacted.fetch_add(1, Ordering::Relaxed);
                }
                self.counters.writes_accepted.fetch_add(1, Ordering::Relaxed);
                self.record_write(room_id, now_ms).await;
                WriteOutcome::Accepted {
                    redacted: was_redacted,
                }
            }
            Err(e) => {
                self.counters.writes_failed.fetch_add(1, Ordering::Relaxed);
                self.degraded.store(true, Ordering::Relaxed);
                tracing::warn!(error = %e, "memory write failed");
                WriteOutcome::Rejected {
                    reason: "backend_failed",
                }
            }
        }
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, MemoryError>>,
    ) -> Result<T, MemoryError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| MemoryError::Backend("semaphore closed".to_string()))?;
        tokio::time::timeout(self.deadline, fut)
            .await
            .map_err(|_| MemoryError::Timeout {
                timeout_ms: self.deadline.as_millis() as u64,
            })?
    }

    async fn within_write_budget(&self, room_id: &str, now_ms: i64) -> bool {
        let mut map = self.write_times.lock().await;
        let window = map.entry(room_id.to_string()).or_default();
        while window
            .front()
            .is_some_and(|t| now_ms - t > self.policy.write_window_ms)
        {
            window.pop_front();
        }
        window.len() < self.policy.write_limit
    }

    async fn record_write(&self, room_id: &str, now_ms: i64) {
        let mut map = self.write_times.lock().await;
        map.entry(room_id.to_string()).or_default().push_back(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Confidence, MemoryCategory, MemorySource};
    use crate::store::namespace_for;
    use crate::stub::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;

    fn item(content: &str) -> MemoryItem {
        MemoryItem {
            id: uuid_like(content),
            ts: Utc::now(),
            scope: crate::scope::MemoryScope::PersonaRoom,
            namespace: namespace_for("room:demo", "clip_goblin"),
            category: MemoryCategory::Note,
            other_user: None,
            topic: None,
            confidence: Confidence::High,
            content: content.to_string(),
            source: MemorySource {
                kind: "chat_message".to_string(),
                ..Default::default()
            },
            ttl_days: 0,
            redactions: Vec::new(),
        }
    }

    fn uuid_like(seed: &str) -> String {
        format!("id-{}", seed.len())
    }

    struct FailingStore;

    #[async_trait]
    impl MemoryStore for FailingStore {
        async fn search(
            &self,
            _namespace: &str,
            _query: &str,
            _top_k: usize,
        ) -> Result<Vec<MemoryItem>, MemoryError> {
            Err(MemoryError::Backend("down".to_string()))
        }

        async fn add(&self, _namespace: &str, _item: MemoryItem) -> Result<(), MemoryError> {
            Err(MemoryError::Backend("down".to_string()))
        }

        async fn total(&self) -> usize {
            0
        }

        async fn counts_by_namespace(&self) -> std::collections::BTreeMap<String, usize> {
            Default::default()
        }
    }

    #[tokio::test]
    async fn test_accepted_write_then_read() {
        let adapter = MemoryAdapter::new(Arc::new(InMemoryStore::new()), MemoryPolicy::default());
        let ns = namespace_for("room:demo", "clip_goblin");

        let outcome = adapter.add("room:demo", item("streamer is called Captain"), 0).await;
        assert_eq!(outcome, WriteOutcome::Accepted { redacted: false });
        assert_eq!(adapter.total().await, 1);

        let hits = adapter.search(&ns, "captain", 6).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(
            adapter.counters.reads_succeeded.load(Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_failing_backend_degrades_not_crashes() {
        let adapter = MemoryAdapter::new(Arc::new(FailingStore), MemoryPolicy::default());
        let hits = adapter.search("ns", "anything", 6).await;
        assert!(hits.is_empty());
        assert!(adapter.degraded());
        assert_eq!(adapter.counters.reads_failed.load(Ordering::Relaxed), 1);

        let outcome = adapter.add("room:demo", item("fact"), 0).await;
        assert_eq!(
            outcome,
            WriteOutcome::Rejected {
                reason: "backend_failed"
            }
        );
    }

    #[tokio::test]
    async fn test_pii_item_redacted_or_dropped() {
        let adapter = MemoryAdapter::new(Arc::new(InMemoryStore::new()), MemoryPolicy::default());

        let outcome = adapter
            .add("room:demo", item("email is who@example.com for real"), 0)
            .await;
        assert_eq!(outcome, WriteOutcome::Accepted { redacted: true });

        let mut pii_only = item("x");
        pii_only.content = "555-123-4567".to_string();
        let outcome = adapter.add("room:demo", pii_only, 0).await;
        assert_eq!(outcome, WriteOutcome::Rejected { reason: "pii_only" });
    }

    #[tokio::test]
    async fn test_write_budget_enforced() {
        let policy = MemoryPolicy {
            write_limit: 2,
            ..Default::default()
        };
        let adapter = MemoryAdapter::new(Arc::new(InMemoryStore::new()), policy);

        for i in 0..2 {
            let outcome = adapter
                .add("room:demo", item(&format!("fact {i} distinct")), 1_000)
                .await;
            assert!(matches!(outcome, WriteOutcome::Accepted { .. }), "{i}");
        }
        let outcome = adapter.add("room:demo", item("one too many here"), 1_500).await;
        assert_eq!(
            outcome,
            WriteOutcome::Rejected {
                reason: "write_budget"
            }
        );

        // Window expiry frees budget again.
        let outcome = adapter
            .add("room:demo", item("later fact arrives"), 100_000)
            .await;
        assert!(matches!(outcome, WriteOutcome::Accepted { .. }));
    }
}
