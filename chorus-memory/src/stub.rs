//! In-memory keyword-matching store.
//!
//! Suitable for development and tests; a production deployment would put a
//! real memory service behind the same trait.

use crate::item::MemoryItem;
use crate::store::{MemoryError, MemoryStore};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;

#[derive(Debug, Deserialize)]
struct FixtureFile {
    #[serde(default)]
    items: Vec<MemoryItem>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    buckets: RwLock<HashMap<String, Vec<MemoryItem>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a fixtures file; each item lands in its own namespace.
    pub fn from_fixture_file(path: &Path) -> Result<Self, MemoryError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MemoryError::Backend(format!("fixtures {}: {e}", path.display())))?;
        let file: FixtureFile = serde_json::from_str(&raw)
            .map_err(|e| MemoryError::Backend(format!("fixtures {}: {e}", path.display())))?;

        let store = Self::new();
        {
            let mut buckets = store.buckets.write().expect("fresh lock");
            for item in file.items {
                buckets
                    .entry(item.namespace.clone())
                    .or_default()
                    .push(item);
            }
        }
        Ok(store)
    }

    fn score(item: &MemoryItem, query: &str) -> u32 {
        let mut score = 0;
        let content = item.content.to_lowercase();
        let topic = item.topic.as_deref().unwrap_or("").to_lowercase();
        let category = item.category.as_str();
        for token in query
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            if topic.contains(token) {
                score += 3;
            }
            if content.contains(token) {
                score += 2;
            }
            if category.contains(token) {
                score += 1;
            }
        }
        score
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn search(
        &self,
        namespace: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<MemoryItem>, MemoryError> {
        let buckets = self
            .buckets
            .read()
            .map_err(|e| MemoryError::Backend(format!("lock poisoned: {e}")))?;
        let Some(items) = buckets.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(u32, &MemoryItem)> = items
            .iter()
            .map(|item| (Self::score(item, query), item))
            .filter(|(score, _)| *score > 0)
            .collect();
        // Highest score first, newest first on ties, id as final tiebreak.
        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(b.1.ts.cmp(&a.1.ts))
                .then(a.1.id.cmp(&b.1.id))
        });
        Ok(scored.into_iter().take(top_k).map(|(_, i)| i.clone()).collect())
    }

    async fn add(&self, namespace: &str, item: MemoryItem) -> Result<(), MemoryError> {
        if item.namespace != namespace {
            return Err(MemoryError::Rejected {
                reason: "namespace mismatch".to_string(),
            });
        }
        let mut buckets = self
            .buckets
            .write()
            .map_err(|e| MemoryError::Backend(format!("lock poisoned: {e}")))?;
        let bucket = buckets.entry(namespace.to_string()).or_default();
        // Upsert on id.
        if let Some(existing) = bucket.iter_mut().find(|i| i.id == item.id) {
            *existing = item;
        } else {
            bucket.push(item);
        }
        Ok(())
    }

    async fn total(&self) -> usize {
        self.buckets
            .read()
            .map(|b| b.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    async fn counts_by_namespace(&self) -> BTreeMap<String, usize> {
        self.buckets
            .read()
            .map(|b| {
                b.iter()
                    .filter(|(_, items)| !items.is_empty())
                    .map(|(namespace, items)| (namespace.clone(), items.len()))
                    .collect()
            })
            .unwrap_or_default()
    }
}
