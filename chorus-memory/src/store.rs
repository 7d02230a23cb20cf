//! MemoryStore trait: scoped read/write for persona memory.
//!
//! Implementations live in this crate (`InMemoryStore`) or out of process;
//! workers only ever talk to the trait through [`crate::MemoryAdapter`].

use crate::item::MemoryItem;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Build the canonical namespace for a (room, persona) pair.
pub fn namespace_for(room_id: &str, persona_id: &str) -> String {
    format!("room:{room_id}|agent:{persona_id}")
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("deadline exceeded after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("item rejected: {reason}")]
    Rejected { reason: String },
}

/// Scoped memory backend.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Best-effort top-k lookup inside one namespace.
    async fn search(
        &self,
        namespace: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<MemoryItem>, MemoryError>;

    /// Store one item. Only extraction/reflection outputs arrive here;
    /// never raw chat lines.
    async fn add(&self, namespace: &str, item: MemoryItem) -> Result<(), MemoryError>;

    /// Total items across namespaces (for `/stats`).
    async fn total(&self) -> usize;

    /// Item count per namespace (the `/stats` scope breakdown).
    async fn counts_by_namespace(&self) -> BTreeMap<String, usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_shape() {
        assert_eq!(
            namespace_for("room:demo", "clip_goblin"),
            "room:room:demo|agent:clip_goblin"
        );
    }
}
