//! Bounded insert-order dedupe cache.
//!
//! The bus delivers at-least-once, so every consumer checks message ids
//! against one of these before acting.

use indexmap::IndexSet;

#[derive(Debug)]
pub struct DedupeCache {
    seen: IndexSet<String>,
    capacity: usize,
}

impl DedupeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: IndexSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record `id`; returns true when it was already present.
    pub fn seen_before(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return true;
        }
        self.seen.insert(id.to_string());
        while self.seen.len() > self.capacity {
            self.seen.shift_remove_index(0);
        }
        false
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
