//! Write policy: which items are allowed into the store.

use crate::item::{Confidence, MemoryItem};
use crate::scope::MemoryScope;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryPolicy {
    pub enabled: bool,
    /// Scopes items may live in. An absent scope is never written or read.
    pub scopes: Vec<String>,
    /// Empty means every category is allowed (minus denials).
    pub allow_categories: Vec<String>,
    pub deny_categories: Vec<String>,
    pub min_confidence: Confidence,
    pub ttl_days_default: u32,
    /// Per-room write budget.
    pub write_limit: usize,
    pub write_window_ms: i64,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            scopes: vec![
                "persona_room".to_string(),
                "persona".to_string(),
                "persona_user".to_string(),
            ],
            allow_categories: Vec::new(),
            deny_categories: Vec::new(),
            min_confidence: Confidence::Low,
            ttl_days_default: 30,
            write_limit: 5,
            write_window_ms: 60_000,
        }
    }
}

impl MemoryPolicy {
    pub fn allows_scope(&self, scope: MemoryScope) -> bool {
        self.scopes.iter().any(|s| s == scope.as_str())
    }

    /// Check an item against the policy, normalizing its TTL. Returns the
    /// rejection reason when the item may not be stored.
    pub fn admit(&self, item: &mut MemoryItem) -> Result<(), &'static str> {
        if !self.enabled {
            return Err("policy_disabled");
        }
        if !self.allows_scope(item.scope) {
            return Err("scope_not_allowed");
        }
        let category = item.category.as_str();
        if self.deny_categories.iter().any(|c| c == category) {
            return Err("category_denied");
        }
        if !self.allow_categories.is_empty()
            && !self.allow_categories.iter().any(|c| c == category)
        {
            return Err("category_not_allowed");
        }
        if item.confidence < self.min_confidence {
            return Err("low_confidence");
        }
        if item.content.trim().is_empty() {
            return Err("empty_content");
        }
        if item.ttl_days == 0 || item.ttl_days > self.ttl_days_default {
            item.ttl_days = self.ttl_days_default;
        }
        Ok(())
    }
}
