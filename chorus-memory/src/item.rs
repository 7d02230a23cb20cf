//! Durable memory records written by reflection/extraction.

use crate::scope::MemoryScope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Allowed memory types. Items outside this set are rejected at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    Relationship,
    Catchphrase,
    Preference,
    LoreEvent,
    PersonaDrift,
    Note,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Relationship => "relationship",
            Self::Catchphrase => "catchphrase",
            Self::Preference => "preference",
            Self::LoreEvent => "lore_event",
            Self::PersonaDrift => "persona_drift",
            Self::Note => "note",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Med,
    High,
}

impl Confidence {
    /// Band a numeric score the way extraction outputs arrive.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::High
        } else if score >= 0.5 {
            Self::Med
        } else {
            Self::Low
        }
    }
}

/// Where an item came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemorySource {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub ts: DateTime<Utc>,
    /// Scope the namespace was built under.
    #[serde(default)]
    pub scope: MemoryScope,
    /// Namespace this item belongs to; never crosses scopes.
    pub namespace: String,
    pub category: MemoryCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub confidence: Confidence,
    pub content: String,
    pub source: MemorySource,
    #[serde(default)]
    pub ttl_days: u32,
    #[serde(default)]
    pub redactions: Vec<String>,
}

impl MemoryItem {
    /// One bullet line for prompt assembly.
    pub fn bullet(&self) -> String {
        let topic = self
            .topic
            .as_deref()
            .map(|t| format!(" {t}:"))
            .unwrap_or_default();
        format!("- [{}]{} {}", self.category.as_str(), topic, self.content)
    }
}
