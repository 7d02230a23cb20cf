//! Shared error reason codes.
//!
//! Every recoverable failure in the pipeline maps to a short stable code that
//! shows up in logs and `/stats` counters.

use serde::{Deserialize, Serialize};

/// Stable reason codes for recoverable pipeline failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    SchemaInvalid,
    SafetyDrop,
    SafetyRedact,
    BusTransient,
    BusFatal,
    LlmTimeout,
    LlmError,
    MemoryUnavailable,
    ClientSlow,
    PolicySkip,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemaInvalid => "schema_invalid",
            Self::SafetyDrop => "safety_drop",
            Self::SafetyRedact => "safety_redact",
            Self::BusTransient => "bus_transient",
            Self::BusFatal => "bus_fatal",
            Self::LlmTimeout => "llm_timeout",
            Self::LlmError => "llm_error",
            Self::MemoryUnavailable => "memory_unavailable",
            Self::ClientSlow => "client_slow",
            Self::PolicySkip => "policy_skip",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
