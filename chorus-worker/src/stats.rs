//! Worker counters surfaced on `/stats`.
//!
//! Only telemetry reads these; every mutation happens under the service's
//! stats lock with the decision already made.

use chorus_core::policy::{DecisionReason, DecisionTags};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};

const RECENT_DECISIONS_KEPT: usize = 20;

#[derive(Debug, Default)]
pub struct WorkerStats {
    pub messages_consumed: u64,
    pub messages_deduped: u64,
    pub messages_published: u64,
    pub decisions_by_reason: BTreeMap<String, u64>,
    pub last_decision_reasons: BTreeMap<String, String>,
    pub recent_decisions: VecDeque<Value>,
    pub observations_received: u64,
    pub observations_invalid: u64,
    pub observations_dropped_old: u64,
    pub auto_obs_seen: u64,
    pub auto_obs_interesting: u64,
    pub auto_messages_attempted: u64,
    pub auto_messages_published: u64,
    pub auto_suppressed_cooldown: u64,
    pub auto_suppressed_room_rate: u64,
    pub auto_suppressed_dedupe: u64,
    pub auto_generation_failed: u64,
    pub reflection_cycles: u64,
    pub reflection_items_written: u64,
    pub generation_failures: u64,
}

impl WorkerStats {
    pub fn record_decision(&mut self, persona_id: &str, reason: DecisionReason, tags: &DecisionTags) {
        *self
            .decisions_by_reason
            .entry(reason.as_str().to_string())
            .or_default() += 1;
        self.last_decision_reasons
            .insert(persona_id.to_string(), reason.as_str().to_string());
        self.recent_decisions.push_back(json!({
            "persona_id": persona_id,
            "reason": reason.as_str(),
            "p_used": tags.p_used,
            "h_value": tags.h_value,
            "rate_10s": tags.rate_10s,
            "ts_ms": tags.ts_ms,
        }));
        while self.recent_decisions.len() > RECENT_DECISIONS_KEPT {
            self.recent_decisions.pop_front();
        }
    }

    pub fn count_reason(&mut self, persona_id: &str, reason: DecisionReason) {
        self.record_decision(persona_id, reason, &DecisionTags::default());
    }
}
