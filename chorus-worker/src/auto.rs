//! Auto-commentary: observation-driven posts.
//!
//! Observations flow into the per-room buffer; when one is interesting
//! enough (hype threshold, trigger tags, entities) and the room/persona
//! gates allow it, a deterministic persona pick produces one unprompted chat
//! line. Output must never leak observation metadata; a runtime check
//! rejects anything matching the forbidden patterns.

use chorus_core::message::StreamObservation;
use chorus_core::text::unit_score;
use chorus_core::window::ObservationEntry;
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterestWeights {
    pub hype: f64,
    pub mentions: f64,
    pub entities: f64,
    pub tag_hype: f64,
}

impl Default for InterestWeights {
    fn default() -> Self {
        Self {
            hype: 1.0,
            mentions: 0.3,
            entities: 0.3,
            tag_hype: 0.25,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummaryDedupe {
    pub enabled: bool,
    pub ttl_ms: i64,
    pub normalize: bool,
}

impl Default for SummaryDedupe {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 120_000,
            normalize: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MentionTargeting {
    pub enabled: bool,
    pub boost: f64,
}

impl Default for MentionTargeting {
    fn default() -> Self {
        Self {
            enabled: true,
            boost: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutoCommentaryConfig {
    pub enabled: bool,
    pub hype_threshold: f64,
    pub trigger_tags: Vec<String>,
    pub trigger_on_entities: bool,
    pub persona_cooldown_ms: i64,
    pub room_rate_limit_ms: i64,
    pub max_messages_per_observation: u32,
    pub dedupe_window_ms: i64,
    pub interest_weights: InterestWeights,
    pub summary_dedupe: SummaryDedupe,
    pub avoid_repeat_last_n: usize,
    pub mention_targeting: MentionTargeting,
    pub message_prefix: String,
    pub max_reply_chars: usize,
}

impl Default for AutoCommentaryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hype_threshold: 0.6,
            trigger_tags: vec!["hype".to_string()],
            trigger_on_entities: true,
            persona_cooldown_ms: 20_000,
            room_rate_limit_ms: 8_000,
            max_messages_per_observation: 1,
            dedupe_window_ms: 60_000,
            interest_weights: InterestWeights::default(),
            summary_dedupe: SummaryDedupe::default(),
            avoid_repeat_last_n: 2,
            mention_targeting: MentionTargeting::default(),
            message_prefix: String::new(),
            max_reply_chars: 200,
        }
    }
}

impl AutoCommentaryConfig {
    pub fn load(path: &Path, enabled_override: bool) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("auto commentary config {}: {e}", path.display()))?;
        let mut cfg: Self = serde_json::from_str(&raw)
            .map_err(|e| format!("auto commentary config {}: {e}", path.display()))?;
        cfg.enabled = enabled_override;
        cfg.trigger_tags = cfg
            .trigger_tags
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Ok(cfg)
    }
}

/// Why an observation did or did not qualify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoVerdict {
    Interesting(&'static str),
    NotInteresting,
}

pub fn interest_score(obs: &StreamObservation, cfg: &AutoCommentaryConfig) -> f64 {
    let hype = obs.hype_level.clamp(0.0, 1.0);
    let mut score = hype * cfg.interest_weights.hype;

    let entities: Vec<String> = obs
        .entities
        .iter()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .collect();
    if !entities.is_empty() {
        score += cfg.interest_weights.mentions;
        let entity_factor = (entities.len().min(3)) as f64 / 3.0;
        score += entity_factor * cfg.interest_weights.entities;
    }
    if obs.tags.iter().any(|t| t.eq_ignore_ascii_case("hype")) {
        score += cfg.interest_weights.tag_hype;
    }
    score
}

/// First gate: does this observation deserve commentary at all?
pub fn classify(obs: &StreamObservation, cfg: &AutoCommentaryConfig) -> (AutoVerdict, f64) {
    let score = interest_score(obs, cfg);
    if obs.hype_level >= cfg.hype_threshold {
        return (AutoVerdict::Interesting("hype"), score);
    }
    if !cfg.trigger_tags.is_empty()
        && obs
            .tags
            .iter()
            .any(|t| cfg.trigger_tags.contains(&t.trim().to_lowercase()))
    {
        return (AutoVerdict::Interesting("tag"), score);
    }
    if cfg.trigger_on_entities && obs.entities.iter().any(|e| !e.trim().is_empty()) {
        return (AutoVerdict::Interesting("entities"), score);
    }
    if score >= cfg.hype_threshold {
        return (AutoVerdict::Interesting("score"), score);
    }
    (AutoVerdict::NotInteresting, score)
}

/// Hash of the normalized summary for dedupe.
pub fn summary_hash(obs: &StreamObservation, normalize: bool) -> String {
    let mut text = obs.summary.trim().to_string();
    if text.is_empty() {
        return String::new();
    }
    if normalize {
        text = text
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
            .collect();
    }
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let digest = Sha256::digest(collapsed.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Personas the observation addresses by entity or `@name` in the summary.
pub fn mentioned_personas(obs: &StreamObservation, candidates: &[String]) -> Vec<String> {
    let entities: Vec<String> = obs.entities.iter().map(|e| e.to_lowercase()).collect();
    let summary = obs.summary.to_lowercase();
    candidates
        .iter()
        .filter(|p| {
            let pl = p.to_lowercase();
            entities.contains(&pl) || summary.contains(&format!("@{pl}"))
        })
        .cloned()
        .collect()
}

/// Deterministic persona pick: seeded score per candidate, mention boost,
/// avoid-repeat-last-N diversity, lexicographic tiebreak.
pub fn pick_persona(
    obs: &StreamObservation,
    candidates: &[String],
    recent: &[String],
    cfg: &AutoCommentaryConfig,
) -> Option<String> {
    if candidates.is_empty() {
        return None;
    }
    let filtered: Vec<&String> = if cfg.avoid_repeat_last_n > 0 {
        let avoided: Vec<&String> = candidates
            .iter()
            .filter(|p| !recent.iter().take(cfg.avoid_repeat_last_n).any(|r| r == *p))
            .collect();
        if avoided.is_empty() {
            candidates.iter().collect()
        } else {
            avoided
        }
    } else {
        candidates.iter().collect()
    };

    let mentioned = if cfg.mention_targeting.enabled {
        mentioned_personas(obs, candidates)
    } else {
        Vec::new()
    };

    let mut best: Option<(f64, &String)> = None;
    for persona in filtered {
        let seed = format!("{}:{}:{persona}", obs.id, obs.room_id);
        let mut score = unit_score(&seed);
        if mentioned.contains(persona) {
            score += cfg.mention_targeting.boost;
        }
        let better = match &best {
            None => true,
            Some((best_score, best_id)) => {
                score > *best_score || (score == *best_score && persona < *best_id)
            }
        };
        if better {
            best = Some((score, persona));
        }
    }
    best.map(|(_, p)| p.clone())
}

/// Output guard: commentary must not quote observation metadata.
pub fn leaks_observation_metadata(text: &str) -> bool {
    static RFC3339: OnceLock<Regex> = OnceLock::new();
    let re = RFC3339.get_or_init(|| {
        Regex::new(r"\d{4}-\d{2}-\d{2}[Tt]\d{2}:\d{2}(:\d{2})?").expect("rfc3339 regex")
    });
    text.contains("OBS:") || re.is_match(text)
}

/// Render the observation context block for prompts, newest first.
pub fn format_observation_context(
    entries: &[ObservationEntry],
    max_items: usize,
    max_chars: usize,
) -> (String, Vec<String>) {
    let mut lines = Vec::new();
    let mut ids = Vec::new();
    for entry in entries.iter().take(max_items) {
        let obs = &entry.observation;
        let mut line = format!(
            "OBS: {} | {}",
            chorus_core::message::format_ts(obs.ts),
            chorus_core::text::sanitize_line(&obs.summary)
        );
        if !obs.tags.is_empty() {
            line.push_str(&format!(" | tags={}", obs.tags.join(",")));
        }
        if !obs.entities.is_empty() {
            line.push_str(&format!(" | entities={}", obs.entities.join(",")));
        }
        line.push_str(&format!(" | hype={:.2}", obs.hype_level));
        ids.push(obs.id.clone());
        lines.push(line);
    }
    let mut block = lines.join("\n");
    if block.chars().count() > max_chars {
        block = block.chars().take(max_chars).collect();
    }
    (block, ids)
}
