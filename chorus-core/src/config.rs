//! Room and persona configuration.
//!
//! Loaded once at startup from JSON files and treated as immutable during a
//! run; the only mutable persona state is the drift knobs, and those change
//! only through the reflection loop within their declared bounds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config not found at {path}")]
    NotFound { path: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {message}")]
    Invalid { path: String, message: String },
}

/// Posting knobs for one room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Base probability of a reply per trigger.
    pub p_base: f64,
    /// Hard ceiling on the final probability.
    pub p_cap: f64,
    /// Room-wide hype multiplier applied to `p_base`.
    pub hype_multiplier: f64,
    /// Minimum gap between consecutive posts of one persona.
    pub cooldown_ms: i64,
    /// Max posts per persona inside `budget_window_ms`.
    pub budget_n: usize,
    pub budget_window_ms: i64,
    /// Triggers older than this never force or post.
    pub max_trigger_age_ms: i64,
    /// Mentions within this window boost probability.
    pub mention_window_s: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            p_base: 0.15,
            p_cap: 0.95,
            hype_multiplier: 1.0,
            cooldown_ms: 1_500,
            budget_n: 5,
            budget_window_ms: 10_000,
            max_trigger_age_ms: 20_000,
            mention_window_s: 30,
        }
    }
}

/// Which emotes the room allows bots to append.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotePolicy {
    pub allowed_emotes: Vec<String>,
}

impl Default for EmotePolicy {
    fn default() -> Self {
        Self {
            allowed_emotes: vec![
                "Kappa".to_string(),
                "PogChamp".to_string(),
                "FeelsOkayMan".to_string(),
                "OMEGALUL".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    pub room_id: String,
    #[serde(default)]
    pub enabled_personas: Vec<String>,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub emote_policy: EmotePolicy,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
}

impl RoomConfig {
    pub fn feature(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }
}

/// A bounded, slowly drifting persona trait.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DriftKnob {
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

impl DriftKnob {
    pub fn new(value: f64, min: f64, max: f64) -> Self {
        Self { value, min, max }
    }

    /// Apply a delta, clamped to `max_step` per call and to the knob bounds.
    pub fn nudge(&mut self, delta: f64, max_step: f64) {
        let step = delta.clamp(-max_step, max_step);
        self.value = (self.value + step).clamp(self.min, self.max);
    }
}

/// The drifting half of a persona. Mutated only by reflection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftState {
    pub talkativeness: DriftKnob,
    pub snark: DriftKnob,
    pub positivity: DriftKnob,
}

impl Default for DriftState {
    fn default() -> Self {
        Self {
            talkativeness: DriftKnob::new(1.0, 0.5, 1.5),
            snark: DriftKnob::new(0.5, 0.0, 1.0),
            positivity: DriftKnob::new(0.6, 0.0, 1.0),
        }
    }
}

/// Voice rules that never drift.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceRules {
    pub style: Option<String>,
    pub caps_style: Option<String>,
    pub punctuation: Option<String>,
    pub emoji_density: Option<String>,
    pub emote_habits: Vec<String>,
    pub banned_topics: Vec<String>,
}

/// Stable persona anchors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaAnchor {
    pub bio: Option<String>,
    pub voice_rules: VoiceRules,
    pub catchphrases: Vec<String>,
    /// Hard-never categories; generation for these is refused outright.
    pub never: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaPresentation {
    pub display_name: Option<String>,
    pub badges: Vec<String>,
    pub style: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaSafety {
    pub max_chars: usize,
}

impl Default for PersonaSafety {
    fn default() -> Self {
        Self { max_chars: 200 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    pub persona_id: String,
    #[serde(default)]
    pub presentation: PersonaPresentation,
    #[serde(default)]
    pub anchor: PersonaAnchor,
    #[serde(default)]
    pub drift: DriftState,
    #[serde(default)]
    pub safety: PersonaSafety,
}

impl PersonaConfig {
    pub fn display_name(&self) -> &str {
        self.presentation
            .display_name
            .as_deref()
            .unwrap_or(&self.persona_id)
    }

    /// One-line-per-fact profile block for prompts.
    pub fn profile_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(bio) = &self.anchor.bio {
            lines.push(format!("bio: {}", crate::text::sanitize_line(bio)));
        }
        let rules = &self.anchor.voice_rules;
        for (key, value) in [
            ("style", &rules.style),
            ("caps_style", &rules.caps_style),
            ("punctuation", &rules.punctuation),
            ("emoji_density", &rules.emoji_density),
        ] {
            if let Some(v) = value {
                lines.push(format!("{key}: {}", crate::text::sanitize_line(v)));
            }
        }
        if !rules.emote_habits.is_empty() {
            lines.push(format!("emote_habits: {}", rules.emote_habits.join(", ")));
        }
        if !rules.banned_topics.is_empty() {
            lines.push(format!("banned_topics: {}", rules.banned_topics.join(", ")));
        }
        if !self.anchor.catchphrases.is_empty() {
            lines.push(format!(
                "catchphrases: {}",
                self.anchor.catchphrases.join(", ")
            ));
        }
        lines
    }
}

/// Load and validate a room config.
pub fn load_room_config(path: &Path) -> Result<RoomConfig, ConfigError> {
    let raw = read(path)?;
    let cfg: RoomConfig = serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    if cfg.room_id.is_empty() {
        return Err(ConfigError::Invalid {
            path: path.display().to_string(),
            message: "room_id must be non-empty".to_string(),
        });
    }
    Ok(cfg)
}

/// Load every persona file in `dir` and keep the enabled ones.
///
/// An empty result is not an error; a worker with no enrolled personas stays
/// healthy and idle.
pub fn load_persona_configs(
    dir: &Path,
    enabled: &[String],
) -> Result<BTreeMap<String, PersonaConfig>, ConfigError> {
    if !dir.is_dir() {
        return Err(ConfigError::NotFound {
            path: dir.display().to_string(),
        });
    }
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .map_err(|source| ConfigError::Io {
            path: dir.display().to_string(),
            source,
        })?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut personas = BTreeMap::new();
    for file in files {
        let raw = read(&file)?;
        let cfg: PersonaConfig = serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid {
            path: file.display().to_string(),
            message: e.to_string(),
        })?;
        if enabled.iter().any(|p| p == &cfg.persona_id) {
            personas.insert(cfg.persona_id.clone(), cfg);
        }
    }
    if personas.is_empty() {
        tracing::warn!("no enabled personas found; worker will stay idle");
    }
    Ok(personas)
}

fn read(path: &Path) -> Result<String, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.display().to_string(),
        });
    }
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}
