//! Environment-driven worker configuration.

use chorus_llm::GenerationMode;
use std::path::PathBuf;

/// How reflection/extraction produces memory items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractStrategy {
    Off,
    Heuristic,
    Llm,
}

impl ExtractStrategy {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "off" => Self::Off,
            "llm" => Self::Llm,
            _ => Self::Heuristic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Heuristic => "heuristic",
            Self::Llm => "llm",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub redis_url: String,
    pub firehose_stream: String,
    pub ingest_stream: String,
    pub observations_stream: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub room_config_path: PathBuf,
    pub persona_config_dir: PathBuf,
    pub generation_mode: GenerationMode,
    pub generation_fixtures_path: Option<PathBuf>,
    pub prompt_manifest_path: Option<PathBuf>,
    pub llm_base_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
    pub max_llm_concurrency: usize,
    pub auto_commentary_enabled: bool,
    pub auto_commentary_config_path: Option<PathBuf>,
    pub memory_enabled: bool,
    pub memory_fixtures_path: Option<PathBuf>,
    pub memory_max_items: usize,
    pub memory_max_chars: usize,
    pub memory_extract_strategy: ExtractStrategy,
    pub memory_scope_user_enabled: bool,
    pub max_recent_messages: usize,
    pub dedupe_cache_size: usize,
    pub reflection_interval_s: u64,
    pub reflection_message_count: usize,
    pub host: String,
    pub port: u16,
    pub grace_s: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }
}

impl WorkerSettings {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn from_env_with(env: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str, default: &str| env(key).unwrap_or_else(|| default.to_string());
        let get_usize = |key: &str, default: usize| {
            env(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let get_bool =
            |key: &str| matches!(env(key).as_deref(), Some("true") | Some("1") | Some("yes"));
        Self {
            redis_url: get("REDIS_URL", "redis://localhost:6379/0"),
            firehose_stream: get("FIREHOSE_STREAM", "stream:chat.firehose"),
            ingest_stream: get("INGEST_STREAM", "stream:chat.ingest"),
            observations_stream: get("STREAM_OBSERVATIONS_KEY", "stream:observations"),
            consumer_group: get("CONSUMER_GROUP", "persona_workers"),
            consumer_name: env("CONSUMER_NAME")
                .unwrap_or_else(|| format!("worker-{}", std::process::id())),
            room_config_path: PathBuf::from(get("ROOM_CONFIG_PATH", "configs/rooms/demo.json")),
            persona_config_dir: PathBuf::from(get("PERSONA_CONFIG_DIR", "configs/personas")),
            generation_mode: GenerationMode::parse(&get("GENERATION_MODE", "deterministic"))
                .unwrap_or(GenerationMode::Deterministic),
            generation_fixtures_path: env("GENERATION_FIXTURES_PATH").map(PathBuf::from),
            prompt_manifest_path: env("PROMPT_MANIFEST_PATH").map(PathBuf::from),
            llm_base_url: env("LLM_BASE_URL"),
            llm_api_key: env("LLM_API_KEY"),
            llm_model: env("LLM_MODEL"),
            max_llm_concurrency: get_usize("MAX_LLM_CONCURRENCY", 8),
            auto_commentary_enabled: get_bool("AUTO_COMMENTARY_ENABLED"),
            auto_commentary_config_path: env("AUTO_COMMENTARY_CONFIG_PATH").map(PathBuf::from),
            memory_enabled: get_bool("MEMORY_ENABLED"),
            memory_fixtures_path: env("MEMORY_FIXTURES_PATH").map(PathBuf::from),
            memory_max_items: get_usize("MEMORY_MAX_ITEMS", 6),
            memory_max_chars: get_usize("MEMORY_MAX_CHARS", 800),
            memory_extract_strategy: ExtractStrategy::parse(
                &get("MEMORY_EXTRACT_STRATEGY", "heuristic"),
            ),
            memory_scope_user_enabled: get_bool("MEMORY_SCOPE_USER_ENABLED"),
            max_recent_messages: get_usize("MAX_RECENT_MESSAGES_PER_ROOM", 200),
            dedupe_cache_size: get_usize("DEDUPE_CACHE_SIZE", 1000),
            reflection_interval_s: get_usize("REFLECTION_INTERVAL_S", 120) as u64,
            reflection_message_count: get_usize("REFLECTION_MESSAGE_COUNT", 20),
            host: get("HTTP_HOST", "0.0.0.0"),
            port: get("HTTP_PORT", "8090").parse().unwrap_or(8090),
            grace_s: get_usize("SHUTDOWN_GRACE_S", 5) as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = WorkerSettings::from_env_with(|_| None);
        assert_eq!(s.firehose_stream, "stream:chat.firehose");
        assert_eq!(s.observations_stream, "stream:observations");
        assert_eq!(s.generation_mode, GenerationMode::Deterministic);
        assert!(!s.memory_enabled);
        assert_eq!(s.memory_extract_strategy, ExtractStrategy::Heuristic);
        assert!(!s.memory_scope_user_enabled);
        assert_eq!(s.port, 8090);
    }

    #[test]
    fn test_env_overrides() {
        let s = WorkerSettings::from_env_with(|key| match key {
            "GENERATION_MODE" => Some("stub".to_string()),
            "MEMORY_ENABLED" => Some("true".to_string()),
            "MEMORY_EXTRACT_STRATEGY" => Some("llm".to_string()),
            "MEMORY_SCOPE_USER_ENABLED" => Some("true".to_string()),
            "AUTO_COMMENTARY_ENABLED" => Some("1".to_string()),
            _ => None,
        });
        assert_eq!(s.generation_mode, GenerationMode::Stub);
        assert!(s.memory_enabled);
        assert!(s.auto_commentary_enabled);
        assert_eq!(s.memory_extract_strategy, ExtractStrategy::Llm);
        assert!(s.memory_scope_user_enabled);
    }
}
