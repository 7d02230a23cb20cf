//! Environment-driven gateway configuration.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub redis_url: String,
    pub ingest_stream: String,
    pub firehose_stream: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub host: String,
    pub port: u16,
    pub content_max_chars: usize,
    pub moderation_config_path: Option<PathBuf>,
    pub client_queue_size: usize,
    pub dedupe_cache_size: usize,
    pub subscribe_timeout_s: u64,
    pub default_room: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }
}

impl GatewaySettings {
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Build settings from an explicit env provider (deterministic in tests).
    pub fn from_env_with(env: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str, default: &str| env(key).unwrap_or_else(|| default.to_string());
        Self {
            redis_url: get("REDIS_URL", "redis://localhost:6379/0"),
            ingest_stream: get("INGEST_STREAM", "stream:chat.ingest"),
            firehose_stream: get("FIREHOSE_STREAM", "stream:chat.firehose"),
            consumer_group: get("CONSUMER_GROUP", "chat_gateway"),
            consumer_name: env("CONSUMER_NAME")
                .unwrap_or_else(|| format!("gateway-{}", std::process::id())),
            host: get("HTTP_HOST", "0.0.0.0"),
            port: get("HTTP_PORT", "8080").parse().unwrap_or(8080),
            content_max_chars: get("CONTENT_MAX_LENGTH", "200").parse().unwrap_or(200),
            moderation_config_path: env("MODERATION_CONFIG_PATH").map(PathBuf::from),
            client_queue_size: get("BROADCAST_QUEUE_SIZE", "256").parse().unwrap_or(256),
            dedupe_cache_size: get("DEDUPE_CACHE_SIZE", "4096").parse().unwrap_or(4096),
            subscribe_timeout_s: get("SUBSCRIBE_TIMEOUT_S", "5").parse().unwrap_or(5),
            default_room: get("DEFAULT_ROOM", "room:demo"),
        }
    }
}
