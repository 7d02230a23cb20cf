//! Provider construction from the generation mode and environment-shaped
//! settings.

use crate::deterministic::DeterministicProvider;
use crate::error::LlmError;
use crate::live::{LiveConfig, LiveProvider, DEFAULT_MAX_CONCURRENCY, DEFAULT_TIMEOUT_MS};
use crate::prompt::PromptLibrary;
use crate::provider::ReplyProvider;
use crate::stub::StubProvider;
use std::path::PathBuf;
use std::sync::Arc;

/// Generator backend selected by `GENERATION_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    Deterministic,
    Stub,
    Litellm,
}

impl GenerationMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "deterministic" | "" => Some(Self::Deterministic),
            "stub" => Some(Self::Stub),
            "litellm" | "live" => Some(Self::Litellm),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::Stub => "stub",
            Self::Litellm => "litellm",
        }
    }
}

/// Everything the factory needs, already resolved from env/config files.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub fixtures_path: Option<PathBuf>,
    pub prompt_manifest_path: Option<PathBuf>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_concurrency: Option<usize>,
}

/// Build the provider for a mode. Configuration problems are fatal; a service
/// should refuse to start rather than silently fall back.
pub fn build_provider(
    mode: GenerationMode,
    settings: &ProviderSettings,
) -> Result<Arc<dyn ReplyProvider>, LlmError> {
    match mode {
        GenerationMode::Deterministic => Ok(Arc::new(DeterministicProvider::new())),
        GenerationMode::Stub => {
            let provider = match &settings.fixtures_path {
                Some(path) => StubProvider::from_fixture_file(path)?,
                None => StubProvider::new(Default::default(), "ok"),
            };
            Ok(Arc::new(provider))
        }
        GenerationMode::Litellm => {
            let prompts = match &settings.prompt_manifest_path {
                Some(path) => PromptLibrary::from_manifest(path)?,
                None => PromptLibrary::builtin(),
            };
            let cfg = LiveConfig {
                base_url: settings
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "http://localhost:4000".to_string()),
                api_key: settings.api_key.clone().unwrap_or_default(),
                model: settings.model.clone().unwrap_or_default(),
                timeout_ms: settings.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
                max_concurrency: settings.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY),
                temperature: None,
                max_tokens: 128,
            };
            Ok(Arc::new(LiveProvider::new(cfg, prompts)?))
        }
    }
}
