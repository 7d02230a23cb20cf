//! Live provider over an OpenAI-compatible chat-completions endpoint.
//!
//! Concurrency is bounded by a process-wide semaphore and every call carries
//! a deadline. On timeout or error the caller receives the error, records it,
//! and skips the post; generation failures never crash a worker.

use crate::error::LlmError;
use crate::prompt::PromptLibrary;
use crate::provider::ReplyProvider;
use crate::types::{clean_reply, ReplyRequest, ReplyResponse};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub const DEFAULT_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_ms: u64,
    pub max_concurrency: usize,
    pub temperature: Option<f64>,
    pub max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug)]
pub struct LiveProvider {
    http: reqwest::Client,
    cfg: LiveConfig,
    prompts: PromptLibrary,
    permits: Arc<Semaphore>,
}

impl LiveProvider {
    pub fn new(cfg: LiveConfig, prompts: PromptLibrary) -> Result<Self, LlmError> {
        if cfg.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        if cfg.model.is_empty() {
            return Err(LlmError::Config {
                message: "LLM_MODEL must be set for live generation".to_string(),
            });
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| LlmError::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        let permits = Arc::new(Semaphore::new(cfg.max_concurrency.max(1)));
        Ok(Self {
            http,
            cfg,
            prompts,
            permits,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.cfg.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ReplyProvider for LiveProvider {
    async fn generate(&self, req: &ReplyRequest) -> Result<ReplyResponse, LlmError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| LlmError::Config {
                message: "generation semaphore closed".to_string(),
            })?;

        let (system, user) = self.prompts.render(req);
        let mut body = json!({
            "model": self.cfg.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "max_tokens": self.cfg.max_tokens,
        });
        if let Some(temperature) = self.cfg.temperature {
            body["temperature"] = json!(temperature);
        }

        let started = std::time::Instant::now();
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        duration_ms: started.elapsed().as_millis() as u64,
                    }
                } else {
                    LlmError::Http {
                        status: 0,
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatCompletionResponse =
            response.json().await.map_err(|e| LlmError::InvalidResponse {
                message: e.to_string(),
            })?;
        let raw = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .unwrap_or_default();

        Ok(ReplyResponse {
            text: clean_reply(raw, req.max_chars),
            provider: self.name(),
            model: Some(self.cfg.model.clone()),
        })
    }

    fn name(&self) -> &'static str {
        "litellm"
    }

    fn model(&self) -> Option<String> {
        Some(self.cfg.model.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LiveConfig {
        LiveConfig {
            base_url: "http://localhost:4000/".to_string(),
            api_key: "key".to_string(),
            model: "demo-model".to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            temperature: Some(0.8),
            max_tokens: 128,
        }
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let provider = LiveProvider::new(config(), PromptLibrary::builtin()).unwrap();
        assert_eq!(
            provider.endpoint(),
            "http://localhost:4000/v1/chat/completions"
        );
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let mut cfg = config();
        cfg.api_key = String::new();
        let err = LiveProvider::new(cfg, PromptLibrary::builtin()).unwrap_err();
        assert!(matches!(err, LlmError::MissingApiKey));
    }

    #[test]
    fn test_missing_model_rejected() {
        let mut cfg = config();
        cfg.model = String::new();
        let err = LiveProvider::new(cfg, PromptLibrary::builtin()).unwrap_err();
        assert!(matches!(err, LlmError::Config { .. }));
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"choices": [{"message": {"content": "hello chat"}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("hello chat")
        );
    }
}
