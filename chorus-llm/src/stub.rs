//! Fixture-backed provider for integration tests.
//!
//! Looks up `"{persona_id}::{marker_prefix}"` in a fixture table, falling
//! back to the persona default key and then the global default response.

use crate::error::LlmError;
use crate::provider::ReplyProvider;
use crate::types::{clean_reply, ReplyRequest, ReplyResponse};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct FixtureFile {
    #[serde(default)]
    cases: Vec<FixtureCase>,
    #[serde(default)]
    default_response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FixtureCase {
    key: String,
    response: String,
}

#[derive(Debug)]
pub struct StubProvider {
    cases: HashMap<String, String>,
    default_response: String,
}

impl StubProvider {
    pub fn new(cases: HashMap<String, String>, default_response: impl Into<String>) -> Self {
        Self {
            cases,
            default_response: default_response.into(),
        }
    }

    pub fn from_fixture_file(path: &Path) -> Result<Self, LlmError> {
        let raw = std::fs::read_to_string(path).map_err(|e| LlmError::Config {
            message: format!("fixtures {}: {e}", path.display()),
        })?;
        let file: FixtureFile = serde_json::from_str(&raw).map_err(|e| LlmError::Config {
            message: format!("fixtures {}: {e}", path.display()),
        })?;
        Ok(Self {
            cases: file
                .cases
                .into_iter()
                .map(|c| (c.key, c.response))
                .collect(),
            default_response: file.default_response.unwrap_or_else(|| "ok".to_string()),
        })
    }

    fn lookup(&self, req: &ReplyRequest) -> &str {
        if let Some(marker) = &req.marker {
            let key = format!("{}::{}", req.persona.persona_id, marker);
            if let Some(response) = self.cases.get(&key) {
                return response;
            }
        }
        let persona_default = format!("{}::default", req.persona.persona_id);
        self.cases
            .get(&persona_default)
            .map(String::as_str)
            .unwrap_or(&self.default_response)
    }
}

#[async_trait]
impl ReplyProvider for StubProvider {
    async fn generate(&self, req: &ReplyRequest) -> Result<ReplyResponse, LlmError> {
        let mut text = self.lookup(req).to_string();
        // Marker probes need the literal marker in the output.
        if let Some(marker) = &req.marker {
            if !text.contains(marker.as_str()) {
                text = format!("{text} {marker}");
            }
        }
        Ok(ReplyResponse {
            text: clean_reply(&text, req.max_chars),
            provider: self.name(),
            model: Some("stub".to_string()),
        })
    }

    fn name(&self) -> &'static str {
        "stub"
    }

    fn model(&self) -> Option<String> {
        Some("stub".to_string())
    }
}
