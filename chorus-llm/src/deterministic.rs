//! Rule-driven generator with stable outputs.
//!
//! Forced marker replies echo the detected marker inside a catchphrase
//! envelope; everything else picks from template families by a seeded index,
//! so fixtures never move under tests.

use crate::error::LlmError;
use crate::provider::ReplyProvider;
use crate::types::{clean_reply, ReplyRequest, ReplyResponse};
use async_trait::async_trait;
use chorus_core::text::{det_index, sanitize_line, strip_mentions};

const TEMPLATE_FAMILIES: [&[&str]; 4] = [
    &["lol", "true", "nah", "W", "L", "real"],
    &["POGGERS", "W PLAY", "HYPE", "LET'S GO"],
    &["nice", "solid", "clean", "ok then"],
    &["what happened?", "for real?", "actually?"],
];

#[derive(Debug, Default)]
pub struct DeterministicProvider;

impl DeterministicProvider {
    pub fn new() -> Self {
        Self
    }

    /// First three words of the trigger, punctuation stripped.
    fn echo_fragment(content: &str) -> String {
        let cleaned: String = content
            .chars()
            .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
            .collect();
        cleaned
            .split_whitespace()
            .take(3)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn maybe_add_emote(base: String, req: &ReplyRequest, seed: &str) -> String {
        if req.allowed_emotes.is_empty() {
            return base;
        }
        if det_index(&format!("{seed}:flip"), 2) != 0 {
            return base;
        }
        let emote = &req.allowed_emotes[det_index(&format!("{seed}:emote"), req.allowed_emotes.len())];
        format!("{base} {emote}")
    }
}

#[async_trait]
impl ReplyProvider for DeterministicProvider {
    async fn generate(&self, req: &ReplyRequest) -> Result<ReplyResponse, LlmError> {
        let reply = if let Some(marker) = &req.marker {
            // Echo the marker so end-to-end probes can find it downstream.
            let envelope = req
                .persona
                .catchphrases
                .first()
                .map(String::as_str)
                .unwrap_or("got it:");
            format!("{envelope} {marker} ✅")
        } else {
            let seed = format!("{}:{}:tpl", req.trigger_id, req.persona.persona_id);
            let family_idx = det_index(&seed, TEMPLATE_FAMILIES.len());
            let family = TEMPLATE_FAMILIES[family_idx];
            let choice_idx = det_index(&format!("{seed}:choice"), family.len());
            let mut base = family[choice_idx].to_string();

            if family_idx == 2 {
                let echo = Self::echo_fragment(&req.trigger_content);
                if !echo.is_empty() {
                    base = format!("{echo} {base}");
                }
            } else if family_idx == 3 && !req.persona.catchphrases.is_empty() {
                base = req.persona.catchphrases
                    [choice_idx % req.persona.catchphrases.len()]
                .clone();
            }
            Self::maybe_add_emote(base, req, &seed)
        };

        let text = clean_reply(&sanitize_line(&strip_mentions(&reply)), req.max_chars);
        Ok(ReplyResponse {
            text,
            provider: self.name(),
            model: None,
        })
    }

    fn name(&self) -> &'static str {
        "deterministic"
    }
}
