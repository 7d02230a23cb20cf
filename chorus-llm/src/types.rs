//! Generation request/response types and the always-on post-processing.

use chorus_core::text;
use serde::{Deserialize, Serialize};

/// Which prompt family a request renders with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyPurpose {
    Reply,
    AutoCommentary,
    MemoryExtract,
}

/// Stable persona facts the generator may use.
#[derive(Debug, Clone, Default)]
pub struct PersonaProfile {
    pub persona_id: String,
    pub display_name: String,
    pub profile_lines: Vec<String>,
    pub catchphrases: Vec<String>,
}

/// Everything a provider needs to produce one chat line.
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub purpose: ReplyPurpose,
    pub persona: PersonaProfile,
    pub room_id: String,
    /// Content of the triggering message (empty for auto commentary).
    pub trigger_content: String,
    /// Id of the trigger; seeds every deterministic choice.
    pub trigger_id: String,
    /// Detected marker prefix, when the policy forced this reply.
    pub marker: Option<String>,
    /// Recent chat lines, humans preferred, oldest first.
    pub recent_chat: Vec<String>,
    /// Rendered memory block, or empty.
    pub memory_block: String,
    /// Rendered observation context block, or empty.
    pub observation_context: String,
    /// One-line observation summary, or empty.
    pub observation_summary: String,
    /// Allowed emotes for this room.
    pub allowed_emotes: Vec<String>,
    pub max_chars: usize,
}

#[derive(Debug, Clone)]
pub struct ReplyResponse {
    pub text: String,
    pub provider: &'static str,
    pub model: Option<String>,
}

/// Post-processing applied to every generated reply: trim, de-newline,
/// collapse whitespace, strip a leading `@` token, truncate. Returns an empty
/// string when nothing usable remains; callers drop the post in that case.
pub fn clean_reply(raw: &str, max_chars: usize) -> String {
    let mut line = text::sanitize_line(raw);
    if line.starts_with('@') {
        line = match line.split_once(' ') {
            Some((_, rest)) => rest.trim_start().to_string(),
            None => String::new(),
        };
    }
    text::truncate_chars(&line, max_chars)
}
