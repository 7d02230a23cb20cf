//! Wire records for the chat pipeline.
//!
//! Every record carries `schema_name`, `schema_version`, a globally unique
//! `id`, a UTC timestamp, and a `room_id`. Records are immutable once the
//! gateway has republished them on the firehose; the only mutation allowed
//! before that point is the gateway stamping `moderation` and `trace`.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CHAT_MESSAGE_SCHEMA: &str = "ChatMessage";
pub const STREAM_OBSERVATION_SCHEMA: &str = "StreamObservation";
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Who produced a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Human,
    Bot,
    System,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Bot => "bot",
            Self::System => "system",
        }
    }
}

/// Moderation outcome stamped by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    Allow,
    Redact,
    Drop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationMeta {
    pub action: ModerationAction,
    #[serde(default)]
    pub reasons: Vec<String>,
    #[serde(default)]
    pub redactions: Vec<String>,
}

impl ModerationMeta {
    pub fn allow() -> Self {
        Self {
            action: ModerationAction::Allow,
            reasons: Vec::new(),
            redactions: Vec::new(),
        }
    }
}

/// Provenance carried end to end. The gateway appends itself to
/// `processed_by` and sets `gateway_ts` if absent; everything else is set by
/// the producer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    #[serde(default)]
    pub processed_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_ts: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_instance: Option<String>,
}

/// A single chat line travelling ingest -> gateway -> firehose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub schema_name: String,
    pub schema_version: String,
    pub id: String,
    pub ts: DateTime<Utc>,
    pub room_id: String,
    pub origin: Origin,
    pub user_id: String,
    pub display_name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub emotes: Vec<String>,
    #[serde(default)]
    pub badges: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_meta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderation: Option<ModerationMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceMeta>,
}

impl ChatMessage {
    /// Build a bot-origin message the way persona workers publish them.
    pub fn bot(
        persona_id: &str,
        display_name: &str,
        room_id: &str,
        content: String,
        id: String,
        ts: DateTime<Utc>,
        producer: &str,
        worker_instance: &str,
    ) -> Self {
        Self {
            schema_name: CHAT_MESSAGE_SCHEMA.to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            id,
            ts,
            room_id: room_id.to_string(),
            origin: Origin::Bot,
            user_id: persona_id.to_string(),
            display_name: display_name.to_string(),
            content,
            reply_to: None,
            mentions: Vec::new(),
            emotes: Vec::new(),
            badges: Vec::new(),
            style: None,
            client_meta: None,
            moderation: None,
            trace: Some(TraceMeta {
                producer: Some(producer.to_string()),
                processed_by: Vec::new(),
                gateway_ts: None,
                persona_id: Some(persona_id.to_string()),
                worker_instance: Some(worker_instance.to_string()),
            }),
        }
    }

    pub fn ts_ms(&self) -> i64 {
        self.ts.timestamp_millis()
    }

    /// Whether this message addresses the given display name, either through
    /// the structured mentions list or an inline `@name` token.
    pub fn mentions_display(&self, display_name: &str) -> bool {
        if display_name.is_empty() {
            return false;
        }
        let target = display_name.to_lowercase();
        if self
            .mentions
            .iter()
            .any(|m| m.trim_start_matches('@').to_lowercase() == target)
        {
            return true;
        }
        crate::text::detect_mention(&self.content, display_name)
    }
}

/// Safety flags attached to an observation by the perceptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationSafety {
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub sensitive: bool,
}

/// Periodic structured snapshot of what is happening on stream.
///
/// Produced externally; the core only consumes validated instances into the
/// per-room observation buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamObservation {
    pub schema_name: String,
    pub schema_version: String,
    pub id: String,
    pub ts: DateTime<Utc>,
    pub room_id: String,
    #[serde(default)]
    pub frame_id: Option<String>,
    #[serde(default)]
    pub frame_sha256: Option<String>,
    #[serde(default)]
    pub transcript_ids: Vec<String>,
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub hype_level: f64,
    #[serde(default)]
    pub safety: ObservationSafety,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceMeta>,
}

impl StreamObservation {
    pub fn ts_ms(&self) -> i64 {
        self.ts.timestamp_millis()
    }
}

/// Render a timestamp the way the wire format expects it.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
