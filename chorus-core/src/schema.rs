//! Native schema validation for wire records.
//!
//! Records are dispatched on `(schema_name, schema_version)` to typed serde
//! decoders. Unknown fields are ignored; unknown schema names and
//! incompatible major versions are rejected. Additive minor-version changes
//! stay compatible because decoding only requires the fields it knows.

use crate::message::{
    ChatMessage, StreamObservation, CHAT_MESSAGE_SCHEMA, STREAM_OBSERVATION_SCHEMA,
};
use serde_json::Value;

/// Identifies a named, versioned schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaKey {
    pub name: String,
    pub major: u32,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing field {path}")]
    MissingField { path: String },

    #[error("unknown schema: {name}")]
    UnknownSchema { name: String },

    #[error("unsupported {name} version {version} (supported major: {supported_major})")]
    IncompatibleVersion {
        name: String,
        version: String,
        supported_major: u32,
    },

    #[error("decode error at {path}: {message}")]
    Decode { path: String, message: String },

    #[error("constraint violated at {path}: {message}")]
    Constraint { path: String, message: String },
}

impl SchemaError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotAnObject => "not_an_object",
            Self::MissingField { .. } => "missing_field",
            Self::UnknownSchema { .. } => "unknown_schema",
            Self::IncompatibleVersion { .. } => "incompatible_version",
            Self::Decode { .. } => "decode",
            Self::Constraint { .. } => "constraint",
        }
    }
}

/// A record that passed validation.
#[derive(Debug, Clone)]
pub enum ValidatedRecord {
    Chat(ChatMessage),
    Observation(StreamObservation),
}

impl ValidatedRecord {
    pub fn id(&self) -> &str {
        match self {
            Self::Chat(m) => &m.id,
            Self::Observation(o) => &o.id,
        }
    }

    pub fn room_id(&self) -> &str {
        match self {
            Self::Chat(m) => &m.room_id,
            Self::Observation(o) => &o.room_id,
        }
    }
}

/// Validates records at producer and consumer boundaries.
///
/// The registry knows one major version per schema name; decoding tolerates
/// any minor/patch within that major.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    supported: Vec<SchemaKey>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self {
            supported: vec![
                SchemaKey {
                    name: CHAT_MESSAGE_SCHEMA.to_string(),
                    major: 1,
                },
                SchemaKey {
                    name: STREAM_OBSERVATION_SCHEMA.to_string(),
                    major: 1,
                },
            ],
        }
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a raw JSON document and return the typed record.
    pub fn validate_value(&self, value: &Value) -> Result<ValidatedRecord, SchemaError> {
        let obj = value.as_object().ok_or(SchemaError::NotAnObject)?;

        let name = obj
            .get("schema_name")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::MissingField {
                path: "schema_name".to_string(),
            })?;
        let version = obj
            .get("schema_version")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::MissingField {
                path: "schema_version".to_string(),
            })?;

        let key = self
            .supported
            .iter()
            .find(|k| k.name == name)
            .ok_or_else(|| SchemaError::UnknownSchema {
                name: name.to_string(),
            })?;

        let major = parse_major(version);
        if major != Some(key.major) {
            return Err(SchemaError::IncompatibleVersion {
                name: name.to_string(),
                version: version.to_string(),
                supported_major: key.major,
            });
        }

        match name {
            CHAT_MESSAGE_SCHEMA => {
                let msg: ChatMessage = serde_json::from_value(value.clone()).map_err(|e| {
                    SchemaError::Decode {
                        path: e.to_string(),
                        message: format!("{name}: invalid payload"),
                    }
                })?;
                check_chat_constraints(&msg)?;
                Ok(ValidatedRecord::Chat(msg))
            }
            STREAM_OBSERVATION_SCHEMA => {
                let obs: StreamObservation =
                    serde_json::from_value(value.clone()).map_err(|e| SchemaError::Decode {
                        path: e.to_string(),
                        message: format!("{name}: invalid payload"),
                    })?;
                check_observation_constraints(&obs)?;
                Ok(ValidatedRecord::Observation(obs))
            }
            _ => unreachable!("supported list covers dispatch"),
        }
    }

    /// Parse and validate a raw JSON string.
    pub fn validate_str(&self, raw: &str) -> Result<ValidatedRecord, SchemaError> {
        let value: Value = serde_json::from_str(raw).map_err(|e| SchemaError::Decode {
            path: "$".to_string(),
            message: e.to_string(),
        })?;
        self.validate_value(&value)
    }

    /// Validate an already-typed chat message before it is published.
    pub fn validate_chat(&self, msg: &ChatMessage) -> Result<(), SchemaError> {
        check_chat_constraints(msg)
    }
}

fn parse_major(version: &str) -> Option<u32> {
    version.split('.').next()?.parse().ok()
}

fn check_chat_constraints(msg: &ChatMessage) -> Result<(), SchemaError> {
    if msg.id.is_empty() {
        return Err(SchemaError::Constraint {
            path: "id".to_string(),
            message: "must be non-empty".to_string(),
        });
    }
    if msg.room_id.is_empty() {
        return Err(SchemaError::Constraint {
            path: "room_id".to_string(),
            message: "must be non-empty".to_string(),
        });
    }
    if msg.content.contains('\n') || msg.content.contains('\r') {
        return Err(SchemaError::Constraint {
            path: "content".to_string(),
            message: "must be a single line".to_string(),
        });
    }
    Ok(())
}

fn check_observation_constraints(obs: &StreamObservation) -> Result<(), SchemaError> {
    if obs.id.is_empty() {
        return Err(SchemaError::Constraint {
            path: "id".to_string(),
            message: "must be non-empty".to_string(),
        });
    }
    if obs.summary.chars().count() > 512 {
        return Err(SchemaError::Constraint {
            path: "summary".to_string(),
            message: "longer than 512 chars".to_string(),
        });
    }
    if !(0.0..=1.0).contains(&obs.hype_level) {
        return Err(SchemaError::Constraint {
            path: "hype_level".to_string(),
            message: "outside [0, 1]".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat_value() -> Value {
        json!({
            "schema_name": "ChatMessage",
            "schema_version": "1.0.0",
            "id": "m1",
            "ts": "2026-01-05T12:00:00Z",
            "room_id": "room:demo",
            "origin": "human",
            "user_id": "u1",
            "display_name": "U1",
            "content": "hi"
        })
    }

    #[test]
    fn test_validates_chat_message() {
        let registry = SchemaRegistry::new();
        let record = registry.validate_value(&chat_value()).unwrap();
        assert_eq!(record.id(), "m1");
        assert_eq!(record.room_id(), "room:demo");
    }

    #[test]
    fn test_minor_version_is_compatible_major_is_not() {
        let registry = SchemaRegistry::new();

        let mut v = chat_value();
        v["schema_version"] = json!("1.7.2");
        assert!(registry.validate_value(&v).is_ok());

        v["schema_version"] = json!("2.0.0");
        let err = registry.validate_value(&v).unwrap_err();
        assert_eq!(err.kind(), "incompatible_version");
    }

    #[test]
    fn test_unknown_schema_rejected() {
        let registry = SchemaRegistry::new();
        let mut v = chat_value();
        v["schema_name"] = json!("Mystery");
        let err = registry.validate_value(&v).unwrap_err();
        assert_eq!(err.kind(), "unknown_schema");
    }

    #[test]
    fn test_multiline_content_rejected() {
        let registry = SchemaRegistry::new();
        let mut v = chat_value();
        v["content"] = json!("line one\nline two");
        let err = registry.validate_value(&v).unwrap_err();
        assert_eq!(err.kind(), "constraint");
    }

    #[test]
    fn test_observation_hype_bounds() {
        let registry = SchemaRegistry::new();
        let v = json!({
            "schema_name": "StreamObservation",
            "schema_version": "1.2.0",
            "id": "obs1",
            "ts": "2026-01-05T12:00:00Z",
            "room_id": "room:demo",
            "summary": "lava rises",
            "hype_level": 1.5
        });
        let err = registry.validate_value(&v).unwrap_err();
        assert_eq!(err.kind(), "constraint");
    }

    #[test]
    fn test_malformed_json_string() {
        let registry = SchemaRegistry::new();
        let err = registry.validate_str("{not json").unwrap_err();
        assert_eq!(err.kind(), "decode");
    }
}
