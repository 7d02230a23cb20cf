//! Moderation pipeline applied by the gateway before broadcast.
//!
//! normalize -> blocklist -> PII patterns -> verdict. `drop` suppresses the
//! message entirely, `redact` rewrites the content with placeholders, `allow`
//! passes through. Unsafe content never leaves the gateway.

use crate::message::{ModerationAction, ModerationMeta};
use crate::text;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;

pub const REDACTED: &str = "[REDACTED]";

/// One moderation pattern: content matching `regex` gets replaced (redact)
/// or, for blocklist entries, drops the whole message.
#[derive(Debug, Clone)]
struct SafetyPattern {
    kind: String,
    regex: Regex,
    action: ModerationAction,
}

/// On-disk moderation config (`configs/moderation/*.json`).
#[derive(Debug, Deserialize)]
struct ModerationFile {
    #[serde(default)]
    blocklist: Vec<String>,
    #[serde(default)]
    pii_patterns: Vec<PatternEntry>,
}

#[derive(Debug, Deserialize)]
struct PatternEntry {
    kind: String,
    regex: String,
}

/// Outcome of running the filter over one content line.
#[derive(Debug, Clone)]
pub struct SafetyOutcome {
    pub content: String,
    pub meta: ModerationMeta,
}

impl SafetyOutcome {
    pub fn is_drop(&self) -> bool {
        self.meta.action == ModerationAction::Drop
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SafetyConfigError {
    #[error("failed to read moderation config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid moderation config {path}: {message}")]
    Invalid { path: String, message: String },
}

/// Applies the moderation policy to chat content.
#[derive(Debug, Clone)]
pub struct SafetyFilter {
    max_chars: usize,
    patterns: Vec<SafetyPattern>,
}

impl SafetyFilter {
    /// Filter with the built-in PII patterns and no blocklist.
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            patterns: default_patterns(),
        }
    }

    /// Load blocklist and extra PII patterns from a moderation config file,
    /// layered on top of the built-in patterns.
    pub fn from_config_file(max_chars: usize, path: &Path) -> Result<Self, SafetyConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SafetyConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: ModerationFile =
            serde_json::from_str(&raw).map_err(|e| SafetyConfigError::Invalid {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        let mut patterns = default_patterns();
        for word in &file.blocklist {
            let escaped = regex::escape(word);
            let regex = Regex::new(&format!(r"(?i)\b{escaped}\b")).map_err(|e| {
                SafetyConfigError::Invalid {
                    path: path.display().to_string(),
                    message: e.to_string(),
                }
            })?;
            patterns.push(SafetyPattern {
                kind: format!("blocklist:{word}"),
                regex,
                action: ModerationAction::Drop,
            });
        }
        for entry in &file.pii_patterns {
            let regex =
                Regex::new(&entry.regex).map_err(|e| SafetyConfigError::Invalid {
                    path: path.display().to_string(),
                    message: format!("pattern {}: {e}", entry.kind),
                })?;
            patterns.push(SafetyPattern {
                kind: entry.kind.clone(),
                regex,
                action: ModerationAction::Redact,
            });
        }

        Ok(Self { max_chars, patterns })
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Run the full pipeline over one content line.
    ///
    /// Returns `None` when normalization leaves nothing to broadcast.
    pub fn review(&self, content: &str) -> Option<SafetyOutcome> {
        let normalized = text::truncate_chars(&text::sanitize_line(content), self.max_chars);
        if normalized.is_empty() {
            return None;
        }

        let mut reasons = Vec::new();
        let mut redactions = Vec::new();
        let mut current = normalized;
        let mut action = ModerationAction::Allow;

        for pattern in &self.patterns {
            if !pattern.regex.is_match(&current) {
                continue;
            }
            match pattern.action {
                ModerationAction::Drop => {
                    return Some(SafetyOutcome {
                        content: String::new(),
                        meta: ModerationMeta {
                            action: ModerationAction::Drop,
                            reasons: vec![pattern.kind.clone()],
                            redactions: Vec::new(),
                        },
                    });
                }
                ModerationAction::Redact => {
                    current = pattern.regex.replace_all(&current, REDACTED).into_owned();
                    reasons.push(pattern.kind.clone());
                    redactions.push(pattern.kind.clone());
                    action = ModerationAction::Redact;
                }
                ModerationAction::Allow => {}
            }
        }

        Some(SafetyOutcome {
            content: current,
            meta: ModerationMeta {
                action,
                reasons,
                redactions,
            },
        })
    }
}

fn default_patterns() -> Vec<SafetyPattern> {
    let specs = [
        ("email", r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
        ("phone", r"\b\d{3}[-.\s]?\d{3}[-.\s]?\d{4}\b"),
        (
            "address",
            r"(?i)\b\d{1,5}\s+[A-Za-z]{2,}\s+(Street|St|Road|Rd|Avenue|Ave|Boulevard|Blvd)\b",
        ),
    ];
    specs
        .iter()
        .map(|(kind, pattern)| SafetyPattern {
            kind: (*kind).to_string(),
            regex: Regex::new(pattern).expect("built-in safety pattern"),
            action: ModerationAction::Redact,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_allow_passes_through_normalized() {
        let filter = SafetyFilter::new(200);
        let outcome = filter.review("  hello\nworld  ").unwrap();
        assert_eq!(outcome.content, "hello world");
        assert_eq!(outcome.meta.action, ModerationAction::Allow);
        assert!(outcome.meta.reasons.is_empty());
    }

    #[test]
    fn test_empty_after_normalize_drops() {
        let filter = SafetyFilter::new(200);
        assert!(filter.review("  \n\t ").is_none());
    }

    #[test]
    fn test_truncates_to_max_chars() {
        let filter = SafetyFilter::new(10);
        let outcome = filter.review("aaaaaaaaaaaaaaaaaaaa").unwrap();
        assert_eq!(outcome.content.chars().count(), 10);
    }

    #[test]
    fn test_email_redacted() {
        let filter = SafetyFilter::new(200);
        let outcome = filter.review("mail me at person@example.com ok").unwrap();
        assert_eq!(outcome.content, format!("mail me at {REDACTED} ok"));
        assert_eq!(outcome.meta.action, ModerationAction::Redact);
        assert_eq!(outcome.meta.reasons, vec!["email".to_string()]);
    }

    #[test]
    fn test_phone_and_address_redacted() {
        let filter = SafetyFilter::new(200);
        let outcome = filter.review("call 555-123-4567 at 12 Main Street").unwrap();
        assert!(outcome.content.contains(REDACTED));
        assert!(outcome.meta.reasons.contains(&"phone".to_string()));
        assert!(outcome.meta.reasons.contains(&"address".to_string()));
    }

    #[test]
    fn test_blocklist_word_drops() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"blocklist": ["slurword"], "pii_patterns": []}}"#
        )
        .unwrap();
        let filter = SafetyFilter::from_config_file(200, file.path()).unwrap();

        let outcome = filter.review("contains SLURWORD here").unwrap();
        assert!(outcome.is_drop());
        assert_eq!(outcome.meta.reasons, vec!["blocklist:slurword".to_string()]);

        let fine = filter.review("perfectly fine").unwrap();
        assert!(!fine.is_drop());
    }
}
