//! PII redaction applied before anything is stored.

use regex::Regex;
use std::sync::OnceLock;

const REDACTED: &str = "[REDACTED]";

fn patterns() -> &'static [(&'static str, Regex)] {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            ("email", r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
            ("phone", r"\b\d{3}[-.\s]?\d{3}[-.\s]?\d{4}\b"),
            (
                "address",
                r"(?i)\b\d{1,5}\s+[A-Za-z]{2,}\s+(Street|St|Road|Rd|Avenue|Ave|Boulevard|Blvd)\b",
            ),
        ]
        .iter()
        .map(|(kind, pattern)| (*kind, Regex::new(pattern).expect("built-in PII pattern")))
        .collect()
    })
}

/// Replace PII with placeholders. Returns the redacted text plus the kinds of
/// patterns that fired.
pub fn apply_redactions(text: &str) -> (String, Vec<String>) {
    let mut redacted = text.to_string();
    let mut notes = Vec::new();
    for (kind, regex) in patterns() {
        if regex.is_match(&redacted) {
            redacted = regex.replace_all(&redacted, REDACTED).into_owned();
            notes.push((*kind).to_string());
        }
    }
    (redacted, notes)
}

pub fn contains_pii(text: &str) -> bool {
    patterns().iter().any(|(_, regex)| regex.is_match(text))
}

/// Whether anything meaningful survives once placeholders are removed.
pub fn is_empty_after_redaction(redacted: &str) -> bool {
    redacted.replace(REDACTED, "").trim().is_empty()
}
