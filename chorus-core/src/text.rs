//! Text normalization and deterministic hashing helpers.
//!
//! Everything that affects a posting decision draws from the seeded hash
//! functions here, never from ambient randomness, so outcomes replay exactly
//! in tests.

use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// Tokens that read as chat hype regardless of case.
pub const HYPE_TOKENS: [&str; 7] = ["POG", "POGGERS", "OMEGALUL", "LUL", "KEKW", "W", "HYPE"];

/// Collapse a string onto a single trimmed line.
pub fn sanitize_line(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_space = true;
    for ch in value.chars() {
        if ch.is_control() || ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Remove every `@name` token.
pub fn strip_mentions(value: &str) -> String {
    static MENTION: OnceLock<regex::Regex> = OnceLock::new();
    let re = MENTION.get_or_init(|| regex::Regex::new(r"@\w+").expect("mention regex"));
    re.replace_all(value, "").into_owned()
}

/// Truncate to `max_chars` characters, ellipsizing when something was cut.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let count = value.chars().count();
    if count <= max_chars {
        return value.to_string();
    }
    if max_chars == 1 {
        return value.chars().take(1).collect();
    }
    let mut out: String = value.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}

/// Case-insensitive check for `name` or `@name` appearing in `content`.
pub fn detect_mention(content: &str, display_name: &str) -> bool {
    if display_name.is_empty() {
        return false;
    }
    let lowered = content.to_lowercase();
    let name = display_name.trim_start_matches('@').to_lowercase();
    lowered.contains(&format!("@{name}")) || lowered.contains(&name)
}

pub fn detect_hype(content: &str) -> bool {
    let upper = content.to_uppercase();
    HYPE_TOKENS.iter().any(|token| {
        if token.len() == 1 {
            // Single-letter tokens only count as standalone words.
            upper.split_whitespace().any(|word| word == *token)
        } else {
            upper.contains(token)
        }
    })
}

/// Deterministic unit float in `[0, 1)` derived from the first 8 bytes of
/// SHA-256 over the seed.
pub fn unit_score(seed: &str) -> f64 {
    let digest = Sha256::digest(seed.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes) as f64 / (u64::MAX as f64 + 1.0)
}

/// Deterministic index in `[0, modulo)`.
pub fn det_index(seed: &str, modulo: usize) -> usize {
    if modulo == 0 {
        return 0;
    }
    let digest = Sha256::digest(seed.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(bytes) % modulo as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_line_collapses_whitespace_and_control() {
        assert_eq!(sanitize_line("  a\nb\r\n  c\t d  "), "a b c d");
        assert_eq!(sanitize_line("\x07ding\x00"), "ding");
        assert_eq!(sanitize_line("   "), "");
    }

    #[test]
    fn test_strip_mentions() {
        assert_eq!(strip_mentions("yo @ClipGoblin hi @x_1"), "yo  hi ");
        assert_eq!(strip_mentions("no mentions"), "no mentions");
    }

    #[test]
    fn test_truncate_chars_ellipsizes() {
        assert_eq!(truncate_chars("abcdef", 4), "abc…");
        assert_eq!(truncate_chars("abc", 3), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
        // Multi-byte characters count as one.
        assert_eq!(truncate_chars("ééééé", 3), "éé…");
    }

    #[test]
    fn test_detect_mention() {
        assert!(detect_mention("go @ClipGoblin go", "ClipGoblin"));
        assert!(detect_mention("clipgoblin is here", "ClipGoblin"));
        assert!(!detect_mention("nothing here", "ClipGoblin"));
    }

    #[test]
    fn test_detect_hype_single_letter_is_word_bound() {
        assert!(detect_hype("big W play"));
        assert!(!detect_hype("wow"));
        assert!(detect_hype("that was POGGERS"));
    }

    #[test]
    fn test_unit_score_deterministic_and_bounded() {
        let a = unit_score("room:demo:clip_goblin:h1");
        let b = unit_score("room:demo:clip_goblin:h1");
        assert_eq!(a, b);
        assert!((0.0..1.0).contains(&a));
        assert_ne!(a, unit_score("room:demo:clip_goblin:h2"));
    }

    #[test]
    fn test_det_index_stable() {
        let idx = det_index("seed", 7);
        assert_eq!(idx, det_index("seed", 7));
        assert!(idx < 7);
        assert_eq!(det_index("anything", 0), 0);
    }
}
