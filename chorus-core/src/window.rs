//! Per-room rolling context: recent firehose chat and recent observations.
//!
//! Both structures are bounded by size and age. Writers hold the per-room
//! lock owned by the service; readers take snapshots.

use crate::message::{Origin, StreamObservation};
use crate::text;
use std::collections::VecDeque;

/// Minimal projection of a firehose message kept for context and rate math.
#[derive(Debug, Clone)]
pub struct WindowEntry {
    pub id: String,
    pub ts_ms: i64,
    pub origin: Origin,
    pub user_id: String,
    pub display_name: String,
    pub content: String,
}

/// Bounded time/size ring of recent firehose messages for one room.
#[derive(Debug)]
pub struct ChatWindow {
    entries: VecDeque<WindowEntry>,
    max_len: usize,
    max_age_ms: i64,
}

impl ChatWindow {
    pub fn new(max_len: usize, max_age_ms: i64) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_len.min(64)),
            max_len,
            max_age_ms,
        }
    }

    /// Defaults from the gateway contract: 200 messages or 10 seconds.
    pub fn with_defaults() -> Self {
        Self::new(200, 10_000)
    }

    pub fn push(&mut self, entry: WindowEntry, now_ms: i64) {
        self.entries.push_back(entry);
        self.prune(now_ms);
    }

    fn prune(&mut self, now_ms: i64) {
        while self.entries.len() > self.max_len {
            self.entries.pop_front();
        }
        while self
            .entries
            .front()
            .is_some_and(|e| now_ms - e.ts_ms > self.max_age_ms)
        {
            self.entries.pop_front();
        }
    }

    /// Newest-last snapshot of up to `n` recent messages.
    pub fn recent(&self, n: usize) -> Vec<WindowEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Messages per second over the trailing `window_s` seconds.
    pub fn rate_per_sec(&self, window_s: u64, now_ms: i64) -> f64 {
        let window_ms = (window_s * 1000) as i64;
        if window_ms <= 0 {
            return 0.0;
        }
        let count = self
            .entries
            .iter()
            .filter(|e| now_ms - e.ts_ms <= window_ms)
            .count();
        count as f64 / window_s as f64
    }

    /// Fraction of messages in the trailing window that are bot-origin.
    pub fn bot_fraction(&self, window_s: u64, now_ms: i64) -> f64 {
        let window_ms = (window_s * 1000) as i64;
        let mut total = 0usize;
        let mut bots = 0usize;
        for e in &self.entries {
            if now_ms - e.ts_ms <= window_ms {
                total += 1;
                if e.origin == Origin::Bot {
                    bots += 1;
                }
            }
        }
        if total == 0 {
            0.0
        } else {
            bots as f64 / total as f64
        }
    }

    /// Count of recent messages addressing the given display name.
    pub fn mention_hits(&self, display_name: &str, within_s: u64, now_ms: i64) -> usize {
        let window_ms = (within_s * 1000) as i64;
        self.entries
            .iter()
            .filter(|e| now_ms - e.ts_ms <= window_ms)
            .filter(|e| text::detect_mention(&e.content, display_name))
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One buffered perception snapshot.
#[derive(Debug, Clone)]
pub struct ObservationEntry {
    pub entry_id: String,
    pub ts_ms: i64,
    pub observation: StreamObservation,
}

/// Ring of the most recent observations for one room (default 32 items,
/// 120 s TTL).
#[derive(Debug)]
pub struct ObservationBuffer {
    entries: VecDeque<ObservationEntry>,
    max_items: usize,
    ttl_ms: i64,
}

impl ObservationBuffer {
    pub fn new(max_items: usize, ttl_ms: i64) -> Self {
        Self {
            entries: VecDeque::new(),
            max_items,
            ttl_ms,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(32, 120_000)
    }

    /// Insert a validated observation. Returns how many entries aged out.
    pub fn push(&mut self, entry: ObservationEntry, now_ms: i64) -> usize {
        self.entries.push_back(entry);
        self.prune(now_ms)
    }

    fn prune(&mut self, now_ms: i64) -> usize {
        let mut dropped = 0;
        while self
            .entries
            .front()
            .is_some_and(|e| now_ms - e.ts_ms > self.ttl_ms)
        {
            self.entries.pop_front();
            dropped += 1;
        }
        while self.entries.len() > self.max_items {
            self.entries.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Up to `n` live observations, newest first.
    pub fn latest(&mut self, n: usize, now_ms: i64) -> Vec<ObservationEntry> {
        self.prune(now_ms);
        self.entries.iter().rev().take(n).cloned().collect()
    }

    /// Hype level of the newest live observation, or 0.
    pub fn latest_hype(&mut self, now_ms: i64) -> f64 {
        self.latest(1, now_ms)
            .first()
            .map(|e| e.observation.hype_level)
            .unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(id: &str, ts_ms: i64, origin: Origin, content: &str) -> WindowEntry {
        WindowEntry {
            id: id.to_string(),
            ts_ms,
            origin,
            user_id: "u".to_string(),
            display_name: "U".to_string(),
            content: content.to_string(),
        }
    }

    fn obs(id: &str, ts_ms: i64, hype: f64) -> ObservationEntry {
        ObservationEntry {
            entry_id: format!("{ts_ms}-0"),
            ts_ms,
            observation: StreamObservation {
                schema_name: "StreamObservation".to_string(),
                schema_version: "1.0.0".to_string(),
                id: id.to_string(),
                ts: Utc::now(),
                room_id: "room:demo".to_string(),
                frame_id: None,
                frame_sha256: None,
                transcript_ids: Vec::new(),
                summary: "something happened".to_string(),
                tags: Vec::new(),
                entities: Vec::new(),
                hype_level: hype,
                safety: Default::default(),
                trace: None,
            },
        }
    }

    #[test]
    fn test_window_caps_by_size() {
        let mut w = ChatWindow::new(3, 60_000);
        for i in 0..5 {
            w.push(entry(&format!("m{i}"), 1_000 + i, Origin::Human, "x"), 2_000);
        }
        assert_eq!(w.len(), 3);
        assert_eq!(w.recent(10)[0].id, "m2");
    }

    #[test]
    fn test_window_evicts_by_age() {
        let mut w = ChatWindow::new(100, 10_000);
        w.push(entry("old", 0, Origin::Human, "x"), 0);
        w.push(entry("new", 11_000, Origin::Human, "x"), 11_000);
        assert_eq!(w.len(), 1);
        assert_eq!(w.recent(10)[0].id, "new");
    }

    #[test]
    fn test_rate_and_bot_fraction() {
        let mut w = ChatWindow::with_defaults();
        let now = 20_000;
        w.push(entry("a", 12_000, Origin::Human, "x"), now);
        w.push(entry("b", 14_000, Origin::Bot, "x"), now);
        w.push(entry("c", 19_000, Origin::Bot, "x"), now);
        assert!((w.rate_per_sec(10, now) - 0.3).abs() < 1e-9);
        assert!((w.bot_fraction(10, now) - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(w.bot_fraction(10, 200_000), 0.0);
    }

    #[test]
    fn test_mention_hits() {
        let mut w = ChatWindow::with_defaults();
        let now = 5_000;
        w.push(entry("a", 4_000, Origin::Human, "go @ClipGoblin"), now);
        w.push(entry("b", 4_500, Origin::Human, "nothing"), now);
        assert_eq!(w.mention_hits("ClipGoblin", 10, now), 1);
        assert_eq!(w.mention_hits("Nobody", 10, now), 0);
    }

    #[test]
    fn test_observation_buffer_ttl_and_order() {
        let mut buf = ObservationBuffer::new(32, 10_000);
        buf.push(obs("o1", 0, 0.2), 0);
        buf.push(obs("o2", 5_000, 0.9), 5_000);

        let latest = buf.latest(5, 6_000);
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].observation.id, "o2"); // newest first

        // o1 ages out.
        let latest = buf.latest(5, 12_000);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].observation.id, "o2");
        assert!((buf.latest_hype(12_000) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_observation_buffer_size_cap() {
        let mut buf = ObservationBuffer::new(2, 1_000_000);
        buf.push(obs("o1", 1, 0.1), 1);
        buf.push(obs("o2", 2, 0.1), 2);
        let dropped = buf.push(obs("o3", 3, 0.1), 3);
        assert_eq!(dropped, 1);
        assert_eq!(buf.len(), 2);
    }
}
