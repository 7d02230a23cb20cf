//! Mutable worker state, guarded by one mutex per service.
//!
//! The lock is held only while updating counters and windows, never across
//! bus, generation, or memory I/O.

use chorus_core::config::DriftState;
use chorus_core::dedupe::DedupeCache;
use chorus_core::window::{ChatWindow, ObservationBuffer};
use std::collections::{HashMap, VecDeque};

/// Per-room shared structures.
pub struct RoomState {
    pub window: ChatWindow,
    pub observations: ObservationBuffer,
}

impl RoomState {
    fn new(max_recent: usize) -> Self {
        Self {
            window: ChatWindow::new(max_recent, 10_000),
            observations: ObservationBuffer::with_defaults(),
        }
    }
}

/// Mutable per-persona counters, owned by this persona's loops.
#[derive(Debug, Default)]
pub struct PersonaRuntime {
    pub last_post_ms: Option<i64>,
    post_times: VecDeque<i64>,
    pub drift: DriftState,
    /// Own published lines, kept for reflection.
    pub own_recent: VecDeque<String>,
    pub own_since_reflection: usize,
    pub last_reflection_ms: i64,
    pub auto_last_post_ms: Option<i64>,
    pub messages_published: u64,
}

impl PersonaRuntime {
    pub fn posts_in_window(&mut self, now_ms: i64, window_ms: i64) -> usize {
        while self
            .post_times
            .front()
            .is_some_and(|t| now_ms - t > window_ms)
        {
            self.post_times.pop_front();
        }
        self.post_times.len()
    }

    pub fn record_post(&mut self, now_ms: i64, content: &str) {
        self.last_post_ms = Some(now_ms);
        self.post_times.push_back(now_ms);
        self.messages_published += 1;
        self.own_recent.push_back(content.to_string());
        while self.own_recent.len() > 50 {
            self.own_recent.pop_front();
        }
        self.own_since_reflection += 1;
    }
}

/// State for the auto-commentary gates.
#[derive(Debug)]
pub struct AutoState {
    pub room_last_post_ms: HashMap<String, i64>,
    /// `(obs_id, persona)` pairs already used, bounded.
    pub obs_persona_seen: DedupeCache,
    /// Messages emitted per observation id: (first_seen_ms, count).
    per_obs: HashMap<String, (i64, u32)>,
    /// Normalized summary hashes -> last seen ms.
    summary_seen: HashMap<String, i64>,
    /// Recently chosen personas per room, newest last.
    recent_personas: HashMap<String, VecDeque<String>>,
}

impl Default for AutoState {
    fn default() -> Self {
        Self {
            room_last_post_ms: HashMap::new(),
            obs_persona_seen: DedupeCache::new(2048),
            per_obs: HashMap::new(),
            summary_seen: HashMap::new(),
            recent_personas: HashMap::new(),
        }
    }
}

impl AutoState {
    pub fn room_ready(&self, room_id: &str, now_ms: i64, rate_limit_ms: i64) -> bool {
        if rate_limit_ms <= 0 {
            return true;
        }
        self.room_last_post_ms
            .get(room_id)
            .is_none_or(|last| now_ms - last >= rate_limit_ms)
    }

    pub fn observation_count(&mut self, obs_id: &str, now_ms: i64, window_ms: i64) -> u32 {
        self.prune_per_obs(now_ms, window_ms);
        self.per_obs.get(obs_id).map_or(0, |(_, count)| *count)
    }

    pub fn record_observation_message(&mut self, obs_id: &str, now_ms: i64) {
        let entry = self.per_obs.entry(obs_id.to_string()).or_insert((now_ms, 0));
        entry.1 += 1;
    }

    fn prune_per_obs(&mut self, now_ms: i64, window_ms: i64) {
        if window_ms <= 0 {
            self.per_obs.clear();
            return;
        }
        self.per_obs.retain(|_, (first, _)| now_ms - *first <= window_ms);
    }

    pub fn summary_seen_before(&mut self, hash: &str, now_ms: i64, ttl_ms: i64) -> bool {
        if ttl_ms > 0 {
            self.summary_seen.retain(|_, ts| now_ms - *ts <= ttl_ms);
        }
        if self.summary_seen.contains_key(hash) {
            return true;
        }
        self.summary_seen.insert(hash.to_string(), now_ms);
        false
    }

    pub fn recent_personas(&self, room_id: &str, n: usize) -> Vec<String> {
        self.recent_personas
            .get(room_id)
            .map(|d| d.iter().rev().take(n).cloned().collect())
            .unwrap_or_default()
    }

    pub fn record_auto_post(&mut self, room_id: &str, persona_id: &str, now_ms: i64) {
        self.room_last_post_ms.insert(room_id.to_string(), now_ms);
        let recent = self.recent_personas.entry(room_id.to_string()).or_default();
        recent.push_back(persona_id.to_string());
        while recent.len() > 8 {
            recent.pop_front();
        }
    }
}

/// Everything the worker mutates at runtime.
pub struct RuntimeState {
    pub dedupe: DedupeCache,
    rooms: HashMap<String, RoomState>,
    pub personas: HashMap<String, PersonaRuntime>,
    pub auto: AutoState,
    max_recent: usize,
}

impl RuntimeState {
    pub fn new(max_recent: usize, dedupe_size: usize, persona_ids: &[String]) -> Self {
        let personas = persona_ids
            .iter()
            .map(|id| (id.clone(), PersonaRuntime::default()))
            .collect();
        Self {
            dedupe: DedupeCache::new(dedupe_size),
            rooms: HashMap::new(),
            personas,
            auto: AutoState::default(),
            max_recent,
        }
    }

    pub fn room_mut(&mut self, room_id: &str) -> &mut RoomState {
        let max_recent = self.max_recent;
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| RoomState::new(max_recent))
    }

    pub fn observations_total(&self) -> usize {
        self.rooms.values().map(|r| r.observations.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posts_in_window_slides() {
        let mut p = PersonaRuntime::default();
        p.record_post(1_000, "a");
        p.record_post(2_000, "b");
        assert_eq!(p.posts_in_window(2_500, 10_000), 2);
        assert_eq!(p.posts_in_window(12_500, 10_000), 1);
        assert_eq!(p.posts_in_window(20_000, 10_000), 0);
        assert_eq!(p.messages_published, 2);
        assert_eq!(p.own_since_reflection, 2);
    }

    #[test]
    fn test_auto_room_rate_limit() {
        let mut auto = AutoState::default();
        assert!(auto.room_ready("room:demo", 1_000, 5_000));
        auto.record_auto_post("room:demo", "p1", 1_000);
        assert!(!auto.room_ready("room:demo", 3_000, 5_000));
        assert!(auto.room_ready("room:demo", 6_100, 5_000));
        assert!(auto.room_ready("room:demo", 0, 0));
    }

    #[test]
    fn test_per_observation_count_and_window() {
        let mut auto = AutoState::default();
        assert_eq!(auto.observation_count("o1", 1_000, 60_000), 0);
        auto.record_observation_message("o1", 1_000);
        auto.record_observation_message("o1", 2_000);
        assert_eq!(auto.observation_count("o1", 3_000, 60_000), 2);
        // Window expiry clears the count.
        assert_eq!(auto.observation_count("o1", 70_000, 60_000), 0);
    }

    #[test]
    fn test_summary_dedupe_ttl() {
        let mut auto = AutoState::default();
        assert!(!auto.summary_seen_before("h1", 1_000, 10_000));
        assert!(auto.summary_seen_before("h1", 2_000, 10_000));
        assert!(!auto.summary_seen_before("h1", 20_000, 10_000));
    }

    #[test]
    fn test_recent_personas_newest_first() {
        let mut auto = AutoState::default();
        auto.record_auto_post("room:demo", "a", 1);
        auto.record_auto_post("room:demo", "b", 2);
        assert_eq!(
            auto.recent_personas("room:demo", 2),
            vec!["b".to_string(), "a".to_string()]
        );
    }

    #[test]
    fn test_runtime_state_creates_rooms_lazily() {
        let mut state = RuntimeState::new(50, 100, &["p1".to_string()]);
        assert!(state.personas.contains_key("p1"));
        state.room_mut("room:demo");
        assert_eq!(state.observations_total(), 0);
    }
}
