//! Per-(room, persona) posting decisions.
//!
//! Evaluation order (first match wins on suppress, probability gate last):
//! deterministic marker force, bot-origin suppression, trigger age, cooldown,
//! budget, then the probability computation and a deterministic gate seeded
//! by `(room, persona, trigger.id)`. Identical inputs always produce the
//! identical `(decision, reason, p_used)`.

use crate::message::{ChatMessage, Origin};
use crate::text;
use serde::{Deserialize, Serialize};

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Post,
    Skip,
}

/// Short stable tag recorded for every decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    E2eForced,
    BotOrigin,
    TooOld,
    WrongRoom,
    Cooldown,
    Budget,
    ProbabilityPass,
    ProbabilityGate,
    GenEmpty,
    Deduped,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E2eForced => "e2e_forced",
            Self::BotOrigin => "bot_origin",
            Self::TooOld => "too_old",
            Self::WrongRoom => "wrong_room",
            Self::Cooldown => "cooldown",
            Self::Budget => "budget",
            Self::ProbabilityPass => "p_pass",
            Self::ProbabilityGate => "probability_gate",
            Self::GenEmpty => "gen_empty",
            Self::Deduped => "deduped",
        }
    }
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Numeric debug fields snapshotted at evaluation time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionTags {
    pub p_base: f64,
    pub p_used: f64,
    pub h_value: f64,
    pub rate_10s: f64,
    pub bot_fraction: f64,
    pub event_strength: f64,
    pub mention: bool,
    pub hype: bool,
    pub forced: bool,
    pub ts_ms: i64,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub verdict: Verdict,
    pub reason: DecisionReason,
    pub tags: DecisionTags,
}

impl Decision {
    pub fn should_post(&self) -> bool {
        self.verdict == Verdict::Post
    }
}

/// Weights and gates for the policy computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Marker prefixes that force a deterministic post.
    pub marker_prefixes: Vec<String>,
    pub alpha_event: f64,
    pub beta_mention: f64,
    pub alpha_trend: f64,
    pub gamma_bot: f64,
    /// Messages/second that saturates the trend boost.
    pub velocity_norm: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            marker_prefixes: vec![
                "E2E_TEST_".to_string(),
                "E2E_MARKER_".to_string(),
                "E2E_TEST_BOTLOOP_".to_string(),
            ],
            alpha_event: 1.5,
            beta_mention: 3.0,
            alpha_trend: 0.8,
            gamma_bot: 0.7,
            velocity_norm: 5.0,
        }
    }
}

/// View of the persona's mutable counters at evaluation time.
#[derive(Debug, Clone, Copy)]
pub struct PersonaSnapshot {
    pub last_post_ms: Option<i64>,
    pub posts_in_window: usize,
    pub talkativeness: f64,
}

/// Aggregates derived from the room's chat window.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowStats {
    pub rate_10s: f64,
    pub bot_fraction: f64,
    /// Persona was mentioned within the mention window (trigger included).
    /// Drives the probability boost.
    pub mentioned: bool,
    /// The trigger itself addresses this persona. Only this exempts a
    /// bot-origin trigger from suppression.
    pub trigger_mentioned: bool,
}

/// Everything one evaluation reads. Built by the worker under its state lock.
#[derive(Debug)]
pub struct PolicyContext<'a> {
    pub room_id: &'a str,
    pub persona_id: &'a str,
    pub timing: &'a crate::config::TimingConfig,
    pub persona: PersonaSnapshot,
    pub trigger: &'a ChatMessage,
    pub window: WindowStats,
    /// Hype level of the newest live observation, 0 when none.
    pub event_strength: f64,
    pub now_ms: i64,
}

#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    cfg: PolicyConfig,
}

impl PolicyEngine {
    pub fn new(cfg: PolicyConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.cfg
    }

    /// First configured marker prefix found in `content`, if any.
    pub fn detect_marker(&self, content: &str) -> Option<&str> {
        // Longest prefix first so E2E_TEST_BOTLOOP_ wins over E2E_TEST_.
        let mut best: Option<&str> = None;
        for prefix in &self.cfg.marker_prefixes {
            if content.contains(prefix.as_str())
                && best.is_none_or(|b| prefix.len() > b.len())
            {
                best = Some(prefix.as_str());
            }
        }
        best
    }

    pub fn evaluate(&self, ctx: &PolicyContext<'_>) -> Decision {
        let trigger_age_ms = ctx.now_ms - ctx.trigger.ts_ms();
        let hype = text::detect_hype(&ctx.trigger.content);
        let mut tags = DecisionTags {
            p_base: ctx.timing.p_base,
            rate_10s: ctx.window.rate_10s,
            bot_fraction: ctx.window.bot_fraction,
            event_strength: ctx.event_strength,
            mention: ctx.window.mentioned,
            hype,
            ts_ms: ctx.trigger.ts_ms(),
            ..Default::default()
        };

        // 1. Deterministic force for end-to-end markers.
        let marker = self.detect_marker(&ctx.trigger.content);
        if marker.is_some()
            && ctx.trigger.origin != Origin::Bot
            && trigger_age_ms <= ctx.timing.max_trigger_age_ms
        {
            tags.p_used = 1.0;
            tags.forced = true;
            return Decision {
                verdict: Verdict::Post,
                reason: DecisionReason::E2eForced,
                tags,
            };
        }

        // 2. Bot-origin suppression, unless the bot explicitly addresses us.
        if ctx.trigger.origin == Origin::Bot && !ctx.window.trigger_mentioned {
            return Decision {
                verdict: Verdict::Skip,
                reason: DecisionReason::BotOrigin,
                tags,
            };
        }

        // 3. Stale triggers never post.
        if trigger_age_ms > ctx.timing.max_trigger_age_ms {
            return Decision {
                verdict: Verdict::Skip,
                reason: DecisionReason::TooOld,
                tags,
            };
        }

        // 4. Cooldown.
        if let Some(last_ms) = ctx.persona.last_post_ms {
            if ctx.now_ms - last_ms < ctx.timing.cooldown_ms {
                return Decision {
                    verdict: Verdict::Skip,
                    reason: DecisionReason::Cooldown,
                    tags,
                };
            }
        }

        // 5. Sliding-window budget.
        if ctx.persona.posts_in_window >= ctx.timing.budget_n {
            return Decision {
                verdict: Verdict::Skip,
                reason: DecisionReason::Budget,
                tags,
            };
        }

        // 6. Probability computation.
        let mut p = ctx.timing.p_base * ctx.timing.hype_multiplier * ctx.persona.talkativeness;
        p *= 1.0 + self.cfg.alpha_event * ctx.event_strength;
        if ctx.window.mentioned {
            p *= self.cfg.beta_mention;
        }
        let velocity = (ctx.window.rate_10s / self.cfg.velocity_norm).clamp(0.0, 1.0);
        p *= 1.0 + self.cfg.alpha_trend * velocity;
        p *= 1.0 - self.cfg.gamma_bot * ctx.window.bot_fraction;
        let p_cap = ctx.timing.p_cap.min(0.95);
        let p = p.clamp(0.0, p_cap);
        tags.p_used = p;

        // 7. Deterministic gate seeded by (room, persona, trigger id).
        let seed = format!("{}:{}:{}", ctx.room_id, ctx.persona_id, ctx.trigger.id);
        let h = text::unit_score(&seed);
        tags.h_value = h;

        if h < p {
            Decision {
                verdict: Verdict::Post,
                reason: DecisionReason::ProbabilityPass,
                tags,
            }
        } else {
            Decision {
                verdict: Verdict::Skip,
                reason: DecisionReason::ProbabilityGate,
                tags,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimingConfig;
    use chrono::{TimeZone, Utc};

    fn trigger(id: &str, origin: Origin, content: &str, ts_ms: i64) -> ChatMessage {
        ChatMessage {
            schema_name: "ChatMessage".to_string(),
            schema_version: "1.0.0".to_string(),
            id: id.to_string(),
            ts: Utc.timestamp_millis_opt(ts_ms).unwrap(),
            room_id: "room:demo".to_string(),
            origin,
            user_id: "viewer".to_string(),
            display_name: "Viewer".to_string(),
            content: content.to_string(),
            reply_to: None,
            mentions: Vec::new(),
            emotes: Vec::new(),
            badges: Vec::new(),
            style: None,
            client_meta: None,
            moderation: None,
            trace: None,
        }
    }

    fn ctx<'a>(
        timing: &'a TimingConfig,
        msg: &'a ChatMessage,
        persona: PersonaSnapshot,
        window: WindowStats,
        now_ms: i64,
    ) -> PolicyContext<'a> {
        PolicyContext {
            room_id: "room:demo",
            persona_id: "clip_goblin",
            timing,
            persona,
            trigger: msg,
            window,
            event_strength: 0.0,
            now_ms,
        }
    }

    fn idle_persona() -> PersonaSnapshot {
        PersonaSnapshot {
            last_post_ms: None,
            posts_in_window: 0,
            talkativeness: 1.0,
        }
    }

    #[test]
    fn test_marker_forces_post() {
        let engine = PolicyEngine::default();
        let timing = TimingConfig::default();
        let msg = trigger("h1", Origin::Human, "E2E_TEST_ABC hello", 1_000);
        let d = engine.evaluate(&ctx(&timing, &msg, idle_persona(), WindowStats::default(), 2_000));
        assert!(d.should_post());
        assert_eq!(d.reason, DecisionReason::E2eForced);
        assert_eq!(d.tags.p_used, 1.0);
        assert!(d.tags.forced);
    }

    #[test]
    fn test_marker_from_bot_does_not_force() {
        let engine = PolicyEngine::default();
        let timing = TimingConfig::default();
        let msg = trigger("b1", Origin::Bot, "E2E_TEST_ABC echo", 1_000);
        let d = engine.evaluate(&ctx(&timing, &msg, idle_persona(), WindowStats::default(), 2_000));
        assert_eq!(d.reason, DecisionReason::BotOrigin);
        assert!(!d.should_post());
    }

    #[test]
    fn test_stale_marker_does_not_force() {
        let engine = PolicyEngine::default();
        let timing = TimingConfig::default();
        let msg = trigger("h1", Origin::Human, "E2E_TEST_ABC", 0);
        let d = engine.evaluate(&ctx(
            &timing,
            &msg,
            idle_persona(),
            WindowStats::default(),
            timing.max_trigger_age_ms + 1,
        ));
        assert_ne!(d.reason, DecisionReason::E2eForced);
    }

    #[test]
    fn test_bot_origin_with_mention_passes_suppression() {
        let engine = PolicyEngine::default();
        let mut timing = TimingConfig::default();
        // Make the probability path certain so we see it reached.
        timing.p_base = 10.0;
        timing.p_cap = 0.95;
        let msg = trigger("b2", Origin::Bot, "@ClipGoblin thoughts?", 1_000);
        let window = WindowStats {
            mentioned: true,
            trigger_mentioned: true,
            ..Default::default()
        };
        let d = engine.evaluate(&ctx(&timing, &msg, idle_persona(), window, 2_000));
        assert_ne!(d.reason, DecisionReason::BotOrigin);
    }

    #[test]
    fn test_window_mention_alone_does_not_exempt_bot_origin() {
        let engine = PolicyEngine::default();
        let timing = TimingConfig::default();
        let msg = trigger("b3", Origin::Bot, "unrelated bot chatter", 1_000);
        // Someone mentioned the persona recently, but this trigger did not.
        let window = WindowStats {
            mentioned: true,
            trigger_mentioned: false,
            ..Default::default()
        };
        let d = engine.evaluate(&ctx(&timing, &msg, idle_persona(), window, 2_000));
        assert_eq!(d.reason, DecisionReason::BotOrigin);
    }

    #[test]
    fn test_cooldown_then_budget() {
        let engine = PolicyEngine::default();
        let timing = TimingConfig::default();
        let msg = trigger("h2", Origin::Human, "hello", 10_000);

        let cooling = PersonaSnapshot {
            last_post_ms: Some(9_500),
            posts_in_window: 0,
            talkativeness: 1.0,
        };
        let d = engine.evaluate(&ctx(&timing, &msg, cooling, WindowStats::default(), 10_200));
        assert_eq!(d.reason, DecisionReason::Cooldown);

        let budgeted = PersonaSnapshot {
            last_post_ms: Some(1_000),
            posts_in_window: timing.budget_n,
            talkativeness: 1.0,
        };
        let d = engine.evaluate(&ctx(&timing, &msg, budgeted, WindowStats::default(), 10_200));
        assert_eq!(d.reason, DecisionReason::Budget);
    }

    #[test]
    fn test_gate_is_deterministic() {
        let engine = PolicyEngine::default();
        let timing = TimingConfig::default();
        let msg = trigger("h3", Origin::Human, "regular chat", 1_000);
        let a = engine.evaluate(&ctx(&timing, &msg, idle_persona(), WindowStats::default(), 2_000));
        let b = engine.evaluate(&ctx(&timing, &msg, idle_persona(), WindowStats::default(), 2_000));
        assert_eq!(a.reason, b.reason);
        assert_eq!(a.tags.p_used, b.tags.p_used);
        assert_eq!(a.tags.h_value, b.tags.h_value);
    }

    #[test]
    fn test_mention_boost_raises_p() {
        let engine = PolicyEngine::default();
        let timing = TimingConfig::default();
        let msg = trigger("h4", Origin::Human, "@ClipGoblin POGGERS", 1_000);

        let plain = engine.evaluate(&ctx(&timing, &msg, idle_persona(), WindowStats::default(), 2_000));
        let mentioned = engine.evaluate(&ctx(
            &timing,
            &msg,
            idle_persona(),
            WindowStats {
                mentioned: true,
                ..Default::default()
            },
            2_000,
        ));
        assert!(mentioned.tags.p_used > plain.tags.p_used);
    }

    #[test]
    fn test_bot_fraction_dampens_and_cap_holds() {
        let engine = PolicyEngine::default();
        let mut timing = TimingConfig::default();
        timing.p_base = 0.9;
        timing.p_cap = 0.99; // ceiling still enforced at 0.95
        let msg = trigger("h5", Origin::Human, "chat", 1_000);

        let crowded = engine.evaluate(&ctx(
            &timing,
            &msg,
            idle_persona(),
            WindowStats {
                bot_fraction: 1.0,
                ..Default::default()
            },
            2_000,
        ));
        let calm = engine.evaluate(&ctx(&timing, &msg, idle_persona(), WindowStats::default(), 2_000));
        assert!(crowded.tags.p_used < calm.tags.p_used);
        assert!(calm.tags.p_used <= 0.95);
    }

    #[test]
    fn test_detect_marker_prefers_longest() {
        let engine = PolicyEngine::default();
        assert_eq!(
            engine.detect_marker("x E2E_TEST_BOTLOOP_42"),
            Some("E2E_TEST_BOTLOOP_")
        );
        assert_eq!(engine.detect_marker("E2E_MARKER_1"), Some("E2E_MARKER_"));
        assert_eq!(engine.detect_marker("plain"), None);
    }
}
