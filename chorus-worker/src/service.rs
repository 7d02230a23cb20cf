//! Persona worker orchestration.
//!
//! One service per room runs three cooperating loops: reactive (firehose),
//! auto-commentary (observations), and reflection. Per-persona counters live
//! behind a single mutex held only while updating state, never across bus,
//! generation, or memory I/O.

use crate::auto::{self, AutoCommentaryConfig, AutoVerdict};
use crate::memory_pipeline::{render_memory_block, MemoryPipeline};
use crate::settings::WorkerSettings;
use crate::state::RuntimeState;
use crate::stats::WorkerStats;
use chorus_bus::{BusError, BusTransport, GroupStart, ValidatingReader};
use chorus_core::config::{PersonaConfig, RoomConfig};
use chorus_core::message::{ChatMessage, Origin, StreamObservation};
use chorus_core::policy::{
    DecisionReason, PersonaSnapshot, PolicyContext, PolicyEngine, WindowStats,
};
use chorus_core::safety::SafetyFilter;
use chorus_core::schema::{SchemaRegistry, ValidatedRecord};
use chorus_core::window::{ObservationEntry, WindowEntry};
use chorus_core::Clock;
use chorus_llm::{PersonaProfile, ReplyProvider, ReplyPurpose, ReplyRequest};
use chorus_memory::read_namespaces;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub const PRODUCER_REACTIVE: &str = "persona_worker";
pub const PRODUCER_AUTO: &str = "persona_worker_auto";

/// A generation decided on under the state lock, executed outside it.
struct PendingReply {
    persona_id: String,
    request: ReplyRequest,
}

pub struct PersonaWorkerService {
    pub settings: WorkerSettings,
    pub room: RoomConfig,
    pub personas: BTreeMap<String, PersonaConfig>,
    pub auto_cfg: AutoCommentaryConfig,
    pub policy: PolicyEngine,
    pub safety: SafetyFilter,
    pub transport: Arc<dyn BusTransport>,
    pub provider: Arc<dyn ReplyProvider>,
    pub memory: Option<Arc<MemoryPipeline>>,
    pub clock: Arc<dyn Clock>,
    pub state: Mutex<RuntimeState>,
    pub stats: Mutex<WorkerStats>,
    pub group_joined: AtomicBool,
    registry: SchemaRegistry,
}

impl PersonaWorkerService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: WorkerSettings,
        room: RoomConfig,
        personas: BTreeMap<String, PersonaConfig>,
        auto_cfg: AutoCommentaryConfig,
        transport: Arc<dyn BusTransport>,
        provider: Arc<dyn ReplyProvider>,
        memory: Option<Arc<MemoryPipeline>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let persona_ids: Vec<String> = personas.keys().cloned().collect();
        let state = RuntimeState::new(
            settings.max_recent_messages,
            settings.dedupe_cache_size,
            &persona_ids,
        );
        Self {
            safety: SafetyFilter::new(200),
            policy: PolicyEngine::default(),
            settings,
            room,
            personas,
            auto_cfg,
            transport,
            provider,
            memory,
            clock,
            state: Mutex::new(state),
            stats: Mutex::new(WorkerStats::default()),
            group_joined: AtomicBool::new(false),
            registry: SchemaRegistry::new(),
        }
    }

    pub fn enabled_personas(&self) -> Vec<String> {
        self.personas.keys().cloned().collect()
    }

    /// Reactive loop: consume the firehose, ask policy per persona, publish
    /// replies back to ingest.
    pub async fn run_reactive(self: Arc<Self>, cancel: CancellationToken) -> Result<(), BusError> {
        let reader = ValidatingReader::new(
            self.transport.clone(),
            SchemaRegistry::new(),
            self.settings.firehose_stream.clone(),
            self.settings.consumer_group.clone(),
            self.settings.consumer_name.clone(),
        );
        self.transport
            .ensure_group(
                &self.settings.firehose_stream,
                &self.settings.consumer_group,
                GroupStart::Beginning,
            )
            .await?;
        self.group_joined.store(true, Ordering::Relaxed);
        tracing::info!(stream = %self.settings.firehose_stream, "reactive loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                batch = reader.next_batch(20, 1_000) => {
                    match batch {
                        Ok(entries) => {
                            for (entry_id, record) in entries {
                                if let ValidatedRecord::Chat(msg) = record {
                                    self.handle_chat(msg).await;
                                }
                                if let Err(e) = reader.ack(&entry_id).await {
                                    tracing::warn!(error = %e, entry_id, "firehose ack failed");
                                }
                            }
                        }
                        Err(e) if e.is_transient() => {
                            tracing::warn!(error = %e, "firehose read failed; backing off");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                        Err(e) => return Err(e),
                    }
                    tick_jitter().await;
                }
            }
        }
    }

    /// Auto-commentary loop: consume observations, gate, and comment.
    pub async fn run_auto(self: Arc<Self>, cancel: CancellationToken) -> Result<(), BusError> {
        let group = format!("{}:obs", self.settings.consumer_group);
        let reader = ValidatingReader::new(
            self.transport.clone(),
            SchemaRegistry::new(),
            self.settings.observations_stream.clone(),
            group.clone(),
            self.settings.consumer_name.clone(),
        );
        self.transport
            .ensure_group(&self.settings.observations_stream, &group, GroupStart::Tail)
            .await?;
        tracing::info!(stream = %self.settings.observations_stream, "auto-commentary loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                batch = reader.next_batch(20, 1_000) => {
                    match batch {
                        Ok(entries) => {
                            for (entry_id, record) in entries {
                                if let ValidatedRecord::Observation(obs) = record {
                                    self.handle_observation(&entry_id, obs).await;
                                }
                                if let Err(e) = reader.ack(&entry_id).await {
                                    tracing::warn!(error = %e, entry_id, "observation ack failed");
                                }
                            }
                            self.stats.lock().await.observations_invalid =
                                reader.invalid_dropped();
                        }
                        Err(e) if e.is_transient() => {
                            tracing::warn!(error = %e, "observation read failed; backing off");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                        Err(e) => return Err(e),
                    }
                    tick_jitter().await;
                }
            }
        }
    }

    async fn handle_chat(&self, msg: ChatMessage) {
        self.stats.lock().await.messages_consumed += 1;
        let now_ms = self.clock.now_ms();

        // Phase 1: update windows and decide, under the state lock.
        let (pending, recent_contents, decisions) = {
            let mut state = self.state.lock().await;

            if state.dedupe.seen_before(&msg.id) {
                let mut stats = self.stats.lock().await;
                stats.messages_deduped += 1;
                stats.count_reason("*", DecisionReason::Deduped);
                return;
            }
            if msg.room_id != self.room.room_id {
                self.stats
                    .lock()
                    .await
                    .count_reason("*", DecisionReason::WrongRoom);
                return;
            }

            let room_state = state.room_mut(&msg.room_id);
            room_state.window.push(
                WindowEntry {
                    id: msg.id.clone(),
                    ts_ms: msg.ts_ms(),
                    origin: msg.origin,
                    user_id: msg.user_id.clone(),
                    display_name: msg.display_name.clone(),
                    content: msg.content.clone(),
                },
                now_ms,
            );

            let rate_10s = room_state.window.rate_per_sec(10, now_ms);
            let bot_fraction = room_state.window.bot_fraction(10, now_ms);
            let event_strength = room_state.observations.latest_hype(now_ms);
            let recent_contents = preferred_recent(&room_state.window.recent(16), 5);
            let mention_window_s = self.room.timing.mention_window_s;
            let mention_hits: BTreeMap<String, (bool, bool)> = self
                .personas
                .values()
                .map(|p| {
                    let display = p.display_name();
                    let trigger_hit = msg.mentions_display(display);
                    let window_hit = trigger_hit
                        || room_state
                            .window
                            .mention_hits(display, mention_window_s, now_ms)
                            > 0;
                    (p.persona_id.clone(), (window_hit, trigger_hit))
                })
                .collect();

            let mut pending = Vec::new();
            let mut decisions = Vec::new();
            for (persona_id, persona_cfg) in &self.personas {
                let runtime = state
                    .personas
                    .get_mut(persona_id)
                    .expect("enrolled persona has runtime state");
                let snapshot = PersonaSnapshot {
                    last_post_ms: runtime.last_post_ms,
                    posts_in_window: runtime
                        .posts_in_window(now_ms, self.room.timing.budget_window_ms),
                    talkativeness: runtime.drift.talkativeness.value,
                };
                let ctx = PolicyContext {
                    room_id: &self.room.room_id,
                    persona_id,
                    timing: &self.room.timing,
                    persona: snapshot,
                    trigger: &msg,
                    window: {
                        let (mentioned, trigger_mentioned) =
                            mention_hits.get(persona_id).copied().unwrap_or((false, false));
                        WindowStats {
                            rate_10s,
                            bot_fraction,
                            mentioned,
                            trigger_mentioned,
                        }
                    },
                    event_strength,
                    now_ms,
                };
                let decision = self.policy.evaluate(&ctx);
                decisions.push((persona_id.clone(), decision.reason, decision.tags.clone()));

                if decision.should_post() {
                    let marker = (decision.reason == DecisionReason::E2eForced)
                        .then(|| self.policy.detect_marker(&msg.content))
                        .flatten()
                        .map(String::from);
                    pending.push(PendingReply {
                        persona_id: persona_id.clone(),
                        request: ReplyRequest {
                            purpose: ReplyPurpose::Reply,
                            persona: profile_for(persona_cfg),
                            room_id: msg.room_id.clone(),
                            trigger_content: msg.content.clone(),
                            trigger_id: msg.id.clone(),
                            marker,
                            recent_chat: recent_contents.clone(),
                            memory_block: String::new(),
                            observation_context: String::new(),
                            observation_summary: String::new(),
                            allowed_emotes: self.room.emote_policy.allowed_emotes.clone(),
                            max_chars: persona_cfg.safety.max_chars,
                        },
                    });
                }
            }
            (pending, recent_contents, decisions)
        };

        {
            let mut stats = self.stats.lock().await;
            for (persona_id, reason, tags) in &decisions {
                stats.record_decision(persona_id, *reason, tags);
            }
        }

        // Memory extraction runs after the lock is gone; it has its own
        // bounded deadlines.
        if let Some(pipeline) = &self.memory {
            pipeline
                .process(
                    &msg,
                    &self.enabled_personas(),
                    &recent_contents,
                    self.clock.as_ref(),
                )
                .await;
        }

        // Phase 2: generate and publish outside the lock.
        for mut reply in pending {
            if let Some(pipeline) = &self.memory {
                // Room-scoped hits first, then persona-global when the
                // policy carries that scope.
                let namespaces = read_namespaces(
                    pipeline.adapter().policy(),
                    &msg.room_id,
                    &reply.persona_id,
                );
                let mut hits = Vec::new();
                for namespace in &namespaces {
                    hits.extend(
                        pipeline
                            .adapter()
                            .search(namespace, &msg.content, self.settings.memory_max_items)
                            .await,
                    );
                }
                hits.truncate(self.settings.memory_max_items);
                if !hits.is_empty() {
                    reply.request.memory_block =
                        render_memory_block(&hits, self.settings.memory_max_chars);
                }
            }
            self.generate_and_publish(reply, PRODUCER_REACTIVE).await;
        }
    }

    async fn handle_observation(&self, entry_id: &str, obs: StreamObservation) {
        let now_ms = self.clock.now_ms();
        {
            let mut stats = self.stats.lock().await;
            stats.observations_received += 1;
        }

        // Buffer the observation for prompts and policy event strength.
        let dropped_old = {
            let mut state = self.state.lock().await;
            state.room_mut(&obs.room_id).observations.push(
                ObservationEntry {
                    entry_id: entry_id.to_string(),
                    ts_ms: obs.ts_ms(),
                    observation: obs.clone(),
                },
                now_ms,
            )
        };
        if dropped_old > 0 {
            self.stats.lock().await.observations_dropped_old += dropped_old as u64;
        }

        if !self.auto_cfg.enabled || obs.room_id != self.room.room_id {
            return;
        }
        self.stats.lock().await.auto_obs_seen += 1;

        let (verdict, _score) = auto::classify(&obs, &self.auto_cfg);
        if verdict == AutoVerdict::NotInteresting {
            return;
        }
        self.stats.lock().await.auto_obs_interesting += 1;

        // Gates and persona pick under the state lock.
        let picked = {
            let mut state = self.state.lock().await;

            if !state
                .auto
                .room_ready(&obs.room_id, now_ms, self.auto_cfg.room_rate_limit_ms)
            {
                self.stats.lock().await.auto_suppressed_room_rate += 1;
                return;
            }
            if self.auto_cfg.max_messages_per_observation > 0
                && state
                    .auto
                    .observation_count(&obs.id, now_ms, self.auto_cfg.dedupe_window_ms)
                    >= self.auto_cfg.max_messages_per_observation
            {
                self.stats.lock().await.auto_suppressed_dedupe += 1;
                return;
            }
            if self.auto_cfg.summary_dedupe.enabled {
                let hash = auto::summary_hash(&obs, self.auto_cfg.summary_dedupe.normalize);
                if !hash.is_empty()
                    && state.auto.summary_seen_before(
                        &hash,
                        now_ms,
                        self.auto_cfg.summary_dedupe.ttl_ms,
                    )
                {
                    self.stats.lock().await.auto_suppressed_dedupe += 1;
                    return;
                }
            }

            // Candidates: enrolled personas that are off auto cooldown and
            // inside their posting budget.
            let mut candidates = Vec::new();
            for persona_id in self.personas.keys() {
                let runtime = state
                    .personas
                    .get_mut(persona_id)
                    .expect("enrolled persona has runtime state");
                let off_cooldown = runtime
                    .auto_last_post_ms
                    .is_none_or(|last| now_ms - last >= self.auto_cfg.persona_cooldown_ms);
                let within_budget = runtime
                    .posts_in_window(now_ms, self.room.timing.budget_window_ms)
                    < self.room.timing.budget_n;
                if off_cooldown && within_budget {
                    candidates.push(persona_id.clone());
                }
            }
            if candidates.is_empty() {
                self.stats.lock().await.auto_suppressed_cooldown += 1;
                return;
            }

            let recent = state
                .auto
                .recent_personas(&obs.room_id, self.auto_cfg.avoid_repeat_last_n);
            let Some(persona_id) = auto::pick_persona(&obs, &candidates, &recent, &self.auto_cfg)
            else {
                self.stats.lock().await.auto_suppressed_cooldown += 1;
                return;
            };

            if state
                .auto
                .obs_persona_seen
                .seen_before(&format!("{}:{persona_id}", obs.id))
            {
                self.stats.lock().await.auto_suppressed_dedupe += 1;
                return;
            }

            let (observation_context, _ids) = auto::format_observation_context(
                &state.room_mut(&obs.room_id).observations.latest(3, now_ms),
                3,
                600,
            );
            (persona_id, observation_context)
        };
        let (persona_id, observation_context) = picked;
        let persona_cfg = &self.personas[&persona_id];

        self.stats.lock().await.auto_messages_attempted += 1;

        let max_chars = persona_cfg
            .safety
            .max_chars
            .min(self.auto_cfg.max_reply_chars);
        let request = ReplyRequest {
            purpose: ReplyPurpose::AutoCommentary,
            persona: profile_for(persona_cfg),
            room_id: obs.room_id.clone(),
            trigger_content: String::new(),
            trigger_id: obs.id.clone(),
            marker: None,
            recent_chat: Vec::new(),
            memory_block: String::new(),
            observation_context,
            observation_summary: obs.summary.clone(),
            allowed_emotes: self.room.emote_policy.allowed_emotes.clone(),
            max_chars,
        };

        let text = match self.provider.generate(&request).await {
            Ok(response) => response.text,
            Err(e) => {
                tracing::warn!(error = %e, persona_id = %persona_id, "auto generation failed");
                let mut stats = self.stats.lock().await;
                stats.auto_generation_failed += 1;
                stats.generation_failures += 1;
                return;
            }
        };
        // Fall back to the summary itself when the provider had nothing.
        let mut text = if text.is_empty() {
            chorus_core::text::sanitize_line(&obs.summary)
        } else {
            text
        };
        if !self.auto_cfg.message_prefix.is_empty() {
            text = format!("{} {text}", self.auto_cfg.message_prefix);
        }
        text = chorus_core::text::truncate_chars(
            &chorus_core::text::sanitize_line(&chorus_core::text::strip_mentions(&text)),
            max_chars,
        );

        if text.is_empty() || auto::leaks_observation_metadata(&text) {
            tracing::warn!(persona_id = %persona_id, "auto reply rejected by output guard");
            self.stats.lock().await.auto_generation_failed += 1;
            return;
        }

        if self
            .publish_bot_message(&persona_id, &obs.room_id, &text, PRODUCER_AUTO)
            .await
        {
            let now_ms = self.clock.now_ms();
            let mut state = self.state.lock().await;
            state.auto.record_auto_post(&obs.room_id, &persona_id, now_ms);
            state.auto.record_observation_message(&obs.id, now_ms);
            if let Some(runtime) = state.personas.get_mut(&persona_id) {
                runtime.auto_last_post_ms = Some(now_ms);
                runtime.record_post(now_ms, &text);
            }
            let mut stats = self.stats.lock().await;
            stats.auto_messages_published += 1;
            stats.messages_published += 1;
        }
    }

    async fn generate_and_publish(&self, reply: PendingReply, producer: &str) {
        let response = match self.provider.generate(&reply.request).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, persona_id = %reply.persona_id, code = e.code(),
                    "generation failed");
                let mut stats = self.stats.lock().await;
                stats.generation_failures += 1;
                stats.count_reason(&reply.persona_id, DecisionReason::GenEmpty);
                return;
            }
        };
        if response.text.is_empty() {
            self.stats
                .lock()
                .await
                .count_reason(&reply.persona_id, DecisionReason::GenEmpty);
            return;
        }

        if self
            .publish_bot_message(
                &reply.persona_id,
                &reply.request.room_id,
                &response.text,
                producer,
            )
            .await
        {
            let now_ms = self.clock.now_ms();
            {
                let mut state = self.state.lock().await;
                if let Some(runtime) = state.personas.get_mut(&reply.persona_id) {
                    runtime.record_post(now_ms, &response.text);
                }
            }
            self.stats.lock().await.messages_published += 1;
        }
    }

    /// Safety-check, validate, and publish one bot line onto ingest.
    async fn publish_bot_message(
        &self,
        persona_id: &str,
        room_id: &str,
        content: &str,
        producer: &str,
    ) -> bool {
        let Some(outcome) = self.safety.review(content) else {
            return false;
        };
        if outcome.is_drop() {
            tracing::warn!(persona_id, "bot reply dropped by safety");
            return false;
        }

        let persona_cfg = &self.personas[persona_id];
        let mut msg = ChatMessage::bot(
            persona_id,
            persona_cfg.display_name(),
            room_id,
            outcome.content,
            uuid::Uuid::new_v4().simple().to_string(),
            self.clock.now(),
            producer,
            &self.settings.consumer_name,
        );
        msg.badges = persona_cfg.presentation.badges.clone();
        msg.style = persona_cfg.presentation.style.clone();

        if let Err(e) = self.registry.validate_chat(&msg) {
            tracing::warn!(error = %e, persona_id, "generated message failed validation");
            return false;
        }
        let payload = match serde_json::to_string(&msg) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize bot message");
                return false;
            }
        };
        match self
            .transport
            .publish(&self.settings.ingest_stream, &payload)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, persona_id, "failed to publish bot message");
                false
            }
        }
    }
}

/// Build the generator-facing persona snapshot.
fn profile_for(cfg: &PersonaConfig) -> PersonaProfile {
    PersonaProfile {
        persona_id: cfg.persona_id.clone(),
        display_name: cfg.display_name().to_string(),
        profile_lines: cfg.profile_lines(),
        catchphrases: cfg.anchor.catchphrases.clone(),
    }
}

/// Sample recent chat lines, humans preferred, oldest first.
fn preferred_recent(entries: &[WindowEntry], n: usize) -> Vec<String> {
    let humans: Vec<&WindowEntry> = entries.iter().filter(|e| e.origin == Origin::Human).collect();
    let mut picked: Vec<&WindowEntry> = humans.iter().rev().take(n).copied().collect();
    if picked.len() < n {
        let missing = n - picked.len();
        picked.extend(
            entries
                .iter()
                .filter(|e| e.origin != Origin::Human)
                .rev()
                .take(missing),
        );
    }
    picked.sort_by_key(|e| e.ts_ms);
    picked.iter().map(|e| e.content.clone()).collect()
}

/// Uniform 0-250 ms offset per cycle so worker fleets stay de-synchronized.
pub async fn tick_jitter() {
    let delay = rand::thread_rng().gen_range(0..250u64);
    tokio::time::sleep(Duration::from_millis(delay)).await;
}
