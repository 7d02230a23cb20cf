//! Slow reflection loop: bounded drift plus memory extraction.
//!
//! Every `reflection_interval_s`, or after `reflection_message_count` own
//! messages, a persona looks back at what it posted, nudges its drift knobs
//! (at most ±0.02 per knob per cycle, clamped to bounds), and writes up to
//! three durable MemoryItems.

use crate::memory_pipeline::parse_extracted_items;
use crate::service::PersonaWorkerService;
use crate::settings::ExtractStrategy;
use chorus_core::text::detect_mention;
use chorus_llm::{PersonaProfile, ReplyPurpose, ReplyRequest};
use chorus_memory::{
    write_scope, Confidence, MemoryCategory, MemoryItem, MemoryScope, MemorySource,
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DRIFT_MAX_STEP: f64 = 0.02;
pub const MAX_ITEMS_PER_CYCLE: usize = 3;

/// Inputs snapshotted under the state lock for one persona's cycle.
struct ReflectionInput {
    persona_id: String,
    own_recent: Vec<String>,
    own_since_reflection: usize,
    /// (user_id, content) pairs from the room window.
    interactions: Vec<(String, String)>,
}

pub async fn run_reflection(service: Arc<PersonaWorkerService>, cancel: CancellationToken) {
    let interval_ms = (service.settings.reflection_interval_s * 1000) as i64;
    let count_threshold = service.settings.reflection_message_count;
    tracing::info!(
        interval_s = service.settings.reflection_interval_s,
        message_count = count_threshold,
        "reflection loop started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
        }
        crate::service::tick_jitter().await;

        let now_ms = service.clock.now_ms();
        let due: Vec<ReflectionInput> = {
            let mut state = service.state.lock().await;
            let interactions: Vec<(String, String)> = state
                .room_mut(&service.room.room_id)
                .window
                .recent(20)
                .iter()
                .map(|e| (e.user_id.clone(), e.content.clone()))
                .collect();

            let mut due = Vec::new();
            for (persona_id, runtime) in state.personas.iter_mut() {
                let interval_due = runtime.own_since_reflection > 0
                    && now_ms - runtime.last_reflection_ms >= interval_ms;
                let count_due = runtime.own_since_reflection >= count_threshold;
                if !(interval_due || count_due) {
                    continue;
                }
                due.push(ReflectionInput {
                    persona_id: persona_id.clone(),
                    own_recent: runtime.own_recent.iter().cloned().collect(),
                    own_since_reflection: runtime.own_since_reflection,
                    interactions: interactions.clone(),
                });
                runtime.last_reflection_ms = now_ms;
                runtime.own_since_reflection = 0;
            }
            due
        };

        for input in due {
            reflect_one(&service, input, count_threshold).await;
        }
    }
}

async fn reflect_one(
    service: &Arc<PersonaWorkerService>,
    input: ReflectionInput,
    count_threshold: usize,
) {
    let persona_cfg = &service.personas[&input.persona_id];
    let display_name = persona_cfg.display_name();
    // Reflection output has no addressing user, so this resolves to the room
    // scope (or the persona scope when the policy excludes rooms).
    let (scope, namespace) = match &service.memory {
        Some(pipeline) => write_scope(
            pipeline.adapter().policy(),
            false,
            &service.room.room_id,
            &input.persona_id,
            None,
        ),
        None => (
            MemoryScope::PersonaRoom,
            MemoryScope::PersonaRoom.namespace(&service.room.room_id, &input.persona_id, None),
        ),
    };

    // Drift: chatty cycles calm the persona down, quiet ones wake it up.
    let talk_delta = if input.own_since_reflection >= count_threshold {
        -DRIFT_MAX_STEP
    } else {
        0.01
    };

    let mut items = Vec::new();
    if service.settings.memory_extract_strategy == ExtractStrategy::Llm {
        items = llm_reflect(service, &input, scope, &namespace).await;
    }
    if items.is_empty() {
        items = heuristic_items(service, &input, display_name, scope, &namespace);
    }
    items.truncate(MAX_ITEMS_PER_CYCLE);

    let mut written = 0u64;
    if let Some(pipeline) = &service.memory {
        let now_ms = service.clock.now_ms();
        for item in items {
            if matches!(
                pipeline.adapter().add(&service.room.room_id, item, now_ms).await,
                chorus_memory::WriteOutcome::Accepted { .. }
            ) {
                written += 1;
            }
        }
    }

    {
        let mut state = service.state.lock().await;
        if let Some(runtime) = state.personas.get_mut(&input.persona_id) {
            runtime.drift.talkativeness.nudge(talk_delta, DRIFT_MAX_STEP);
        }
    }
    let mut stats = service.stats.lock().await;
    stats.reflection_cycles += 1;
    stats.reflection_items_written += written;
    tracing::debug!(persona_id = %input.persona_id, written, "reflection cycle complete");
}

/// Heuristic extraction: repeated own lines become catchphrases, users who
/// keep addressing the persona become relationships.
fn heuristic_items(
    service: &Arc<PersonaWorkerService>,
    input: &ReflectionInput,
    display_name: &str,
    scope: MemoryScope,
    namespace: &str,
) -> Vec<MemoryItem> {
    let mut items = Vec::new();
    let now = service.clock.now();

    let mut line_counts: HashMap<&str, usize> = HashMap::new();
    for line in &input.own_recent {
        *line_counts.entry(line.as_str()).or_default() += 1;
    }
    let mut repeated: Vec<(&str, usize)> = line_counts
        .into_iter()
        .filter(|(line, count)| *count >= 2 && line.len() >= 4)
        .collect();
    repeated.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    if let Some((line, _)) = repeated.first() {
        items.push(item(
            scope,
            namespace,
            MemoryCategory::Catchphrase,
            format!("keeps saying \"{line}\""),
            None,
            now,
        ));
    }

    let mut mention_counts: HashMap<&str, usize> = HashMap::new();
    for (user_id, content) in &input.interactions {
        if detect_mention(content, display_name) {
            *mention_counts.entry(user_id.as_str()).or_default() += 1;
        }
    }
    let mut frequent: Vec<(&str, usize)> = mention_counts
        .into_iter()
        .filter(|(_, count)| *count >= 2)
        .collect();
    frequent.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    for (user_id, _) in frequent.into_iter().take(2) {
        items.push(item(
            scope,
            namespace,
            MemoryCategory::Relationship,
            format!("{user_id} keeps addressing {display_name}"),
            Some(user_id.to_string()),
            now,
        ));
    }

    items
}

async fn llm_reflect(
    service: &Arc<PersonaWorkerService>,
    input: &ReflectionInput,
    scope: MemoryScope,
    namespace: &str,
) -> Vec<MemoryItem> {
    let recent_chat: Vec<String> = input
        .interactions
        .iter()
        .map(|(user, content)| format!("{user}: {content}"))
        .collect();
    let req = ReplyRequest {
        purpose: ReplyPurpose::MemoryExtract,
        persona: PersonaProfile {
            persona_id: input.persona_id.clone(),
            display_name: input.persona_id.clone(),
            profile_lines: Vec::new(),
            catchphrases: Vec::new(),
        },
        room_id: service.room.room_id.clone(),
        trigger_content: input.own_recent.join(" | "),
        trigger_id: format!("reflect:{}", input.persona_id),
        marker: None,
        recent_chat,
        memory_block: String::new(),
        observation_context: String::new(),
        observation_summary: String::new(),
        allowed_emotes: Vec::new(),
        max_chars: service.settings.memory_max_chars,
    };
    match service.provider.generate(&req).await {
        Ok(response) => parse_extracted_items(
            &response.text,
            scope,
            namespace,
            service.clock.as_ref(),
            "reflection",
            MAX_ITEMS_PER_CYCLE,
        ),
        Err(e) => {
            tracing::warn!(error = %e, persona_id = %input.persona_id, "reflection extraction failed");
            Vec::new()
        }
    }
}

fn item(
    scope: MemoryScope,
    namespace: &str,
    category: MemoryCategory,
    content: String,
    other_user: Option<String>,
    now: chrono::DateTime<chrono::Utc>,
) -> MemoryItem {
    let digest = Sha256::digest(format!("{namespace}:{content}").as_bytes());
    let id: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    MemoryItem {
        id,
        ts: now,
        scope,
        namespace: namespace.to_string(),
        category,
        other_user,
        topic: None,
        confidence: Confidence::Med,
        content,
        source: MemorySource {
            kind: "reflection".to_string(),
            ..Default::default()
        },
        ttl_days: 0,
        redactions: Vec::new(),
    }
}
