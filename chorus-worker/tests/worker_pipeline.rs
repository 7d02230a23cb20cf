//! End-to-end worker behavior over the in-process bus: marker forcing,
//! bot-origin suppression, cooldown, auto commentary, and the memory
//! pipeline, with no external services.

use chorus_bus::{BusTransport, GroupStart, InProcessBus};
use chorus_core::config::{PersonaConfig, RoomConfig};
use chorus_core::message::{ChatMessage, Origin};
use chorus_core::SystemClock;
use chorus_llm::DeterministicProvider;
use chorus_memory::{InMemoryStore, MemoryAdapter, MemoryPolicy};
use chorus_worker::{
    AutoCommentaryConfig, ExtractStrategy, MemoryPipeline, PersonaWorkerService, WorkerSettings,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const FIREHOSE: &str = "stream:chat.firehose";
const INGEST: &str = "stream:chat.ingest";
const OBSERVATIONS: &str = "stream:observations";

fn room_config() -> RoomConfig {
    serde_json::from_value(json!({
        "room_id": "room:demo",
        "enabled_personas": ["clip_goblin"],
        "timing": {"cooldown_ms": 1500, "budget_n": 5}
    }))
    .unwrap()
}

fn persona_config() -> PersonaConfig {
    serde_json::from_value(json!({
        "persona_id": "clip_goblin",
        "presentation": {"display_name": "ClipGoblin"},
        "anchor": {"catchphrases": ["CLIP IT"]},
        "safety": {"max_chars": 200}
    }))
    .unwrap()
}

async fn build_service(
    bus: Arc<InProcessBus>,
    auto_enabled: bool,
    memory: bool,
) -> Arc<PersonaWorkerService> {
    // Groups are created up front so test publishes are never skipped by a
    // tail-start group.
    bus.ensure_group(FIREHOSE, "persona_workers", GroupStart::Beginning)
        .await
        .unwrap();
    bus.ensure_group(OBSERVATIONS, "persona_workers:obs", GroupStart::Beginning)
        .await
        .unwrap();

    let settings = WorkerSettings::from_env_with(|_| None);
    let personas = [("clip_goblin".to_string(), persona_config())]
        .into_iter()
        .collect();
    let provider = Arc::new(DeterministicProvider::new());
    let memory_pipeline = memory.then(|| {
        Arc::new(MemoryPipeline::new(
            Arc::new(MemoryAdapter::new(
                Arc::new(InMemoryStore::new()),
                MemoryPolicy::default(),
            )),
            provider.clone(),
            ExtractStrategy::Heuristic,
            false,
            3,
            800,
        ))
    });
    let auto_cfg = AutoCommentaryConfig {
        enabled: auto_enabled,
        room_rate_limit_ms: 0,
        ..Default::default()
    };

    Arc::new(PersonaWorkerService::new(
        settings,
        room_config(),
        personas,
        auto_cfg,
        bus,
        provider,
        memory_pipeline,
        Arc::new(SystemClock),
    ))
}

fn human_message(id: &str, content: &str) -> String {
    serde_json::to_string(&json!({
        "schema_name": "ChatMessage",
        "schema_version": "1.0.0",
        "id": id,
        "ts": Utc::now(),
        "room_id": "room:demo",
        "origin": "human",
        "user_id": "viewer_1",
        "display_name": "Viewer",
        "content": content
    }))
    .unwrap()
}

fn bot_message(id: &str, content: &str) -> String {
    serde_json::to_string(&json!({
        "schema_name": "ChatMessage",
        "schema_version": "1.0.0",
        "id": id,
        "ts": Utc::now(),
        "room_id": "room:demo",
        "origin": "bot",
        "user_id": "other_bot",
        "display_name": "OtherBot",
        "content": content,
        "trace": {"producer": "persona_worker"}
    }))
    .unwrap()
}

fn observation(id: &str, summary: &str, hype: f64) -> String {
    serde_json::to_string(&json!({
        "schema_name": "StreamObservation",
        "schema_version": "1.0.0",
        "id": id,
        "ts": Utc::now(),
        "room_id": "room:demo",
        "summary": summary,
        "tags": ["hype"],
        "entities": ["ClipGoblin"],
        "hype_level": hype
    }))
    .unwrap()
}

/// Poll until `check` passes or the timeout elapses.
async fn wait_for<F, Fut>(check: F, timeout_ms: u64) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_marker_message_produces_bot_reply() {
    let bus = Arc::new(InProcessBus::new());
    let service = build_service(bus.clone(), false, false).await;

    let cancel = CancellationToken::new();
    let loop_task = tokio::spawn(service.clone().run_reactive(cancel.clone()));

    bus.publish(FIREHOSE, &human_message("h1", "E2E_TEST_ABC hello"))
        .await
        .unwrap();

    let replied = wait_for(
        || {
            let bus = bus.clone();
            async move { bus.stream_len(INGEST).await >= 1 }
        },
        5_000,
    )
    .await;
    assert!(replied, "expected a bot reply on ingest");

    let tail = bus.tail_range(INGEST, 5).await.unwrap();
    let reply: ChatMessage = serde_json::from_str(&tail[0].data).unwrap();
    assert_eq!(reply.origin, Origin::Bot);
    assert_eq!(reply.room_id, "room:demo");
    assert!(reply.content.contains("E2E_TEST_"));
    assert_eq!(
        reply.trace.as_ref().unwrap().producer.as_deref(),
        Some("persona_worker")
    );
    assert!(!reply.content.contains('\n'));

    let stats = chorus_worker::http::snapshot(&service).await;
    assert_eq!(stats["decisions_by_reason"]["e2e_forced"], 1);
    assert_eq!(stats["messages_published"], 1);

    cancel.cancel();
    let _ = loop_task.await;
}

#[tokio::test]
async fn test_policy_probe_reasons() {
    let bus = Arc::new(InProcessBus::new());
    let service = build_service(bus.clone(), false, false).await;

    let cancel = CancellationToken::new();
    let loop_task = tokio::spawn(service.clone().run_reactive(cancel.clone()));

    // Bot-origin first: suppressed.
    bus.publish(FIREHOSE, &bot_message("b1", "E2E_TEST_POLICY_X BOT_ORIGIN"))
        .await
        .unwrap();
    // Forced human marker: posts and starts the cooldown clock.
    bus.publish(FIREHOSE, &human_message("h1", "E2E_TEST_POLICY_Y forced"))
        .await
        .unwrap();
    // Rapid plain human message inside the cooldown window.
    bus.publish(FIREHOSE, &human_message("h2", "quick follow-up"))
        .await
        .unwrap();

    let done = wait_for(
        || {
            let service = service.clone();
            async move {
                let stats = service.stats.lock().await;
                stats.messages_consumed >= 3
            }
        },
        5_000,
    )
    .await;
    assert!(done, "worker should consume all three messages");
    // Give the forced reply's publish a moment to land.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stats = chorus_worker::http::snapshot(&service).await;
    let reasons = &stats["decisions_by_reason"];
    assert_eq!(reasons["bot_origin"], 1);
    assert_eq!(reasons["e2e_forced"], 1);
    assert_eq!(reasons["cooldown"], 1);
    assert_eq!(stats["messages_published"], 1);

    cancel.cancel();
    let _ = loop_task.await;
}

#[tokio::test]
async fn test_duplicate_firehose_delivery_is_idempotent() {
    let bus = Arc::new(InProcessBus::new());
    let service = build_service(bus.clone(), false, false).await;

    let cancel = CancellationToken::new();
    let loop_task = tokio::spawn(service.clone().run_reactive(cancel.clone()));

    let payload = human_message("h1", "E2E_TEST_DUP once");
    bus.publish(FIREHOSE, &payload).await.unwrap();
    bus.publish(FIREHOSE, &payload).await.unwrap();

    wait_for(
        || {
            let service = service.clone();
            async move { service.stats.lock().await.messages_consumed >= 2 }
        },
        5_000,
    )
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // One reply despite two deliveries of the same id.
    assert_eq!(bus.stream_len(INGEST).await, 1);
    let stats = chorus_worker::http::snapshot(&service).await;
    assert_eq!(stats["messages_deduped"], 1);

    cancel.cancel();
    let _ = loop_task.await;
}

#[tokio::test]
async fn test_auto_commentary_reacts_to_observation_without_leaking() {
    let bus = Arc::new(InProcessBus::new());
    let service = build_service(bus.clone(), true, false).await;

    let cancel = CancellationToken::new();
    let loop_task = tokio::spawn(service.clone().run_auto(cancel.clone()));

    bus.publish(OBSERVATIONS, &observation("obs1", "lava rises!!! @ClipGoblin", 0.95))
        .await
        .unwrap();

    let replied = wait_for(
        || {
            let bus = bus.clone();
            async move { bus.stream_len(INGEST).await >= 1 }
        },
        5_000,
    )
    .await;
    assert!(replied, "expected an auto commentary reply");

    let tail = bus.tail_range(INGEST, 5).await.unwrap();
    let reply: ChatMessage = serde_json::from_str(&tail[0].data).unwrap();
    assert_eq!(reply.origin, Origin::Bot);
    assert!(!reply.content.is_empty());
    assert!(!reply.content.contains("OBS:"));
    assert!(!reply.content.contains("2026-"));
    assert_eq!(
        reply.trace.as_ref().unwrap().producer.as_deref(),
        Some("persona_worker_auto")
    );

    let stats = chorus_worker::http::snapshot(&service).await;
    assert_eq!(stats["observations_received"], 1);
    assert_eq!(stats["auto_messages_published"], 1);

    cancel.cancel();
    let _ = loop_task.await;
}

#[tokio::test]
async fn test_memory_write_then_read() {
    let bus = Arc::new(InProcessBus::new());
    let service = build_service(bus.clone(), false, true).await;

    let cancel = CancellationToken::new();
    let loop_task = tokio::spawn(service.clone().run_reactive(cancel.clone()));

    bus.publish(
        FIREHOSE,
        &human_message("h1", "remember: the streamer is called Captain"),
    )
    .await
    .unwrap();

    let written = wait_for(
        || {
            let service = service.clone();
            async move {
                let stats = chorus_worker::http::snapshot(&service).await;
                stats["memory_writes_accepted"].as_u64().unwrap_or(0) >= 1
            }
        },
        5_000,
    )
    .await;
    assert!(written, "remember message should write a memory item");

    // A forced follow-up question makes the persona post, which reads memory.
    bus.publish(FIREHOSE, &human_message("h2", "E2E_TEST_MEM who is Captain?"))
        .await
        .unwrap();

    let read = wait_for(
        || {
            let service = service.clone();
            async move {
                let stats = chorus_worker::http::snapshot(&service).await;
                stats["memory_reads_succeeded"].as_u64().unwrap_or(0) >= 1
            }
        },
        5_000,
    )
    .await;
    assert!(read, "reply generation should read memory");

    let stats = chorus_worker::http::snapshot(&service).await;
    assert!(stats["memory_items_total"].as_u64().unwrap() >= 1);
    assert_eq!(stats["memory_enabled"], true);
    // The remember write landed in the room scope for the target persona.
    assert_eq!(
        stats["memory_items_by_scope"]["room:room:demo|agent:clip_goblin"],
        1
    );

    cancel.cancel();
    let _ = loop_task.await;
}

#[tokio::test]
async fn test_worker_with_no_enabled_personas_stays_idle() {
    let bus = Arc::new(InProcessBus::new());
    bus.ensure_group(FIREHOSE, "persona_workers", GroupStart::Beginning)
        .await
        .unwrap();

    let settings = WorkerSettings::from_env_with(|_| None);
    let service = Arc::new(PersonaWorkerService::new(
        settings,
        room_config(),
        Default::default(),
        AutoCommentaryConfig::default(),
        bus.clone(),
        Arc::new(DeterministicProvider::new()),
        None,
        Arc::new(SystemClock),
    ));

    let cancel = CancellationToken::new();
    let loop_task = tokio::spawn(service.clone().run_reactive(cancel.clone()));

    bus.publish(FIREHOSE, &human_message("h1", "E2E_TEST_IDLE hello"))
        .await
        .unwrap();

    wait_for(
        || {
            let service = service.clone();
            async move { service.stats.lock().await.messages_consumed >= 1 }
        },
        5_000,
    )
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Healthy and consuming, but never posting.
    assert_eq!(bus.stream_len(INGEST).await, 0);

    cancel.cancel();
    let _ = loop_task.await;
}
