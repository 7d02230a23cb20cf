//! Worker HTTP surface: `/healthz` and `/stats`.

use crate::service::PersonaWorkerService;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub fn router(service: Arc<PersonaWorkerService>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/stats", get(stats))
        .with_state(service)
}

async fn healthz(State(service): State<Arc<PersonaWorkerService>>) -> Response {
    let healthy =
        !service.transport.degraded() && service.group_joined.load(Ordering::Relaxed);
    if healthy {
        Json(json!({"status": "ok"})).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "degraded"})),
        )
            .into_response()
    }
}

async fn stats(State(service): State<Arc<PersonaWorkerService>>) -> Json<serde_json::Value> {
    Json(snapshot(&service).await)
}

/// Build the full stats document. Shared with tests.
pub async fn snapshot(service: &PersonaWorkerService) -> serde_json::Value {
    // Lock order matches the service loops: state before stats.
    let observations_buffered = service.state.lock().await.observations_total();
    let stats = service.stats.lock().await;

    let mut doc = json!({
        "room_id": service.room.room_id,
        "enabled_personas": service.enabled_personas(),
        "messages_consumed": stats.messages_consumed,
        "messages_deduped": stats.messages_deduped,
        "messages_published": stats.messages_published,
        "decisions_by_reason": stats.decisions_by_reason.clone(),
        "last_decision_reasons": stats.last_decision_reasons.clone(),
        "recent_decisions": stats.recent_decisions.clone(),
        "generation_mode": service.provider.name(),
        "llm_model": service.provider.model(),
        "generation_failures": stats.generation_failures,
        "observations_received": stats.observations_received,
        "observations_invalid": stats.observations_invalid,
        "observations_dropped_old": stats.observations_dropped_old,
        "observations_buffered_total": observations_buffered,
        "auto_commentary_enabled": service.auto_cfg.enabled,
        "auto_obs_seen": stats.auto_obs_seen,
        "auto_obs_interesting": stats.auto_obs_interesting,
        "auto_messages_attempted": stats.auto_messages_attempted,
        "auto_messages_published": stats.auto_messages_published,
        "auto_suppressed_cooldown": stats.auto_suppressed_cooldown,
        "auto_suppressed_room_rate": stats.auto_suppressed_room_rate,
        "auto_suppressed_dedupe": stats.auto_suppressed_dedupe,
        "auto_generation_failed": stats.auto_generation_failed,
        "reflection_cycles": stats.reflection_cycles,
        "reflection_items_written": stats.reflection_items_written,
        "memory_enabled": service.memory.is_some(),
    });

    if let Some(pipeline) = &service.memory {
        let counters = &pipeline.adapter().counters;
        doc["memory_items_total"] = json!(pipeline.adapter().total().await);
        doc["memory_items_by_scope"] = json!(pipeline.adapter().counts_by_namespace().await);
        doc["memory_scope_user_enabled"] = json!(service.settings.memory_scope_user_enabled);
        doc["memory_degraded"] = json!(pipeline.adapter().degraded());
        doc["memory_reads_attempted"] =
            json!(counters.reads_attempted.load(Ordering::Relaxed));
        doc["memory_reads_succeeded"] =
            json!(counters.reads_succeeded.load(Ordering::Relaxed));
        doc["memory_reads_failed"] = json!(counters.reads_failed.load(Ordering::Relaxed));
        doc["memory_writes_attempted"] =
            json!(counters.writes_attempted.load(Ordering::Relaxed));
        doc["memory_writes_accepted"] =
            json!(counters.writes_accepted.load(Ordering::Relaxed));
        doc["memory_writes_rejected"] =
            json!(counters.writes_rejected.load(Ordering::Relaxed));
        doc["memory_writes_redacted"] =
            json!(counters.writes_redacted.load(Ordering::Relaxed));
        doc["memory_writes_failed"] = json!(counters.writes_failed.load(Ordering::Relaxed));
    } else {
        doc["memory_items_total"] = json!(0);
        doc["memory_items_by_scope"] = json!({});
        doc["memory_reads_succeeded"] = json!(0);
        doc["memory_writes_accepted"] = json!(0);
    }
    doc
}
