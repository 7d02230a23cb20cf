//! chorus-gateway - Moderation-stamped broadcaster for Chorus
//!
//! Bridges the ingest stream to WebSocket subscribers and republishes the
//! authoritative record on the firehose stream:
//! - `GET /healthz` - 200 once the bus is reachable and the group is joined
//! - `GET /stats`   - pipeline and per-connection counters
//! - `GET /ws`      - subscribe with `{"type":"subscribe","room_id":...}`

pub mod pump;
pub mod settings;
pub mod stats;
pub mod ws;

pub use pump::IngestPump;
pub use settings::GatewaySettings;
pub use stats::GatewayStats;
pub use ws::WsManager;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chorus_bus::BusTransport;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Shared state across handlers.
#[derive(Clone)]
pub struct AppState {
    pub ws: Arc<WsManager>,
    pub stats: Arc<GatewayStats>,
    pub transport: Arc<dyn BusTransport>,
    pub default_room: String,
    pub subscribe_timeout: Duration,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/stats", get(stats_endpoint))
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> Response {
    let healthy =
        !state.transport.degraded() && state.stats.group_joined.load(Ordering::Relaxed);
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

async fn stats_endpoint(State(state): State<AppState>) -> Json<serde_json::Value> {
    let s = &state.stats;
    Json(json!({
        "messages_consumed": s.messages_consumed.load(Ordering::Relaxed),
        "messages_broadcast": s.messages_broadcast.load(Ordering::Relaxed),
        "messages_dropped": s.messages_dropped.load(Ordering::Relaxed),
        "messages_deduped": s.messages_deduped.load(Ordering::Relaxed),
        "schema_invalid": s.schema_invalid.load(Ordering::Relaxed),
        "safety_redacted": s.safety_redacted.load(Ordering::Relaxed),
        "active_ws_connections": state.ws.active_connections(),
        "ws_dropped_total": state.ws.total_dropped(),
        "clients": state.ws.client_stats(),
    }))
}

#[derive(Debug, Deserialize)]
struct SubscribeFrame {
    #[serde(rename = "type")]
    kind: String,
    room_id: String,
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    // First frame should be a subscribe; fall back to the default room on
    // timeout or anything unparseable, matching the original gateway.
    let room_id = match tokio::time::timeout(state.subscribe_timeout, socket.recv()).await {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str::<SubscribeFrame>(&text)
            .ok()
            .filter(|f| f.kind == "subscribe" && !f.room_id.is_empty())
            .map(|f| f.room_id)
            .unwrap_or_else(|| state.default_room.clone()),
        Ok(None) | Ok(Some(Err(_))) => return,
        _ => state.default_room.clone(),
    };

    let ack = json!({"type": "subscribed", "room_id": room_id}).to_string();
    if socket.send(Message::Text(ack.into())).await.is_err() {
        return;
    }

    let handle = state.ws.subscribe(&room_id);
    loop {
        tokio::select! {
            _ = handle.wait() => {
                for payload in handle.drain() {
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        state.ws.disconnect(&handle);
                        return;
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Inbound frames are ignored; chat goes through ingest.
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => {
                        state.ws.disconnect(&handle);
                        return;
                    }
                }
            }
        }
    }
}
