//! The broadcaster core: ingest -> validate -> safety -> stamp -> fan out ->
//! firehose -> ack.
//!
//! The pump is the source of firehose truth. Every firehose record is an
//! accepted ingest record with the same `id`; duplicates are acked without
//! re-broadcast via a bounded id cache.

use crate::stats::GatewayStats;
use crate::ws::WsManager;
use chorus_bus::{BusError, BusTransport, GroupStart, ValidatingReader};
use chorus_core::dedupe::DedupeCache;
use chorus_core::message::{ChatMessage, TraceMeta};
use chorus_core::safety::SafetyFilter;
use chorus_core::schema::{SchemaRegistry, ValidatedRecord};
use chorus_core::{Clock, SystemClock};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub const GATEWAY_PROCESSOR: &str = "chat_gateway";

pub struct IngestPump {
    transport: Arc<dyn BusTransport>,
    reader: ValidatingReader,
    safety: SafetyFilter,
    ws: Arc<WsManager>,
    stats: Arc<GatewayStats>,
    clock: Arc<dyn Clock>,
    firehose_stream: String,
    ingest_stream: String,
    group: String,
    dedupe: Mutex<DedupeCache>,
}

impl IngestPump {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn BusTransport>,
        safety: SafetyFilter,
        ws: Arc<WsManager>,
        stats: Arc<GatewayStats>,
        ingest_stream: &str,
        firehose_stream: &str,
        group: &str,
        consumer: &str,
        dedupe_capacity: usize,
    ) -> Self {
        let reader = ValidatingReader::new(
            transport.clone(),
            SchemaRegistry::new(),
            ingest_stream,
            group,
            consumer,
        );
        Self {
            transport,
            reader,
            safety,
            ws,
            stats,
            clock: Arc::new(SystemClock),
            firehose_stream: firehose_stream.to_string(),
            ingest_stream: ingest_stream.to_string(),
            group: group.to_string(),
            dedupe: Mutex::new(DedupeCache::new(dedupe_capacity)),
        }
    }

    /// Join the consumer group and pump until cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), BusError> {
        self.transport
            .ensure_group(&self.ingest_stream, &self.group, GroupStart::Beginning)
            .await?;
        self.stats.group_joined.store(true, Ordering::Relaxed);
        tracing::info!(stream = %self.ingest_stream, group = %self.group, "ingest pump started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("ingest pump stopping");
                    return Ok(());
                }
                batch = self.reader.next_batch(50, 1_000) => {
                    match batch {
                        Ok(entries) => {
                            for (entry_id, record) in entries {
                                self.handle_record(&entry_id, record).await;
                            }
                            self.stats.schema_invalid.store(
                                self.reader.invalid_dropped(),
                                Ordering::Relaxed,
                            );
                        }
                        Err(e) if e.is_transient() => {
                            tracing::warn!(error = %e, "ingest read failed; backing off");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    async fn handle_record(&self, entry_id: &str, record: ValidatedRecord) {
        self.stats.messages_consumed.fetch_add(1, Ordering::Relaxed);

        let mut msg = match record {
            ValidatedRecord::Chat(msg) => msg,
            ValidatedRecord::Observation(obs) => {
                // Only chat belongs on ingest.
                tracing::warn!(id = %obs.id, "observation record on ingest stream; dropping");
                self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                self.ack(entry_id).await;
                return;
            }
        };

        if self.dedupe.lock().await.seen_before(&msg.id) {
            self.stats.messages_deduped.fetch_add(1, Ordering::Relaxed);
            self.ack(entry_id).await;
            return;
        }

        let Some(outcome) = self.safety.review(&msg.content) else {
            self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
            self.ack(entry_id).await;
            return;
        };
        if outcome.is_drop() {
            tracing::info!(id = %msg.id, code = %chorus_core::ReasonCode::SafetyDrop,
                reasons = ?outcome.meta.reasons, "message dropped by safety");
            self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
            self.ack(entry_id).await;
            return;
        }
        if outcome.meta.action == chorus_core::message::ModerationAction::Redact {
            self.stats.safety_redacted.fetch_add(1, Ordering::Relaxed);
        }
        msg.content = outcome.content.clone();
        msg.moderation = Some(outcome.meta);
        self.stamp_trace(&mut msg);

        match serde_json::to_string(&msg) {
            Ok(payload) => {
                self.ws.broadcast(&msg.room_id, &payload);
                self.stats.messages_broadcast.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.transport.publish(&self.firehose_stream, &payload).await {
                    tracing::warn!(error = %e, id = %msg.id, "firehose publish failed");
                    self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, id = %msg.id, "failed to serialize broadcast");
                self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.ack(entry_id).await;
    }

    /// Preserve `trace.producer` (default "unknown"), append ourselves to
    /// `processed_by`, set `gateway_ts` if missing.
    fn stamp_trace(&self, msg: &mut ChatMessage) {
        let trace = msg.trace.get_or_insert_with(TraceMeta::default);
        if trace.producer.as_deref().unwrap_or("").is_empty() {
            trace.producer = Some("unknown".to_string());
        }
        if !trace.processed_by.iter().any(|p| p == GATEWAY_PROCESSOR) {
            trace.processed_by.push(GATEWAY_PROCESSOR.to_string());
        }
        if trace.gateway_ts.is_none() {
            trace.gateway_ts = Some(self.clock.now());
        }
    }

    async fn ack(&self, entry_id: &str) {
        if let Err(e) = self.reader.ack(entry_id).await {
            tracing::warn!(error = %e, entry_id, "failed to ack ingest entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_bus::InProcessBus;
    use chorus_core::message::Origin;
    use serde_json::json;

    fn chat_json(id: &str, content: &str) -> String {
        json!({
            "schema_name": "ChatMessage",
            "schema_version": "1.0.0",
            "id": id,
            "ts": "2026-01-05T12:00:00Z",
            "room_id": "room:demo",
            "origin": "human",
            "user_id": "u1",
            "display_name": "U1",
            "content": content,
            "trace": {"producer": "stub_publisher"}
        })
        .to_string()
    }

    fn pump(bus: Arc<InProcessBus>, ws: Arc<WsManager>) -> (IngestPump, Arc<GatewayStats>) {
        let stats = Arc::new(GatewayStats::default());
        let pump = IngestPump::new(
            bus,
            SafetyFilter::new(200),
            ws,
            stats.clone(),
            "ingest",
            "firehose",
            "gw",
            "gw-0",
            128,
        );
        (pump, stats)
    }

    async fn run_pump_once(pump: &IngestPump) {
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            stop.cancel();
        });
        pump.run(cancel).await.unwrap();
    }

    #[tokio::test]
    async fn test_accepted_message_reaches_ws_and_firehose() {
        let bus = Arc::new(InProcessBus::new());
        let ws = Arc::new(WsManager::new(16));
        let client = ws.subscribe("room:demo");
        bus.publish("ingest", &chat_json("h1", "E2E_TEST_ABC hello"))
            .await
            .unwrap();

        let (pump, stats) = pump(bus.clone(), ws.clone());
        run_pump_once(&pump).await;

        // WS got it.
        let delivered = client.drain();
        assert_eq!(delivered.len(), 1);
        let msg: ChatMessage = serde_json::from_str(&delivered[0]).unwrap();
        assert_eq!(msg.id, "h1");
        assert_eq!(msg.origin, Origin::Human);

        // Firehose has the stamped record.
        let tail = bus.tail_range("firehose", 5).await.unwrap();
        assert_eq!(tail.len(), 1);
        let fh: ChatMessage = serde_json::from_str(&tail[0].data).unwrap();
        assert_eq!(fh.id, "h1");
        let trace = fh.trace.unwrap();
        assert_eq!(trace.producer.as_deref(), Some("stub_publisher"));
        assert!(trace.processed_by.contains(&"chat_gateway".to_string()));
        assert!(trace.gateway_ts.is_some());

        assert_eq!(stats.messages_broadcast.load(Ordering::Relaxed), 1);
        assert_eq!(bus.pending_count("ingest", "gw").await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_ingest_yields_single_firehose_record() {
        let bus = Arc::new(InProcessBus::new());
        let ws = Arc::new(WsManager::new(16));
        bus.publish("ingest", &chat_json("h1", "hello")).await.unwrap();
        bus.publish("ingest", &chat_json("h1", "hello")).await.unwrap();

        let (pump, stats) = pump(bus.clone(), ws);
        run_pump_once(&pump).await;

        assert_eq!(bus.stream_len("firehose").await, 1);
        assert_eq!(stats.messages_deduped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_invalid_payload_counted_not_broadcast() {
        let bus = Arc::new(InProcessBus::new());
        let ws = Arc::new(WsManager::new(16));
        bus.publish("ingest", "{malformed").await.unwrap();

        let (pump, stats) = pump(bus.clone(), ws);
        run_pump_once(&pump).await;

        assert_eq!(bus.stream_len("firehose").await, 0);
        assert_eq!(stats.schema_invalid.load(Ordering::Relaxed), 1);
        assert_eq!(bus.pending_count("ingest", "gw").await, 0);
    }

    #[tokio::test]
    async fn test_trace_defaults_for_untraced_message() {
        let bus = Arc::new(InProcessBus::new());
        let ws = Arc::new(WsManager::new(16));
        let raw = json!({
            "schema_name": "ChatMessage",
            "schema_version": "1.0.0",
            "id": "h9",
            "ts": "2026-01-05T12:00:00Z",
            "room_id": "room:demo",
            "origin": "human",
            "user_id": "u1",
            "display_name": "U1",
            "content": "no trace here"
        })
        .to_string();
        bus.publish("ingest", &raw).await.unwrap();

        let (pump, _) = pump(bus.clone(), ws);
        run_pump_once(&pump).await;

        let tail = bus.tail_range("firehose", 1).await.unwrap();
        let fh: ChatMessage = serde_json::from_str(&tail[0].data).unwrap();
        let trace = fh.trace.unwrap();
        assert_eq!(trace.producer.as_deref(), Some("unknown"));
        assert_eq!(trace.processed_by, vec!["chat_gateway".to_string()]);
    }
}
