//! Group reads with validation folded in.
//!
//! Per the bus contract, records are parsed and validated inside the adapter:
//! entries that fail schema validation are acked and counted, and never
//! surface to callers.

use crate::error::BusError;
use crate::transport::BusTransport;
use chorus_core::schema::{SchemaRegistry, ValidatedRecord};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct ValidatingReader {
    transport: Arc<dyn BusTransport>,
    registry: SchemaRegistry,
    stream: String,
    group: String,
    consumer: String,
    invalid_dropped: AtomicU64,
}

impl ValidatingReader {
    pub fn new(
        transport: Arc<dyn BusTransport>,
        registry: SchemaRegistry,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            registry,
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
            invalid_dropped: AtomicU64::new(0),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn invalid_dropped(&self) -> u64 {
        self.invalid_dropped.load(Ordering::Relaxed)
    }

    /// Read the next batch of valid records. Invalid payloads are acked and
    /// dropped here with a counter increment.
    pub async fn next_batch(
        &self,
        max: usize,
        block_ms: u64,
    ) -> Result<Vec<(String, ValidatedRecord)>, BusError> {
        let entries = self
            .transport
            .group_read(&self.stream, &self.group, &self.consumer, max, block_ms)
            .await?;

        let mut batch = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.registry.validate_str(&entry.data) {
                Ok(record) => batch.push((entry.entry_id, record)),
                Err(err) => {
                    self.invalid_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        stream = %self.stream,
                        entry_id = %entry.entry_id,
                        kind = err.kind(),
                        error = %err,
                        "dropping invalid record"
                    );
                    self.transport
                        .ack(&self.stream, &self.group, &entry.entry_id)
                        .await?;
                }
            }
        }
        Ok(batch)
    }

    pub async fn ack(&self, entry_id: &str) -> Result<(), BusError> {
        self.transport.ack(&self.stream, &self.group, entry_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InProcessBus;
    use crate::transport::GroupStart;
    use serde_json::json;

    fn chat_json(id: &str) -> String {
        json!({
            "schema_name": "ChatMessage",
            "schema_version": "1.0.0",
            "id": id,
            "ts": "2026-01-05T12:00:00Z",
            "room_id": "room:demo",
            "origin": "human",
            "user_id": "u1",
            "display_name": "U1",
            "content": "hi"
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_valid_records_surface_invalid_are_dropped() {
        let bus = Arc::new(InProcessBus::new());
        bus.ensure_group("ingest", "gw", GroupStart::Beginning)
            .await
            .unwrap();
        bus.publish("ingest", &chat_json("a")).await.unwrap();
        bus.publish("ingest", "{broken").await.unwrap();
        bus.publish("ingest", &chat_json("b")).await.unwrap();

        let reader = ValidatingReader::new(
            bus.clone(),
            SchemaRegistry::new(),
            "ingest",
            "gw",
            "c1",
        );
        let batch = reader.next_batch(10, 0).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].1.id(), "a");
        assert_eq!(batch[1].1.id(), "b");
        assert_eq!(reader.invalid_dropped(), 1);

        // The invalid entry was acked inside the reader.
        for (entry_id, _) in &batch {
            reader.ack(entry_id).await.unwrap();
        }
        assert_eq!(bus.pending_count("ingest", "gw").await, 0);
    }
}
