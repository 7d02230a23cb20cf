//! WebSocket fan-out with per-client bounded queues.
//!
//! Slow clients never block the ingest pump: each client owns a bounded
//! outbound queue and the oldest entries are evicted when it fills, with a
//! per-client dropped counter. Fan-out preserves broadcaster-accept order.

use serde::Serialize;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// One connected subscriber.
pub struct ClientHandle {
    pub client_id: u64,
    pub room_id: String,
    queue: Mutex<VecDeque<String>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl ClientHandle {
    fn new(client_id: u64, room_id: String, capacity: usize) -> Self {
        Self {
            client_id,
            room_id,
            queue: Mutex::new(VecDeque::new()),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue without blocking; evicts the oldest entry when full.
    fn push(&self, payload: &str) {
        {
            let mut queue = self.queue.lock().expect("client queue lock");
            if queue.len() >= self.capacity {
                queue.pop_front();
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if total == 1 || total % 1000 == 0 {
                    tracing::debug!(client_id = self.client_id,
                        code = %chorus_core::ReasonCode::ClientSlow,
                        total, "evicting oldest queued message");
                }
            }
            queue.push_back(payload.to_string());
        }
        self.notify.notify_one();
    }

    /// Drain everything currently queued, oldest first.
    pub fn drain(&self) -> Vec<String> {
        let mut queue = self.queue.lock().expect("client queue lock");
        queue.drain(..).collect()
    }

    /// Wait until at least one message is queued.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().expect("client queue lock").len()
    }
}

/// Per-connection counters for `/stats`.
#[derive(Debug, Serialize)]
pub struct ClientStats {
    pub client_id: u64,
    pub room_id: String,
    pub queued: usize,
    pub dropped: u64,
}

/// Registry of room subscriptions.
pub struct WsManager {
    rooms: Mutex<HashMap<String, Vec<Arc<ClientHandle>>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl WsManager {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn subscribe(&self, room_id: &str) -> Arc<ClientHandle> {
        let client_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(ClientHandle::new(
            client_id,
            room_id.to_string(),
            self.queue_capacity,
        ));
        self.rooms
            .lock()
            .expect("rooms lock")
            .entry(room_id.to_string())
            .or_default()
            .push(handle.clone());
        tracing::info!(client_id, room_id, "websocket subscribed");
        handle
    }

    pub fn disconnect(&self, handle: &Arc<ClientHandle>) {
        let mut rooms = self.rooms.lock().expect("rooms lock");
        if let Some(clients) = rooms.get_mut(&handle.room_id) {
            clients.retain(|c| c.client_id != handle.client_id);
            if clients.is_empty() {
                rooms.remove(&handle.room_id);
            }
        }
        tracing::info!(client_id = handle.client_id, room_id = %handle.room_id,
            "websocket disconnected");
    }

    /// Fan a broadcast payload out to every subscriber of the room. Returns
    /// how many clients it was queued for.
    pub fn broadcast(&self, room_id: &str, payload: &str) -> usize {
        let rooms = self.rooms.lock().expect("rooms lock");
        let Some(clients) = rooms.get(room_id) else {
            return 0;
        };
        for client in clients {
            client.push(payload);
        }
        clients.len()
    }

    pub fn active_connections(&self) -> usize {
        self.rooms
            .lock()
            .expect("rooms lock")
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn client_stats(&self) -> Vec<ClientStats> {
        let rooms = self.rooms.lock().expect("rooms lock");
        let mut stats: Vec<ClientStats> = rooms
            .values()
            .flatten()
            .map(|c| ClientStats {
                client_id: c.client_id,
                room_id: c.room_id.clone(),
                queued: c.queued(),
                dropped: c.dropped(),
            })
            .collect();
        stats.sort_by_key(|s| s.client_id);
        stats
    }

    /// Total messages evicted from slow-client queues.
    pub fn total_dropped(&self) -> u64 {
        self.rooms
            .lock()
            .expect("rooms lock")
            .values()
            .flatten()
            .map(|c| c.dropped())
            .sum()
    }
}
