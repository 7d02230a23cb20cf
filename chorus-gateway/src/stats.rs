//! Gateway counters surfaced on `/stats`.

use std::sync::atomic::{AtomicBool, AtomicU64};

#[derive(Debug, Default)]
pub struct GatewayStats {
    pub messages_consumed: AtomicU64,
    pub messages_broadcast: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub messages_deduped: AtomicU64,
    pub schema_invalid: AtomicU64,
    pub safety_redacted: AtomicU64,
    pub group_joined: AtomicBool,
}
