//! chorus-memory - Scoped persona memory for Chorus
//!
//! Items live in policy-gated scopes: per-(room, persona) by default, plus a
//! room-independent persona scope and an optional per-user scope. Reads and
//! writes never cross their scope's namespace. Every operation degrades
//! gracefully: a failing backend yields empty results and a degraded flag,
//! never a crashed worker.

pub mod adapter;
pub mod item;
pub mod policy;
pub mod redaction;
pub mod scope;
pub mod store;
pub mod stub;

pub use adapter::{MemoryAdapter, MemoryCounters, WriteOutcome};
pub use item::{Confidence, MemoryCategory, MemoryItem, MemorySource};
pub use policy::MemoryPolicy;
pub use redaction::{apply_redactions, contains_pii};
pub use scope::{read_namespaces, write_scope, MemoryScope};
pub use store::{namespace_for, MemoryError, MemoryStore};
pub use stub::InMemoryStore;
