//! chorus-core - Core domain logic for Chorus (no I/O deps)
//!
//! This crate contains the types, validation, and decision logic shared by the
//! gateway and the persona workers. It is intentionally free of I/O
//! dependencies so that every policy outcome can be reproduced in tests.

pub mod clock;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod message;
pub mod policy;
pub mod safety;
pub mod schema;
pub mod text;
pub mod window;

// Re-export main types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ConfigError, DriftKnob, DriftState, PersonaAnchor, PersonaConfig, RoomConfig, TimingConfig,
};
pub use dedupe::DedupeCache;
pub use error::ReasonCode;
pub use message::{
    ChatMessage, ModerationAction, ModerationMeta, Origin, StreamObservation, TraceMeta,
};
pub use policy::{
    Decision, DecisionReason, DecisionTags, PersonaSnapshot, PolicyConfig, PolicyContext,
    PolicyEngine, Verdict, WindowStats,
};
pub use safety::{SafetyFilter, SafetyOutcome};
pub use schema::{SchemaError, SchemaKey, SchemaRegistry, ValidatedRecord};
pub use window::{ChatWindow, ObservationBuffer, ObservationEntry};
