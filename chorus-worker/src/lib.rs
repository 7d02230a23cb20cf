//! chorus-worker - Persona workers for Chorus
//!
//! Each worker process serves one room: a reactive loop consuming the
//! firehose, an auto-commentary loop consuming observations, and a slow
//! reflection loop, all publishing back through the ingest stream so the
//! gateway treats bot output exactly like human input.

pub mod auto;
pub mod http;
pub mod memory_pipeline;
pub mod reflection;
pub mod service;
pub mod settings;
pub mod state;
pub mod stats;

pub use auto::AutoCommentaryConfig;
pub use memory_pipeline::MemoryPipeline;
pub use service::{PersonaWorkerService, PRODUCER_AUTO, PRODUCER_REACTIVE};
pub use settings::{ExtractStrategy, WorkerSettings};
pub use state::RuntimeState;
pub use stats::WorkerStats;
