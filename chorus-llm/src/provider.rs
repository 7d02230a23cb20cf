//! The provider seam.

use crate::error::LlmError;
use crate::types::{ReplyRequest, ReplyResponse};
use async_trait::async_trait;

/// Produces a single chat line for a persona.
///
/// Implementations must return already-bounded single-line text or an error;
/// callers treat an empty `text` as "drop the post" (`reason=gen_empty`).
#[async_trait]
pub trait ReplyProvider: Send + Sync {
    async fn generate(&self, req: &ReplyRequest) -> Result<ReplyResponse, LlmError>;

    /// Short name for `/stats`.
    fn name(&self) -> &'static str;

    /// Model identifier when one applies.
    fn model(&self) -> Option<String> {
        None
    }
}
