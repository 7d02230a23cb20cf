//! Generator errors, categorized by whether they're retryable.

#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("generation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("provider error: {status} - {message}")]
    Http { status: u16, message: String },

    #[error("provider returned an unusable response: {message}")]
    InvalidResponse { message: String },

    #[error("missing API key (set LLM_API_KEY)")]
    MissingApiKey,

    #[error("provider configuration error: {message}")]
    Config { message: String },
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Stable code for telemetry counters.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "llm_timeout",
            Self::Http { .. } | Self::InvalidResponse { .. } => "llm_error",
            Self::MissingApiKey | Self::Config { .. } => "llm_config",
        }
    }
}
