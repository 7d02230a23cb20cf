//! Bus errors, split by whether the caller should retry.

use chorus_core::ReasonCode;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Connection or I/O trouble; retried with backoff, surfaced as degraded
    /// health while it lasts.
    #[error("transient bus error: {message}")]
    Transient { message: String },

    /// Unrecoverable setup problem (bad URL, missing rights). Services log
    /// and exit non-zero.
    #[error("fatal bus error: {message}")]
    Fatal { message: String },
}

impl BusError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Stable code for logs and counters.
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::Transient { .. } => ReasonCode::BusTransient,
            Self::Fatal { .. } => ReasonCode::BusFatal,
        }
    }
}

impl From<redis::RedisError> for BusError {
    fn from(err: redis::RedisError) -> Self {
        // Everything the server can recover from is transient; only malformed
        // client usage is fatal.
        if err.is_connection_refusal() || err.is_io_error() || err.is_timeout() {
            Self::transient(err.to_string())
        } else if err.is_unrecoverable_error() {
            Self::fatal(err.to_string())
        } else {
            Self::transient(err.to_string())
        }
    }
}
