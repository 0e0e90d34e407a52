use thiserror::Error;
use unilink_common::RetryableError;

/// Errors from pool construction, selection and probing.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// No endpoint is currently in a usable state. Callers typically retry
    /// after a short sleep.
    #[error("no healthy endpoints available")]
    NoHealthyEndpoints,

    #[error("only {healthy} endpoints usable at startup, need {required}")]
    InsufficientEndpoints { healthy: u32, required: u32 },

    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("building client for {url}: {reason}")]
    ClientBuild { url: String, reason: String },

    #[error("health probe failed: {0}")]
    Probe(String),
}

impl RetryableError for PoolError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::NoHealthyEndpoints | Self::Probe(_))
    }
}
