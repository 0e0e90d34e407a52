use thiserror::Error;
use unilink_common::RetryableError;
use unilink_rpc_pool::PoolError;

/// Errors from chain adapters and outbound builders.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("rpc: {0}")]
    Rpc(String),

    #[error("rpc call {0} timed out")]
    Timeout(String),

    /// Malformed on-chain data; terminal for the affected item.
    #[error("decode: {0}")]
    Decode(String),

    /// Bad address/amount/payload in an outbound request; terminal.
    #[error("invalid outbound request: {0}")]
    InvalidRequest(String),

    /// The signer handed back something that does not fit the request.
    #[error("signature mismatch: {0}")]
    SignatureMismatch(String),

    /// An unsigned tx this builder does not remember preparing.
    #[error("unknown signing request: {0}")]
    UnknownSigningRequest(String),
}

impl ChainError {
    pub fn rpc(err: impl std::fmt::Display) -> Self {
        Self::Rpc(err.to_string())
    }

    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }
}

impl RetryableError for ChainError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Pool(err) => err.is_retryable(),
            Self::Rpc(_) | Self::Timeout(_) => true,
            Self::Decode(_)
            | Self::InvalidRequest(_)
            | Self::SignatureMismatch(_)
            | Self::UnknownSigningRequest(_) => false,
        }
    }
}
