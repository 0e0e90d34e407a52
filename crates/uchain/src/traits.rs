use async_trait::async_trait;
use thiserror::Error;
use unilink_common::{RetryableError, RetryError};
use unilink_primitives::{Buf32, ChainRef};
use unilink_types::{
    ChainRegistryEntry, GasPriceVote, InboundVote, OutboundObservation, UniversalOutbound,
};

/// Errors that can occur when interacting with the universal chain.
#[derive(Debug, Error)]
pub enum UniversalClientError {
    /// Network-related error occurred.
    #[error("network error: {0}")]
    Network(String),

    /// RPC call failed.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// The consensus layer rejected the vote; the event stays queued.
    #[error("vote rejected: {0}")]
    VoteRejected(String),

    /// Registry thresholds that cannot be acted on.
    #[error("invalid registry entry for {chain}: fast {fast} / standard {standard}")]
    InvalidRegistry {
        chain: ChainRef,
        fast: u64,
        standard: u64,
    },

    /// Shutdown triggered mid-call.
    #[error("canceled")]
    Canceled,
}

impl UniversalClientError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Creates an RPC error.
    pub fn rpc(msg: impl Into<String>) -> Self {
        Self::Rpc(msg.into())
    }
}

impl RetryableError for UniversalClientError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Rpc(_))
    }
}

impl From<RetryError<UniversalClientError>> for UniversalClientError {
    fn from(err: RetryError<UniversalClientError>) -> Self {
        match err {
            RetryError::Exhausted { .. } => Self::Rpc(err.to_string()),
            RetryError::Permanent { source, .. } => source,
            RetryError::Canceled { .. } => Self::Canceled,
        }
    }
}

/// Client interface for the universal chain.
///
/// Vote submissions are idempotent on-chain: inbound by
/// `(source_chain, tx_hash, log_index)`, outbound by
/// `(universal_tx_id, tx_id)`. All submissions return the vote tx hash.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait UniversalClient: Send + Sync {
    async fn vote_inbound(&self, vote: InboundVote) -> Result<String, UniversalClientError>;

    async fn vote_outbound(
        &self,
        universal_tx_id: Buf32,
        tx_id: Buf32,
        observation: OutboundObservation,
    ) -> Result<String, UniversalClientError>;

    async fn vote_gas_price(&self, vote: GasPriceVote) -> Result<String, UniversalClientError>;

    /// Registry view of one external chain (thresholds, gateway address,
    /// enabled flag).
    async fn chain_registry(
        &self,
        chain: &ChainRef,
    ) -> Result<ChainRegistryEntry, UniversalClientError>;

    /// Whether this signer id is in the active validator set.
    async fn is_validator(&self, signer_id: &str) -> Result<bool, UniversalClientError>;

    /// Outbound actions created on the universal chain that still need a
    /// destination-chain settlement from this validator.
    async fn pending_outbounds(
        &self,
        chain: &ChainRef,
    ) -> Result<Vec<UniversalOutbound>, UniversalClientError>;
}

/// Registry lookup with sanity checks.
///
/// This is a checked version of [`UniversalClient::chain_registry`] that
/// validates both thresholds are non-zero and fast does not exceed
/// standard.
pub async fn chain_registry_checked(
    client: &impl UniversalClient,
    chain: &ChainRef,
) -> Result<ChainRegistryEntry, UniversalClientError> {
    let entry = client.chain_registry(chain).await?;
    if entry.fast_inbound == 0
        || entry.standard_inbound == 0
        || entry.fast_inbound > entry.standard_inbound
    {
        return Err(UniversalClientError::InvalidRegistry {
            chain: chain.clone(),
            fast: entry.fast_inbound,
            standard: entry.standard_inbound,
        });
    }
    Ok(entry)
}
