use async_trait::async_trait;
use tokio::sync::mpsc;
use unilink_common::Shutdown;
use unilink_types::{OutboundSigningRequest, ThresholdSignature, UniversalOutbound};

use crate::{errors::ChainError, observation::GatewayObservation};

/// Chain-family-specific gateway operations.
///
/// Implementations route every call through the chain's endpoint pool and
/// feed request outcomes back into its metrics.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait GatewayOperations: Send + Sync {
    /// Best-available chain tip (finalized or latest per configuration).
    async fn latest_block(&self) -> Result<u64, ChainError>;

    /// Streams gateway logs from `from_block` until shutdown.
    ///
    /// Short reorgs are tolerated by replaying a window behind the cursor;
    /// consumers dedupe via the store's idempotent insert.
    async fn watch_gateway_events(
        &self,
        from_block: u64,
        shutdown: Shutdown,
    ) -> Result<mpsc::Receiver<GatewayObservation>, ChainError>;

    /// Confirmation depth of a tx; 0 when not found or not yet mined.
    async fn transaction_confirmations(&self, tx_hash: &str) -> Result<u64, ChainError>;

    /// Convenience: whether the tx has at least `required` confirmations.
    async fn is_confirmed(&self, tx_hash: &str, required: u64) -> Result<bool, ChainError> {
        Ok(self.transaction_confirmations(tx_hash).await? >= required)
    }
}

/// Destination-chain verification outcome of a broadcasted outbound.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BroadcastVerification {
    pub found: bool,
    pub confirmations: u64,
    /// Block (or slot) the tx landed in; only meaningful when `found`.
    pub block_height: u64,
    /// Execution status; only meaningful when `found`.
    pub success: Option<bool>,
}

/// Per-destination-chain outbound transaction builder.
///
/// Nonces are consumed strictly in ascending order per signer; the builder
/// is driven by a single consumer per signer.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait OutboundTxBuilder: Send + Sync {
    /// Reads the signer's account nonce. `use_finalized` reads the
    /// finalized-block nonce, used to aggressively replace stuck txs.
    async fn next_nonce(&self, signer: &str, use_finalized: bool) -> Result<u64, ChainError>;

    /// Constructs the unsigned tx and the exact bytes to sign.
    async fn outbound_signing_request(
        &self,
        event: &UniversalOutbound,
        gas_price: u128,
        nonce: u64,
    ) -> Result<OutboundSigningRequest, ChainError>;

    /// Stitches the signature onto the unsigned tx and submits it.
    async fn broadcast_signed(
        &self,
        request: &OutboundSigningRequest,
        event: &UniversalOutbound,
        signature: &ThresholdSignature,
    ) -> Result<String, ChainError>;

    /// Polls the destination chain for the broadcasted tx.
    async fn verify_broadcasted(&self, tx_hash: &str) -> Result<BroadcastVerification, ChainError>;

    /// Current destination-chain gas price (wei or lamport-priority fee).
    async fn gas_price(&self) -> Result<u128, ChainError>;
}
