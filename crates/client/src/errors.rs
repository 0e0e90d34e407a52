use thiserror::Error;
use unilink_chain::ChainError;
use unilink_db::DbError;
use unilink_primitives::{Buf32, ChainRef};
use unilink_rpc_pool::PoolError;
use unilink_signer::SignerError;
use unilink_uchain::UniversalClientError;

/// Errors starting or running a chain client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Universal(#[from] UniversalClientError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    /// The signer produced nothing within the wait budget, on both the
    /// pending-nonce and the finalized-nonce attempt.
    #[error("no signature for outbound {0} within the wait budget")]
    SignatureTimeout(Buf32),

    /// The broadcasted tx never became observable on the destination.
    #[error("outbound tx {0} not observed on destination chain")]
    NotObserved(String),

    #[error("chain {0} is disabled in the registry")]
    ChainDisabled(ChainRef),

    #[error("chain {0} is not of a supported family")]
    UnsupportedFamily(ChainRef),
}
