use serde::{Deserialize, Serialize};
use unilink_primitives::ChainRef;

use crate::gateway::TxType;

/// A validator vote asserting an inbound observation.
///
/// Idempotent on the universal chain by `(source_chain, tx_hash, log_index)`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InboundVote {
    pub source_chain: ChainRef,
    pub tx_hash: String,
    pub sender: String,
    /// uint256 as a decimal string.
    pub amount: String,
    pub asset_addr: String,
    pub log_index: u64,
    pub tx_type: TxType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universal_payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub verification_data: String,
}

/// A validator vote asserting the destination-chain outcome of an outbound.
///
/// Idempotent on the universal chain by `(universal_tx_id, tx_id)`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OutboundObservation {
    pub success: bool,
    pub block_height: u64,
    pub tx_hash: String,
    pub error_msg: String,
}

/// A destination-chain gas price sample; the universal chain aggregates
/// these into a weighted median.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct GasPriceVote {
    pub chain: ChainRef,
    pub price: u128,
    pub block_number: u64,
}
