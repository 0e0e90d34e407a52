use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use unilink_primitives::{Buf32, ChainRef};

/// An outbound action created on the universal chain, waiting to be settled
/// on its destination chain.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UniversalOutbound {
    pub tx_id: Buf32,
    pub universal_tx_id: Buf32,
    pub destination_chain: ChainRef,
    /// Destination-native recipient encoding (0x address or base58).
    pub recipient: String,
    pub amount: U256,
    /// Optional call data, 0x hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    pub gas_limit: u64,
}

/// The exact bytes to be signed for an outbound, plus the reserved nonce.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OutboundSigningRequest {
    pub signing_hash: Buf32,
    pub nonce: u64,
    pub gas_price: u128,
}

/// A threshold signature as produced by the external signing service.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSignature {
    /// 64-byte r||s (EVM) or ed25519 signature (SVM), hex encoded on the
    /// wire.
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
    pub recovery_id: u8,
}

impl ThresholdSignature {
    /// Splits into the (r, s) halves; errors are a signer-contract
    /// violation surfaced by the caller.
    pub fn r_s(&self) -> Option<([u8; 32], [u8; 32])> {
        if self.signature.len() != 64 {
            return None;
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&self.signature[..32]);
        s.copy_from_slice(&self.signature[32..]);
        Some((r, s))
    }
}

/// A fully assembled outbound transaction, ready for broadcast bookkeeping.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct OutboundResult {
    /// Raw signed transaction bytes as submitted to the destination chain.
    pub raw_tx: Vec<u8>,
    pub signing_hash: Buf32,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub chain_id: u64,
    /// Recent blockhash the message was bound to (SVM only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockhash: Option<String>,
}
