use serde::{Deserialize, Serialize};
use unilink_primitives::ChainRef;

use crate::event::ConfirmationSpeed;

/// How inbound observations on this chain are verified on the universal
/// chain.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationType {
    /// Verification data is the normalized source tx hash.
    UniversalTx,
    /// Verification data is carried in the gateway payload.
    Payload,
}

/// Registry view of one external chain, as configured on the universal
/// chain.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChainRegistryEntry {
    pub chain: ChainRef,
    pub gateway_address: String,
    /// Confirmation depth for fast inbounds.
    pub fast_inbound: u64,
    /// Confirmation depth for standard inbounds.
    pub standard_inbound: u64,
    pub enabled: bool,
    /// Blocks after observation at which an unvoted event expires;
    /// 0 disables expiry.
    pub expiry_delta: u64,
    pub verification: VerificationType,
}

impl ChainRegistryEntry {
    /// Resolves the confirmation threshold for a speed class.
    ///
    /// Thresholds only ever grow for an already tracked tx; callers keep the
    /// max of the previously applied threshold and this one.
    pub fn threshold(&self, speed: ConfirmationSpeed) -> u64 {
        match speed {
            ConfirmationSpeed::Fast => self.fast_inbound,
            ConfirmationSpeed::Standard => self.standard_inbound,
        }
    }
}
