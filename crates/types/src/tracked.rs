use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::event::ConfirmationSpeed;

/// Gateway-level transaction confirmation status.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, BorshSerialize, BorshDeserialize, Serialize,
    Deserialize,
)]
pub enum TrackedTxStatus {
    Pending,
    Confirmed,
    Failed,
    /// Replaced by a reorg; explicitly not confirmed.
    Reorged,
}

/// A gateway transaction whose confirmation depth is being tracked.
#[derive(Clone, Debug, Eq, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct TrackedTx {
    /// Normalized 0x-hex tx hash.
    pub tx_hash: String,
    pub block_number: u64,
    /// Gateway method that produced the event (`addFunds`, …).
    pub method: String,
    pub event_id: String,
    pub confirmation: ConfirmationSpeed,
    pub status: TrackedTxStatus,
    pub confirmations: u64,
    /// Opaque payload carried through to the vote stage.
    pub data: Vec<u8>,
}

impl TrackedTx {
    pub fn new(
        tx_hash: impl Into<String>,
        block_number: u64,
        method: impl Into<String>,
        event_id: impl Into<String>,
        confirmation: ConfirmationSpeed,
        data: Vec<u8>,
    ) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            block_number,
            method: method.into(),
            event_id: event_id.into(),
            confirmation,
            status: TrackedTxStatus::Pending,
            confirmations: 0,
            data,
        }
    }

    /// Resets counters after a reorg replay re-observes the tx, possibly at
    /// a different height.
    pub fn reset_for_replay(&mut self, block_number: u64) {
        self.block_number = block_number;
        self.status = TrackedTxStatus::Pending;
        self.confirmations = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_progress() {
        let mut tx = TrackedTx::new(
            "0xabc",
            100,
            "addFunds",
            "0xabc:0",
            ConfirmationSpeed::Standard,
            vec![],
        );
        tx.confirmations = 9;
        tx.status = TrackedTxStatus::Confirmed;

        tx.reset_for_replay(104);

        assert_eq!(tx.block_number, 104);
        assert_eq!(tx.status, TrackedTxStatus::Pending);
        assert_eq!(tx.confirmations, 0);
    }
}
