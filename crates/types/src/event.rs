use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// Direction of a gateway event relative to the universal chain.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, BorshSerialize, BorshDeserialize, Serialize,
    Deserialize,
)]
pub enum EventKind {
    Inbound,
    Outbound,
}

/// Confirmation regime for a tracked event, resolved against the chain
/// registry thresholds.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, BorshSerialize, BorshDeserialize, Serialize,
    Deserialize,
)]
pub enum ConfirmationSpeed {
    Standard,
    Fast,
}

/// Lifecycle of a persisted gateway event.
///
/// Transitions are strictly forward except for [`EventStatus::Reorged`],
/// which a replayed reorg window may set on any non-terminal event.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, BorshSerialize, BorshDeserialize, Serialize,
    Deserialize,
)]
pub enum EventStatus {
    Pending,
    ConfirmationPending,
    Confirmed,
    Completed,
    Reverted,
    Expired,
    Failed,
    Reorged,
}

impl EventStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Reverted | Self::Expired | Self::Failed
        )
    }

    /// Reorged events are additionally excluded from voting.
    pub fn is_terminal_for_voting(&self) -> bool {
        self.is_terminal() || matches!(self, Self::Reorged)
    }
}

/// A gateway event as persisted in the per-chain store.
#[derive(Clone, Debug, Eq, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct EventEntry {
    /// `<txHash>:<logIndex>`, tx hash normalized to 0x hex.
    pub event_id: String,
    pub kind: EventKind,
    pub block_height: u64,
    pub status: EventStatus,
    pub confirmation: ConfirmationSpeed,
    /// Opaque serialized gateway payload (JSON bytes).
    pub payload: Vec<u8>,
    /// Hash of the vote tx on the universal chain, once submitted.
    pub vote_tx_hash: Option<String>,
    /// Block height after which the event expires; 0 means no expiry.
    pub expiry_block_height: u64,
    /// Unix millis.
    pub created_at: i64,
    /// Unix millis, bumped on every status write.
    pub updated_at: i64,
    pub confirmations: u64,
}

impl EventEntry {
    pub fn new_pending(
        event_id: impl Into<String>,
        kind: EventKind,
        block_height: u64,
        confirmation: ConfirmationSpeed,
        payload: Vec<u8>,
        expiry_block_height: u64,
    ) -> Self {
        let now = now_millis();
        Self {
            event_id: event_id.into(),
            kind,
            block_height,
            status: EventStatus::Pending,
            confirmation,
            payload,
            vote_tx_hash: None,
            expiry_block_height,
            created_at: now,
            updated_at: now,
            confirmations: 0,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = now_millis();
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
