use unilink_types::{ConfirmationSpeed, EventKind};

/// One gateway log as observed by a chain adapter, ready for persistence.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GatewayObservation {
    /// `<txHash>:<logIndex>`, tx hash normalized to 0x hex.
    pub event_id: String,
    pub kind: EventKind,
    pub tx_hash: String,
    pub block_height: u64,
    /// Gateway method that emitted the log.
    pub method: String,
    pub confirmation: ConfirmationSpeed,
    /// Serialized gateway wire payload (JSON bytes).
    pub payload: Vec<u8>,
}
