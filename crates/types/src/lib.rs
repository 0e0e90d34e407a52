//! Shared event, vote and outbound transaction types for the unilink
//! observer/voter client.

mod event;
mod gateway;
mod outbound;
mod registry;
mod tracked;
mod vote;

pub use event::{ConfirmationSpeed, EventEntry, EventKind, EventStatus};
pub use gateway::{
    GatewayEventPayload, GatewayPayloadError, InboundGatewayEvent, OutboundGatewayEvent, TxType,
};
pub use outbound::{
    OutboundResult, OutboundSigningRequest, ThresholdSignature, UniversalOutbound,
};
pub use registry::{ChainRegistryEntry, VerificationType};
pub use tracked::{TrackedTx, TrackedTxStatus};
pub use vote::{GasPriceVote, InboundVote, OutboundObservation};
