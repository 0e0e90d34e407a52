//! Per-chain client composition: wires the pool, adapter, store and
//! observation workers together and owns the outbound settlement
//! coordinator.

mod errors;
mod handle;
mod outbound;
mod wiring;

pub use errors::ClientError;
pub use handle::ChainClientHandle;
pub use outbound::OutboundCoordinator;
pub use wiring::{start_evm_chain_client, start_svm_chain_client};
