//! Chain-family adapters: gateway event scanning, confirmation queries and
//! outbound transaction building for EVM and SVM chains.

mod call;
mod errors;
mod observation;
mod traits;

pub mod evm;
pub mod svm;

pub use errors::ChainError;
pub use observation::GatewayObservation;
#[cfg(any(test, feature = "test-utils"))]
pub use traits::{MockGatewayOperations, MockOutboundTxBuilder};
pub use traits::{BroadcastVerification, GatewayOperations, OutboundTxBuilder};
