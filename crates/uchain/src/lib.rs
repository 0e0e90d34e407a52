//! Universal-chain client: vote submission, registry queries and the
//! pending-outbound feed.

mod client;
mod traits;

pub use client::{resolve_transport, RpcUniversalClient, TransportScheme};
#[cfg(any(test, feature = "test-utils"))]
pub use traits::MockUniversalClient;
pub use traits::{chain_registry_checked, UniversalClient, UniversalClientError};
