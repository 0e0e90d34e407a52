//! Per-chain RPC endpoint pool.
//!
//! Multiplexes requests over N endpoint URLs with passive health tracking
//! (request outcomes), active probing (health monitor), exclusion of
//! misbehaving endpoints and cool-off recovery.

mod endpoint;
mod errors;
mod metrics;
mod monitor;
mod pool;

pub use endpoint::{Endpoint, EndpointState, EndpointStats};
pub use errors::PoolError;
pub use metrics::EndpointMetrics;
pub use monitor::{HealthMonitor, PoolHealth, PoolHealthReport};
pub use pool::{ClientFactory, HealthChecker, PoolConfig, RpcPool};
#[cfg(any(test, feature = "test-utils"))]
pub use pool::{MockClientFactory, MockHealthChecker};
