//! Shared runtime utilities: retry with backoff, shutdown signalling and
//! connection monitoring.

mod monitor;
mod retry;
mod shutdown;

pub use monitor::{ConnectionMonitor, ConnectionState, HealthCheck, HealthCheckError};
#[cfg(any(test, feature = "test-utils"))]
pub use monitor::MockHealthCheck;
pub use retry::{retry_with_backoff, ExponentialBackoff, RetryError, RetryableError};
pub use shutdown::{shutdown_pair, Shutdown, ShutdownSignal};
