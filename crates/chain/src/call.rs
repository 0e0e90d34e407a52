use std::{future::Future, time::Duration};

use unilink_rpc_pool::RpcPool;

use crate::errors::ChainError;

/// Runs one RPC call against a pool-selected endpoint, reporting the
/// outcome (and latency) back into the endpoint's metrics.
pub(crate) async fn with_pooled_endpoint<C, T, F, Fut>(
    pool: &RpcPool<C>,
    request_timeout: Duration,
    op: &str,
    f: F,
) -> Result<T, ChainError>
where
    C: Clone + Send + Sync + 'static,
    F: FnOnce(C) -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    let endpoint = pool.select_endpoint()?;
    let started = tokio::time::Instant::now();
    let outcome = tokio::time::timeout(request_timeout, f(endpoint.client().clone())).await;
    let latency = started.elapsed();

    let result = match outcome {
        Ok(result) => result,
        Err(_) => Err(ChainError::Timeout(op.to_owned())),
    };

    let _ = pool.update_endpoint_metrics(
        endpoint.url(),
        result.is_ok(),
        latency,
        result.as_ref().err().map(|_| op),
    );
    result
}
