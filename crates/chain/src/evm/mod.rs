//! EVM chain adapter built on alloy providers, multiplexed over the
//! endpoint pool.

mod gateway;
mod outbound;

use std::{future::Future, sync::Arc, time::Duration};

use alloy::{
    providers::{Provider, RootProvider},
    rpc::types::Filter,
};
use alloy_eips::BlockNumberOrTag;
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use unilink_common::Shutdown;
use unilink_primitives::ChainRef;
use unilink_rpc_pool::{ClientFactory, HealthChecker, PoolError, RpcPool};

pub use outbound::EvmOutboundBuilder;

use crate::{
    errors::ChainError, observation::GatewayObservation, traits::GatewayOperations,
};

/// Opaque per-endpoint client handle for EVM chains.
pub type EvmClient = RootProvider;

/// Cap on the block span of one `eth_getLogs` request.
const MAX_SCAN_RANGE: u64 = 2_000;

/// Watcher poll cadence between tip checks.
const WATCH_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Capacity of the observation channel handed to the ingestion worker.
const OBSERVATION_BUFFER: usize = 1_024;

pub(crate) use crate::call::with_pooled_endpoint as with_endpoint;

/// Builds an HTTP provider per endpoint URL.
#[derive(Debug, Default)]
pub struct EvmClientFactory;

#[async_trait]
impl ClientFactory<EvmClient> for EvmClientFactory {
    async fn build(&self, url: &str) -> Result<EvmClient, PoolError> {
        let parsed = url.parse().map_err(|err| PoolError::ClientBuild {
            url: url.to_owned(),
            reason: format!("invalid url: {err}"),
        })?;
        Ok(RootProvider::new_http(parsed))
    }
}

/// Probes an endpoint with `eth_blockNumber`.
#[derive(Debug, Default)]
pub struct EvmHealthChecker;

#[async_trait]
impl HealthChecker<EvmClient> for EvmHealthChecker {
    async fn check_health(&self, client: &EvmClient, _url: &str) -> Result<Duration, PoolError> {
        let started = tokio::time::Instant::now();
        client
            .get_block_number()
            .await
            .map_err(|err| PoolError::Probe(err.to_string()))?;
        Ok(started.elapsed())
    }
}

/// Gateway operations for one EVM chain.
#[derive(Clone, Debug)]
pub struct EvmAdapter {
    chain: ChainRef,
    gateway: Address,
    pool: Arc<RpcPool<EvmClient>>,
    use_finalized: bool,
    request_timeout: Duration,
    replay_window: u64,
}

impl EvmAdapter {
    pub fn new(
        chain: ChainRef,
        gateway_address: &str,
        pool: Arc<RpcPool<EvmClient>>,
        use_finalized: bool,
        request_timeout: Duration,
        replay_window: u64,
    ) -> Result<Self, ChainError> {
        let gateway = gateway_address
            .parse()
            .map_err(|err| ChainError::Decode(format!("bad gateway address: {err}")))?;
        Ok(Self {
            chain,
            gateway,
            pool,
            use_finalized,
            request_timeout,
            replay_window,
        })
    }

    async fn with_endpoint<T, F, Fut>(&self, op: &str, f: F) -> Result<T, ChainError>
    where
        F: FnOnce(EvmClient) -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        with_endpoint(&self.pool, self.request_timeout, op, f).await
    }

    async fn scan_range(&self, from: u64, to: u64) -> Result<Vec<GatewayObservation>, ChainError> {
        let gateway = self.gateway;
        let chain = self.chain.clone();
        let logs = self
            .with_endpoint("eth_getLogs", move |client| async move {
                let filter = Filter::new()
                    .address(gateway)
                    .from_block(from)
                    .to_block(to);
                client.get_logs(&filter).await.map_err(ChainError::rpc)
            })
            .await?;

        let mut observations = Vec::with_capacity(logs.len());
        for log in &logs {
            match gateway::decode_gateway_log(&chain, log) {
                Ok(Some(obs)) => observations.push(obs),
                Ok(None) => {}
                Err(err) => {
                    // malformed log, skip it rather than wedge the scan
                    warn!(%err, "undecodable gateway log");
                }
            }
        }
        Ok(observations)
    }
}

#[async_trait]
impl GatewayOperations for EvmAdapter {
    async fn latest_block(&self) -> Result<u64, ChainError> {
        let use_finalized = self.use_finalized;
        self.with_endpoint("eth_blockNumber", move |client| async move {
            if use_finalized {
                let block = client
                    .get_block_by_number(BlockNumberOrTag::Finalized)
                    .await
                    .map_err(ChainError::rpc)?
                    .ok_or_else(|| ChainError::Rpc("no finalized block".into()))?;
                Ok(block.header.number)
            } else {
                client.get_block_number().await.map_err(ChainError::rpc)
            }
        })
        .await
    }

    async fn watch_gateway_events(
        &self,
        from_block: u64,
        shutdown: Shutdown,
    ) -> Result<mpsc::Receiver<GatewayObservation>, ChainError> {
        let (tx, rx) = mpsc::channel(OBSERVATION_BUFFER);
        let adapter = self.clone();
        let mut shutdown = shutdown;

        tokio::spawn(async move {
            // replay a window behind the cursor; the store dedupes replays
            let mut next = from_block.saturating_sub(adapter.replay_window).max(1);
            let mut ticker = tokio::time::interval(WATCH_POLL_INTERVAL);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("gateway watcher stopping");
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                let tip = match adapter.latest_block().await {
                    Ok(tip) => tip,
                    Err(err) => {
                        warn!(%err, "failed to fetch chain tip");
                        continue;
                    }
                };

                while next <= tip {
                    let to = (next + MAX_SCAN_RANGE - 1).min(tip);
                    match adapter.scan_range(next, to).await {
                        Ok(observations) => {
                            for obs in observations {
                                if tx.send(obs).await.is_err() {
                                    // consumer gone, watcher is done
                                    return;
                                }
                            }
                            next = to + 1;
                        }
                        Err(err) => {
                            warn!(from = next, to, %err, "gateway scan failed");
                            break;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn transaction_confirmations(&self, tx_hash: &str) -> Result<u64, ChainError> {
        let hash: B256 = tx_hash
            .parse()
            .map_err(|err| ChainError::Decode(format!("bad tx hash: {err}")))?;

        let receipt_block = self
            .with_endpoint("eth_getTransactionReceipt", move |client| async move {
                let receipt = client
                    .get_transaction_receipt(hash)
                    .await
                    .map_err(ChainError::rpc)?;
                Ok(receipt.and_then(|r| r.block_number))
            })
            .await?;

        let Some(mined_at) = receipt_block else {
            return Ok(0);
        };

        let tip = self.latest_block().await?;
        Ok(tip.saturating_sub(mined_at) + 1)
    }
}
