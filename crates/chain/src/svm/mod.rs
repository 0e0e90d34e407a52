//! SVM-class chain adapter over plain JSON-RPC.

mod outbound;
mod rpc;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use unilink_common::Shutdown;
use unilink_primitives::{normalize_tx_hash, ChainRef};
use unilink_rpc_pool::{ClientFactory, HealthChecker, PoolError, RpcPool};
use unilink_types::{ConfirmationSpeed, EventKind, GatewayEventPayload, TxType};

pub use outbound::SvmOutboundBuilder;
pub use rpc::SvmClient;

use crate::{
    call::with_pooled_endpoint, errors::ChainError, observation::GatewayObservation,
    traits::GatewayOperations,
};

/// Prefix our gateway program puts in front of event JSON in program logs.
const GATEWAY_LOG_PREFIX: &str = "Program log: unilink_gateway: ";

/// Watcher poll cadence between signature sweeps.
const WATCH_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Page size for signature sweeps.
const SIGNATURE_PAGE_LIMIT: usize = 1_000;

/// Capacity of the observation channel handed to the ingestion worker.
const OBSERVATION_BUFFER: usize = 1_024;

/// Builds a JSON-RPC client per endpoint URL.
#[derive(Debug)]
pub struct SvmClientFactory {
    request_timeout: Duration,
}

impl SvmClientFactory {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

#[async_trait]
impl ClientFactory<SvmClient> for SvmClientFactory {
    async fn build(&self, url: &str) -> Result<SvmClient, PoolError> {
        SvmClient::new(url, self.request_timeout).map_err(|err| PoolError::ClientBuild {
            url: url.to_owned(),
            reason: err.to_string(),
        })
    }
}

/// Probes an endpoint with `getSlot`.
#[derive(Debug, Default)]
pub struct SvmHealthChecker;

#[async_trait]
impl HealthChecker<SvmClient> for SvmHealthChecker {
    async fn check_health(&self, client: &SvmClient, _url: &str) -> Result<Duration, PoolError> {
        let started = tokio::time::Instant::now();
        client
            .get_slot(false)
            .await
            .map_err(|err| PoolError::Probe(err.to_string()))?;
        Ok(started.elapsed())
    }
}

/// Extracts gateway event payloads from a transaction's program logs.
fn gateway_payloads(log_messages: &[String]) -> Vec<Vec<u8>> {
    log_messages
        .iter()
        .filter_map(|line| line.strip_prefix(GATEWAY_LOG_PREFIX))
        .map(|json| json.as_bytes().to_vec())
        .collect()
}

/// Derives observation metadata from a decoded payload.
fn classify(payload: &GatewayEventPayload) -> (EventKind, &'static str, ConfirmationSpeed) {
    match payload {
        GatewayEventPayload::Inbound(ev) => {
            let speed = if TxType::from_code(ev.tx_type) == TxType::Gas {
                ConfirmationSpeed::Fast
            } else {
                ConfirmationSpeed::Standard
            };
            (EventKind::Inbound, "addFunds", speed)
        }
        GatewayEventPayload::Outbound(_) => {
            (EventKind::Outbound, "settle", ConfirmationSpeed::Standard)
        }
    }
}

/// Gateway operations for one SVM chain.
#[derive(Clone, Debug)]
pub struct SvmAdapter {
    #[expect(dead_code, reason = "kept for parity with the EVM adapter's wire payloads")]
    chain: ChainRef,
    gateway_program: String,
    pool: Arc<RpcPool<SvmClient>>,
    request_timeout: Duration,
    use_finalized: bool,
}

impl SvmAdapter {
    pub fn new(
        chain: ChainRef,
        gateway_program: impl Into<String>,
        pool: Arc<RpcPool<SvmClient>>,
        request_timeout: Duration,
        use_finalized: bool,
    ) -> Self {
        Self {
            chain,
            gateway_program: gateway_program.into(),
            pool,
            request_timeout,
            use_finalized,
        }
    }

    /// Turns one gateway tx into observations, one per gateway log line.
    async fn observe_signature(
        &self,
        signature: &str,
    ) -> Result<Vec<GatewayObservation>, ChainError> {
        let sig = signature.to_owned();
        let tx = with_pooled_endpoint(
            &self.pool,
            self.request_timeout,
            "getTransaction",
            move |client| async move { client.get_transaction(&sig).await },
        )
        .await?;

        let Some(tx) = tx else {
            return Ok(Vec::new());
        };
        let Some(meta) = tx.meta else {
            return Ok(Vec::new());
        };
        if meta.err.is_some() {
            // reverted gateway txs carry no observable events
            return Ok(Vec::new());
        }

        let tx_hash = normalize_tx_hash(signature).map_err(ChainError::decode)?;
        let logs = meta.log_messages.unwrap_or_default();

        let mut observations = Vec::new();
        for (index, payload) in gateway_payloads(&logs).into_iter().enumerate() {
            match GatewayEventPayload::from_json(&payload) {
                Ok(decoded) => {
                    let (kind, method, confirmation) = classify(&decoded);
                    observations.push(GatewayObservation {
                        event_id: format!("{tx_hash}:{index}"),
                        kind,
                        tx_hash: tx_hash.clone(),
                        block_height: tx.slot,
                        method: method.to_owned(),
                        confirmation,
                        payload,
                    });
                }
                Err(err) => {
                    warn!(%signature, %err, "undecodable gateway program log");
                }
            }
        }
        Ok(observations)
    }

    /// One sweep of new gateway signatures, oldest first.
    async fn sweep(
        &self,
        until: Option<&str>,
        min_slot: u64,
    ) -> Result<Vec<rpc::SignatureInfo>, ChainError> {
        let program = self.gateway_program.clone();
        let until = until.map(|s| s.to_owned());
        let mut infos = with_pooled_endpoint(
            &self.pool,
            self.request_timeout,
            "getSignaturesForAddress",
            move |client| async move {
                client
                    .get_signatures_for_address(&program, until.as_deref(), SIGNATURE_PAGE_LIMIT)
                    .await
            },
        )
        .await?;

        infos.retain(|info| info.err.is_none() && info.slot >= min_slot);
        // RPC returns newest first; emit oldest first
        infos.reverse();
        Ok(infos)
    }
}

#[async_trait]
impl GatewayOperations for SvmAdapter {
    async fn latest_block(&self) -> Result<u64, ChainError> {
        let finalized = self.use_finalized;
        with_pooled_endpoint(&self.pool, self.request_timeout, "getSlot", move |client| {
            async move { client.get_slot(finalized).await }
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
            let mut last_signature: Option<String> = None;
            let mut ticker = tokio::time::interval(WATCH_POLL_INTERVAL);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("gateway watcher stopping");
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                let batch = match adapter.sweep(last_signature.as_deref(), from_block).await {
                    Ok(batch) => batch,
                    Err(err) => {
                        warn!(%err, "signature sweep failed");
                        continue;
                    }
                };

                for info in batch {
                    match adapter.observe_signature(&info.signature).await {
                        Ok(observations) => {
                            for obs in observations {
                                if tx.send(obs).await.is_err() {
                                    return;
                                }
                            }
                            last_signature = Some(info.signature);
                        }
                        Err(err) => {
                            // leave the cursor so the tx is retried next sweep
                            warn!(signature = %info.signature, %err, "failed to fetch gateway tx");
                            break;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn transaction_confirmations(&self, tx_hash: &str) -> Result<u64, ChainError> {
        // stored hashes are normalized hex; the RPC wants base58
        let stripped = tx_hash.strip_prefix("0x").unwrap_or(tx_hash);
        let bytes = hex::decode(stripped)
            .map_err(|err| ChainError::Decode(format!("bad tx hash: {err}")))?;
        let signature = bs58::encode(bytes).into_string();

        let tx = with_pooled_endpoint(
            &self.pool,
            self.request_timeout,
            "getTransaction",
            move |client| async move { client.get_transaction(&signature).await },
        )
        .await?;

        let Some(tx) = tx else {
            return Ok(0);
        };

        let tip = self.latest_block().await?;
        Ok(tip.saturating_sub(tx.slot) + 1)
    }
}
