use std::{path::Path, sync::Arc, time::Duration};

use tracing::{error, info, warn};
use unilink_chain::{
    evm::{EvmAdapter, EvmClientFactory, EvmHealthChecker, EvmOutboundBuilder},
    svm::{SvmAdapter, SvmClientFactory, SvmHealthChecker, SvmOutboundBuilder},
    GatewayOperations, OutboundTxBuilder,
};
use unilink_common::Shutdown;
use unilink_config::{ChainConfig, ChainDefaults};
use unilink_db::SledChainStore;
use unilink_observer::{
    ConfirmationTracker, EventCleaner, EventProcessor, EventWatcher, GasPriceReporter,
    NoopVoteHandler, ThresholdPair,
};
use unilink_primitives::ChainRef;
use unilink_rpc_pool::{ClientFactory, HealthChecker, HealthMonitor, PoolConfig, RpcPool};
use unilink_signer::ThresholdSigner;
use unilink_types::ChainRegistryEntry;
use unilink_uchain::{chain_registry_checked, UniversalClient};

use crate::{errors::ClientError, handle::ChainClientHandle, outbound::OutboundCoordinator};

/// Poll cadence of the confirmation tracker.
const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_secs(6);

/// Cadence of registry threshold refreshes.
const REGISTRY_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Cadence of the one-line status report.
const STATUS_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Builds the chain's endpoint pool and verifies enough endpoints came up.
async fn start_pool<C, F>(
    chain_cfg: &ChainConfig,
    effective: &ChainDefaults,
    factory: &F,
) -> Result<Arc<RpcPool<C>>, ClientError>
where
    C: Clone + Send + Sync + 'static,
    F: ClientFactory<C>,
{
    let pool = Arc::new(RpcPool::new(
        chain_cfg.urls.clone(),
        PoolConfig::from_chain_defaults(effective),
    ));
    pool.start(factory).await?;
    Ok(pool)
}

fn open_store(datadir: &Path, chain: &ChainRef) -> Result<Arc<SledChainStore>, ClientError> {
    let db_path = datadir.join(chain.to_string().replace(':', "-"));
    Ok(Arc::new(SledChainStore::open(db_path)?))
}

async fn load_registry<U: UniversalClient>(
    universal: &U,
    chain: &ChainRef,
) -> Result<ChainRegistryEntry, ClientError> {
    let registry = chain_registry_checked(universal, chain).await?;
    if !registry.enabled {
        return Err(ClientError::ChainDisabled(chain.clone()));
    }
    Ok(registry)
}

/// Spawns the family-independent worker set for one chain.
#[expect(clippy::too_many_arguments, reason = "wiring point for the whole worker set")]
fn spawn_workers<C, H, G, B, U, Sg>(
    handle: &mut ChainClientHandle,
    chain: ChainRef,
    effective: &ChainDefaults,
    registry: &ChainRegistryEntry,
    store: Arc<SledChainStore>,
    pool: Arc<RpcPool<C>>,
    checker: Arc<H>,
    adapter: Arc<G>,
    builder: Arc<B>,
    universal: Arc<U>,
    signer: Arc<Sg>,
    signer_id: &str,
    signer_address: &str,
    shutdown: Shutdown,
) where
    C: Clone + Send + Sync + 'static,
    H: HealthChecker<C> + 'static,
    G: GatewayOperations + Send + Sync + 'static,
    B: OutboundTxBuilder + Send + Sync + 'static,
    U: UniversalClient + 'static,
    Sg: ThresholdSigner + 'static,
{
    let monitor = Arc::new(HealthMonitor::new(pool, checker));
    let watcher = Arc::new(EventWatcher::new(
        store.clone(),
        adapter.clone(),
        registry.expiry_delta,
    ));
    let tracker = Arc::new(ConfirmationTracker::<_, NoopVoteHandler>::new(
        store.clone(),
        None,
        ThresholdPair {
            fast: registry.fast_inbound,
            standard: registry.standard_inbound,
        },
    ));
    let cleaner = Arc::new(EventCleaner::new(
        store.clone(),
        effective.cleanup_interval(),
        effective.retention_period(),
    ));
    let processor = Arc::new(EventProcessor::new(
        chain.clone(),
        store,
        universal.clone(),
        registry.verification,
    ));
    let gas_reporter = Arc::new(GasPriceReporter::new(
        chain.clone(),
        builder.clone(),
        adapter.clone(),
        universal.clone(),
        effective.gas_price_interval(),
    ));
    let coordinator = Arc::new(OutboundCoordinator::new(
        chain.clone(),
        builder,
        universal.clone(),
        signer,
        signer_id,
        signer_address,
        effective.max_signature_wait(),
    ));

    handle.track("health_monitor", tokio::spawn(monitor.clone().run(shutdown.clone())));

    let watcher_task = {
        let watcher = watcher.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) = watcher.run(shutdown).await {
                error!(%err, "event watcher exited with error");
            }
        })
    };
    handle.track("event_watcher", watcher_task);

    handle.track(
        "confirmation_tracker",
        tokio::spawn(tracker.clone().run(
            adapter,
            CONFIRMATION_POLL_INTERVAL,
            shutdown.clone(),
        )),
    );
    handle.track("event_cleaner", tokio::spawn(cleaner.run(shutdown.clone())));
    handle.track(
        "event_processor",
        tokio::spawn(processor.clone().run(shutdown.clone())),
    );
    handle.track(
        "gas_price_reporter",
        tokio::spawn(gas_reporter.run(shutdown.clone())),
    );
    handle.track(
        "outbound_coordinator",
        tokio::spawn(coordinator.run(shutdown.clone())),
    );

    handle.track("registry_refresh", {
        let chain = chain.clone();
        let tracker = tracker.clone();
        let universal = universal.clone();
        let mut shutdown_rx = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REGISTRY_REFRESH_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown_rx.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                match chain_registry_checked(universal.as_ref(), &chain).await {
                    Ok(entry) => tracker.set_thresholds(ThresholdPair {
                        fast: entry.fast_inbound,
                        standard: entry.standard_inbound,
                    }),
                    Err(err) => warn!(%chain, %err, "registry refresh failed"),
                }
            }
        })
    });

    handle.track("status_report", {
        let mut shutdown_rx = shutdown;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATUS_REPORT_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown_rx.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                info!(
                    %chain,
                    pool = ?monitor.health_report().status,
                    watcher = ?watcher.status(),
                    tracker = ?tracker.status(),
                    processor = ?processor.status(),
                    "chain client status"
                );
            }
        })
    });
}

/// Starts every worker for one EVM chain.
pub async fn start_evm_chain_client<U, Sg>(
    chain_cfg: &ChainConfig,
    defaults: &ChainDefaults,
    datadir: &Path,
    universal: Arc<U>,
    signer: Arc<Sg>,
    signer_id: &str,
    shutdown: Shutdown,
) -> Result<ChainClientHandle, ClientError>
where
    U: UniversalClient + 'static,
    Sg: ThresholdSigner + 'static,
{
    let chain = chain_cfg.chain.clone();
    let effective = chain_cfg.effective(defaults);

    let store = open_store(datadir, &chain)?;
    let pool = start_pool(chain_cfg, &effective, &EvmClientFactory).await?;
    let registry = load_registry(universal.as_ref(), &chain).await?;

    let adapter = Arc::new(EvmAdapter::new(
        chain.clone(),
        &registry.gateway_address,
        pool.clone(),
        chain_cfg.use_finalized,
        effective.request_timeout(),
        effective.replay_window,
    )?);
    let builder = Arc::new(EvmOutboundBuilder::new(
        &chain,
        pool.clone(),
        effective.request_timeout(),
    )?);

    let mut handle = ChainClientHandle::new(chain.clone());
    spawn_workers(
        &mut handle,
        chain.clone(),
        &effective,
        &registry,
        store,
        pool,
        Arc::new(EvmHealthChecker),
        adapter,
        builder,
        universal,
        signer,
        signer_id,
        &chain_cfg.signer_address,
        shutdown,
    );
    info!(%chain, "evm chain client started");
    Ok(handle)
}

/// Starts every worker for one SVM chain.
pub async fn start_svm_chain_client<U, Sg>(
    chain_cfg: &ChainConfig,
    defaults: &ChainDefaults,
    datadir: &Path,
    universal: Arc<U>,
    signer: Arc<Sg>,
    signer_id: &str,
    shutdown: Shutdown,
) -> Result<ChainClientHandle, ClientError>
where
    U: UniversalClient + 'static,
    Sg: ThresholdSigner + 'static,
{
    let chain = chain_cfg.chain.clone();
    let effective = chain_cfg.effective(defaults);

    let store = open_store(datadir, &chain)?;
    let factory = SvmClientFactory::new(effective.request_timeout());
    let pool = start_pool(chain_cfg, &effective, &factory).await?;
    let registry = load_registry(universal.as_ref(), &chain).await?;

    let adapter = Arc::new(SvmAdapter::new(
        chain.clone(),
        registry.gateway_address.clone(),
        pool.clone(),
        effective.request_timeout(),
        chain_cfg.use_finalized,
    ));
    let builder = Arc::new(SvmOutboundBuilder::new(
        registry.gateway_address.clone(),
        chain_cfg.signer_address.clone(),
        pool.clone(),
        effective.request_timeout(),
    ));

    let mut handle = ChainClientHandle::new(chain.clone());
    spawn_workers(
        &mut handle,
        chain.clone(),
        &effective,
        &registry,
        store,
        pool,
        Arc::new(SvmHealthChecker),
        adapter,
        builder,
        universal,
        signer,
        signer_id,
        &chain_cfg.signer_address,
        shutdown,
    );
    info!(%chain, "svm chain client started");
    Ok(handle)
}
