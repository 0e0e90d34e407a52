//! Validator-side cross-chain observer/voter daemon.
//!
//! Watches the configured external chains for gateway events, votes
//! observations to the universal chain and settles outbound actions on
//! their destination chains.

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use eyre::{eyre, Context};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use unilink_client::{start_evm_chain_client, start_svm_chain_client, ChainClientHandle};
use unilink_common::{shutdown_pair, Shutdown, ShutdownSignal};
use unilink_config::ClientConfig;
use unilink_primitives::ChainFamily;
use unilink_signer::{RpcThresholdSigner, ThresholdSigner};
use unilink_uchain::{resolve_transport, RpcUniversalClient, TransportScheme, UniversalClient};

#[derive(Debug, Parser)]
#[command(name = "unilinkd", about = "Cross-chain observer/voter client")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, short = 'c')]
    config: PathBuf,

    /// Overrides the configured data directory.
    #[arg(long)]
    datadir: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let mut config = ClientConfig::from_file(&args.config).wrap_err("loading configuration")?;
    if let Some(datadir) = args.datadir {
        config.datadir = datadir;
    }
    std::fs::create_dir_all(&config.datadir).wrap_err("creating data directory")?;

    let (signal, shutdown) = shutdown_pair();

    let signer = Arc::new(
        RpcThresholdSigner::try_new(&config.universal.signer_url)
            .wrap_err("connecting to the signing service")?,
    );

    // monomorphized per transport; the rest of the daemon is generic over
    // the universal client
    let (scheme, rpc_url) =
        resolve_transport(&config.universal.rpc_url).wrap_err("resolving universal chain URL")?;
    match scheme {
        TransportScheme::Http => {
            let universal = Arc::new(
                RpcUniversalClient::connect_http(&rpc_url, shutdown.clone())
                    .wrap_err("connecting to the universal chain")?,
            );
            run_daemon(config, universal, signer, signal, shutdown).await
        }
        TransportScheme::Ws => {
            let universal = Arc::new(
                RpcUniversalClient::connect_ws(&rpc_url, shutdown.clone())
                    .await
                    .wrap_err("connecting to the universal chain")?,
            );
            run_daemon(config, universal, signer, signal, shutdown).await
        }
    }
}

async fn run_daemon<U, Sg>(
    config: ClientConfig,
    universal: Arc<U>,
    signer: Arc<Sg>,
    signal: ShutdownSignal,
    shutdown: Shutdown,
) -> eyre::Result<()>
where
    U: UniversalClient + 'static,
    Sg: ThresholdSigner + 'static,
{
    let signer_id = config.universal.signer_id.clone();
    match universal.is_validator(&signer_id).await {
        Ok(true) => info!(%signer_id, "validator membership confirmed"),
        Ok(false) => warn!(
            %signer_id,
            "signer is not in the active validator set, votes will be rejected"
        ),
        Err(err) => warn!(%err, "could not verify validator membership"),
    }

    let mut handles: Vec<ChainClientHandle> = Vec::new();
    for chain_cfg in &config.chains {
        let family = chain_cfg
            .chain
            .family()
            .ok_or_else(|| eyre!("unsupported chain family: {}", chain_cfg.chain))?;

        let started = match family {
            ChainFamily::Evm => {
                start_evm_chain_client(
                    chain_cfg,
                    &config.defaults,
                    &config.datadir,
                    universal.clone(),
                    signer.clone(),
                    &signer_id,
                    shutdown.clone(),
                )
                .await
            }
            ChainFamily::Svm => {
                start_svm_chain_client(
                    chain_cfg,
                    &config.defaults,
                    &config.datadir,
                    universal.clone(),
                    signer.clone(),
                    &signer_id,
                    shutdown.clone(),
                )
                .await
            }
        };

        match started {
            Ok(handle) => handles.push(handle),
            Err(err) => {
                // insufficient endpoints / bad registry at startup is fatal
                error!(chain = %chain_cfg.chain, %err, "failed to start chain client");
                signal.trigger();
                for handle in handles {
                    handle.join().await;
                }
                return Err(eyre!(err).wrap_err("chain client bootstrap failed"));
            }
        }
    }

    info!(chains = handles.len(), "unilinkd running");
    tokio::signal::ctrl_c()
        .await
        .wrap_err("waiting for shutdown signal")?;
    info!("shutdown requested, stopping chain clients");
    signal.trigger();

    for handle in handles {
        handle.join().await;
    }
    info!("all chain clients stopped");
    Ok(())
}
