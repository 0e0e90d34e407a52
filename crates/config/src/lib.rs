//! Configuration for the unilink client.
//!
//! The configuration is loaded from a TOML file. Process-wide defaults in
//! `[defaults]` apply to every chain; each `[[chains]]` section may override
//! individual knobs in its `[chains.overrides]` table.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use unilink_primitives::ChainRef;

/// Default active health check interval.
const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// Default consecutive failures before an endpoint is excluded.
const DEFAULT_UNHEALTHY_THRESHOLD: u32 = 3;

/// Default cool-off before an excluded endpoint is re-probed.
const DEFAULT_RECOVERY_INTERVAL_SECS: u64 = 300;

/// Default minimum usable endpoints for a pool to start and stay healthy.
const DEFAULT_MIN_HEALTHY_ENDPOINTS: u32 = 1;

/// Default per-call RPC timeout.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default terminal-event cleanup cadence.
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Default retention for terminal events.
const DEFAULT_RETENTION_PERIOD_SECS: u64 = 86_400;

/// Default gas price poll-and-vote cadence.
const DEFAULT_GAS_PRICE_INTERVAL_SECS: u64 = 60;

/// Default reorg replay window for the event watcher, in blocks.
const DEFAULT_REPLAY_WINDOW: u64 = 32;

/// Default wait on the external signer before a nonce is retried with
/// finalized nonce seeding.
const DEFAULT_MAX_SIGNATURE_WAIT_SECS: u64 = 120;

/// Endpoint selection strategy for a chain's RPC pool.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancingStrategy {
    #[default]
    RoundRobin,
    Weighted,
}

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Data directory; each chain gets its own database under it.
    pub datadir: PathBuf,

    pub universal: UniversalConfig,

    #[serde(default)]
    pub defaults: ChainDefaults,

    pub chains: Vec<ChainConfig>,
}

/// Connection details for the universal chain and the signing service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniversalConfig {
    /// Universal chain RPC URL (http(s) or ws(s)).
    pub rpc_url: String,

    /// Threshold signer service URL.
    pub signer_url: String,

    /// Identifier this validator signs under.
    pub signer_id: String,
}

/// Process-wide defaults, overridable per chain.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChainDefaults {
    #[serde(default = "default_values::health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    #[serde(default = "default_values::unhealthy_threshold")]
    pub unhealthy_threshold: u32,

    #[serde(default = "default_values::recovery_interval_secs")]
    pub recovery_interval_secs: u64,

    #[serde(default = "default_values::min_healthy_endpoints")]
    pub min_healthy_endpoints: u32,

    #[serde(default = "default_values::request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub load_balancing_strategy: LoadBalancingStrategy,

    #[serde(default = "default_values::cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    #[serde(default = "default_values::retention_period_secs")]
    pub retention_period_secs: u64,

    #[serde(default = "default_values::gas_price_interval_secs")]
    pub gas_price_interval_secs: u64,

    #[serde(default = "default_values::replay_window")]
    pub replay_window: u64,

    #[serde(default = "default_values::max_signature_wait_secs")]
    pub max_signature_wait_secs: u64,
}

impl Default for ChainDefaults {
    fn default() -> Self {
        Self {
            health_check_interval_secs: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
            unhealthy_threshold: DEFAULT_UNHEALTHY_THRESHOLD,
            recovery_interval_secs: DEFAULT_RECOVERY_INTERVAL_SECS,
            min_healthy_endpoints: DEFAULT_MIN_HEALTHY_ENDPOINTS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            load_balancing_strategy: LoadBalancingStrategy::default(),
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
            retention_period_secs: DEFAULT_RETENTION_PERIOD_SECS,
            gas_price_interval_secs: DEFAULT_GAS_PRICE_INTERVAL_SECS,
            replay_window: DEFAULT_REPLAY_WINDOW,
            max_signature_wait_secs: DEFAULT_MAX_SIGNATURE_WAIT_SECS,
        }
    }
}

/// Per-override view of [`ChainDefaults`]; unset fields inherit.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChainOverrides {
    pub health_check_interval_secs: Option<u64>,
    pub unhealthy_threshold: Option<u32>,
    pub recovery_interval_secs: Option<u64>,
    pub min_healthy_endpoints: Option<u32>,
    pub request_timeout_secs: Option<u64>,
    pub load_balancing_strategy: Option<LoadBalancingStrategy>,
    pub cleanup_interval_secs: Option<u64>,
    pub retention_period_secs: Option<u64>,
    pub gas_price_interval_secs: Option<u64>,
    pub replay_window: Option<u64>,
    pub max_signature_wait_secs: Option<u64>,
}

/// Configuration of one observed external chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// CAIP-2 chain id, e.g. `eip155:1`.
    pub chain: ChainRef,

    /// RPC endpoint URLs, in pool order.
    pub urls: Vec<String>,

    /// Account the threshold signer controls on this chain, used for
    /// outbound nonce seeding and fee payment. The gateway address itself
    /// comes from the universal chain's registry.
    pub signer_address: String,

    /// Use the finalized tag instead of latest where the chain supports it.
    #[serde(default)]
    pub use_finalized: bool,

    #[serde(default)]
    pub overrides: ChainOverrides,
}

impl ChainConfig {
    /// Resolves this chain's effective settings over the process defaults.
    pub fn effective(&self, defaults: &ChainDefaults) -> ChainDefaults {
        let o = &self.overrides;
        ChainDefaults {
            health_check_interval_secs: o
                .health_check_interval_secs
                .unwrap_or(defaults.health_check_interval_secs),
            unhealthy_threshold: o.unhealthy_threshold.unwrap_or(defaults.unhealthy_threshold),
            recovery_interval_secs: o
                .recovery_interval_secs
                .unwrap_or(defaults.recovery_interval_secs),
            min_healthy_endpoints: o
                .min_healthy_endpoints
                .unwrap_or(defaults.min_healthy_endpoints),
            request_timeout_secs: o
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
            load_balancing_strategy: o
                .load_balancing_strategy
                .unwrap_or(defaults.load_balancing_strategy),
            cleanup_interval_secs: o
                .cleanup_interval_secs
                .unwrap_or(defaults.cleanup_interval_secs),
            retention_period_secs: o
                .retention_period_secs
                .unwrap_or(defaults.retention_period_secs),
            gas_price_interval_secs: o
                .gas_price_interval_secs
                .unwrap_or(defaults.gas_price_interval_secs),
            replay_window: o.replay_window.unwrap_or(defaults.replay_window),
            max_signature_wait_secs: o
                .max_signature_wait_secs
                .unwrap_or(defaults.max_signature_wait_secs),
        }
    }
}

impl ChainDefaults {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn retention_period(&self) -> Duration {
        Duration::from_secs(self.retention_period_secs)
    }

    pub fn gas_price_interval(&self) -> Duration {
        Duration::from_secs(self.gas_price_interval_secs)
    }

    pub fn max_signature_wait(&self) -> Duration {
        Duration::from_secs(self.max_signature_wait_secs)
    }
}

/// Default value functions to make [`serde`] happy.
mod default_values {
    use super::*;

    pub(super) fn health_check_interval_secs() -> u64 {
        DEFAULT_HEALTH_CHECK_INTERVAL_SECS
    }

    pub(super) fn unhealthy_threshold() -> u32 {
        DEFAULT_UNHEALTHY_THRESHOLD
    }

    pub(super) fn recovery_interval_secs() -> u64 {
        DEFAULT_RECOVERY_INTERVAL_SECS
    }

    pub(super) fn min_healthy_endpoints() -> u32 {
        DEFAULT_MIN_HEALTHY_ENDPOINTS
    }

    pub(super) fn request_timeout_secs() -> u64 {
        DEFAULT_REQUEST_TIMEOUT_SECS
    }

    pub(super) fn cleanup_interval_secs() -> u64 {
        DEFAULT_CLEANUP_INTERVAL_SECS
    }

    pub(super) fn retention_period_secs() -> u64 {
        DEFAULT_RETENTION_PERIOD_SECS
    }

    pub(super) fn gas_price_interval_secs() -> u64 {
        DEFAULT_GAS_PRICE_INTERVAL_SECS
    }

    pub(super) fn replay_window() -> u64 {
        DEFAULT_REPLAY_WINDOW
    }

    pub(super) fn max_signature_wait_secs() -> u64 {
        DEFAULT_MAX_SIGNATURE_WAIT_SECS
    }
}

/// Error loading or validating a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("chain {0} has no RPC urls")]
    NoUrls(ChainRef),

    #[error("chain {0} is not of a supported family")]
    UnsupportedFamily(ChainRef),
}

impl ClientConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for chain in &self.chains {
            if chain.urls.is_empty() {
                return Err(ConfigError::NoUrls(chain.chain.clone()));
            }
            if chain.chain.family().is_none() {
                return Err(ConfigError::UnsupportedFamily(chain.chain.clone()));
            }
        }
        Ok(())
    }
}
