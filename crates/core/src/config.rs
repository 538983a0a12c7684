//! Agent configuration with profile support.
//!
//! Provides the tunables of the monitor loop and the executor with
//! profiles (default, mainnet, testing), an optional TOML file and a
//! small set of environment overrides. Immutable once the agent starts.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;
use crate::wad::{parse_wad, WAD};
use trove_chain::gas::gwei_to_wei;
use trove_chain::GasPolicy;

/// Main configuration structure containing all agent parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Pause between successful scans (seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Collateral ratio below which a position is liquidated, as a decimal
    /// string so no float rounding reaches the comparison
    #[serde(default = "default_liquidation_threshold")]
    pub liquidation_threshold: String,

    /// Price oracle asset id of the collateral
    #[serde(default = "default_collateral_asset")]
    pub collateral_asset: String,

    /// Maximum positions walked from the head of the sorted list per scan
    #[serde(default = "default_scan_depth")]
    pub scan_depth: usize,

    /// Maximum time between the price read and the position read
    #[serde(default = "default_staleness_bound")]
    pub staleness_bound_secs: u64,

    /// Pause after a failed scan (seconds)
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,

    /// Upper bound on any single chain or price read (seconds)
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,

    /// Transaction parameters
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Retry policy for transient submission failures
    #[serde(default)]
    pub retry: BackoffPolicy,
}

fn default_profile_name() -> String {
    "default".to_string()
}
fn default_poll_interval() -> u64 {
    15
}
fn default_liquidation_threshold() -> String {
    "1.10".to_string()
}
fn default_collateral_asset() -> String {
    "ethereum".to_string()
}
fn default_scan_depth() -> usize {
    10
}
fn default_staleness_bound() -> u64 {
    12
}
fn default_error_backoff() -> u64 {
    5
}
fn default_rpc_timeout() -> u64 {
    10
}

/// Liquidation transaction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// EIP-155 chain id
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Fixed gas limit of a single-position liquidation
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,

    /// Gas price cap (gwei)
    #[serde(default = "default_max_gas_price")]
    pub max_gas_price_gwei: f64,

    /// Bump over the network gas price in basis points (10000 = 1.0x)
    #[serde(default = "default_gas_multiplier_bps")]
    pub gas_multiplier_bps: u32,

    /// How long to wait for a receipt before declaring Timeout (seconds)
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,

    /// Receipt polling interval (milliseconds)
    #[serde(default = "default_receipt_poll_interval")]
    pub receipt_poll_interval_ms: u64,
}

fn default_chain_id() -> u64 {
    1
}
fn default_gas_limit() -> u64 {
    2_000_000
}
fn default_max_gas_price() -> f64 {
    200.0
}
fn default_gas_multiplier_bps() -> u32 {
    10_000
}
fn default_confirmation_timeout() -> u64 {
    180
}
fn default_receipt_poll_interval() -> u64 {
    2_000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            gas_limit: default_gas_limit(),
            max_gas_price_gwei: default_max_gas_price(),
            gas_multiplier_bps: default_gas_multiplier_bps(),
            confirmation_timeout_secs: default_confirmation_timeout(),
            receipt_poll_interval_ms: default_receipt_poll_interval(),
        }
    }
}

impl ExecutionConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
    pub fn max_gas_price_wei(&self) -> u128 {
        gwei_to_wei(self.max_gas_price_gwei)
    }
    pub fn gas_policy(&self) -> GasPolicy {
        GasPolicy::new(self.max_gas_price_wei()).with_multiplier_bps(self.gas_multiplier_bps)
    }
}

/// Exponential backoff between retries of a transient failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry (milliseconds)
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Growth factor per retry
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,

    /// Upper bound on any single delay (milliseconds)
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Total tries including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_initial_delay() -> u64 {
    500
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_delay() -> u64 {
    8_000
}
fn default_max_attempts() -> u32 {
    3
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (0 = first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(64) as i32);
        let ms = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            poll_interval_secs: default_poll_interval(),
            liquidation_threshold: default_liquidation_threshold(),
            collateral_asset: default_collateral_asset(),
            scan_depth: default_scan_depth(),
            staleness_bound_secs: default_staleness_bound(),
            error_backoff_secs: default_error_backoff(),
            rpc_timeout_secs: default_rpc_timeout(),
            execution: ExecutionConfig::default(),
            retry: BackoffPolicy::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Mainnet profile: outbid the network by 10% and retry harder.
    pub fn mainnet() -> Self {
        Self {
            profile: "mainnet".to_string(),
            poll_interval_secs: 12, // One block
            execution: ExecutionConfig {
                max_gas_price_gwei: 300.0,
                gas_multiplier_bps: 11_000,
                ..Default::default()
            },
            retry: BackoffPolicy {
                initial_delay_ms: 250,
                max_attempts: 4,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Testing profile for a local devnet (anvil, hardhat).
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            poll_interval_secs: 2,
            scan_depth: 50,
            staleness_bound_secs: 30,
            error_backoff_secs: 1,
            execution: ExecutionConfig {
                chain_id: 31337,
                max_gas_price_gwei: 10.0,
                confirmation_timeout_secs: 30,
                receipt_poll_interval_ms: 250,
                ..Default::default()
            },
            retry: BackoffPolicy {
                initial_delay_ms: 100,
                max_delay_ms: 1_000,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Profile from `AGENT_PROFILE`, replaced by `AGENT_CONFIG` if set,
    /// then `LIQUIDATION_THRESHOLD` / `POLL_INTERVAL_SECS` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] with an injectable variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match get("AGENT_CONFIG") {
            Some(path) => Self::from_file(&path)?,
            None => {
                let profile = get("AGENT_PROFILE").unwrap_or_else(|| "default".to_string());
                match profile.to_lowercase().as_str() {
                    "mainnet" | "production" | "prod" => Self::mainnet(),
                    "testing" | "test" => Self::testing(),
                    _ => Self::default(),
                }
            }
        };

        if let Some(threshold) = get("LIQUIDATION_THRESHOLD") {
            config.liquidation_threshold = threshold;
        }
        if let Some(secs) = get("POLL_INTERVAL_SECS") {
            config.poll_interval_secs = secs.trim().parse().map_err(|_| {
                ConfigError::invalid("POLL_INTERVAL_SECS", format!("{secs:?} is not an integer"))
            })?;
        }

        Ok(config)
    }

    /// Reject values the agent cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.threshold_wad()?;
        if threshold < WAD {
            // Below 1.0 the protocol has already made the position insolvent.
            return Err(ConfigError::invalid(
                "liquidation_threshold",
                format!("{} is below 1.0", self.liquidation_threshold),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::invalid("poll_interval_secs", "must be positive"));
        }
        if self.error_backoff_secs == 0 {
            return Err(ConfigError::invalid("error_backoff_secs", "must be positive"));
        }
        if self.staleness_bound_secs == 0 {
            return Err(ConfigError::invalid("staleness_bound_secs", "must be positive"));
        }
        if self.rpc_timeout_secs == 0 {
            return Err(ConfigError::invalid("rpc_timeout_secs", "must be positive"));
        }
        if self.scan_depth == 0 {
            return Err(ConfigError::invalid("scan_depth", "must be at least 1"));
        }
        if self.collateral_asset.trim().is_empty() {
            return Err(ConfigError::invalid("collateral_asset", "must not be empty"));
        }
        if self.execution.gas_limit == 0 {
            return Err(ConfigError::invalid("execution.gas_limit", "must be positive"));
        }
        if self.execution.max_gas_price_wei() == 0 {
            return Err(ConfigError::invalid(
                "execution.max_gas_price_gwei",
                "must be positive",
            ));
        }
        if self.execution.confirmation_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "execution.confirmation_timeout_secs",
                "must be positive",
            ));
        }
        if self.execution.receipt_poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "execution.receipt_poll_interval_ms",
                "must be positive",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be at least 1"));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::invalid("retry.multiplier", "must be a finite value >= 1.0"));
        }
        Ok(())
    }

    /// Liquidation threshold as WAD.
    pub fn threshold_wad(&self) -> Result<U256, ConfigError> {
        parse_wad(&self.liquidation_threshold)
            .map_err(|e| ConfigError::invalid("liquidation_threshold", e.to_string()))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
    pub fn staleness_bound(&self) -> Duration {
        Duration::from_secs(self.staleness_bound_secs)
    }
    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Agent configuration loaded");
        tracing::info!(
            threshold = %self.liquidation_threshold,
            asset = %self.collateral_asset,
            poll_interval_secs = self.poll_interval_secs,
            scan_depth = self.scan_depth,
            staleness_bound_secs = self.staleness_bound_secs,
            rpc_timeout_secs = self.rpc_timeout_secs,
            "Monitor parameters"
        );
        tracing::info!(
            chain_id = self.execution.chain_id,
            gas_limit = self.execution.gas_limit,
            max_gas_gwei = self.execution.max_gas_price_gwei,
            gas_multiplier_bps = self.execution.gas_multiplier_bps,
            confirmation_timeout_secs = self.execution.confirmation_timeout_secs,
            "Execution parameters"
        );
        tracing::info!(
            initial_delay_ms = self.retry.initial_delay_ms,
            multiplier = self.retry.multiplier,
            max_delay_ms = self.retry.max_delay_ms,
            max_attempts = self.retry.max_attempts,
            "Retry policy"
        );
    }
}
