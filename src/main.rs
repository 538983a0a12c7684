//! Trove Liquidation Agent
//!
//! Watches the sorted trove list of a Liquity-style lending protocol and
//! liquidates positions whose collateral ratio drops below the threshold.
//! Features:
//! - Head-of-list scanning with bounded depth
//! - Concurrent price/position reads with a staleness bound
//! - One in-flight liquidation per trove, confirmed in the background
//! - CoinGecko or Chainlink price source

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trove_api::{CoinGeckoOracle, COINGECKO_BASE_URL};
use trove_chain::{ChainlinkOracle, LocalSigner, PriceOracle, TransactionSigner, TroveProvider};
use trove_core::{AgentConfig, LiquidationExecutor, MonitorLoop};

/// Environment variable names.
mod env {
    pub const RPC_URL: &str = "RPC_URL";
    pub const PRIVATE_KEY: &str = "PRIVATE_KEY";
    pub const TROVE_MANAGER: &str = "TROVE_MANAGER";
    pub const SORTED_TROVES: &str = "SORTED_TROVES";
    pub const PRICE_SOURCE: &str = "PRICE_SOURCE";
    pub const PRICE_FEED: &str = "PRICE_FEED";
    pub const PRICE_MAX_AGE_SECS: &str = "PRICE_MAX_AGE_SECS";
    pub const COINGECKO_URL: &str = "COINGECKO_URL";
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
}

/// Liquity mainnet deployment.
const DEFAULT_TROVE_MANAGER: &str = "0xA39739EF8b0231DbFA0DcdA07d7e29faAbCf4bb2";
const DEFAULT_SORTED_TROVES: &str = "0x8FdD3fbFEb32b28fb73555518f8b361bCeA741A6";
/// Chainlink ETH/USD on mainnet.
const DEFAULT_PRICE_FEED: &str = "0x5f4eC3Df9cbd43714FE2740f5E3616155c5b8419";

#[tokio::main]
async fn main() -> Result<()> {
    // Print startup banner
    print_banner();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,trove_core=debug,trove_chain=debug"));
    let json = std::env::var(env::LOG_FORMAT).is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer()))
        .with(filter)
        .init();

    // AGENT_PROFILE selects default, mainnet or testing; AGENT_CONFIG a TOML file
    let agent_config = AgentConfig::from_env().context("loading agent configuration")?;
    agent_config.validate().context("invalid agent configuration")?;
    agent_config.log_config();

    let deployment = load_deployment()?;

    let (monitor, address) = initialize_components(&agent_config, deployment).await?;
    info!(liquidator = %address, "All components initialized");

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    info!("Starting monitor loop...");
    monitor.run(cancel).await;

    info!("Shutdown complete");
    Ok(())
}

/// Price source selected by `PRICE_SOURCE`.
enum PriceSource {
    CoinGecko { base_url: String },
    Chainlink { feed: Address, max_age: Duration },
}

/// Deployment settings loaded from environment.
struct Deployment {
    rpc_url: String,
    trove_manager: Address,
    sorted_troves: Address,
    price_source: PriceSource,
    private_key: SecretString,
}

fn load_deployment() -> Result<Deployment> {
    let get_env = |name: &str| -> Result<String> {
        std::env::var(name).map_err(|_| anyhow::anyhow!("Missing env var: {}", name))
    };

    let get_address = |name: &str, default: &str| -> Result<Address> {
        let value = std::env::var(name).unwrap_or_else(|_| default.to_string());
        value
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid address for {}: {}", name, e))
    };

    let price_source = match std::env::var(env::PRICE_SOURCE)
        .unwrap_or_else(|_| "coingecko".to_string())
        .to_lowercase()
        .as_str()
    {
        "coingecko" => PriceSource::CoinGecko {
            base_url: std::env::var(env::COINGECKO_URL)
                .unwrap_or_else(|_| COINGECKO_BASE_URL.to_string()),
        },
        "chainlink" => PriceSource::Chainlink {
            feed: get_address(env::PRICE_FEED, DEFAULT_PRICE_FEED)?,
            max_age: Duration::from_secs(match std::env::var(env::PRICE_MAX_AGE_SECS) {
                Ok(v) => v
                    .parse()
                    .with_context(|| format!("Invalid {}: {v:?}", env::PRICE_MAX_AGE_SECS))?,
                Err(_) => 3600,
            }),
        },
        other => anyhow::bail!(
            "Unknown {}: {other:?} (expected coingecko or chainlink)",
            env::PRICE_SOURCE
        ),
    };

    Ok(Deployment {
        rpc_url: get_env(env::RPC_URL)?,
        trove_manager: get_address(env::TROVE_MANAGER, DEFAULT_TROVE_MANAGER)?,
        sorted_troves: get_address(env::SORTED_TROVES, DEFAULT_SORTED_TROVES)?,
        price_source,
        private_key: SecretString::from(get_env(env::PRIVATE_KEY)?),
    })
}

async fn initialize_components(
    config: &AgentConfig,
    deployment: Deployment,
) -> Result<(MonitorLoop, Address)> {
    info!("Initializing components...");

    // Chain provider (checks the endpoint; unreachable is fatal)
    let provider = Arc::new(
        TroveProvider::connect(
            &deployment.rpc_url,
            deployment.trove_manager,
            deployment.sorted_troves,
        )
        .await
        .context("connecting to chain RPC")?
        .with_rpc_timeout(config.rpc_timeout()),
    );
    match provider.sorted_list_size().await {
        Ok(size) => info!(troves = %size, "Sorted trove list reachable"),
        Err(e) => warn!(error = %e, "Could not read sorted trove list size"),
    }

    // Price oracle
    let oracle: Arc<dyn PriceOracle> = match deployment.price_source {
        PriceSource::CoinGecko { base_url } => Arc::new(CoinGeckoOracle::with_base_url(base_url)),
        PriceSource::Chainlink { feed, max_age } => Arc::new(
            ChainlinkOracle::connect(&deployment.rpc_url, feed, max_age, config.rpc_timeout())
                .await
                .context("connecting to Chainlink feed")?,
        ),
    };
    info!(
        source = oracle.source_name(),
        asset = %config.collateral_asset,
        "Price oracle configured"
    );

    // Signer
    let signer = Arc::new(
        LocalSigner::from_secret(&deployment.private_key).context("loading PRIVATE_KEY")?,
    );
    let address = signer.address();
    info!(address = %address, "Signer initialized");

    // Executor and monitor
    let executor = Arc::new(LiquidationExecutor::new(
        provider.clone(),
        signer,
        provider.trove_manager(),
        config,
    ));
    let monitor = MonitorLoop::new(provider, oracle, executor, config)?;

    Ok((monitor, address))
}

/// Cancel `token` on SIGINT or SIGTERM.
async fn shutdown_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
                    _ = sigterm.recv() => info!("SIGTERM received"),
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, listening for SIGINT only");
                let _ = tokio::signal::ctrl_c().await;
                info!("SIGINT received");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("SIGINT received");
    }
    token.cancel();
}

/// Print startup banner.
fn print_banner() {
    println!(r#"
    ╔╦╗┬─┐┌─┐┬  ┬┌─┐  ╦  ┬┌─┐ ┬ ┬┬┌┬┐┌─┐┌┬┐┌─┐┬─┐
     ║ ├┬┘│ │└┐┌┘├┤   ║  ││─┼┐│ ││ ││├─┤ │ │ │├┬┘
     ╩ ┴└─└─┘ └┘ └─┘  ╩═╝┴└─┘└└─┘┴─┴┘┴ ┴ ┴ └─┘┴└─
    Trove Liquidation Agent v0.1.0
    "#);
}
