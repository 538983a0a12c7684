//! Chainlink aggregator price oracle.

use alloy::primitives::{Address, U256};
use alloy::providers::ProviderBuilder;
use async_trait::async_trait;
use reqwest::Url;
use std::future::IntoFuture;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

use super::{scale_to_wad, validate_price};
use crate::contracts::IAggregatorV3;
use crate::error::OracleError;
use crate::port::PriceOracle;

/// Chainlink oracle implementation.
#[derive(Clone)]
pub struct ChainlinkOracle {
    /// HTTP RPC endpoint
    rpc_url: Url,
    /// Aggregator contract address
    aggregator: Address,
    /// Price decimals
    decimals: u8,
    /// Maximum accepted age of the latest round
    max_age: Duration,
    /// Upper bound for any single RPC round trip
    rpc_timeout: Duration,
}

impl std::fmt::Debug for ChainlinkOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainlinkOracle")
            .field("aggregator", &self.aggregator)
            .field("decimals", &self.decimals)
            .field("max_age", &self.max_age)
            .field("rpc_timeout", &self.rpc_timeout)
            .finish()
    }
}

impl ChainlinkOracle {
    /// Create an oracle, reading the feed's decimals once.
    ///
    /// Every RPC round trip, this one included, is bounded by `rpc_timeout`.
    pub async fn connect(
        rpc_url: &str,
        aggregator: Address,
        max_age: Duration,
        rpc_timeout: Duration,
    ) -> Result<Self, OracleError> {
        let rpc_url: Url = rpc_url
            .parse()
            .map_err(|e| OracleError::Config(format!("invalid RPC url: {e}")))?;

        let mut oracle = Self {
            rpc_url,
            aggregator,
            decimals: 0,
            max_age,
            rpc_timeout,
        };

        let provider = ProviderBuilder::new().on_http(oracle.rpc_url.clone());
        let feed = IAggregatorV3::new(aggregator, &provider);
        oracle.decimals = oracle.rpc("decimals", feed.decimals().call()).await?._0;

        debug!(aggregator = %aggregator, decimals = oracle.decimals, "Chainlink feed connected");
        Ok(oracle)
    }

    /// Bound an RPC future by the configured timeout; any failure is an outage.
    async fn rpc<T, E, F>(&self, what: &str, fut: F) -> Result<T, OracleError>
    where
        F: IntoFuture<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match tokio::time::timeout(self.rpc_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(OracleError::Unavailable(format!("{what}: {e}"))),
            Err(_) => Err(OracleError::Unavailable(format!(
                "{what}: timed out after {}ms",
                self.rpc_timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl PriceOracle for ChainlinkOracle {
    #[instrument(skip(self))]
    async fn price(&self, asset: &str) -> Result<U256, OracleError> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        let feed = IAggregatorV3::new(self.aggregator, &provider);

        let round = self
            .rpc("latestRoundData", feed.latestRoundData().call())
            .await?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let updated_at: u64 = round.updatedAt.saturating_to();
        check_freshness(updated_at, now, self.max_age)?;

        if round.answer.is_negative() {
            return Err(OracleError::Invalid(format!("negative answer {}", round.answer)));
        }
        let answer = round.answer.into_raw();
        let price = validate_price(scale_to_wad(answer, self.decimals))?;

        debug!(asset = asset, price = %price, updated_at = updated_at, "Chainlink price");
        Ok(price)
    }

    fn source_name(&self) -> &'static str {
        "chainlink"
    }
}

/// A round is usable if it was updated at most `max_age` ago.
fn check_freshness(updated_at: u64, now: u64, max_age: Duration) -> Result<(), OracleError> {
    if updated_at == 0 {
        return Err(OracleError::Invalid("round never updated".into()));
    }
    let age_secs = now.saturating_sub(updated_at);
    let max_age_secs = max_age.as_secs();
    if age_secs > max_age_secs {
        return Err(OracleError::Stale {
            age_secs,
            max_age_secs,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_round() {
        assert!(check_freshness(1_700_000_000, 1_700_000_100, Duration::from_secs(3600)).is_ok());
    }

    #[test]
    fn test_stale_round() {
        let err = check_freshness(1_700_000_000, 1_700_007_200, Duration::from_secs(3600))
            .unwrap_err();
        assert!(matches!(
            err,
            OracleError::Stale {
                age_secs: 7200,
                max_age_secs: 3600
            }
        ));
    }

    #[test]
    fn test_unset_round_is_invalid() {
        assert!(matches!(
            check_freshness(0, 1_700_000_000, Duration::from_secs(3600)),
            Err(OracleError::Invalid(_))
        ));
    }

    /// An endpoint that accepts connections and never answers.
    async fn silent_endpoint() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        url
    }

    #[tokio::test]
    async fn test_invalid_url_is_config_error() {
        let result = ChainlinkOracle::connect(
            "not a url",
            Address::ZERO,
            Duration::from_secs(3600),
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(OracleError::Config(_))));
    }

    #[tokio::test]
    async fn test_stalled_connect_times_out() {
        let url = silent_endpoint().await;
        let started = std::time::Instant::now();
        let result = ChainlinkOracle::connect(
            &url,
            Address::repeat_byte(0x11),
            Duration::from_secs(3600),
            Duration::from_millis(200),
        )
        .await;

        match result {
            Err(OracleError::Unavailable(msg)) => assert!(msg.contains("timed out"), "{msg}"),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_stalled_price_read_times_out() {
        let oracle = ChainlinkOracle {
            rpc_url: silent_endpoint().await.parse().unwrap(),
            aggregator: Address::repeat_byte(0x11),
            decimals: 8,
            max_age: Duration::from_secs(3600),
            rpc_timeout: Duration::from_millis(200),
        };

        match oracle.price("ethereum").await {
            Err(OracleError::Unavailable(msg)) => assert!(msg.contains("latestRoundData"), "{msg}"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_eth_usd_feed() {
        let oracle = ChainlinkOracle::connect(
            "https://eth.llamarpc.com",
            "0x5f4eC3Df9cbd43714FE2740f5E3616155c5b8419".parse().unwrap(),
            Duration::from_secs(3600),
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        let price = oracle.price("ethereum").await.unwrap();
        assert!(price > U256::ZERO);
    }
}
