//! CoinGecko spot price client.

use alloy::primitives::U256;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

use trove_chain::oracle::{parse_wad, validate_price};
use trove_chain::{OracleError, PriceOracle};

/// Public API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// CoinGecko `simple/price` client quoting in a single currency.
#[derive(Debug, Clone)]
pub struct CoinGeckoOracle {
    client: reqwest::Client,
    base_url: String,
    /// Quote currency, e.g. `usd`
    vs_currency: String,
}

impl CoinGeckoOracle {
    /// Create a client against the public API quoting in USD.
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Create a client with custom base URL (pro API, proxy, test server).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            vs_currency: "usd".to_string(),
        }
    }

    /// Quote in another currency.
    pub fn with_vs_currency(mut self, vs_currency: impl Into<String>) -> Self {
        self.vs_currency = vs_currency.into().to_lowercase();
        self
    }

    fn price_url(&self, asset: &str) -> String {
        format!(
            "{}/simple/price?ids={}&vs_currencies={}",
            self.base_url, asset, self.vs_currency
        )
    }
}

impl Default for CoinGeckoOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceOracle for CoinGeckoOracle {
    #[instrument(skip(self))]
    async fn price(&self, asset: &str) -> Result<U256, OracleError> {
        let response = self
            .client
            .get(self.price_url(asset))
            .send()
            .await
            .map_err(|e| OracleError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Unavailable(format!("HTTP {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| OracleError::Malformed(e.to_string()))?;

        let price = extract_price(&body, asset, &self.vs_currency)?;
        debug!(asset = asset, vs = %self.vs_currency, price = %price, "CoinGecko price");
        Ok(price)
    }

    fn source_name(&self) -> &'static str {
        "coingecko"
    }
}

/// Pull `body[asset][vs]` out of a `simple/price` response as WAD.
///
/// The JSON number is re-read from its decimal text so no binary float
/// rounding leaks into the price.
fn extract_price(body: &Value, asset: &str, vs: &str) -> Result<U256, OracleError> {
    let number = body
        .get(asset)
        .and_then(|quotes| quotes.get(vs))
        .and_then(|quote| match quote {
            Value::Number(n) => Some(n),
            _ => None,
        })
        .ok_or_else(|| OracleError::Malformed(format!("no {vs} quote for {asset}")))?;

    let price = parse_wad(&number.to_string()).map_err(|e| OracleError::Malformed(e.to_string()))?;
    validate_price(price)
}
