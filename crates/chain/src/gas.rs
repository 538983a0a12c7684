//! Legacy gas pricing policy for liquidation transactions.
//!
//! The node's current gas price is bumped by an optional priority
//! multiplier and capped at the configured maximum. The liquidation path
//! uses a fixed gas limit rather than estimation, which would add an RPC
//! round trip and fail on positions that are already closed.

use tracing::warn;

/// Basis points denominator (10000 = 100%)
const BPS_DENOMINATOR: u128 = 10_000;

/// Gas price chosen for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasQuote {
    /// Price to sign with, in wei.
    pub gas_price: u128,
    /// Network price before bump and cap.
    pub network_price: u128,
    /// Whether the cap was applied.
    pub capped: bool,
}

/// Legacy gas pricing: `min(network * multiplier, max)`.
#[derive(Debug, Clone, Copy)]
pub struct GasPolicy {
    /// Maximum gas price in wei.
    max_gas_price: u128,
    /// Bump applied to the network price, in basis points (10000 = 1.0x).
    multiplier_bps: u32,
}

impl GasPolicy {
    /// Create a policy with no bump.
    pub fn new(max_gas_price: u128) -> Self {
        Self {
            max_gas_price,
            multiplier_bps: BPS_DENOMINATOR as u32,
        }
    }

    /// Outbid the network price, e.g. `11_000` pays 1.1x.
    pub fn with_multiplier_bps(mut self, multiplier_bps: u32) -> Self {
        self.multiplier_bps = multiplier_bps.max(BPS_DENOMINATOR as u32);
        self
    }

    /// Price the next attempt from the node's current gas price.
    pub fn quote(&self, network_price: u128) -> GasQuote {
        let bumped = network_price.saturating_mul(self.multiplier_bps as u128) / BPS_DENOMINATOR;
        let capped = bumped > self.max_gas_price;
        let gas_price = bumped.min(self.max_gas_price);

        if capped {
            warn!(
                network_gwei = network_price / 1_000_000_000,
                max_gwei = self.max_gas_price / 1_000_000_000,
                "Network gas price above cap, signing at max gas price"
            );
        }

        GasQuote {
            gas_price,
            network_price,
            capped,
        }
    }
}

/// Convert gwei (as configured) to wei.
pub fn gwei_to_wei(gwei: f64) -> u128 {
    if gwei <= 0.0 {
        return 0;
    }
    (gwei * 1e9) as u128
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_below_cap() {
        let policy = GasPolicy::new(100_000_000_000);
        let quote = policy.quote(30_000_000_000);
        assert_eq!(quote.gas_price, 30_000_000_000);
        assert!(!quote.capped);
    }

    #[test]
    fn test_quote_capped() {
        let policy = GasPolicy::new(100_000_000_000);
        let quote = policy.quote(250_000_000_000);
        assert_eq!(quote.gas_price, 100_000_000_000);
        assert_eq!(quote.network_price, 250_000_000_000);
        assert!(quote.capped);
    }

    #[test]
    fn test_multiplier_then_cap() {
        let policy = GasPolicy::new(100_000_000_000).with_multiplier_bps(12_000);
        assert_eq!(policy.quote(50_000_000_000).gas_price, 60_000_000_000);
        assert_eq!(policy.quote(90_000_000_000).gas_price, 100_000_000_000);

        // Multipliers below 1.0x are clamped
        let policy = GasPolicy::new(100_000_000_000).with_multiplier_bps(5_000);
        assert_eq!(policy.quote(50_000_000_000).gas_price, 50_000_000_000);
    }

    #[test]
    fn test_gwei_to_wei() {
        assert_eq!(gwei_to_wei(1.0), 1_000_000_000);
        assert_eq!(gwei_to_wei(0.5), 500_000_000);
        assert_eq!(gwei_to_wei(-3.0), 0);
    }
}
