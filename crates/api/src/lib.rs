//! HTTP clients for external services.
//!
//! This crate provides:
//! - CoinGecko: spot price oracle for the collateral asset

mod coingecko;

pub use coingecko::{CoinGeckoOracle, DEFAULT_BASE_URL as COINGECKO_BASE_URL};
