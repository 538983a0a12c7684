//! Price oracle implementations and shared price handling.
//!
//! All oracles report prices as 18-decimal fixed point (WAD) regardless of
//! the feed's native precision. A zero or negative answer is always an
//! [`OracleError::Invalid`], never a price.

mod chainlink;

pub use chainlink::ChainlinkOracle;

use alloy::primitives::U256;
use thiserror::Error;

use crate::error::OracleError;

/// Target precision for every price.
pub const PRICE_DECIMALS: u8 = 18;

/// Upper sanity bound: 10^12 quote units per collateral unit.
const MAX_PRICE_WAD: U256 = U256::from_limbs([0x4674edea40000000, 0xc9f2c9cd0, 0, 0]);

/// Rescale a raw feed answer with `decimals` places to WAD.
/// Down-scaling truncates.
pub fn scale_to_wad(answer: U256, decimals: u8) -> U256 {
    let ten = U256::from(10u64);
    if decimals <= PRICE_DECIMALS {
        answer.saturating_mul(ten.pow(U256::from(PRICE_DECIMALS - decimals)))
    } else {
        answer / ten.pow(U256::from(decimals - PRICE_DECIMALS))
    }
}

/// A decimal string that cannot be represented as WAD.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid decimal {0:?}")]
pub struct ParseWadError(pub String);

/// Parse a non-negative decimal (`"1.10"`, `"1900.5"`, `"2.5e-4"`) into
/// 18-decimal fixed point. Digits beyond the 18th place are truncated.
pub fn parse_wad(input: &str) -> Result<U256, ParseWadError> {
    let err = || ParseWadError(input.to_string());
    let s = input.trim();
    let s = s.strip_prefix('+').unwrap_or(s);

    let (mantissa, exponent) = match s.find(['e', 'E']) {
        Some(pos) => {
            let exp: i32 = s[pos + 1..].parse().map_err(|_| err())?;
            (&s[..pos], exp)
        }
        None => (s, 0),
    };

    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(err());
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(err());
    }

    let digits = format!("{int_part}{frac_part}");
    let scale = PRICE_DECIMALS as i64 + exponent as i64 - frac_part.len() as i64;

    if scale >= 0 {
        if scale > 77 {
            return Err(err());
        }
        let value = U256::from_str_radix(&digits, 10).map_err(|_| err())?;
        value
            .checked_mul(U256::from(10u64).pow(U256::from(scale as u64)))
            .ok_or_else(err)
    } else {
        let drop = (-scale) as usize;
        if drop >= digits.len() {
            return Ok(U256::ZERO);
        }
        U256::from_str_radix(&digits[..digits.len() - drop], 10).map_err(|_| err())
    }
}

/// Reject answers that cannot be a real price.
pub fn validate_price(price: U256) -> Result<U256, OracleError> {
    if price.is_zero() {
        return Err(OracleError::Invalid("zero price".into()));
    }
    if price > MAX_PRICE_WAD {
        return Err(OracleError::Invalid(format!("price {price} above sanity bound")));
    }
    Ok(price)
}
