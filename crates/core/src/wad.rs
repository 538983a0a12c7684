//! 18-decimal fixed-point (WAD) arithmetic over `U256`.
//!
//! Rounding mode is fixed: every division truncates toward zero. Products
//! that would overflow 256 bits saturate at `U256::MAX`; the only inputs
//! that reach that are absurd collateral or price values, for which a
//! saturated health ratio is still "healthy".

use alloy::primitives::U256;

pub use trove_chain::oracle::{parse_wad, ParseWadError};

/// WAD constant: 1e18 for 18-decimal fixed-point arithmetic
pub const WAD: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// Multiply two WAD values: (a * b) / WAD, truncating.
#[inline(always)]
pub fn wad_mul(a: U256, b: U256) -> U256 {
    match a.checked_mul(b) {
        Some(product) => product / WAD,
        None => U256::MAX,
    }
}

/// Divide two WAD values: (a * WAD) / b, truncating.
///
/// Returns U256::MAX if `b` is zero.
#[inline(always)]
pub fn wad_div(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::MAX;
    }
    match a.checked_mul(WAD) {
        Some(scaled) => scaled / b,
        None => U256::MAX,
    }
}

/// Render a WAD value with `places` decimals, truncating. For logs.
pub fn format_wad(wad: U256, places: usize) -> String {
    if wad == U256::MAX {
        return "inf".to_string();
    }
    let int = wad / WAD;
    let frac = (wad % WAD).to_string();
    let frac = format!("{frac:0>18}");
    let places = places.min(18);
    if places == 0 {
        int.to_string()
    } else {
        format!("{int}.{}", &frac[..places])
    }
}
