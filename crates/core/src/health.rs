//! Health evaluation: collateral value over debt, against a threshold.
//!
//! Pure and deterministic. It never fails: the one undefined case, zero
//! debt, maps to an infinite ratio and "not eligible".

use alloy::primitives::U256;
use std::fmt;

use crate::wad::{format_wad, wad_div, wad_mul};
use trove_chain::{Position, PositionId};

/// Derived health of one position at one price. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthAssessment {
    pub position: PositionId,
    /// Collateral valued in the quote currency (WAD).
    pub collateral_value: U256,
    /// Debt in the quote currency (WAD).
    pub debt_value: U256,
    /// collateral_value / debt_value (WAD); `U256::MAX` when debt is zero.
    pub ratio: U256,
    /// `ratio < threshold`.
    pub eligible: bool,
}

impl fmt::Display for HealthAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "collateral={} debt={} ratio={} eligible={}",
            format_wad(self.collateral_value, 2),
            format_wad(self.debt_value, 2),
            format_wad(self.ratio, 4),
            self.eligible
        )
    }
}

/// Evaluate a position at `price` against `threshold` (all WAD).
///
/// The boundary belongs to safety: a ratio exactly equal to the threshold
/// is not eligible.
pub fn evaluate(position: &Position, price: U256, threshold: U256) -> HealthAssessment {
    let collateral_value = wad_mul(position.collateral, price);

    if position.debt.is_zero() {
        return HealthAssessment {
            position: position.id,
            collateral_value,
            debt_value: U256::ZERO,
            ratio: U256::MAX,
            eligible: false,
        };
    }

    let ratio = wad_div(collateral_value, position.debt);
    HealthAssessment {
        position: position.id,
        collateral_value,
        debt_value: position.debt,
        ratio,
        eligible: ratio < threshold,
    }
}
