//! Position data as read from the trove manager.

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::ChainError;

/// A position is identified by its borrower's account.
pub type PositionId = Address;

/// Lifecycle status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionStatus {
    Nonexistent,
    Active,
    /// Closed by the owner or by redemption.
    Closed,
    Liquidated,
}

impl PositionStatus {
    /// Map the trove manager's on-chain status code.
    ///
    /// `0 nonExistent, 1 active, 2 closedByOwner, 3 closedByLiquidation,
    /// 4 closedByRedemption`.
    pub fn from_code(code: u8) -> Result<Self, ChainError> {
        match code {
            0 => Ok(Self::Nonexistent),
            1 => Ok(Self::Active),
            2 | 4 => Ok(Self::Closed),
            3 => Ok(Self::Liquidated),
            other => Err(ChainError::Malformed(format!(
                "unknown position status code {other}"
            ))),
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Collateral and debt of one borrower.
///
/// Both amounts are 18-decimal fixed point (WAD): collateral in the
/// collateral asset, debt in the quote currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub collateral: U256,
    pub debt: U256,
    pub status: PositionStatus,
}

/// A position together with when it was observed.
#[derive(Debug, Clone)]
pub struct PositionSnapshot {
    pub position: Position,
    /// Block the read was made against.
    pub block_number: u64,
    /// Local monotonic time at which the read completed.
    pub observed_at: Instant,
}
