//! Contract bindings for the trove manager, its sorted list and price feeds.
//!
//! Interfaces are declared inline with `sol!` so the crate builds without
//! compiled ABI artifacts.

use alloy::primitives::{Address, Bytes};
use alloy::sol;
use alloy::sol_types::SolCall;

sol! {
    /// Trove manager: position storage and liquidation entry point.
    #[sol(rpc)]
    interface ITroveManager {
        function Troves(address borrower) external view returns (
            uint256 debt,
            uint256 coll,
            uint256 stake,
            uint8 status,
            uint128 arrayIndex
        );

        function liquidate(address borrower) external;
    }

    /// Sorted list of troves, ordered from healthiest (first) to least
    /// healthy (last).
    #[sol(rpc)]
    interface ISortedTroves {
        function getLast() external view returns (address);

        function getPrev(address id) external view returns (address);

        function getSize() external view returns (uint256);
    }

    /// Chainlink AggregatorV3.
    #[sol(rpc)]
    interface IAggregatorV3 {
        function latestRoundData() external view returns (
            uint80 roundId,
            int256 answer,
            uint256 startedAt,
            uint256 updatedAt,
            uint80 answeredInRound
        );

        function decimals() external view returns (uint8);
    }
}

/// Calldata for liquidating exactly one borrower.
///
/// There is no batch variant: one transaction always
/// maps to one position.
pub fn encode_liquidation(borrower: Address) -> Bytes {
    ITroveManager::liquidateCall { borrower }.abi_encode().into()
}
