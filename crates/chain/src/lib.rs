//! Trove liquidator chain interaction layer.
//!
//! This crate provides:
//! - The ports the agent core is written against (`ChainDataPort`,
//!   `PriceOracle`, `TransactionSigner`)
//! - Contract bindings for TroveManager, SortedTroves and Chainlink feeds
//! - An Alloy HTTP implementation of the chain port
//! - Local-key transaction signing
//! - Legacy gas pricing with a hard cap
//! - On-chain Chainlink price oracle

mod contracts;
mod error;
pub mod gas;
pub mod oracle;
mod port;
mod position;
mod provider;
mod signer;

pub use contracts::{encode_liquidation, IAggregatorV3, ISortedTroves, ITroveManager};
pub use error::{ChainError, OracleError};
pub use gas::{GasPolicy, GasQuote};
pub use oracle::ChainlinkOracle;
pub use port::{
    ChainDataPort, LiquidationRequest, PriceOracle, Receipt, SignedTransaction,
    TransactionSigner, TxHandle,
};
pub use position::{Position, PositionId, PositionSnapshot, PositionStatus};
pub use provider::TroveProvider;
pub use signer::LocalSigner;
