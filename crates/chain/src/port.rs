//! Ports the agent core depends on.
//!
//! The core never talks to alloy directly. It receives these traits as
//! `Arc<dyn ...>` so the monitor and executor can be driven by in-memory
//! doubles in tests and by [`crate::TroveProvider`] in production.

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::{ChainError, OracleError};
use crate::position::{PositionId, PositionSnapshot};

/// Handle returned by the node for an acknowledged transaction.
pub type TxHandle = B256;

/// Receipt of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    /// `false` means the transaction was mined but reverted.
    pub success: bool,
    pub gas_used: u64,
}

/// Read and write access to the lending protocol and the chain.
#[async_trait]
pub trait ChainDataPort: Send + Sync + Debug {
    /// Head of the sorted list: the position with the lowest health, if any.
    async fn worst_position_id(&self) -> Result<Option<PositionId>, ChainError>;

    /// The next healthier position after `id` in the sorted list.
    async fn next_position_id(&self, id: PositionId) -> Result<Option<PositionId>, ChainError>;

    /// Current state of one position.
    async fn position(&self, id: PositionId) -> Result<PositionSnapshot, ChainError>;

    /// Next usable nonce for `account`, counting pending transactions.
    async fn nonce(&self, account: Address) -> Result<u64, ChainError>;

    /// Transaction count of `account` as of the latest mined block.
    async fn mined_nonce(&self, account: Address) -> Result<u64, ChainError>;

    /// Current network gas price in wei.
    async fn gas_price(&self) -> Result<u128, ChainError>;

    /// Current block height.
    async fn block_number(&self) -> Result<u64, ChainError>;

    /// Broadcast a signed transaction. `Ok` means the node acknowledged it.
    async fn submit_transaction(&self, signed: &SignedTransaction) -> Result<TxHandle, ChainError>;

    /// Receipt for `handle`, or `None` while it is still pending.
    async fn receipt(&self, handle: TxHandle) -> Result<Option<Receipt>, ChainError>;
}

/// Source of the collateral asset's price in the quote currency.
#[async_trait]
pub trait PriceOracle: Send + Sync + Debug {
    /// Current price of `asset` as an 18-decimal fixed-point value.
    async fn price(&self, asset: &str) -> Result<U256, OracleError>;

    /// Short name for logs.
    fn source_name(&self) -> &'static str;
}

/// Unsigned liquidation transaction, bound to a single position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationRequest {
    pub position: PositionId,
    pub to: Address,
    pub calldata: Bytes,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub chain_id: u64,
}

/// Transaction ready for broadcast.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub hash: B256,
    pub nonce: u64,
    pub raw: Bytes,
}

impl Debug for SignedTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedTransaction")
            .field("hash", &self.hash)
            .field("nonce", &self.nonce)
            .field("raw_len", &self.raw.len())
            .finish()
    }
}

/// The agent's signing capability.
#[async_trait]
pub trait TransactionSigner: Send + Sync + Debug {
    /// Account that pays for and sends liquidations.
    fn address(&self) -> Address;

    async fn sign(&self, request: &LiquidationRequest) -> Result<SignedTransaction, ChainError>;
}
