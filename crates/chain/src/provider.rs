//! Alloy-backed implementation of [`ChainDataPort`].
//! Uses typed `sol!` contract calls over HTTP.

use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder};
use async_trait::async_trait;
use reqwest::Url;
use std::future::IntoFuture;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use crate::contracts::{ISortedTroves, ITroveManager};
use crate::error::ChainError;
use crate::port::{ChainDataPort, Receipt, SignedTransaction, TxHandle};
use crate::position::{Position, PositionId, PositionSnapshot, PositionStatus};

/// Default per-request RPC timeout.
const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Chain access for a trove manager deployment.
#[derive(Clone)]
pub struct TroveProvider {
    /// HTTP RPC endpoint
    rpc_url: Url,
    /// Trove manager address
    trove_manager: Address,
    /// Sorted troves list address
    sorted_troves: Address,
    /// Upper bound for any single RPC round trip
    rpc_timeout: Duration,
}

impl TroveProvider {
    /// Create a provider and verify the endpoint answers.
    ///
    /// Failing here is a startup error: the agent must not start blind.
    pub async fn connect(
        rpc_url: &str,
        trove_manager: Address,
        sorted_troves: Address,
    ) -> Result<Self, ChainError> {
        let rpc_url: Url = rpc_url
            .parse()
            .map_err(|e| ChainError::Config(format!("invalid RPC url: {e}")))?;

        let provider = Self {
            rpc_url,
            trove_manager,
            sorted_troves,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        };

        let block = provider.block_number().await?;
        info!(
            block = block,
            trove_manager = %trove_manager,
            sorted_troves = %sorted_troves,
            "Chain provider connection verified"
        );

        Ok(provider)
    }

    /// Override the per-request RPC timeout.
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn trove_manager(&self) -> Address {
        self.trove_manager
    }

    /// Total number of troves in the sorted list.
    pub async fn sorted_list_size(&self) -> Result<U256, ChainError> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        let sorted = ISortedTroves::new(self.sorted_troves, &provider);
        Ok(self.rpc("getSize", sorted.getSize().call()).await?._0)
    }

    /// Bound an RPC future by the configured timeout and map its error.
    async fn rpc<T, E, F>(&self, what: &str, fut: F) -> Result<T, ChainError>
    where
        F: IntoFuture<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match tokio::time::timeout(self.rpc_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ChainError::Transport(format!("{what}: {e}"))),
            Err(_) => Err(ChainError::Transport(format!(
                "{what}: timed out after {}ms",
                self.rpc_timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl ChainDataPort for TroveProvider {
    async fn worst_position_id(&self) -> Result<Option<PositionId>, ChainError> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        let sorted = ISortedTroves::new(self.sorted_troves, &provider);

        let last = self.rpc("getLast", sorted.getLast().call()).await?._0;
        Ok(non_zero(last))
    }

    async fn next_position_id(&self, id: PositionId) -> Result<Option<PositionId>, ChainError> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        let sorted = ISortedTroves::new(self.sorted_troves, &provider);

        let prev = self.rpc("getPrev", sorted.getPrev(id).call()).await?._0;
        Ok(non_zero(prev))
    }

    #[instrument(skip(self))]
    async fn position(&self, id: PositionId) -> Result<PositionSnapshot, ChainError> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        let block_number = self
            .rpc("eth_blockNumber", provider.get_block_number())
            .await?;

        // Pin the call to the block we just saw so the snapshot is coherent.
        let manager = ITroveManager::new(self.trove_manager, &provider);
        let trove = self
            .rpc("Troves", manager.Troves(id).block(block_number.into()).call())
            .await?;

        let position = Position {
            id,
            collateral: trove.coll,
            debt: trove.debt,
            status: PositionStatus::from_code(trove.status)?,
        };

        debug!(
            user = %id,
            block = block_number,
            collateral = %position.collateral,
            debt = %position.debt,
            status = ?position.status,
            "Position read"
        );

        Ok(PositionSnapshot {
            position,
            block_number,
            observed_at: Instant::now(),
        })
    }

    async fn nonce(&self, account: Address) -> Result<u64, ChainError> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        self.rpc(
            "eth_getTransactionCount",
            provider.get_transaction_count(account).pending(),
        )
        .await
    }

    async fn mined_nonce(&self, account: Address) -> Result<u64, ChainError> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        self.rpc(
            "eth_getTransactionCount",
            provider.get_transaction_count(account).latest(),
        )
        .await
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        self.rpc("eth_gasPrice", provider.get_gas_price()).await
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        self.rpc("eth_blockNumber", provider.get_block_number()).await
    }

    async fn submit_transaction(&self, signed: &SignedTransaction) -> Result<TxHandle, ChainError> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());

        let pending = match tokio::time::timeout(
            self.rpc_timeout,
            provider.send_raw_transaction(&signed.raw),
        )
        .await
        {
            Ok(Ok(pending)) => pending,
            // A JSON-RPC error response means the node looked at the
            // transaction; what it did with it depends on the message.
            Ok(Err(e)) => match e.as_error_resp() {
                Some(payload) => match classify_send_error(&payload.message) {
                    SendRejection::AlreadyKnown => {
                        info!(
                            tx_hash = %signed.hash,
                            nonce = signed.nonce,
                            "Node already holds transaction, treating as broadcast"
                        );
                        return Ok(signed.hash);
                    }
                    SendRejection::NonceTooLow => {
                        return Err(ChainError::NonceConflict(payload.message.to_string()));
                    }
                    SendRejection::Refused => return Err(ChainError::Refused(e.to_string())),
                },
                None => {
                    return Err(ChainError::Transport(format!("eth_sendRawTransaction: {e}")));
                }
            },
            Err(_) => {
                return Err(ChainError::Transport(format!(
                    "eth_sendRawTransaction: timed out after {}ms",
                    self.rpc_timeout.as_millis()
                )))
            }
        };

        Ok(*pending.tx_hash())
    }

    async fn receipt(&self, handle: TxHandle) -> Result<Option<Receipt>, ChainError> {
        let provider = ProviderBuilder::new().on_http(self.rpc_url.clone());
        let receipt = self
            .rpc(
                "eth_getTransactionReceipt",
                provider.get_transaction_receipt(handle),
            )
            .await?;

        Ok(receipt.map(|r| Receipt {
            tx_hash: r.transaction_hash,
            block_number: r.block_number,
            success: r.status(),
            gas_used: r.gas_used as u64,
        }))
    }
}

impl std::fmt::Debug for TroveProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The URL may embed an API key.
        f.debug_struct("TroveProvider")
            .field("host", &self.rpc_url.host_str())
            .field("trove_manager", &self.trove_manager)
            .field("sorted_troves", &self.sorted_troves)
            .finish()
    }
}

/// The sorted list uses the zero address as its sentinel.
fn non_zero(id: Address) -> Option<PositionId> {
    (id != Address::ZERO).then_some(id)
}

/// How an error reply to `eth_sendRawTransaction` is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendRejection {
    /// The node already has this exact transaction in its pool.
    AlreadyKnown,
    /// The nonce is taken by a transaction the node has already seen.
    NonceTooLow,
    /// Anything else; the transaction was not accepted.
    Refused,
}

/// Geth, Nethermind, Erigon and OpenEthereum word these differently.
fn classify_send_error(message: &str) -> SendRejection {
    let message = message.to_ascii_lowercase();
    if message.contains("already known")
        || message.contains("known transaction")
        || message.contains("alreadyknown")
        || message.contains("already imported")
    {
        SendRejection::AlreadyKnown
    } else if message.contains("nonce too low") || message.contains("oldnonce") {
        SendRejection::NonceTooLow
    } else {
        SendRejection::Refused
    }
}
