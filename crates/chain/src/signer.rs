//! Local-key transaction signer.
//! Uses Alloy's wallet for legacy transaction signing.
//!
//! The key is only ever held inside a `SecretString` and the alloy signer
//! built from it; neither is printed by `Debug`.

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::error::ChainError;
use crate::port::{LiquidationRequest, SignedTransaction, TransactionSigner};

/// Signs liquidation transactions with a private key held in memory.
pub struct LocalSigner {
    /// Signer wallet
    wallet: EthereumWallet,
    /// Signer address
    address: Address,
}

impl LocalSigner {
    /// Create a signer from a hex private key (with or without 0x prefix).
    pub fn from_secret(private_key: &SecretString) -> Result<Self, ChainError> {
        let key_str = private_key.expose_secret().trim().trim_start_matches("0x");
        let signer: PrivateKeySigner = key_str
            .parse()
            .map_err(|_| ChainError::Config("private key is not a valid secp256k1 key".into()))?;
        let address = signer.address();

        info!(address = %address, "Local signer initialized");

        Ok(Self {
            wallet: EthereumWallet::from(signer),
            address,
        })
    }
}

#[async_trait]
impl TransactionSigner for LocalSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, request: &LiquidationRequest) -> Result<SignedTransaction, ChainError> {
        let tx = TransactionRequest::default()
            .with_from(self.address)
            .with_to(request.to)
            .with_input(request.calldata.clone())
            .with_value(U256::ZERO)
            .with_nonce(request.nonce)
            .with_gas_limit(request.gas_limit)
            .with_gas_price(request.gas_price)
            .with_chain_id(request.chain_id);

        let envelope = tx
            .build(&self.wallet)
            .await
            .map_err(|e| ChainError::Signing(e.to_string()))?;

        let hash = *envelope.tx_hash();
        debug!(
            position = %request.position,
            nonce = request.nonce,
            tx_hash = %hash,
            "Liquidation transaction signed"
        );

        Ok(SignedTransaction {
            hash,
            nonce: request.nonce,
            raw: envelope.encoded_2718().into(),
        })
    }
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
