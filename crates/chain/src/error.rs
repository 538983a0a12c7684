//! Error types for chain and oracle access.
//!
//! Every variant maps onto one class of the agent's error taxonomy, so
//! callers can branch on the class without inspecting messages.

use thiserror::Error;

/// Failure talking to the chain data provider.
#[derive(Debug, Error)]
pub enum ChainError {
    /// RPC timeout, connection reset, HTTP failure. Retryable.
    #[error("rpc transport error: {0}")]
    Transport(String),

    /// The node answered with something we could not interpret.
    #[error("malformed chain response: {0}")]
    Malformed(String),

    /// The node refused the raw transaction (underpriced, pool full...).
    /// The transaction was never acknowledged, so no nonce was consumed.
    #[error("transaction refused by node: {0}")]
    Refused(String),

    /// The nonce was already used by another transaction from this account.
    /// Resending with the same request cannot succeed.
    #[error("nonce already used: {0}")]
    NonceConflict(String),

    /// Local signing failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Bad endpoint, key or address supplied at construction time.
    #[error("invalid chain configuration: {0}")]
    Config(String),
}

impl ChainError {
    /// Whether the caller may retry the same operation after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Refused(_))
    }
}

/// Failure obtaining a price.
///
/// Kept separate from a legitimate price so that an outage can never be
/// read as "the asset is worthless".
#[derive(Debug, Error)]
pub enum OracleError {
    /// Price source unreachable or timed out.
    #[error("price source unavailable: {0}")]
    Unavailable(String),

    /// Response could not be parsed into a price.
    #[error("malformed price response: {0}")]
    Malformed(String),

    /// Source returned a zero, negative or out-of-range answer.
    #[error("invalid price: {0}")]
    Invalid(String),

    /// Bad endpoint or feed address supplied at construction time.
    #[error("invalid oracle configuration: {0}")]
    Config(String),

    /// Source answered, but with data older than the allowed age.
    #[error("price is stale: last update {age_secs}s ago (max {max_age_secs}s)")]
    Stale { age_secs: u64, max_age_secs: u64 },
}
