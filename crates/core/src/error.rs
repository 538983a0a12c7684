//! Error types for the agent core.

use std::time::Duration;
use thiserror::Error;

use trove_chain::{ChainError, OracleError, PositionId};

/// Failure of [`crate::LiquidationExecutor::submit`].
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Another attempt for this position is still outstanding.
    #[error("position {0} already has a liquidation in flight")]
    AlreadyInFlight(PositionId),

    /// Nonce/gas read or broadcast failed before the node acknowledged the
    /// transaction. No nonce was consumed; the caller may retry.
    #[error("transient submission failure: {0}")]
    Transient(#[source] ChainError),

    /// Unrecoverable for this attempt (signing, malformed node answer).
    #[error("submission failed: {0}")]
    Fatal(#[source] ChainError),
}

impl SubmitError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<ChainError> for SubmitError {
    fn from(e: ChainError) -> Self {
        if e.is_transient() {
            Self::Transient(e)
        } else {
            Self::Fatal(e)
        }
    }
}

/// Failure of one scan cycle. The cycle is abandoned and retried after
/// the error backoff.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    /// A chain or price read did not complete within the RPC timeout.
    #[error("{what} read timed out after {after:?}")]
    ReadTimeout { what: &'static str, after: Duration },

    /// Price and position reads completed too far apart to be compared.
    #[error("stale evaluation: reads {gap:?} apart (bound {bound:?})")]
    StaleEvaluation { gap: Duration, bound: Duration },
}

/// Invalid agent configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_error_classification() {
        assert!(SubmitError::from(ChainError::Transport("timeout".into())).is_retryable());
        assert!(SubmitError::from(ChainError::Refused("underpriced".into())).is_retryable());
        assert!(!SubmitError::from(ChainError::Signing("bad key".into())).is_retryable());
        let conflict = ChainError::NonceConflict("nonce too low".into());
        assert!(!SubmitError::from(conflict).is_retryable());
        assert!(!SubmitError::AlreadyInFlight(PositionId::ZERO).is_retryable());
    }

    #[test]
    fn test_stale_evaluation_message() {
        let err = ScanError::StaleEvaluation {
            gap: Duration::from_secs(13),
            bound: Duration::from_secs(12),
        };
        assert_eq!(err.to_string(), "stale evaluation: reads 13s apart (bound 12s)");
    }
}
