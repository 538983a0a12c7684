//! Trove liquidator core logic.
//!
//! This crate provides the agent itself, written against the ports of
//! `trove-chain`:
//! - WAD fixed-point math
//! - Health evaluation against the liquidation threshold
//! - Liquidation executor with the in-flight set
//! - Monitor loop (Scanning / Executing)
//! - Agent configuration with profiles

pub mod config;
mod error;
mod executor;
mod health;
mod monitor;
pub mod wad;

#[cfg(test)]
mod test_support;

pub use config::{AgentConfig, BackoffPolicy, ExecutionConfig};
pub use error::{ConfigError, ScanError, SubmitError};
pub use executor::{
    AttemptOutcome, LiquidationExecutor, Outcome, Reconciled, Submission, SubmissionAttempt,
};
pub use health::{evaluate, HealthAssessment};
pub use monitor::{MonitorLoop, MonitorState, ScanReport};
