//! Monitor loop: scan the sorted list, liquidate what is eligible.
//!
//! Two states, `Scanning` and `Executing`. Confirmations are awaited on
//! their own tasks so a slow receipt never holds up the next scan.

use alloy::primitives::U256;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{AgentConfig, BackoffPolicy};
use crate::error::{ConfigError, ScanError, SubmitError};
use crate::executor::{LiquidationExecutor, Outcome, Reconciled};
use crate::health::{evaluate, HealthAssessment};
use crate::wad::format_wad;
use trove_chain::{ChainDataPort, PositionId, PriceOracle};

/// Control state of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Scanning,
    /// Submitting a liquidation for this position.
    Executing(PositionId),
}

/// Summary of one scan cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Positions evaluated
    pub evaluated: usize,
    /// Positions skipped because an attempt is already in flight
    pub in_flight: usize,
    /// Positions skipped because they are not active
    pub inactive: usize,
    /// Eligible positions found
    pub eligible: usize,
    /// Liquidations broadcast
    pub submitted: usize,
}

pub struct MonitorLoop {
    chain: Arc<dyn ChainDataPort>,
    oracle: Arc<dyn PriceOracle>,
    executor: Arc<LiquidationExecutor>,
    threshold: U256,
    asset: String,
    scan_depth: usize,
    poll_interval: Duration,
    error_backoff: Duration,
    staleness_bound: Duration,
    read_timeout: Duration,
    retry: BackoffPolicy,
    state: MonitorState,
    confirmations: JoinSet<(PositionId, Outcome)>,
}

impl MonitorLoop {
    pub fn new(
        chain: Arc<dyn ChainDataPort>,
        oracle: Arc<dyn PriceOracle>,
        executor: Arc<LiquidationExecutor>,
        config: &AgentConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            chain,
            oracle,
            executor,
            threshold: config.threshold_wad()?,
            asset: config.collateral_asset.clone(),
            scan_depth: config.scan_depth,
            poll_interval: config.poll_interval(),
            error_backoff: config.error_backoff(),
            staleness_bound: config.staleness_bound(),
            read_timeout: config.rpc_timeout(),
            retry: config.retry.clone(),
            state: MonitorState::Scanning,
            confirmations: JoinSet::new(),
        })
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Confirmation tasks not yet collected.
    pub fn pending_confirmations(&self) -> usize {
        self.confirmations.len()
    }

    /// Run until `cancel` fires, then wait for outstanding confirmations.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            threshold = %format_wad(self.threshold, 4),
            oracle = self.oracle.source_name(),
            poll_interval_secs = self.poll_interval.as_secs(),
            "Monitor loop started"
        );

        while !cancel.is_cancelled() {
            self.collect_finished();

            let pause = match self.scan(&cancel).await {
                Ok(report) => {
                    debug!(
                        evaluated = report.evaluated,
                        in_flight = report.in_flight,
                        eligible = report.eligible,
                        submitted = report.submitted,
                        "Scan complete"
                    );
                    self.poll_interval
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        backoff_secs = self.error_backoff.as_secs(),
                        "Scan failed, backing off"
                    );
                    self.error_backoff
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!(pending = self.confirmations.len(), "Monitor stopping, draining confirmations");
        self.drain().await;
        info!("Monitor loop stopped");
    }

    /// One scan cycle without cancellation.
    pub async fn scan_once(&mut self) -> Result<ScanReport, ScanError> {
        self.scan(&CancellationToken::new()).await
    }

    /// Wait for every outstanding confirmation task.
    pub async fn drain(&mut self) -> Vec<(PositionId, Outcome)> {
        let mut outcomes = Vec::new();
        while let Some(joined) = self.confirmations.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "Confirmation task failed"),
            }
        }
        outcomes
    }

    /// Collect confirmation tasks that already finished.
    fn collect_finished(&mut self) {
        while let Some(joined) = self.confirmations.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "Confirmation task failed");
            }
        }
    }

    /// Walk from the worst position towards healthier ones until a healthy
    /// position that is not in flight is found.
    async fn scan(&mut self, cancel: &CancellationToken) -> Result<ScanReport, ScanError> {
        self.reconcile().await;

        let mut report = ScanReport::default();
        let mut cursor = self.bounded("head", self.chain.worst_position_id()).await?;
        let mut walked = 0;

        while let Some(id) = cursor {
            if walked >= self.scan_depth || cancel.is_cancelled() {
                break;
            }
            walked += 1;

            if self.executor.is_in_flight(id) {
                debug!(user = %id, "Liquidation in flight, skipping");
                report.in_flight += 1;
            } else {
                match self.assess(id).await? {
                    None => report.inactive += 1,
                    Some(health) if !health.eligible => {
                        report.evaluated += 1;
                        break;
                    }
                    Some(health) => {
                        report.evaluated += 1;
                        report.eligible += 1;
                        info!(user = %id, %health, "Position eligible for liquidation");
                        if self.execute(id, cancel).await {
                            report.submitted += 1;
                        }
                    }
                }
            }

            cursor = self.bounded("next", self.chain.next_position_id(id)).await?;
        }

        Ok(report)
    }

    /// Read position and price concurrently and evaluate them together.
    ///
    /// `Ok(None)` for positions that are not active.
    #[instrument(skip(self), fields(user = %id))]
    async fn assess(&self, id: PositionId) -> Result<Option<HealthAssessment>, ScanError> {
        let (snapshot, (price, priced_at)) = tokio::join!(
            self.bounded("position", self.chain.position(id)),
            async {
                let price = self.bounded("price", self.oracle.price(&self.asset)).await;
                (price, Instant::now())
            }
        );
        let snapshot = snapshot?;
        let price = price?;

        let gap = snapshot
            .observed_at
            .saturating_duration_since(priced_at)
            .max(priced_at.saturating_duration_since(snapshot.observed_at));
        if gap > self.staleness_bound {
            return Err(ScanError::StaleEvaluation {
                gap,
                bound: self.staleness_bound,
            });
        }

        if !snapshot.position.status.is_active() {
            debug!(user = %id, status = ?snapshot.position.status, "Position not active, skipping");
            return Ok(None);
        }

        let health = evaluate(&snapshot.position, price, self.threshold);
        debug!(
            user = %id,
            block = snapshot.block_number,
            price = %format_wad(price, 2),
            ratio = %format_wad(health.ratio, 4),
            eligible = health.eligible,
            "Position evaluated"
        );
        Ok(Some(health))
    }

    /// Bound a port read so a stalled source fails the scan instead of hanging it.
    async fn bounded<T, E>(
        &self,
        what: &'static str,
        read: impl Future<Output = Result<T, E>>,
    ) -> Result<T, ScanError>
    where
        ScanError: From<E>,
    {
        match tokio::time::timeout(self.read_timeout, read).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ScanError::ReadTimeout {
                what,
                after: self.read_timeout,
            }),
        }
    }

    /// Submit with retries; spawn the confirmation wait on success.
    async fn execute(&mut self, id: PositionId, cancel: &CancellationToken) -> bool {
        self.state = MonitorState::Executing(id);
        let submitted = self.submit_with_retry(id, cancel).await;
        self.state = MonitorState::Scanning;
        submitted
    }

    async fn submit_with_retry(&mut self, id: PositionId, cancel: &CancellationToken) -> bool {
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 0..max_attempts {
            match self.executor.submit(id).await {
                Ok(submission) => {
                    if attempt > 0 {
                        info!(user = %id, attempt = attempt + 1, "Liquidation submitted on retry");
                    }
                    let executor = self.executor.clone();
                    self.confirmations.spawn(async move {
                        let outcome = executor.await_confirmation(&submission).await;
                        (submission.position, outcome)
                    });
                    return true;
                }
                Err(SubmitError::AlreadyInFlight(_)) => {
                    debug!(user = %id, "Liquidation already in flight");
                    return false;
                }
                Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        user = %id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Liquidation submit failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return false,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    warn!(
                        user = %id,
                        attempts = attempt + 1,
                        error = %e,
                        "Giving up on liquidation for this cycle"
                    );
                    return false;
                }
            }
        }
        false
    }

    async fn reconcile(&self) {
        for (id, resolution) in self.executor.reconcile_timed_out().await {
            match resolution {
                Reconciled::Confirmed(receipt) => info!(
                    user = %id,
                    tx_hash = %receipt.tx_hash,
                    "Timed-out liquidation confirmed late"
                ),
                Reconciled::RejectedStale(receipt) => info!(
                    user = %id,
                    tx_hash = %receipt.tx_hash,
                    "Timed-out liquidation reverted"
                ),
                Reconciled::Replaced => info!(user = %id, "Timed-out liquidation replaced"),
            }
        }
    }
}

impl std::fmt::Debug for MonitorLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorLoop")
            .field("state", &self.state)
            .field("threshold", &format_wad(self.threshold, 4))
            .field("asset", &self.asset)
            .field("pending_confirmations", &self.confirmations.len())
            .finish()
    }
}
