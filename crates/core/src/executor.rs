//! Liquidation executor: one transaction per position, never two at once.
//!
//! The executor owns the in-flight map. A slot is reserved before any I/O
//! and only released when the attempt is resolved: a failed broadcast, a
//! receipt, a proven replacement, or an operator release. A confirmation
//! timeout keeps the slot, because the transaction may still land.

use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::config::AgentConfig;
use crate::error::SubmitError;
use trove_chain::{
    encode_liquidation, ChainDataPort, GasPolicy, LiquidationRequest, PositionId, Receipt,
    TransactionSigner,
};

/// Where a submission attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Pending,
    Confirmed,
    Rejected,
    Timeout,
}

/// Record of one broadcast liquidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionAttempt {
    pub position: PositionId,
    pub nonce: u64,
    pub gas_price: u128,
    pub submitted_at: DateTime<Utc>,
    pub tx_hash: B256,
    pub outcome: AttemptOutcome,
}

/// Handle for a broadcast transaction, returned by [`LiquidationExecutor::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub position: PositionId,
    pub tx_hash: B256,
    pub nonce: u64,
    pub gas_price: u128,
}

/// Final result of waiting on a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Mined and succeeded.
    Confirmed(Receipt),
    /// Mined and reverted: somebody else liquidated first, or the position
    /// recovered. Expected under competition.
    RejectedStale(Receipt),
    /// No receipt within the confirmation timeout. The position stays in
    /// flight until reconciled or released.
    Timeout,
}

/// How a timed-out attempt was resolved by [`LiquidationExecutor::reconcile_timed_out`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    Confirmed(Receipt),
    RejectedStale(Receipt),
    /// Another transaction with the same nonce was mined instead.
    Replaced,
}

#[derive(Debug, Clone)]
enum Slot {
    /// Reserved; nonce, signing or broadcast in progress.
    Reserving,
    Submitted(SubmissionAttempt),
}

/// Releases a reserved slot unless the broadcast was acknowledged.
struct Reservation<'a> {
    in_flight: &'a Mutex<HashMap<PositionId, Slot>>,
    position: PositionId,
    armed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut map = self.in_flight.lock();
            if matches!(map.get(&self.position), Some(Slot::Reserving)) {
                map.remove(&self.position);
            }
        }
    }
}

/// Builds, signs and submits single-position liquidations.
pub struct LiquidationExecutor {
    chain: Arc<dyn ChainDataPort>,
    signer: Arc<dyn TransactionSigner>,
    /// Trove manager the liquidation is sent to
    trove_manager: Address,
    chain_id: u64,
    gas_limit: u64,
    gas_policy: GasPolicy,
    confirmation_timeout: Duration,
    receipt_poll_interval: Duration,
    in_flight: Mutex<HashMap<PositionId, Slot>>,
    /// Held from nonce read to broadcast so overlapping submissions never
    /// share a nonce.
    nonce_lock: tokio::sync::Mutex<()>,
}

impl LiquidationExecutor {
    pub fn new(
        chain: Arc<dyn ChainDataPort>,
        signer: Arc<dyn TransactionSigner>,
        trove_manager: Address,
        config: &AgentConfig,
    ) -> Self {
        Self {
            chain,
            signer,
            trove_manager,
            chain_id: config.execution.chain_id,
            gas_limit: config.execution.gas_limit,
            gas_policy: config.execution.gas_policy(),
            confirmation_timeout: config.execution.confirmation_timeout(),
            receipt_poll_interval: config.execution.receipt_poll_interval(),
            in_flight: Mutex::new(HashMap::new()),
            nonce_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Whether `position` has a reserved or outstanding attempt.
    pub fn is_in_flight(&self, position: PositionId) -> bool {
        self.in_flight.lock().contains_key(&position)
    }

    /// Snapshot of every broadcast attempt still in flight.
    pub fn in_flight(&self) -> Vec<SubmissionAttempt> {
        self.in_flight
            .lock()
            .values()
            .filter_map(|slot| match slot {
                Slot::Submitted(attempt) => Some(attempt.clone()),
                Slot::Reserving => None,
            })
            .collect()
    }

    /// Operator escape hatch for an attempt that cannot be reconciled.
    pub fn release(&self, position: PositionId) -> Option<SubmissionAttempt> {
        match self.in_flight.lock().remove(&position) {
            Some(Slot::Submitted(attempt)) => {
                warn!(
                    user = %position,
                    tx_hash = %attempt.tx_hash,
                    nonce = attempt.nonce,
                    "In-flight attempt released"
                );
                Some(attempt)
            }
            _ => None,
        }
    }

    /// Broadcast one liquidation for `position`.
    ///
    /// On `Ok` the node has acknowledged the transaction and the attempt is
    /// Pending. On `Err` nothing was broadcast and the slot is free again
    /// (except for [`SubmitError::AlreadyInFlight`], which never touched it).
    #[instrument(skip(self), fields(user = %position))]
    pub async fn submit(&self, position: PositionId) -> Result<Submission, SubmitError> {
        let mut reservation = self.reserve(position)?;

        let _nonce_guard = self.nonce_lock.lock().await;
        let account = self.signer.address();
        let nonce = self.chain.nonce(account).await?;
        let quote = self.gas_policy.quote(self.chain.gas_price().await?);

        let request = LiquidationRequest {
            position,
            to: self.trove_manager,
            calldata: encode_liquidation(position),
            nonce,
            gas_price: quote.gas_price,
            gas_limit: self.gas_limit,
            chain_id: self.chain_id,
        };
        let signed = self.signer.sign(&request).await.map_err(SubmitError::Fatal)?;

        let tx_hash = match self.chain.submit_transaction(&signed).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!(user = %position, nonce = nonce, error = %e, "Liquidation broadcast failed");
                return Err(e.into());
            }
        };

        let attempt = SubmissionAttempt {
            position,
            nonce,
            gas_price: quote.gas_price,
            submitted_at: Utc::now(),
            tx_hash,
            outcome: AttemptOutcome::Pending,
        };
        self.in_flight.lock().insert(position, Slot::Submitted(attempt));
        reservation.armed = false;

        info!(
            user = %position,
            tx_hash = %tx_hash,
            nonce = nonce,
            gas_gwei = quote.gas_price / 1_000_000_000,
            capped = quote.capped,
            "Liquidation submitted"
        );

        Ok(Submission {
            position,
            tx_hash,
            nonce,
            gas_price: quote.gas_price,
        })
    }

    /// Wait for the receipt of `submission`, up to the confirmation timeout.
    #[instrument(
        skip(self, submission),
        fields(user = %submission.position, tx_hash = %submission.tx_hash)
    )]
    pub async fn await_confirmation(&self, submission: &Submission) -> Outcome {
        let receipt = tokio::time::timeout(
            self.confirmation_timeout,
            self.poll_receipt(submission.tx_hash),
        )
        .await;

        match receipt {
            Ok(receipt) => self.resolve(submission.position, submission.tx_hash, receipt),
            Err(_) => {
                self.set_outcome(submission.position, submission.tx_hash, AttemptOutcome::Timeout);
                error!(
                    user = %submission.position,
                    tx_hash = %submission.tx_hash,
                    nonce = submission.nonce,
                    timeout_secs = self.confirmation_timeout.as_secs(),
                    "Liquidation unconfirmed after timeout, position stays in flight"
                );
                Outcome::Timeout
            }
        }
    }

    /// Re-check every timed-out attempt against the chain.
    ///
    /// A receipt resolves the attempt. A mined nonce past the attempt's with
    /// still no receipt means it was replaced. Anything else stays put.
    pub async fn reconcile_timed_out(&self) -> Vec<(PositionId, Reconciled)> {
        let timed_out: Vec<SubmissionAttempt> = self
            .in_flight()
            .into_iter()
            .filter(|a| a.outcome == AttemptOutcome::Timeout)
            .collect();

        let mut resolved = Vec::new();
        for attempt in timed_out {
            match self.reconcile(&attempt).await {
                Ok(Some(result)) => resolved.push((attempt.position, result)),
                Ok(None) => {
                    debug!(
                        user = %attempt.position,
                        tx_hash = %attempt.tx_hash,
                        "Timed-out attempt still unresolved"
                    );
                }
                Err(e) => {
                    warn!(user = %attempt.position, error = %e, "Reconciliation check failed");
                }
            }
        }
        resolved
    }

    async fn reconcile(
        &self,
        attempt: &SubmissionAttempt,
    ) -> Result<Option<Reconciled>, trove_chain::ChainError> {
        if let Some(receipt) = self.chain.receipt(attempt.tx_hash).await? {
            return Ok(Some(self.reconciled(attempt, receipt)));
        }

        let mined = self.chain.mined_nonce(self.signer.address()).await?;
        if mined <= attempt.nonce {
            return Ok(None);
        }

        // Our transaction may have been mined between the two reads.
        if let Some(receipt) = self.chain.receipt(attempt.tx_hash).await? {
            return Ok(Some(self.reconciled(attempt, receipt)));
        }

        self.clear(attempt.position, attempt.tx_hash);
        info!(
            user = %attempt.position,
            tx_hash = %attempt.tx_hash,
            nonce = attempt.nonce,
            mined_nonce = mined,
            "Timed-out liquidation was replaced; position released"
        );
        Ok(Some(Reconciled::Replaced))
    }

    fn reconciled(&self, attempt: &SubmissionAttempt, receipt: Receipt) -> Reconciled {
        match self.resolve(attempt.position, attempt.tx_hash, receipt) {
            Outcome::Confirmed(r) => Reconciled::Confirmed(r),
            Outcome::RejectedStale(r) => Reconciled::RejectedStale(r),
            Outcome::Timeout => Reconciled::Replaced,
        }
    }

    fn reserve(&self, position: PositionId) -> Result<Reservation<'_>, SubmitError> {
        let mut map = self.in_flight.lock();
        if map.contains_key(&position) {
            return Err(SubmitError::AlreadyInFlight(position));
        }
        map.insert(position, Slot::Reserving);
        Ok(Reservation {
            in_flight: &self.in_flight,
            position,
            armed: true,
        })
    }

    /// Poll until a receipt shows up. Read errors are retried.
    async fn poll_receipt(&self, tx_hash: B256) -> Receipt {
        loop {
            match self.chain.receipt(tx_hash).await {
                Ok(Some(receipt)) => return receipt,
                Ok(None) => {}
                Err(e) => warn!(tx_hash = %tx_hash, error = %e, "Receipt poll failed"),
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }

    fn resolve(&self, position: PositionId, tx_hash: B256, receipt: Receipt) -> Outcome {
        self.clear(position, tx_hash);
        if receipt.success {
            info!(
                user = %position,
                tx_hash = %tx_hash,
                block = receipt.block_number,
                gas_used = receipt.gas_used,
                "Liquidation confirmed"
            );
            Outcome::Confirmed(receipt)
        } else {
            info!(
                user = %position,
                tx_hash = %tx_hash,
                block = receipt.block_number,
                "Liquidation reverted (position already liquidated or recovered)"
            );
            Outcome::RejectedStale(receipt)
        }
    }

    /// Remove the slot if it still belongs to `tx_hash`.
    fn clear(&self, position: PositionId, tx_hash: B256) {
        let mut map = self.in_flight.lock();
        if matches!(map.get(&position), Some(Slot::Submitted(a)) if a.tx_hash == tx_hash) {
            map.remove(&position);
        }
    }

    fn set_outcome(&self, position: PositionId, tx_hash: B256, outcome: AttemptOutcome) {
        if let Some(Slot::Submitted(attempt)) = self.in_flight.lock().get_mut(&position) {
            if attempt.tx_hash == tx_hash {
                attempt.outcome = outcome;
            }
        }
    }
}

impl std::fmt::Debug for LiquidationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiquidationExecutor")
            .field("trove_manager", &self.trove_manager)
            .field("chain_id", &self.chain_id)
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{user, MockChain, MockSigner, Mining};
    use alloy::sol_types::SolCall;
    use trove_chain::{ChainError, ITroveManager};

    const TROVE_MANAGER: Address = Address::repeat_byte(0x77);

    fn executor(chain: &Arc<MockChain>, signer: &Arc<MockSigner>) -> Arc<LiquidationExecutor> {
        let mut config = AgentConfig::testing();
        config.execution.confirmation_timeout_secs = 10;
        config.execution.receipt_poll_interval_ms = 500;
        config.execution.max_gas_price_gwei = 50.0;
        Arc::new(LiquidationExecutor::new(
            chain.clone(),
            signer.clone(),
            TROVE_MANAGER,
            &config,
        ))
    }

    fn setup() -> (Arc<MockChain>, Arc<MockSigner>, Arc<LiquidationExecutor>) {
        let chain = Arc::new(MockChain::new());
        let signer = Arc::new(MockSigner::new());
        let executor = executor(&chain, &signer);
        (chain, signer, executor)
    }

    #[tokio::test]
    async fn test_submit_builds_single_position_liquidation() {
        let (chain, signer, executor) = setup();
        let id = user(0x01);

        let submission = executor.submit(id).await.unwrap();

        let requests = signer.signed();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.to, TROVE_MANAGER);
        assert_eq!(request.nonce, 7);
        assert_eq!(request.chain_id, 31337);
        let call = ITroveManager::liquidateCall::abi_decode(&request.calldata, true).unwrap();
        assert_eq!(call.borrower, id);

        assert_eq!(chain.submitted().len(), 1);
        assert_eq!(submission.tx_hash, chain.submitted()[0].hash);
        assert!(executor.is_in_flight(id));
        let attempts = executor.in_flight();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].outcome, AttemptOutcome::Pending);
        assert_eq!(attempts[0].nonce, 7);
    }

    #[tokio::test]
    async fn test_gas_price_is_capped() {
        let (chain, signer, executor) = setup();
        chain.state().gas_price = 400_000_000_000;

        executor.submit(user(0x01)).await.unwrap();
        assert_eq!(signer.signed()[0].gas_price, 50_000_000_000);
    }

    #[tokio::test]
    async fn test_second_submit_while_in_flight_is_refused() {
        let (chain, _signer, executor) = setup();
        let id = user(0x01);

        executor.submit(id).await.unwrap();
        let second = executor.submit(id).await;

        assert!(matches!(second, Err(SubmitError::AlreadyInFlight(p)) if p == id));
        assert_eq!(chain.submitted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_submits_reach_send_path_once() {
        let (chain, _signer, executor) = setup();
        chain.state().submit_delay = Duration::from_millis(300);
        let id = user(0x01);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let executor = executor.clone();
            handles.push(tokio::spawn(async move { executor.submit(id).await }));
        }

        let mut ok = 0;
        let mut refused = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(SubmitError::AlreadyInFlight(_)) => refused += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(refused, 7);
        assert_eq!(chain.submitted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_submits_use_distinct_nonces() {
        let (chain, _signer, executor) = setup();
        chain.state().submit_delay = Duration::from_millis(300);

        let (a, b) = tokio::join!(executor.submit(user(0x01)), executor.submit(user(0x02)));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.nonce, b.nonce);
        assert_eq!(chain.submitted().len(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_failure_releases_slot() {
        let (chain, _signer, executor) = setup();
        chain
            .state()
            .submit_failures
            .push_back(ChainError::Transport("connection reset".into()));
        let id = user(0x01);

        let result = executor.submit(id).await;
        assert!(matches!(result, Err(SubmitError::Transient(_))));
        assert!(!executor.is_in_flight(id));
        assert_eq!(chain.state().pending_nonce, 7);

        // Retry goes through with the same, unconsumed nonce.
        let submission = executor.submit(id).await.unwrap();
        assert_eq!(submission.nonce, 7);
    }

    #[tokio::test]
    async fn test_confirmed_clears_in_flight() {
        let (chain, _signer, executor) = setup();
        chain.state().mining = Mining::Immediately { success: true };
        let id = user(0x01);

        let submission = executor.submit(id).await.unwrap();
        let outcome = executor.await_confirmation(&submission).await;

        assert!(matches!(outcome, Outcome::Confirmed(ref r) if r.tx_hash == submission.tx_hash));
        assert!(!executor.is_in_flight(id));
    }

    #[tokio::test]
    async fn test_revert_is_rejected_stale_and_clears() {
        let (chain, _signer, executor) = setup();
        chain.state().mining = Mining::Immediately { success: false };
        let id = user(0x01);

        let submission = executor.submit(id).await.unwrap();
        let outcome = executor.await_confirmation(&submission).await;

        assert!(matches!(outcome, Outcome::RejectedStale(_)));
        assert!(!executor.is_in_flight(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receipt_arriving_later_is_picked_up() {
        let (chain, _signer, executor) = setup();
        let submission = executor.submit(user(0x01)).await.unwrap();

        let miner = chain.clone();
        let hash = submission.tx_hash;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            miner.mine(hash, true);
        });

        let outcome = executor.await_confirmation(&submission).await;
        assert!(matches!(outcome, Outcome::Confirmed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_position_in_flight() {
        let (chain, _signer, executor) = setup();
        let id = user(0x01);

        let submission = executor.submit(id).await.unwrap();
        let outcome = executor.await_confirmation(&submission).await;

        assert_eq!(outcome, Outcome::Timeout);
        assert!(executor.is_in_flight(id));
        assert_eq!(executor.in_flight()[0].outcome, AttemptOutcome::Timeout);
        assert!(matches!(executor.submit(id).await, Err(SubmitError::AlreadyInFlight(_))));
        assert_eq!(chain.submitted().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_late_receipt() {
        let (chain, _signer, executor) = setup();
        let id = user(0x01);
        let submission = executor.submit(id).await.unwrap();
        assert_eq!(executor.await_confirmation(&submission).await, Outcome::Timeout);

        // Still nothing on chain: stays in flight.
        assert!(executor.reconcile_timed_out().await.is_empty());
        assert!(executor.is_in_flight(id));

        chain.mine(submission.tx_hash, false);
        let resolved = executor.reconcile_timed_out().await;
        assert_eq!(resolved.len(), 1);
        assert!(matches!(resolved[0], (p, Reconciled::RejectedStale(_)) if p == id));
        assert!(!executor.is_in_flight(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_replaced_nonce() {
        let (chain, _signer, executor) = setup();
        let id = user(0x01);
        let submission = executor.submit(id).await.unwrap();
        assert_eq!(executor.await_confirmation(&submission).await, Outcome::Timeout);

        // Some other transaction from our account consumed the nonce.
        chain.state().mined_nonce = submission.nonce + 1;

        let resolved = executor.reconcile_timed_out().await;
        assert_eq!(resolved, vec![(id, Reconciled::Replaced)]);
        assert!(!executor.is_in_flight(id));
    }

    #[tokio::test]
    async fn test_reconcile_ignores_pending_attempts() {
        let (_chain, _signer, executor) = setup();
        let id = user(0x01);
        executor.submit(id).await.unwrap();

        assert!(executor.reconcile_timed_out().await.is_empty());
        assert!(executor.is_in_flight(id));
    }

    #[tokio::test]
    async fn test_release() {
        let (_chain, _signer, executor) = setup();
        let id = user(0x01);
        let submission = executor.submit(id).await.unwrap();

        let released = executor.release(id).unwrap();
        assert_eq!(released.tx_hash, submission.tx_hash);
        assert!(!executor.is_in_flight(id));
        assert!(executor.release(id).is_none());
    }
}
