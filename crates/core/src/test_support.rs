//! In-memory doubles for the chain, oracle and signer ports.

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::wad::parse_wad;
use trove_chain::{
    ChainDataPort, ChainError, LiquidationRequest, OracleError, Position, PositionId,
    PositionSnapshot, PositionStatus, PriceOracle, Receipt, SignedTransaction, TransactionSigner,
    TxHandle,
};

pub fn wad(s: &str) -> U256 {
    parse_wad(s).unwrap()
}

pub fn user(byte: u8) -> PositionId {
    Address::repeat_byte(byte)
}

pub fn active(id: PositionId, collateral: &str, debt: &str) -> Position {
    Position {
        id,
        collateral: wad(collateral),
        debt: wad(debt),
        status: PositionStatus::Active,
    }
}

/// What the mock chain does with an accepted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mining {
    /// Never mined.
    Never,
    /// Mined immediately with the given success flag.
    Immediately { success: bool },
}

#[derive(Debug)]
pub struct ChainState {
    /// Sorted list, worst first.
    pub sorted: Vec<PositionId>,
    pub positions: HashMap<PositionId, Position>,
    pub block: u64,
    pub pending_nonce: u64,
    pub mined_nonce: u64,
    pub gas_price: u128,
    pub mining: Mining,
    /// Errors returned by the next `submit_transaction` calls, in order.
    pub submit_failures: VecDeque<ChainError>,
    /// Errors returned by the next `worst_position_id` calls, in order.
    pub head_failures: VecDeque<ChainError>,
    pub submitted: Vec<SignedTransaction>,
    pub receipts: HashMap<B256, Receipt>,
    pub position_delay: Duration,
    pub submit_delay: Duration,
}

impl Default for ChainState {
    fn default() -> Self {
        Self {
            sorted: Vec::new(),
            positions: HashMap::new(),
            block: 100,
            pending_nonce: 7,
            mined_nonce: 7,
            gas_price: 20_000_000_000,
            mining: Mining::Never,
            submit_failures: VecDeque::new(),
            head_failures: VecDeque::new(),
            submitted: Vec::new(),
            receipts: HashMap::new(),
            position_delay: Duration::ZERO,
            submit_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Default)]
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain whose sorted list holds `positions` in the given order.
    pub fn with_positions(positions: Vec<Position>) -> Self {
        let chain = Self::new();
        {
            let mut state = chain.state();
            for p in positions {
                state.sorted.push(p.id);
                state.positions.insert(p.id, p);
            }
        }
        chain
    }

    pub fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock()
    }

    pub fn submitted(&self) -> Vec<SignedTransaction> {
        self.state().submitted.clone()
    }

    /// Mine a receipt for an already submitted transaction.
    pub fn mine(&self, hash: B256, success: bool) {
        let mut state = self.state();
        state.block += 1;
        state.mined_nonce += 1;
        let receipt = Receipt {
            tx_hash: hash,
            block_number: Some(state.block),
            success,
            gas_used: 250_000,
        };
        state.receipts.insert(hash, receipt);
    }
}

#[async_trait]
impl ChainDataPort for MockChain {
    async fn worst_position_id(&self) -> Result<Option<PositionId>, ChainError> {
        let mut state = self.state();
        if let Some(e) = state.head_failures.pop_front() {
            return Err(e);
        }
        Ok(state.sorted.first().copied())
    }

    async fn next_position_id(&self, id: PositionId) -> Result<Option<PositionId>, ChainError> {
        let state = self.state();
        let next = state
            .sorted
            .iter()
            .position(|p| *p == id)
            .and_then(|i| state.sorted.get(i + 1))
            .copied();
        Ok(next)
    }

    async fn position(&self, id: PositionId) -> Result<PositionSnapshot, ChainError> {
        let delay = self.state().position_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let state = self.state();
        let position = state.positions.get(&id).cloned().unwrap_or(Position {
            id,
            collateral: U256::ZERO,
            debt: U256::ZERO,
            status: PositionStatus::Nonexistent,
        });
        Ok(PositionSnapshot {
            position,
            block_number: state.block,
            observed_at: Instant::now(),
        })
    }

    async fn nonce(&self, _account: Address) -> Result<u64, ChainError> {
        Ok(self.state().pending_nonce)
    }

    async fn mined_nonce(&self, _account: Address) -> Result<u64, ChainError> {
        Ok(self.state().mined_nonce)
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        Ok(self.state().gas_price)
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        Ok(self.state().block)
    }

    async fn submit_transaction(&self, signed: &SignedTransaction) -> Result<TxHandle, ChainError> {
        let delay = self.state().submit_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mining = {
            let mut state = self.state();
            if let Some(e) = state.submit_failures.pop_front() {
                return Err(e);
            }
            state.submitted.push(signed.clone());
            state.pending_nonce += 1;
            state.mining
        };

        if let Mining::Immediately { success } = mining {
            self.mine(signed.hash, success);
        }
        Ok(signed.hash)
    }

    async fn receipt(&self, handle: TxHandle) -> Result<Option<Receipt>, ChainError> {
        Ok(self.state().receipts.get(&handle).cloned())
    }
}

#[derive(Debug)]
pub struct MockOracle {
    price: Mutex<U256>,
    failures: Mutex<VecDeque<OracleError>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl MockOracle {
    pub fn new(price: &str) -> Self {
        Self {
            price: Mutex::new(wad(price)),
            failures: Mutex::new(VecDeque::new()),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_price(&self, price: &str) {
        *self.price.lock() = wad(price);
    }

    pub fn fail_next(&self, error: OracleError) {
        self.failures.lock().push_back(error);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceOracle for MockOracle {
    async fn price(&self, _asset: &str) -> Result<U256, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = self.failures.lock().pop_front() {
            return Err(e);
        }
        Ok(*self.price.lock())
    }

    fn source_name(&self) -> &'static str {
        "mock"
    }
}

#[derive(Debug)]
pub struct MockSigner {
    address: Address,
    signed: Mutex<Vec<LiquidationRequest>>,
}

impl MockSigner {
    pub fn new() -> Self {
        Self {
            address: Address::repeat_byte(0x5e),
            signed: Mutex::new(Vec::new()),
        }
    }

    pub fn signed(&self) -> Vec<LiquidationRequest> {
        self.signed.lock().clone()
    }
}

#[async_trait]
impl TransactionSigner for MockSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, request: &LiquidationRequest) -> Result<SignedTransaction, ChainError> {
        self.signed.lock().push(request.clone());

        let mut preimage = request.calldata.to_vec();
        preimage.extend_from_slice(&request.nonce.to_be_bytes());
        preimage.extend_from_slice(&request.gas_price.to_be_bytes());
        Ok(SignedTransaction {
            hash: keccak256(&preimage),
            nonce: request.nonce,
            raw: Bytes::from(preimage),
        })
    }
}
