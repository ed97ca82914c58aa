use async_trait::async_trait;
use slabond_core::{
    Address, Clock, CommittedGuarantee, Denomination, GuaranteeId, GuaranteeStateMachine,
    GuaranteeStatus,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::error::{LedgerError, RejectCode};
use crate::traits::{ChainView, LedgerClient};
use crate::types::{
    BlockRef, EscrowRelease, EventFilter, EventSubscription, LedgerEvent, LedgerEventKind,
    TxPayload, TxRef, TxStatus,
};

const EVENT_CAPACITY: usize = 1024;
const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// A failure the reference ledger plays back on the next submission.
#[derive(Debug, Clone)]
pub enum LedgerFault {
    /// Fail with this error without touching state.
    Fail(LedgerError),
    /// Apply the submission, then report a network timeout to the caller.
    LandThenTimeout,
}

/// A transaction waiting in the pool.
#[derive(Debug, Clone)]
struct PoolTx {
    tx_ref: TxRef,
    sender: Address,
    payload: TxPayload,
}

#[derive(Debug)]
struct LedgerState {
    blocks: Vec<BlockRef>,
    /// Transactions from each sender included in blocks.
    confirmed: HashMap<Address, u64>,
    pool: Vec<PoolTx>,
    txs: HashMap<TxRef, TxStatus>,
    guarantees: HashMap<GuaranteeId, CommittedGuarantee>,
    denominations: HashMap<GuaranteeId, Denomination>,
    releases: HashMap<GuaranteeId, EscrowRelease>,
    /// Balance tracker: (address, denomination display) -> signed balance.
    balances: HashMap<String, i128>,
}

impl LedgerState {
    fn head(&self) -> BlockRef {
        // `blocks` always holds at least the genesis block.
        self.blocks[self.blocks.len() - 1]
    }

    fn confirmed(&self, sender: &Address) -> u64 {
        self.confirmed.get(sender).copied().unwrap_or(0)
    }

    fn in_flight(&self, sender: &Address) -> u64 {
        self.pool.iter().filter(|tx| tx.sender == *sender).count() as u64
    }

    fn balance_key(address: &Address, denomination: &Denomination) -> String {
        format!("{}:{}", address, denomination)
    }

    /// Signed view of an amount for the balance tracker.
    fn signed(amount: u128) -> Result<i128, LedgerError> {
        i128::try_from(amount).map_err(|_| {
            LedgerError::rejected(
                RejectCode::Malformed,
                format!("amount {} exceeds the balance range", amount),
            )
        })
    }

    fn transfer(&mut self, from: &Address, to: &Address, denomination: &Denomination, amount: u128) {
        // `check` has already rejected amounts outside the i128 range.
        let value = Self::signed(amount).unwrap_or(i128::MAX);
        let debit = self
            .balances
            .entry(Self::balance_key(from, denomination))
            .or_insert(0);
        *debit = debit.saturating_sub(value);
        let credit = self
            .balances
            .entry(Self::balance_key(to, denomination))
            .or_insert(0);
        *credit = credit.saturating_add(value);
    }

    /// Validate a payload against committed state.
    fn check(&self, payload: &TxPayload) -> Result<(), LedgerError> {
        match payload {
            TxPayload::CreateGuarantee { guarantee, .. } => {
                if self.guarantees.contains_key(&guarantee.id) {
                    return Err(LedgerError::rejected(
                        RejectCode::Duplicate,
                        format!("guarantee {} already committed", guarantee.id),
                    ));
                }
                if guarantee.status != GuaranteeStatus::Active {
                    return Err(LedgerError::rejected(
                        RejectCode::InvalidState,
                        format!("new guarantee must be ACTIVE, got {}", guarantee.status),
                    ));
                }
                Self::signed(guarantee.escrow_amount)?;
                Ok(())
            }
            TxPayload::Transition {
                id,
                from,
                to,
                penalty_paid,
                release,
                ..
            } => {
                let committed = self.guarantees.get(id).ok_or_else(|| {
                    LedgerError::rejected(RejectCode::NotFound, format!("guarantee {}", id))
                })?;
                if release.is_some() && self.releases.contains_key(id) {
                    return Err(LedgerError::rejected(
                        RejectCode::AlreadyReleased,
                        format!("escrow of {} already released", id),
                    ));
                }
                if committed.status != *from || !GuaranteeStateMachine::is_edge(*from, *to) {
                    return Err(LedgerError::rejected(
                        RejectCode::InvalidState,
                        format!("{} cannot move {} -> {} (committed {})", id, from, to, committed.status),
                    ));
                }
                if committed.penalty_paid && !penalty_paid {
                    return Err(LedgerError::rejected(
                        RejectCode::InvalidState,
                        format!("penalty flag of {} cannot be cleared", id),
                    ));
                }
                if let Some(release) = release {
                    if release.amount != committed.escrow_amount {
                        return Err(LedgerError::rejected(
                            RejectCode::Malformed,
                            format!(
                                "release of {} does not match escrow {}",
                                release.amount, committed.escrow_amount
                            ),
                        ));
                    }
                }
                Ok(())
            }
            TxPayload::Alert(alert) => {
                if !self.guarantees.contains_key(&alert.guarantee_id) {
                    return Err(LedgerError::rejected(
                        RejectCode::NotFound,
                        format!("guarantee {}", alert.guarantee_id),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Apply a checked payload and return the events it emits.
    fn apply(&mut self, tx_ref: TxRef, height: u64, payload: &TxPayload, vault: &Address) -> Vec<LedgerEvent> {
        let event = |kind| LedgerEvent {
            height,
            tx_ref,
            kind,
        };
        match payload {
            TxPayload::CreateGuarantee {
                guarantee,
                denomination,
            } => {
                self.transfer(&guarantee.customer, vault, denomination, guarantee.escrow_amount);
                self.guarantees.insert(guarantee.id, guarantee.clone());
                self.denominations.insert(guarantee.id, *denomination);
                vec![event(LedgerEventKind::GuaranteeCreated {
                    id: guarantee.id,
                    customer: guarantee.customer,
                    escrow_amount: guarantee.escrow_amount,
                })]
            }
            TxPayload::Transition {
                id,
                from,
                to,
                completed_at,
                penalty_paid,
                release,
            } => {
                let mut events = Vec::with_capacity(2);
                if let Some(committed) = self.guarantees.get_mut(id) {
                    committed.status = *to;
                    if completed_at.is_some() {
                        committed.completed_at = *completed_at;
                    }
                    committed.penalty_paid |= *penalty_paid;
                }
                events.push(event(LedgerEventKind::StatusChanged {
                    id: *id,
                    from: *from,
                    to: *to,
                }));
                if let Some(release) = release {
                    self.transfer(vault, &release.recipient, &release.denomination, release.amount);
                    self.releases.insert(*id, release.clone());
                    events.push(event(LedgerEventKind::EscrowReleased {
                        id: *id,
                        amount: release.amount,
                        recipient: release.recipient,
                        reason: release.reason,
                    }));
                }
                events
            }
            TxPayload::Alert(alert) => vec![event(LedgerEventKind::AlertRaised(alert.clone()))],
        }
    }

    fn seal_block(&mut self, now: i64, tx_refs: &[TxRef]) -> BlockRef {
        let parent = self.head();
        let height = parent.height + 1;
        let timestamp = now.max(parent.timestamp);
        let mut fields: Vec<&[u8]> = Vec::with_capacity(3 + tx_refs.len());
        let height_bytes = height.to_be_bytes();
        let time_bytes = timestamp.to_be_bytes();
        fields.push(&parent.hash);
        fields.push(&height_bytes);
        fields.push(&time_bytes);
        fields.extend(tx_refs.iter().map(|tx| tx.0.as_slice()));
        let block = BlockRef {
            height,
            timestamp,
            hash: slabond_crypto::hash_fields(&fields),
            parent: parent.hash,
        };
        self.blocks.push(block);
        block
    }
}

/// In-process reference ledger.
///
/// Keeps per-sender sequence numbers, a transaction pool, a hash-linked block
/// list, the committed guarantee state and double-entry balances against an
/// escrow vault. With auto-mining on (the default) every accepted submission
/// is sealed into its own block immediately; otherwise transactions wait in
/// the pool until [`mine`](Self::mine).
pub struct InMemoryLedger {
    id: String,
    clock: Arc<dyn Clock>,
    vault: Address,
    state: Mutex<LedgerState>,
    events: broadcast::Sender<LedgerEvent>,
    auto_mine: AtomicBool,
    max_in_flight: u64,
    faults: Mutex<VecDeque<LedgerFault>>,
    latency_ms: AtomicU64,
    submissions: AtomicU64,
}

impl InMemoryLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let id = "ledger-memory".to_string();
        let genesis = BlockRef {
            height: 0,
            timestamp: clock.now(),
            hash: slabond_crypto::hash_fields(&[b"genesis", id.as_bytes()]),
            parent: [0u8; 32],
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id,
            clock,
            vault: Address::from_label("slabond-escrow-vault"),
            state: Mutex::new(LedgerState {
                blocks: vec![genesis],
                confirmed: HashMap::new(),
                pool: Vec::new(),
                txs: HashMap::new(),
                guarantees: HashMap::new(),
                denominations: HashMap::new(),
                releases: HashMap::new(),
                balances: HashMap::new(),
            }),
            events,
            auto_mine: AtomicBool::new(true),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT as u64,
            faults: Mutex::new(VecDeque::new()),
            latency_ms: AtomicU64::new(0),
            submissions: AtomicU64::new(0),
        }
    }

    /// Limit pooled transactions per sender.
    pub fn with_max_in_flight(mut self, max: u64) -> Self {
        self.max_in_flight = max;
        self
    }

    pub fn set_auto_mine(&self, enabled: bool) {
        self.auto_mine.store(enabled, Ordering::SeqCst);
    }

    /// Delay applied to every submission before it is processed.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Queue a fault for an upcoming submission (FIFO).
    pub fn inject_fault(&self, fault: LedgerFault) {
        lock(&self.faults).push_back(fault);
    }

    /// Total `submit` calls received, including failed ones.
    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Address holding locked escrow.
    pub fn vault(&self) -> Address {
        self.vault
    }

    pub fn balance(&self, address: &Address, denomination: &Denomination) -> i128 {
        let key = LedgerState::balance_key(address, denomination);
        self.state().balances.get(&key).copied().unwrap_or(0)
    }

    pub fn vault_balance(&self, denomination: &Denomination) -> i128 {
        self.balance(&self.vault, denomination)
    }

    /// The escrow release committed for a guarantee, if any.
    pub fn release_of(&self, id: &GuaranteeId) -> Option<EscrowRelease> {
        self.state().releases.get(id).cloned()
    }

    /// Sum of every committed escrow release.
    pub fn total_released(&self) -> u128 {
        self.state().releases.values().map(|r| r.amount).sum()
    }

    /// Seal every pooled transaction into one block.
    ///
    /// Transactions failing validation are included as failed. Returns the
    /// new head; an empty pool still produces an (empty) block.
    pub fn mine(&self) -> BlockRef {
        let now = self.clock.now();
        let (block, events) = {
            let mut state = self.state();
            let pool = std::mem::take(&mut state.pool);
            let height = state.head().height + 1;
            let mut events = Vec::new();
            let mut refs = Vec::with_capacity(pool.len());
            for tx in pool {
                *state.confirmed.entry(tx.sender).or_insert(0) += 1;
                let status = match state.check(&tx.payload) {
                    Ok(()) => {
                        events.extend(state.apply(tx.tx_ref, height, &tx.payload, &self.vault));
                        TxStatus::Confirmed { height }
                    }
                    Err(err) => {
                        tracing::warn!(tx_ref = %tx.tx_ref, error = %err, "Pooled transaction failed");
                        TxStatus::Failed {
                            reason: err.to_string(),
                        }
                    }
                };
                state.txs.insert(tx.tx_ref, status);
                refs.push(tx.tx_ref);
            }
            let block = state.seal_block(now, &refs);
            (block, events)
        };
        tracing::debug!(height = block.height, "Block sealed");
        self.publish(events);
        block
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        lock(&self.state)
    }

    fn publish(&self, events: Vec<LedgerEvent>) {
        for event in events {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }

    fn next_fault(&self) -> Option<LedgerFault> {
        lock(&self.faults).pop_front()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn submit(
        &self,
        payload: &TxPayload,
        sender: &Address,
        sequence: u64,
    ) -> Result<TxRef, LedgerError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.submissions.fetch_add(1, Ordering::SeqCst);

        let fault = self.next_fault();
        if let Some(LedgerFault::Fail(err)) = fault {
            tracing::debug!(sender = %sender, sequence, error = %err, "Injected ledger fault");
            return Err(err);
        }

        let bytes = payload.encode()?;
        let tx_ref = TxRef::compute(sender, sequence, &bytes);
        let now = self.clock.now();

        let events = {
            let mut state = self.state();
            let confirmed = state.confirmed(sender);
            let in_flight = state.in_flight(sender);
            let expected = confirmed + in_flight;

            if sequence < confirmed {
                return Err(LedgerError::SequenceTooLow {
                    sender: *sender,
                    submitted: sequence,
                    expected,
                });
            }
            if sequence < expected {
                return Err(LedgerError::ReplacementUnderpriced(sequence));
            }
            if sequence > expected {
                return Err(LedgerError::rejected(
                    RejectCode::SequenceGap,
                    format!("sequence {} skips ahead of {}", sequence, expected),
                ));
            }

            if self.auto_mine.load(Ordering::SeqCst) {
                state.check(payload)?;
                let height = state.head().height + 1;
                *state.confirmed.entry(*sender).or_insert(0) += 1;
                let events = state.apply(tx_ref, height, payload, &self.vault);
                state.seal_block(now, &[tx_ref]);
                state.txs.insert(tx_ref, TxStatus::Confirmed { height });
                events
            } else {
                if in_flight >= self.max_in_flight {
                    return Err(LedgerError::InFlightLimitExceeded(*sender));
                }
                state.pool.push(PoolTx {
                    tx_ref,
                    sender: *sender,
                    payload: payload.clone(),
                });
                state.txs.insert(tx_ref, TxStatus::Pending);
                Vec::new()
            }
        };

        tracing::debug!(
            tx_ref = %tx_ref,
            sender = %sender,
            sequence,
            kind = payload.kind(),
            "Transaction accepted"
        );
        self.publish(events);

        if matches!(fault, Some(LedgerFault::LandThenTimeout)) {
            return Err(LedgerError::Timeout(format!(
                "no response for {} after it was accepted",
                tx_ref
            )));
        }
        Ok(tx_ref)
    }

    async fn confirmed_count(&self, sender: &Address) -> Result<u64, LedgerError> {
        Ok(self.state().confirmed(sender))
    }

    async fn pending_count(&self, sender: &Address) -> Result<u64, LedgerError> {
        let state = self.state();
        Ok(state.confirmed(sender) + state.in_flight(sender))
    }

    async fn tx_status(&self, tx_ref: &TxRef) -> Result<TxStatus, LedgerError> {
        self.state()
            .txs
            .get(tx_ref)
            .cloned()
            .ok_or(LedgerError::TxNotFound(*tx_ref))
    }

    async fn read_state(
        &self,
        id: &GuaranteeId,
    ) -> Result<Option<CommittedGuarantee>, LedgerError> {
        Ok(self.state().guarantees.get(id).cloned())
    }

    fn subscribe(&self, filter: EventFilter) -> EventSubscription {
        EventSubscription::new(self.events.subscribe(), filter)
    }

    fn ledger_id(&self) -> &str {
        &self.id
    }
}

impl ChainView for InMemoryLedger {
    fn head(&self) -> BlockRef {
        self.state().head()
    }

    fn block(&self, height: u64) -> Option<BlockRef> {
        self.state().blocks.get(height as usize).copied()
    }
}
