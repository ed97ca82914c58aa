use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use serde::Serialize;
use slabond_core::{
    Address, Alert, AlertReason, Clock, CommittedGuarantee, Digest, EngineConfig, Guarantee,
    GuaranteeEvent, GuaranteeId, GuaranteeRequest, GuaranteeStateMachine, GuaranteeStatus,
    SlaPolicy, SlaStatus, UnixSeconds,
};
use slabond_ledger::{
    DispatchError, Dispatcher, EscrowRelease, LedgerError, RejectCode, ReleaseReason,
    SubmissionReceipt, TxPayload,
};
use slabond_timeproof::{EventKind, TimeProofError, TimeProofRegistry, TimeStamper};

use crate::alert::AlertSink;
use crate::error::EngineError;
use crate::escrow::{EscrowBook, EscrowRecord};
use crate::stats::PerformanceAggregate;

/// Outcome of one SLA evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlaEvaluation {
    pub guarantee_id: GuaranteeId,
    pub previous: SlaStatus,
    pub current: SlaStatus,
    /// An alert was raised by this evaluation.
    pub alerted: bool,
}

impl SlaEvaluation {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

/// A decided transition, ready to be committed.
struct Plan {
    action: &'static str,
    to: GuaranteeStatus,
    completed_at: Option<UnixSeconds>,
    sla_status: SlaStatus,
    penalty_paid: bool,
    release: Option<EscrowRelease>,
    stamp: EventKind,
    cited_proof: Option<Digest>,
}

/// Guarantee lifecycle engine.
///
/// Every mutating operation runs under the guarantee's own async lock, held
/// across the ledger commit, so decide, commit and apply form one unit.
/// The mirror is only changed after the ledger accepted the transition.
pub struct GuaranteeEngine {
    config: EngineConfig,
    policy: SlaPolicy,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<Dispatcher>,
    records: DashMap<GuaranteeId, Guarantee>,
    locks: DashMap<GuaranteeId, Arc<tokio::sync::Mutex<()>>>,
    escrow: EscrowBook,
    stats: Mutex<PerformanceAggregate>,
    alerts: Arc<dyn AlertSink>,
    stamper: Option<TimeStamper>,
    proofs: Option<Arc<TimeProofRegistry>>,
}

impl GuaranteeEngine {
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<Dispatcher>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let policy = config.sla_policy();
        Self {
            config,
            policy,
            clock,
            dispatcher,
            records: DashMap::new(),
            locks: DashMap::new(),
            escrow: EscrowBook::new(),
            stats: Mutex::new(PerformanceAggregate::default()),
            alerts,
            stamper: None,
            proofs: None,
        }
    }

    /// Registry used to verify time-proofs cited by completions.
    pub fn with_time_proofs(mut self, registry: Arc<TimeProofRegistry>) -> Self {
        self.proofs = Some(registry);
        self
    }

    /// Stamp every successful transition with the stamper's authority.
    ///
    /// Also uses the stamper's registry for verification unless one was set.
    pub fn with_stamper(mut self, stamper: TimeStamper) -> Self {
        if self.proofs.is_none() {
            self.proofs = Some(Arc::clone(stamper.registry()));
        }
        self.stamper = Some(stamper);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn time_proofs(&self) -> Option<&Arc<TimeProofRegistry>> {
        self.proofs.as_ref()
    }

    // ---- Queries ----

    pub fn get(&self, id: &GuaranteeId) -> Option<Guarantee> {
        self.records.get(id).map(|entry| entry.clone())
    }

    pub fn escrow(&self, id: &GuaranteeId) -> Option<EscrowRecord> {
        self.escrow.get(id)
    }

    pub fn escrow_book(&self) -> &EscrowBook {
        &self.escrow
    }

    pub fn stats(&self) -> PerformanceAggregate {
        lock(&self.stats).clone()
    }

    /// Identifiers of every ACTIVE guarantee.
    pub fn active_ids(&self) -> Vec<GuaranteeId> {
        self.records
            .iter()
            .filter(|entry| entry.status == GuaranteeStatus::Active)
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // ---- Lifecycle ----

    /// Create a guarantee and lock its escrow.
    pub async fn create(&self, request: GuaranteeRequest) -> Result<GuaranteeId, EngineError> {
        let id = request.id;
        let now = self.clock.now();
        request
            .validate(now)
            .map_err(|err| EngineError::from_core(Some(id), err))?;

        let slot = self.slot(&id);
        let _guard = slot.lock().await;

        if self.records.contains_key(&id) {
            return Err(EngineError::Duplicate(id));
        }

        let sla = self.policy.classify_pending(request.deadline, now);
        let mut guarantee = request.into_guarantee(now, sla);
        let committed = guarantee.committed_view();
        let payload = TxPayload::CreateGuarantee {
            guarantee: committed.clone(),
            denomination: guarantee.denomination,
        };

        match self.commit(&id, payload).await {
            Ok(_) => {}
            Err(EngineError::Duplicate(_)) => {
                // An earlier attempt may have landed before its response was lost.
                let on_ledger = self.read_committed(&id).await?;
                if on_ledger.as_ref() != Some(&committed) {
                    return Err(EngineError::Duplicate(id));
                }
                tracing::info!(guarantee_id = %id, "Creation already committed; adopting");
            }
            Err(err) => return Err(err),
        }

        self.escrow
            .lock(id, guarantee.escrow_amount, guarantee.denomination, now)?;
        guarantee.last_proof = self.stamp(&guarantee, EventKind::Registration, now);

        tracing::info!(
            guarantee_id = %id,
            item = %guarantee.item_id,
            customer = %guarantee.customer,
            escrow = guarantee.escrow_amount,
            deadline = guarantee.deadline,
            "Guarantee created"
        );
        self.records.insert(id, guarantee);
        Ok(id)
    }

    /// Record completion of the covered item.
    ///
    /// `on_time` selects FULFILLED (refund) or BREACHED (penalty payout).
    pub async fn record_completion(
        &self,
        id: &GuaranteeId,
        actual: UnixSeconds,
        on_time: bool,
    ) -> Result<GuaranteeStatus, EngineError> {
        let slot = self.existing_slot(id)?;
        let _guard = slot.lock().await;
        let current = self.snapshot(id)?;
        self.complete_locked(current, actual, on_time, None).await
    }

    /// Record completion, deriving `on_time` from the inclusive deadline.
    pub async fn record_delivery(
        &self,
        id: &GuaranteeId,
        actual: UnixSeconds,
    ) -> Result<GuaranteeStatus, EngineError> {
        let slot = self.existing_slot(id)?;
        let _guard = slot.lock().await;
        let current = self.snapshot(id)?;
        let on_time = SlaPolicy::is_on_time(current.deadline, actual);
        self.complete_locked(current, actual, on_time, None).await
    }

    /// Record completion at the time attested by a delivery time-proof.
    pub async fn record_completion_with_proof(
        &self,
        id: &GuaranteeId,
        proof_hash: &Digest,
    ) -> Result<GuaranteeStatus, EngineError> {
        let registry = self.proofs.as_ref().ok_or_else(|| {
            EngineError::validation(Some(*id), "time-proof verification is not configured")
        })?;

        let slot = self.existing_slot(id)?;
        let _guard = slot.lock().await;
        let current = self.snapshot(id)?;
        self.ensure_status(&current, GuaranteeStatus::Active, "record completion")?;

        let proof = registry
            .get(proof_hash)
            .ok_or_else(|| TimeProofError::NotFound(hex::encode(proof_hash)))?;
        if proof.subject_id != current.item_id {
            return Err(EngineError::validation(
                Some(*id),
                format!(
                    "time-proof covers item {}, not {}",
                    proof.subject_id, current.item_id
                ),
            ));
        }
        if proof.event_kind != EventKind::DeliveryConfirmation {
            return Err(EngineError::validation(
                Some(*id),
                format!("time-proof records {}, not a delivery", proof.event_kind),
            ));
        }

        let verification = registry.verify(proof_hash)?;
        if !verification.valid {
            let failed: Vec<&str> = verification
                .checks
                .iter()
                .filter(|c| !c.passed)
                .map(|c| c.name.as_str())
                .collect();
            return Err(EngineError::validation(
                Some(*id),
                format!("time-proof failed verification: {}", failed.join(", ")),
            ));
        }

        let actual = proof.attested_time;
        let on_time = SlaPolicy::is_on_time(current.deadline, actual);
        self.complete_locked(current, actual, on_time, Some(*proof_hash))
            .await
    }

    /// Cancel an ACTIVE guarantee and refund its escrow to the customer.
    pub async fn cancel(
        &self,
        id: &GuaranteeId,
        requester: &Address,
    ) -> Result<GuaranteeStatus, EngineError> {
        let slot = self.existing_slot(id)?;
        let _guard = slot.lock().await;
        let current = self.snapshot(id)?;

        if *requester != current.customer {
            return Err(EngineError::Unauthorized {
                id: *id,
                principal: *requester,
            });
        }
        if current.completed_at.is_some() {
            return Err(self.invalid_state(&current, "cancel"));
        }
        let to = self.next_status(&current, GuaranteeEvent::Cancelled, "cancel")?;
        let release = self
            .escrow
            .plan_release(id, current.customer, ReleaseReason::Cancelled)?;

        let plan = Plan {
            action: "cancel",
            to,
            completed_at: None,
            sla_status: current.sla_status,
            penalty_paid: false,
            release: Some(release),
            stamp: EventKind::Cancellation,
            cited_proof: None,
        };
        let updated = self.execute(current, plan).await?;
        Ok(updated.status)
    }

    /// Dispute a FULFILLED or BREACHED outcome. Moves no funds.
    pub async fn dispute(
        &self,
        id: &GuaranteeId,
        requester: &Address,
        reason: &str,
    ) -> Result<GuaranteeStatus, EngineError> {
        let slot = self.existing_slot(id)?;
        let _guard = slot.lock().await;
        let current = self.snapshot(id)?;

        if *requester != current.customer && !self.config.is_administrator(requester) {
            return Err(EngineError::Unauthorized {
                id: *id,
                principal: *requester,
            });
        }
        let to = self.next_status(&current, GuaranteeEvent::Disputed, "dispute")?;

        let plan = Plan {
            action: "dispute",
            to,
            completed_at: current.completed_at,
            sla_status: current.sla_status,
            penalty_paid: current.penalty_paid,
            release: None,
            stamp: EventKind::Dispute,
            cited_proof: None,
        };
        let updated = self.execute(current, plan).await?;

        let alert = Self::build_alert(
            &updated,
            AlertReason::Disputed(reason.to_string()),
            self.clock.now(),
        );
        // The dispute itself is committed, so the contacts hear about it even
        // when the alert record does not land.
        if let Err(err) = self.emit_alert(alert.clone()).await {
            tracing::error!(guarantee_id = %id, error = %err, "Dispute alert not committed");
            self.alerts.notify(&alert);
        }
        Ok(updated.status)
    }

    /// Notify the escalation contacts and record the alert on the ledger.
    pub async fn raise_alert(
        &self,
        id: &GuaranteeId,
        reason: AlertReason,
    ) -> Result<Alert, EngineError> {
        let slot = self.existing_slot(id)?;
        let _guard = slot.lock().await;
        let current = self.snapshot(id)?;
        self.emit_alert(Self::build_alert(&current, reason, self.clock.now()))
            .await
    }

    /// Recompute the SLA of a guarantee and alert on a change into AT_RISK or DELAYED.
    pub async fn observe_sla(&self, id: &GuaranteeId) -> Result<SlaEvaluation, EngineError> {
        let slot = self.existing_slot(id)?;
        let _guard = slot.lock().await;
        let current = self.snapshot(id)?;
        let previous = current.sla_status;

        if current.status != GuaranteeStatus::Active {
            return Ok(SlaEvaluation {
                guarantee_id: *id,
                previous,
                current: previous,
                alerted: false,
            });
        }

        let now = self.clock.now();
        let next = self.policy.classify_pending(current.deadline, now);
        if next == previous {
            return Ok(SlaEvaluation {
                guarantee_id: *id,
                previous,
                current: next,
                alerted: false,
            });
        }

        let alerted = next.is_alerting();
        // Only remember the new status once its alert has landed, so a failed
        // alert is retried by the next evaluation.
        if alerted {
            let reason = if next == SlaStatus::Delayed {
                AlertReason::SlaDelayed
            } else {
                AlertReason::SlaAtRisk
            };
            self.emit_alert(Self::build_alert(&current, reason, now))
                .await?;
        }
        if let Some(mut record) = self.records.get_mut(id) {
            record.sla_status = next;
        }
        tracing::info!(guarantee_id = %id, from = %previous, to = %next, "SLA status changed");

        Ok(SlaEvaluation {
            guarantee_id: *id,
            previous,
            current: next,
            alerted,
        })
    }

    /// Align the mirror with the ledger's committed status.
    ///
    /// Used when an ambiguous submission turns out to have landed.
    pub async fn reconcile(&self, id: &GuaranteeId) -> Result<GuaranteeStatus, EngineError> {
        let slot = self.existing_slot(id)?;
        let _guard = slot.lock().await;
        self.reconcile_locked(id).await
    }

    // ---- Internals ----

    async fn complete_locked(
        &self,
        current: Guarantee,
        actual: UnixSeconds,
        on_time: bool,
        cited_proof: Option<Digest>,
    ) -> Result<GuaranteeStatus, EngineError> {
        let id = current.id;
        self.ensure_status(&current, GuaranteeStatus::Active, "record completion")?;

        if actual < current.created_at {
            return Err(EngineError::validation(
                Some(id),
                format!(
                    "completion at {} predates creation at {}",
                    actual, current.created_at
                ),
            ));
        }
        if current.requires_proof && cited_proof.is_none() {
            return Err(EngineError::validation(
                Some(id),
                "completion must cite a delivery time-proof",
            ));
        }
        if on_time && !SlaPolicy::is_on_time(current.deadline, actual) {
            return Err(EngineError::validation(
                Some(id),
                format!(
                    "completion at {} is after deadline {} but claimed on time",
                    actual, current.deadline
                ),
            ));
        }

        let (event, reason) = if on_time {
            (GuaranteeEvent::CompletedOnTime, ReleaseReason::Fulfilled)
        } else {
            (GuaranteeEvent::CompletedLate, ReleaseReason::Penalty)
        };
        let to = self.next_status(&current, event, "record completion")?;
        let release = self.escrow.plan_release(&id, current.customer, reason)?;

        let plan = Plan {
            action: "record completion",
            to,
            completed_at: Some(actual),
            sla_status: self
                .policy
                .classify_completion(current.deadline, actual, on_time),
            penalty_paid: !on_time,
            release: Some(release),
            stamp: EventKind::DeliveryConfirmation,
            cited_proof,
        };
        let updated = self.execute(current, plan).await?;
        Ok(updated.status)
    }

    /// Commit `plan` and apply it to the mirror.
    async fn execute(&self, current: Guarantee, plan: Plan) -> Result<Guarantee, EngineError> {
        let id = current.id;
        let payload = TxPayload::Transition {
            id,
            from: current.status,
            to: plan.to,
            completed_at: plan.completed_at,
            penalty_paid: plan.penalty_paid,
            release: plan.release.clone(),
        };

        match self.commit(&id, payload).await {
            Ok(_) => {}
            Err(EngineError::AlreadyReleased(_)) => {
                tracing::warn!(
                    guarantee_id = %id,
                    "Ledger reports escrow already released; reconciling"
                );
                self.reconcile_locked(&id).await?;
                return Err(EngineError::AlreadyReleased(id));
            }
            Err(EngineError::Ledger { source, .. })
                if source.reject_code() == Some(RejectCode::InvalidState) =>
            {
                let status = self.reconcile_locked(&id).await?;
                if status == plan.to {
                    tracing::info!(guarantee_id = %id, status = %status, "Transition already committed");
                    return self.snapshot(&id);
                }
                return Err(EngineError::InvalidState {
                    id,
                    status,
                    action: plan.action,
                });
            }
            Err(err) => return Err(err),
        }

        let now = self.clock.now();
        self.apply_transition(&id, &plan, now)
    }

    /// Apply a committed transition to the mirror, escrow and counters.
    fn apply_transition(
        &self,
        id: &GuaranteeId,
        plan: &Plan,
        now: UnixSeconds,
    ) -> Result<Guarantee, EngineError> {
        if let Some(release) = &plan.release {
            self.escrow.release(id, release, self.config.operator, now)?;
        }

        let item = self.snapshot(id)?;
        let proof = plan
            .cited_proof
            .or_else(|| self.stamp(&item, plan.stamp, now));

        let updated = {
            let mut record = self
                .records
                .get_mut(id)
                .ok_or(EngineError::NotFound(*id))?;
            let from = record.status;
            record.status = plan.to;
            record.completed_at = plan.completed_at;
            record.sla_status = plan.sla_status;
            record.penalty_paid = record.penalty_paid || plan.penalty_paid;
            if proof.is_some() {
                record.last_proof = proof;
            }
            tracing::info!(
                guarantee_id = %id,
                from = %from,
                to = %plan.to,
                sla = %plan.sla_status,
                "Guarantee transitioned"
            );
            record.clone()
        };

        let mut stats = lock(&self.stats);
        match plan.to {
            GuaranteeStatus::Fulfilled => stats.record_on_time(),
            GuaranteeStatus::Breached => {
                let paid = plan.release.as_ref().map(|r| r.amount).unwrap_or(0);
                stats.record_breach(paid);
            }
            GuaranteeStatus::Cancelled => stats.record_cancelled(),
            GuaranteeStatus::Active | GuaranteeStatus::Disputed => {}
        }
        Ok(updated)
    }

    async fn reconcile_locked(&self, id: &GuaranteeId) -> Result<GuaranteeStatus, EngineError> {
        let current = self.snapshot(id)?;
        let Some(committed) = self.read_committed(id).await? else {
            tracing::warn!(guarantee_id = %id, "Guarantee not found on ledger during reconcile");
            return Ok(current.status);
        };

        let now = self.clock.now();
        let mut status = current.status;
        while status != committed.status {
            let next = match (status, committed.status) {
                (GuaranteeStatus::Active, GuaranteeStatus::Disputed) => {
                    if committed.penalty_paid {
                        GuaranteeStatus::Breached
                    } else {
                        GuaranteeStatus::Fulfilled
                    }
                }
                (GuaranteeStatus::Active, target) => target,
                (GuaranteeStatus::Fulfilled | GuaranteeStatus::Breached, GuaranteeStatus::Disputed) => {
                    GuaranteeStatus::Disputed
                }
                _ => {
                    tracing::error!(
                        guarantee_id = %id,
                        mirror = %status,
                        ledger = %committed.status,
                        "Mirror diverges from ledger"
                    );
                    return Err(EngineError::InvalidState {
                        id: *id,
                        status,
                        action: "reconcile",
                    });
                }
            };

            let completed_at = committed.completed_at;
            let plan = match next {
                GuaranteeStatus::Fulfilled | GuaranteeStatus::Breached => {
                    let on_time = next == GuaranteeStatus::Fulfilled;
                    let reason = if on_time {
                        ReleaseReason::Fulfilled
                    } else {
                        ReleaseReason::Penalty
                    };
                    Plan {
                        action: "reconcile",
                        to: next,
                        completed_at,
                        sla_status: self.policy.classify_completion(
                            current.deadline,
                            completed_at.unwrap_or(now),
                            on_time,
                        ),
                        penalty_paid: !on_time,
                        release: Some(self.escrow.plan_release(id, current.customer, reason)?),
                        stamp: EventKind::DeliveryConfirmation,
                        cited_proof: None,
                    }
                }
                GuaranteeStatus::Cancelled => Plan {
                    action: "reconcile",
                    to: next,
                    completed_at: None,
                    sla_status: current.sla_status,
                    penalty_paid: false,
                    release: Some(self.escrow.plan_release(
                        id,
                        current.customer,
                        ReleaseReason::Cancelled,
                    )?),
                    stamp: EventKind::Cancellation,
                    cited_proof: None,
                },
                _ => Plan {
                    action: "reconcile",
                    to: next,
                    completed_at,
                    sla_status: self.snapshot(id)?.sla_status,
                    penalty_paid: committed.penalty_paid,
                    release: None,
                    stamp: EventKind::Dispute,
                    cited_proof: None,
                },
            };

            self.apply_transition(id, &plan, now)?;
            tracing::info!(guarantee_id = %id, status = %next, "Reconciled with ledger");
            status = next;
        }
        Ok(status)
    }

    fn build_alert(guarantee: &Guarantee, reason: AlertReason, now: UnixSeconds) -> Alert {
        Alert {
            guarantee_id: guarantee.id,
            reason,
            timestamp: now,
            notified_contacts: guarantee.escalation_contacts.clone(),
        }
    }

    /// Record the alert on the ledger, then notify the contacts.
    async fn emit_alert(&self, alert: Alert) -> Result<Alert, EngineError> {
        self.commit(&alert.guarantee_id, TxPayload::Alert(alert.clone()))
            .await?;
        self.alerts.notify(&alert);
        tracing::warn!(
            guarantee_id = %alert.guarantee_id,
            reason = %alert.reason,
            contacts = alert.notified_contacts.len(),
            "Emergency alert raised"
        );
        Ok(alert)
    }

    async fn commit(
        &self,
        id: &GuaranteeId,
        payload: TxPayload,
    ) -> Result<SubmissionReceipt, EngineError> {
        match self.dispatcher.submit(&self.config.operator, payload).await {
            Ok(receipt) => Ok(receipt),
            Err(DispatchError::SubmissionFailed {
                attempts,
                last_cause,
            }) => {
                tracing::error!(
                    guarantee_id = %id,
                    attempts,
                    error = %last_cause,
                    "Ledger submission exhausted retries"
                );
                Err(EngineError::SubmissionFailed {
                    id: *id,
                    attempts,
                    last_cause,
                })
            }
            Err(DispatchError::Rejected(source)) => Err(match source.reject_code() {
                Some(RejectCode::Duplicate) => EngineError::Duplicate(*id),
                Some(RejectCode::AlreadyReleased) => EngineError::AlreadyReleased(*id),
                Some(RejectCode::NotFound) => EngineError::NotFound(*id),
                _ => EngineError::Ledger { id: *id, source },
            }),
            Err(DispatchError::ConfirmationTimeout(tx_ref)) => Err(EngineError::Ledger {
                id: *id,
                source: LedgerError::Timeout(format!("confirmation of {}", tx_ref)),
            }),
        }
    }

    async fn read_committed(
        &self,
        id: &GuaranteeId,
    ) -> Result<Option<CommittedGuarantee>, EngineError> {
        self.dispatcher
            .ledger()
            .read_state(id)
            .await
            .map_err(|source| EngineError::Ledger { id: *id, source })
    }

    fn stamp(&self, guarantee: &Guarantee, kind: EventKind, now: UnixSeconds) -> Option<Digest> {
        let stamper = self.stamper.as_ref()?;
        match stamper.stamp(&guarantee.item_id, kind, now) {
            Ok(hash) => Some(hash),
            Err(err) => {
                tracing::warn!(
                    guarantee_id = %guarantee.id,
                    kind = %kind,
                    error = %err,
                    "Transition not stamped"
                );
                None
            }
        }
    }

    fn next_status(
        &self,
        current: &Guarantee,
        event: GuaranteeEvent,
        action: &'static str,
    ) -> Result<GuaranteeStatus, EngineError> {
        GuaranteeStateMachine::transition(current.status, event)
            .map_err(|_| self.invalid_state(current, action))
    }

    fn ensure_status(
        &self,
        current: &Guarantee,
        expected: GuaranteeStatus,
        action: &'static str,
    ) -> Result<(), EngineError> {
        if current.status != expected {
            return Err(self.invalid_state(current, action));
        }
        Ok(())
    }

    fn invalid_state(&self, current: &Guarantee, action: &'static str) -> EngineError {
        EngineError::InvalidState {
            id: current.id,
            status: current.status,
            action,
        }
    }

    fn snapshot(&self, id: &GuaranteeId) -> Result<Guarantee, EngineError> {
        self.get(id).ok_or(EngineError::NotFound(*id))
    }

    fn slot(&self, id: &GuaranteeId) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.locks.entry(*id).or_default().value())
    }

    fn existing_slot(&self, id: &GuaranteeId) -> Result<Arc<tokio::sync::Mutex<()>>, EngineError> {
        if !self.records.contains_key(id) {
            return Err(EngineError::NotFound(*id));
        }
        Ok(self.slot(id))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
