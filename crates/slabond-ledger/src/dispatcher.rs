//! Reliable submission of engine decisions to the ledger.
//!
//! The ledger orders transactions from one sender by a monotonically
//! allocated sequence number. The [`Dispatcher`] serialises allocation and
//! submission per sender, retries the transient failure classes with
//! exponential backoff, and reports permanent rejections immediately.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use slabond_core::{Address, GuaranteeId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{DispatchError, FailureClass, LedgerError, RejectCode};
use crate::traits::LedgerClient;
use crate::types::{TxPayload, TxRef, TxStatus};

/// Retry and timeout policy of the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total submission attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff for network-class failures (milliseconds).
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// First backoff for contention-class failures (milliseconds).
    #[serde(default = "default_contention_backoff_ms")]
    pub contention_backoff_ms: u64,
    /// Upper bound of any single backoff (milliseconds).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Deadline of one attempt (milliseconds).
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Poll interval of [`Dispatcher::await_confirmation`] (milliseconds).
    #[serde(default = "default_confirmation_poll_ms")]
    pub confirmation_poll_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}
fn default_base_backoff_ms() -> u64 {
    200
}
fn default_contention_backoff_ms() -> u64 {
    1_000
}
fn default_max_backoff_ms() -> u64 {
    8_000
}
fn default_attempt_timeout_ms() -> u64 {
    10_000
}
fn default_confirmation_poll_ms() -> u64 {
    500
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            contention_backoff_ms: default_contention_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            confirmation_poll_ms: default_confirmation_poll_ms(),
        }
    }
}

impl RetryPolicy {
    /// Backoff slept before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32, class: FailureClass) -> Duration {
        let base = match class {
            FailureClass::Network => self.base_backoff_ms,
            FailureClass::Contention => self.contention_backoff_ms,
        };
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(base.saturating_mul(factor).min(self.max_backoff_ms))
    }

    /// Total backoff slept across `failures` consecutive failures of one class
    /// that end in success (or in exhaustion, when `failures == max_attempts`).
    pub fn schedule(&self, failures: u32, class: FailureClass) -> Duration {
        let retries = failures.min(self.max_attempts.saturating_sub(1));
        (1..=retries).map(|i| self.backoff(i, class)).sum()
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Upper bound on the wall time of one logical submission.
    pub fn max_elapsed(&self) -> Duration {
        Duration::from_millis(
            u64::from(self.max_attempts)
                .saturating_mul(self.max_backoff_ms.saturating_add(self.attempt_timeout_ms)),
        )
    }
}

/// Identifier of one logical submission (UUID v7, time-ordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionId(pub Uuid);

impl SubmissionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SubmissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decided transition not yet committed.
#[derive(Debug, Clone, Serialize)]
pub struct PendingSubmission {
    pub id: SubmissionId,
    pub sender: Address,
    pub guarantee_id: GuaranteeId,
    pub kind: &'static str,
    /// Sequence number of the current attempt, once allocated.
    pub sequence: Option<u64>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub queued_at: DateTime<Utc>,
}

/// Outcome of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub submission_id: SubmissionId,
    pub tx_ref: TxRef,
    pub sequence: u64,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Total time slept in backoff.
    pub backoff: Duration,
}

/// Per-sender allocation state.
#[derive(Debug, Default)]
struct SenderSlot {
    /// Lowest sequence number not known to be taken.
    floor: u64,
}

/// Removes a submission from the pending table when the call ends or is dropped.
struct PendingGuard<'a> {
    pending: &'a DashMap<SubmissionId, PendingSubmission>,
    id: SubmissionId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// Commits payloads to the ledger exactly once per successful call.
pub struct Dispatcher {
    ledger: Arc<dyn LedgerClient>,
    policy: RetryPolicy,
    senders: DashMap<Address, Arc<Mutex<SenderSlot>>>,
    pending: DashMap<SubmissionId, PendingSubmission>,
}

impl Dispatcher {
    pub fn new(ledger: Arc<dyn LedgerClient>, policy: RetryPolicy) -> Self {
        Self {
            ledger,
            policy,
            senders: DashMap::new(),
            pending: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerClient> {
        &self.ledger
    }

    /// Snapshot of submissions still in progress, oldest first.
    pub fn pending(&self) -> Vec<PendingSubmission> {
        let mut pending: Vec<PendingSubmission> =
            self.pending.iter().map(|entry| entry.value().clone()).collect();
        pending.sort_by_key(|p| p.id.0);
        pending
    }

    /// Submit `payload` from `sender`, retrying transient failures.
    ///
    /// Submissions from the same sender are serialised; different senders
    /// proceed concurrently.
    pub async fn submit(
        &self,
        sender: &Address,
        payload: TxPayload,
    ) -> Result<SubmissionReceipt, DispatchError> {
        let submission_id = SubmissionId::new();
        self.pending.insert(
            submission_id,
            PendingSubmission {
                id: submission_id,
                sender: *sender,
                guarantee_id: payload.guarantee_id(),
                kind: payload.kind(),
                sequence: None,
                retry_count: 0,
                last_error: None,
                queued_at: Utc::now(),
            },
        );

        let _tracked = PendingGuard {
            pending: &self.pending,
            id: submission_id,
        };

        let slot = self.sender_slot(sender);
        let mut slot = slot.lock().await;
        self.submit_locked(&mut slot, submission_id, sender, &payload)
            .await
    }

    async fn submit_locked(
        &self,
        slot: &mut SenderSlot,
        submission_id: SubmissionId,
        sender: &Address,
        payload: &TxPayload,
    ) -> Result<SubmissionReceipt, DispatchError> {
        let mut backoff = Duration::ZERO;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(
                self.policy.attempt_timeout(),
                self.attempt(slot, submission_id, sender, payload, attempt),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(LedgerError::Timeout(format!(
                    "attempt {} exceeded {:?}",
                    attempt,
                    self.policy.attempt_timeout()
                ))),
            };

            let err = match outcome {
                Ok((tx_ref, sequence)) => {
                    slot.floor = sequence + 1;
                    tracing::info!(
                        submission_id = %submission_id,
                        tx_ref = %tx_ref,
                        sequence,
                        attempts = attempt,
                        kind = payload.kind(),
                        "Submission committed"
                    );
                    return Ok(SubmissionReceipt {
                        submission_id,
                        tx_ref,
                        sequence,
                        attempts: attempt,
                        backoff,
                    });
                }
                Err(err) => err,
            };

            let Some(class) = err.failure_class() else {
                tracing::warn!(
                    submission_id = %submission_id,
                    kind = payload.kind(),
                    error = %err,
                    "Submission rejected"
                );
                return Err(DispatchError::Rejected(err));
            };

            if let Some(mut entry) = self.pending.get_mut(&submission_id) {
                entry.retry_count = attempt;
                entry.last_error = Some(err.to_string());
            }

            if attempt >= self.policy.max_attempts {
                tracing::error!(
                    submission_id = %submission_id,
                    attempts = attempt,
                    kind = payload.kind(),
                    error = %err,
                    "Submission failed, retries exhausted"
                );
                return Err(DispatchError::SubmissionFailed {
                    attempts: attempt,
                    last_cause: err,
                });
            }

            let delay = self.policy.backoff(attempt, class);
            tracing::warn!(
                submission_id = %submission_id,
                attempt,
                max_attempts = self.policy.max_attempts,
                class = ?class,
                "Submission failed, retrying in {delay:?}: {err}"
            );
            tokio::time::sleep(delay).await;
            backoff += delay;
        }
    }

    /// One allocation + submission round.
    async fn attempt(
        &self,
        slot: &mut SenderSlot,
        submission_id: SubmissionId,
        sender: &Address,
        payload: &TxPayload,
        attempt: u32,
    ) -> Result<(TxRef, u64), LedgerError> {
        let confirmed = self.ledger.confirmed_count(sender).await?;
        let in_pool = self.ledger.pending_count(sender).await?;
        let sequence = confirmed.max(in_pool).max(slot.floor);

        if let Some(mut entry) = self.pending.get_mut(&submission_id) {
            entry.sequence = Some(sequence);
        }
        tracing::debug!(
            submission_id = %submission_id,
            sender = %sender,
            sequence,
            attempt,
            "Submitting transaction"
        );

        match self.ledger.submit(payload, sender, sequence).await {
            Ok(tx_ref) => Ok((tx_ref, sequence)),
            Err(err) => {
                match &err {
                    LedgerError::SequenceTooLow { .. } | LedgerError::ReplacementUnderpriced(_) => {
                        slot.floor = slot.floor.max(sequence + 1);
                    }
                    LedgerError::Rejected {
                        code: RejectCode::SequenceGap,
                        ..
                    } => {
                        slot.floor = confirmed.max(in_pool);
                    }
                    _ => {}
                }
                Err(err)
            }
        }
    }

    /// Poll the ledger until `tx_ref` is included or `timeout` elapses.
    ///
    /// Giving up does not retract the transaction.
    pub async fn await_confirmation(
        &self,
        tx_ref: &TxRef,
        timeout: Duration,
    ) -> Result<u64, DispatchError> {
        let poll = Duration::from_millis(self.policy.confirmation_poll_ms.max(1));
        let wait = async {
            loop {
                match self.ledger.tx_status(tx_ref).await {
                    Ok(TxStatus::Confirmed { height }) => return Ok(height),
                    Ok(TxStatus::Failed { reason }) => {
                        return Err(DispatchError::Rejected(LedgerError::Rejected {
                            code: RejectCode::InvalidState,
                            message: reason,
                        }))
                    }
                    Ok(TxStatus::Pending) => {}
                    Err(err) if err.is_transient() => {
                        tracing::debug!(tx_ref = %tx_ref, error = %err, "Status poll failed");
                    }
                    Err(err) => return Err(DispatchError::Rejected(err)),
                }
                tokio::time::sleep(poll).await;
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(tx_ref = %tx_ref, "Stopped waiting for confirmation");
                Err(DispatchError::ConfirmationTimeout(*tx_ref))
            }
        }
    }

    fn sender_slot(&self, sender: &Address) -> Arc<Mutex<SenderSlot>> {
        Arc::clone(
            &self
                .senders
                .entry(*sender)
                .or_insert_with(|| Arc::new(Mutex::new(SenderSlot::default()))),
        )
    }
}
