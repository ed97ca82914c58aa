use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use slabond_core::{Address, Denomination, GuaranteeId, UnixSeconds};
use slabond_ledger::{EscrowRelease, ReleaseReason};

use crate::error::EngineError;

/// Escrow locked for one guarantee.
///
/// `released` only ever moves false -> true, and a release always pays out
/// exactly `amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub guarantee_id: GuaranteeId,
    pub amount: u128,
    pub denomination: Denomination,
    pub locked_at: UnixSeconds,
    pub released: bool,
    pub released_at: Option<UnixSeconds>,
    /// Identity that authorised the release.
    pub releaser: Option<Address>,
    pub recipient: Option<Address>,
    pub reason: Option<ReleaseReason>,
}

/// In-engine mirror of the escrow held on the ledger.
///
/// Thread-safe: uses `DashMap` for concurrent access.
pub struct EscrowBook {
    records: DashMap<GuaranteeId, EscrowRecord>,
}

impl EscrowBook {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Record newly locked escrow.
    pub fn lock(
        &self,
        id: GuaranteeId,
        amount: u128,
        denomination: Denomination,
        now: UnixSeconds,
    ) -> Result<(), EngineError> {
        if self.records.contains_key(&id) {
            return Err(EngineError::Duplicate(id));
        }
        self.records.insert(
            id,
            EscrowRecord {
                guarantee_id: id,
                amount,
                denomination,
                locked_at: now,
                released: false,
                released_at: None,
                releaser: None,
                recipient: None,
                reason: None,
            },
        );
        tracing::debug!(guarantee_id = %id, amount, "Escrow locked");
        Ok(())
    }

    /// Build the release instruction for a guarantee without applying it.
    pub fn plan_release(
        &self,
        id: &GuaranteeId,
        recipient: Address,
        reason: ReleaseReason,
    ) -> Result<EscrowRelease, EngineError> {
        let record = self.records.get(id).ok_or(EngineError::NotFound(*id))?;
        if record.released {
            tracing::warn!(guarantee_id = %id, "Escrow release requested twice");
            return Err(EngineError::AlreadyReleased(*id));
        }
        Ok(EscrowRelease {
            amount: record.amount,
            denomination: record.denomination,
            recipient,
            reason,
        })
    }

    /// Mark the escrow released. Fails if it already was.
    pub fn release(
        &self,
        id: &GuaranteeId,
        release: &EscrowRelease,
        releaser: Address,
        now: UnixSeconds,
    ) -> Result<EscrowRecord, EngineError> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or(EngineError::NotFound(*id))?;

        let record = entry.value_mut();

        if record.released {
            tracing::warn!(guarantee_id = %id, "Escrow release rejected: already released");
            return Err(EngineError::AlreadyReleased(*id));
        }
        if release.amount != record.amount {
            return Err(EngineError::validation(
                Some(*id),
                format!(
                    "release of {} does not match locked {}",
                    release.amount, record.amount
                ),
            ));
        }

        record.released = true;
        record.released_at = Some(now);
        record.releaser = Some(releaser);
        record.recipient = Some(release.recipient);
        record.reason = Some(release.reason);
        tracing::info!(
            guarantee_id = %id,
            amount = record.amount,
            recipient = %release.recipient,
            reason = %release.reason,
            "Escrow released"
        );
        Ok(record.clone())
    }

    pub fn get(&self, id: &GuaranteeId) -> Option<EscrowRecord> {
        self.records.get(id).map(|entry| entry.clone())
    }

    pub fn total_locked(&self) -> u128 {
        self.records.iter().map(|r| r.amount).sum()
    }

    pub fn total_released(&self) -> u128 {
        self.records
            .iter()
            .filter(|r| r.released)
            .map(|r| r.amount)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for EscrowBook {
    fn default() -> Self {
        Self::new()
    }
}
