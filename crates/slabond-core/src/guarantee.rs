use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::sla::SlaStatus;
use crate::state_machine::GuaranteeStatus;
use crate::types::{Address, Denomination, Digest, GuaranteeId, ItemId, UnixSeconds};

/// A delivery guarantee as held by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guarantee {
    /// Unique identifier.
    pub id: GuaranteeId,
    /// The tracked item this guarantee covers.
    pub item_id: ItemId,
    /// Promised completion deadline.
    pub deadline: UnixSeconds,
    /// Penalty promised on breach (minor units).
    pub penalty_amount: u128,
    /// Upper bound on lockable escrow; `0` means uncapped.
    pub insurance_ceiling: u128,
    /// Escrow actually locked (minor units). Immutable after creation.
    pub escrow_amount: u128,
    /// Asset the escrow is locked in.
    pub denomination: Denomination,
    /// Owning customer.
    pub customer: Address,
    /// Lifecycle status.
    pub status: GuaranteeStatus,
    /// When the guarantee was created.
    pub created_at: UnixSeconds,
    /// When the item was completed, once known.
    pub completed_at: Option<UnixSeconds>,
    /// Content hash of the off-ledger contract terms.
    pub terms_hash: Digest,
    /// Who is notified on emergencies. Never empty.
    pub escalation_contacts: Vec<Address>,
    /// Completion must cite a verified delivery time-proof.
    pub requires_proof: bool,
    /// One-way flag: set when the escrow was paid out as a penalty.
    pub penalty_paid: bool,
    /// Last SLA classification observed for this guarantee.
    pub sla_status: SlaStatus,
    /// Hash of the most recent time-proof stamping a transition.
    pub last_proof: Option<Digest>,
}

impl Guarantee {
    /// The fields committed to the ledger for this guarantee.
    pub fn committed_view(&self) -> CommittedGuarantee {
        CommittedGuarantee {
            id: self.id,
            subject_id: self.item_id.clone(),
            deadline: self.deadline,
            penalty_amount: self.penalty_amount,
            escrow_amount: self.escrow_amount,
            customer: self.customer,
            status: self.status,
            created_at: self.created_at,
            completed_at: self.completed_at,
            terms_hash: self.terms_hash,
            escalation_contacts: self.escalation_contacts.clone(),
            requires_proof: self.requires_proof,
            penalty_paid: self.penalty_paid,
        }
    }
}

/// Per-guarantee state layout as committed to the ledger.
///
/// Amounts are integer minor units, timestamps are seconds since epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedGuarantee {
    pub id: GuaranteeId,
    pub subject_id: ItemId,
    pub deadline: UnixSeconds,
    pub penalty_amount: u128,
    pub escrow_amount: u128,
    pub customer: Address,
    pub status: GuaranteeStatus,
    pub created_at: UnixSeconds,
    pub completed_at: Option<UnixSeconds>,
    pub terms_hash: Digest,
    pub escalation_contacts: Vec<Address>,
    pub requires_proof: bool,
    pub penalty_paid: bool,
}

/// Inbound request to create a guarantee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuaranteeRequest {
    pub id: GuaranteeId,
    pub item_id: ItemId,
    pub deadline: UnixSeconds,
    pub penalty_amount: u128,
    pub insurance_ceiling: u128,
    pub locked_amount: u128,
    pub denomination: Denomination,
    pub customer: Address,
    pub terms_hash: Digest,
    pub escalation_contacts: Vec<Address>,
    pub requires_proof: bool,
}

impl GuaranteeRequest {
    /// Create a new GuaranteeRequestBuilder.
    pub fn builder() -> GuaranteeRequestBuilder {
        GuaranteeRequestBuilder::default()
    }

    /// Validate the request against the current time.
    pub fn validate(&self, now: UnixSeconds) -> Result<(), CoreError> {
        if self.deadline <= now {
            return Err(CoreError::ValidationError(format!(
                "deadline {} is not in the future (now {})",
                self.deadline, now
            )));
        }
        if self.penalty_amount == 0 {
            return Err(CoreError::InvalidAmount(
                "penalty must be greater than zero".into(),
            ));
        }
        if self.escalation_contacts.is_empty() {
            return Err(CoreError::ValidationError(
                "at least one escalation contact is required".into(),
            ));
        }
        if self.locked_amount < self.penalty_amount {
            return Err(CoreError::InvalidAmount(format!(
                "locked amount {} is below penalty {}",
                self.locked_amount, self.penalty_amount
            )));
        }
        if self.insurance_ceiling > 0 && self.locked_amount > self.insurance_ceiling {
            return Err(CoreError::InvalidAmount(format!(
                "locked amount {} exceeds insurance ceiling {}",
                self.locked_amount, self.insurance_ceiling
            )));
        }
        Ok(())
    }

    /// Turn a validated request into a fresh ACTIVE guarantee.
    pub fn into_guarantee(self, now: UnixSeconds, sla_status: SlaStatus) -> Guarantee {
        Guarantee {
            id: self.id,
            item_id: self.item_id,
            deadline: self.deadline,
            penalty_amount: self.penalty_amount,
            insurance_ceiling: self.insurance_ceiling,
            escrow_amount: self.locked_amount,
            denomination: self.denomination,
            customer: self.customer,
            status: GuaranteeStatus::Active,
            created_at: now,
            completed_at: None,
            terms_hash: self.terms_hash,
            escalation_contacts: self.escalation_contacts,
            requires_proof: self.requires_proof,
            penalty_paid: false,
            sla_status,
            last_proof: None,
        }
    }
}

/// Builder for constructing GuaranteeRequest instances.
#[derive(Default)]
pub struct GuaranteeRequestBuilder {
    id: Option<GuaranteeId>,
    item_id: Option<ItemId>,
    deadline: Option<UnixSeconds>,
    penalty_amount: u128,
    insurance_ceiling: u128,
    locked_amount: Option<u128>,
    denomination: Denomination,
    customer: Option<Address>,
    terms_hash: Digest,
    escalation_contacts: Vec<Address>,
    requires_proof: bool,
}

impl GuaranteeRequestBuilder {
    /// Use a caller-chosen identifier instead of a random one.
    pub fn id(mut self, id: GuaranteeId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn item(mut self, item_id: ItemId) -> Self {
        self.item_id = Some(item_id);
        self
    }

    pub fn deadline(mut self, deadline: UnixSeconds) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn penalty(mut self, amount: u128) -> Self {
        self.penalty_amount = amount;
        self
    }

    pub fn insurance_ceiling(mut self, amount: u128) -> Self {
        self.insurance_ceiling = amount;
        self
    }

    /// Amount to lock in escrow.
    pub fn escrow(mut self, amount: u128) -> Self {
        self.locked_amount = Some(amount);
        self
    }

    pub fn denomination(mut self, denomination: Denomination) -> Self {
        self.denomination = denomination;
        self
    }

    pub fn customer(mut self, customer: Address) -> Self {
        self.customer = Some(customer);
        self
    }

    /// Hash the off-ledger terms document with BLAKE3.
    pub fn terms(mut self, terms: &[u8]) -> Self {
        self.terms_hash = *blake3::hash(terms).as_bytes();
        self
    }

    pub fn terms_hash(mut self, hash: Digest) -> Self {
        self.terms_hash = hash;
        self
    }

    /// Add an escalation contact.
    pub fn contact(mut self, contact: Address) -> Self {
        self.escalation_contacts.push(contact);
        self
    }

    pub fn requires_proof(mut self, required: bool) -> Self {
        self.requires_proof = required;
        self
    }

    /// Build the request. Semantic checks happen in [`GuaranteeRequest::validate`].
    pub fn build(self) -> Result<GuaranteeRequest, CoreError> {
        let item_id = self
            .item_id
            .ok_or_else(|| CoreError::MissingField("item_id".into()))?;
        let deadline = self
            .deadline
            .ok_or_else(|| CoreError::MissingField("deadline".into()))?;
        let customer = self
            .customer
            .ok_or_else(|| CoreError::MissingField("customer".into()))?;
        let locked_amount = self
            .locked_amount
            .ok_or_else(|| CoreError::MissingField("locked_amount".into()))?;

        Ok(GuaranteeRequest {
            id: self.id.unwrap_or_else(GuaranteeId::random),
            item_id,
            deadline,
            penalty_amount: self.penalty_amount,
            insurance_ceiling: self.insurance_ceiling,
            locked_amount,
            denomination: self.denomination,
            customer,
            terms_hash: self.terms_hash,
            escalation_contacts: self.escalation_contacts,
            requires_proof: self.requires_proof,
        })
    }
}
