use std::fmt;

use serde::{Deserialize, Serialize};
use slabond_core::{Address, Digest, ItemId, UnixSeconds};
use slabond_ledger::BlockRef;

/// What happened to the tracked item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Registration,
    Pickup,
    DeliveryConfirmation,
    Dispute,
    Cancellation,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Pickup => "pickup",
            Self::DeliveryConfirmation => "delivery_confirmation",
            Self::Dispute => "dispute",
            Self::Cancellation => "cancellation",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One-shot value that prevents a time-proof request from being replayed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProofNonce(pub [u8; 32]);

impl ProofNonce {
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<u64> for ProofNonce {
    fn from(n: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&n.to_be_bytes());
        Self(bytes)
    }
}

impl fmt::Display for ProofNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ProofNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProofNonce(0x{})", hex::encode(&self.0[..6]))
    }
}

/// Input of [`TimeProofRegistry::generate`](crate::TimeProofRegistry::generate).
#[derive(Debug, Clone)]
pub struct ProofRequest {
    pub subject_id: ItemId,
    pub event_kind: EventKind,
    /// The time authority asking for the proof.
    pub requester: Address,
    /// Time the authority claims the event happened.
    pub attested_time: UnixSeconds,
    /// Opaque certificates, leaf first.
    pub certificate_chain: Vec<Vec<u8>>,
    pub nonce: ProofNonce,
}

/// A recorded time-proof.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeProof {
    pub proof_hash: Digest,
    pub subject_id: ItemId,
    pub event_kind: EventKind,
    pub requester: Address,
    pub attested_time: UnixSeconds,
    pub commit_time: UnixSeconds,
    /// Ledger head at generation; its height is the commit sequence.
    pub block: BlockRef,
    /// Block hashes from `block` backwards, then the merkle root binding them
    /// to `proof_hash`.
    pub proof_path: Vec<Digest>,
    pub attestation: Vec<u8>,
    pub certificate_chain: Vec<Vec<u8>>,
    pub nonce: ProofNonce,
    /// Cached outcome of the first verification.
    pub verification: Option<VerificationResult>,
}

impl TimeProof {
    pub fn commit_sequence(&self) -> u64 {
        self.block.height
    }

    pub fn is_verified(&self) -> bool {
        self.verification.as_ref().is_some_and(|v| v.valid)
    }

    pub fn hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.proof_hash))
    }
}

/// Result of time-proof verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// All checks passed.
    pub valid: bool,
    pub checks: Vec<VerificationCheck>,
}

impl VerificationResult {
    pub fn from_checks(checks: Vec<VerificationCheck>) -> Self {
        Self {
            valid: checks.iter().all(|c| c.passed),
            checks,
        }
    }

    pub fn check(&self, name: &str) -> Option<&VerificationCheck> {
        self.checks.iter().find(|c| c.name == name)
    }
}

/// An individual verification check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCheck {
    pub name: String,
    pub passed: bool,
    /// Why the check failed.
    pub detail: Option<String>,
}

impl VerificationCheck {
    pub fn new(name: &str, passed: bool, failure: impl FnOnce() -> String) -> Self {
        Self {
            name: name.into(),
            passed,
            detail: if passed { None } else { Some(failure()) },
        }
    }
}
