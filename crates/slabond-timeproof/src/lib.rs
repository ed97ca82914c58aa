//! SLABond time-proofs
//!
//! A time-proof binds an event about a tracked item (registration, pickup,
//! delivery confirmation, dispute) to a position in ledger history. It is
//! generated by an authorized time authority with a one-shot nonce, signed
//! through a pluggable [`Attestor`], and later verified against the ledger
//! and an [`AttestationVerifier`].

pub mod attestation;
pub mod error;
pub mod registry;
pub mod types;

pub use attestation::{AttestationVerifier, Attestor, Ed25519Attestor, Ed25519AttestationVerifier};
pub use error::TimeProofError;
pub use registry::{ProofSettings, TimeProofRegistry, TimeStamper};
pub use types::{EventKind, ProofNonce, ProofRequest, TimeProof, VerificationCheck, VerificationResult};
