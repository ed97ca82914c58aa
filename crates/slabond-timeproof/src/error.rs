use slabond_core::{Address, UnixSeconds};

use crate::types::ProofNonce;

/// Time-proof generation and verification errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeProofError {
    #[error("{0} is not an authorized time authority")]
    Unauthorized(Address),

    #[error("nonce {0} was already consumed")]
    Replay(ProofNonce),

    #[error("attested time {attested} is more than {tolerance}s from commit time {commit}")]
    ClockSkew {
        attested: UnixSeconds,
        commit: UnixSeconds,
        tolerance: i64,
    },

    #[error("certificate chain is empty")]
    EmptyChain,

    #[error("time-proof not found: {0}")]
    NotFound(String),

    #[error("attestation failed: {0}")]
    Attestation(String),
}

impl From<slabond_crypto::CryptoError> for TimeProofError {
    fn from(err: slabond_crypto::CryptoError) -> Self {
        Self::Attestation(err.to_string())
    }
}
