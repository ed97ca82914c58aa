use std::fmt;

use slabond_core::{Address, CoreError, GuaranteeEvent, GuaranteeId, GuaranteeStatus};
use slabond_ledger::LedgerError;
use slabond_timeproof::TimeProofError;

/// Coarse classification of an [`EngineError`] for callers rendering a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Duplicate,
    InvalidState,
    Unauthorized,
    AlreadyReleased,
    Replay,
    ClockSkew,
    EmptyChain,
    NotFound,
    SubmissionFailed,
    Ledger,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Duplicate => "duplicate",
            Self::InvalidState => "invalid_state",
            Self::Unauthorized => "unauthorized",
            Self::AlreadyReleased => "already_released",
            Self::Replay => "replay",
            Self::ClockSkew => "clock_skew",
            Self::EmptyChain => "empty_chain",
            Self::NotFound => "not_found",
            Self::SubmissionFailed => "submission_failed",
            Self::Ledger => "ledger",
        };
        write!(f, "{}", s)
    }
}

/// Errors returned by engine operations. None are retried by the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {message}")]
    Validation {
        subject: Option<GuaranteeId>,
        message: String,
    },

    #[error("guarantee {0} already exists")]
    Duplicate(GuaranteeId),

    #[error("guarantee {id} is {status}: cannot {action}")]
    InvalidState {
        id: GuaranteeId,
        status: GuaranteeStatus,
        action: &'static str,
    },

    #[error("{principal} may not act on guarantee {id}")]
    Unauthorized { id: GuaranteeId, principal: Address },

    #[error("escrow of guarantee {0} was already released")]
    AlreadyReleased(GuaranteeId),

    #[error("guarantee not found: {0}")]
    NotFound(GuaranteeId),

    #[error("time-proof error: {0}")]
    TimeProof(#[from] TimeProofError),

    #[error("ledger submission for {id} failed after {attempts} attempts: {last_cause}")]
    SubmissionFailed {
        id: GuaranteeId,
        attempts: u32,
        last_cause: LedgerError,
    },

    #[error("ledger rejected {id}: {source}")]
    Ledger { id: GuaranteeId, source: LedgerError },
}

impl EngineError {
    pub fn validation(subject: Option<GuaranteeId>, message: impl Into<String>) -> Self {
        Self::Validation {
            subject,
            message: message.into(),
        }
    }

    /// Map a core error about `subject`. Amount and field errors are validation failures.
    pub fn from_core(subject: Option<GuaranteeId>, err: CoreError) -> Self {
        match (err, subject) {
            (CoreError::InvalidStateTransition { from, event }, Some(id)) => Self::InvalidState {
                id,
                status: from,
                action: match event {
                    GuaranteeEvent::CompletedOnTime | GuaranteeEvent::CompletedLate => {
                        "record completion"
                    }
                    GuaranteeEvent::Cancelled => "cancel",
                    GuaranteeEvent::Disputed => "dispute",
                },
            },
            (err, subject) => Self::validation(subject, err.to_string()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Duplicate(_) => ErrorKind::Duplicate,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::AlreadyReleased(_) => ErrorKind::AlreadyReleased,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::TimeProof(err) => match err {
                TimeProofError::Unauthorized(_) => ErrorKind::Unauthorized,
                TimeProofError::Replay(_) => ErrorKind::Replay,
                TimeProofError::ClockSkew { .. } => ErrorKind::ClockSkew,
                TimeProofError::EmptyChain => ErrorKind::EmptyChain,
                TimeProofError::NotFound(_) => ErrorKind::NotFound,
                TimeProofError::Attestation(_) => ErrorKind::Validation,
            },
            Self::SubmissionFailed { .. } => ErrorKind::SubmissionFailed,
            Self::Ledger { .. } => ErrorKind::Ledger,
        }
    }

    /// Identifier of the guarantee or time-proof the error is about.
    pub fn subject(&self) -> Option<String> {
        match self {
            Self::Validation { subject, .. } => subject.map(|id| id.to_hex()),
            Self::Duplicate(id) | Self::AlreadyReleased(id) | Self::NotFound(id) => {
                Some(id.to_hex())
            }
            Self::InvalidState { id, .. }
            | Self::Unauthorized { id, .. }
            | Self::SubmissionFailed { id, .. }
            | Self::Ledger { id, .. } => Some(id.to_hex()),
            Self::TimeProof(TimeProofError::NotFound(hash)) => Some(format!("0x{}", hash)),
            Self::TimeProof(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_subject() {
        let id = GuaranteeId::from_bytes(&[1u8; 32]).unwrap();
        let err = EngineError::InvalidState {
            id,
            status: GuaranteeStatus::Fulfilled,
            action: "record completion",
        };
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(err.subject(), Some(id.to_hex()));
        assert!(err.to_string().contains("FULFILLED"));

        let err = EngineError::validation(None, "deadline in the past");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.subject(), None);
    }

    #[test]
    fn test_from_core() {
        let id = GuaranteeId::random();
        let err = EngineError::from_core(Some(id), CoreError::InvalidAmount("ceiling".into()));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.subject(), Some(id.to_hex()));
    }

    #[test]
    fn test_time_proof_kinds() {
        let err: EngineError = TimeProofError::EmptyChain.into();
        assert_eq!(err.kind(), ErrorKind::EmptyChain);

        let err: EngineError = TimeProofError::NotFound("ab".into()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.subject().as_deref(), Some("0xab"));
    }
}
