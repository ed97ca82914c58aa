use std::fmt;

use serde::{Deserialize, Serialize};
use slabond_core::Address;

use crate::types::TxRef;

/// Why the ledger refused a transaction outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectCode {
    /// A guarantee with this identifier is already committed.
    Duplicate,
    /// The committed status does not match the transition's source status.
    InvalidState,
    /// The guarantee's escrow was already released.
    AlreadyReleased,
    /// The sender may not submit this transaction.
    Unauthorized,
    /// The referenced guarantee is not committed.
    NotFound,
    /// The sequence number skips ahead of the next expected one.
    SequenceGap,
    /// The payload could not be decoded.
    Malformed,
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Duplicate => "duplicate",
            Self::InvalidState => "invalid_state",
            Self::AlreadyReleased => "already_released",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::SequenceGap => "sequence_gap",
            Self::Malformed => "malformed",
        };
        write!(f, "{}", s)
    }
}

/// Retry tier of a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Sequence-number or pool contention; retried on the longer tier.
    Contention,
    /// Transport-level failure such as a timeout.
    Network,
}

/// Errors reported by a ledger client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("sequence {submitted} too low for {sender}: next expected {expected}")]
    SequenceTooLow {
        sender: Address,
        submitted: u64,
        expected: u64,
    },

    #[error("replacement transaction underpriced at sequence {0}")]
    ReplacementUnderpriced(u64),

    #[error("in-flight transaction limit exceeded for {0}")]
    InFlightLimitExceeded(Address),

    #[error("network timeout: {0}")]
    Timeout(String),

    #[error("transaction rejected ({code}): {message}")]
    Rejected { code: RejectCode, message: String },

    #[error("transaction not found: {0}")]
    TxNotFound(TxRef),

    #[error("payload encoding failed: {0}")]
    Encoding(String),
}

impl LedgerError {
    /// The retry tier for transient failures, `None` for permanent ones.
    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            Self::SequenceTooLow { .. }
            | Self::ReplacementUnderpriced(_)
            | Self::InFlightLimitExceeded(_) => Some(FailureClass::Contention),
            // The sender's local view ran ahead of the ledger; resync and retry.
            Self::Rejected {
                code: RejectCode::SequenceGap,
                ..
            } => Some(FailureClass::Contention),
            Self::Timeout(_) => Some(FailureClass::Network),
            Self::Rejected { .. } | Self::TxNotFound(_) | Self::Encoding(_) => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.failure_class().is_some()
    }

    pub fn reject_code(&self) -> Option<RejectCode> {
        match self {
            Self::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub(crate) fn rejected(code: RejectCode, message: impl Into<String>) -> Self {
        Self::Rejected {
            code,
            message: message.into(),
        }
    }
}

/// Errors surfaced by the [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// A permanent ledger failure; never retried.
    #[error("submission rejected: {0}")]
    Rejected(LedgerError),

    /// Every attempt failed transiently.
    #[error("submission failed after {attempts} attempts: {last_cause}")]
    SubmissionFailed { attempts: u32, last_cause: LedgerError },

    #[error("transaction {0} not confirmed in time")]
    ConfirmationTimeout(TxRef),
}

impl DispatchError {
    pub fn reject_code(&self) -> Option<RejectCode> {
        match self {
            Self::Rejected(err) => err.reject_code(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classes() {
        let sender = Address::from_label("operator");
        assert_eq!(
            LedgerError::SequenceTooLow { sender, submitted: 1, expected: 2 }.failure_class(),
            Some(FailureClass::Contention)
        );
        assert_eq!(
            LedgerError::ReplacementUnderpriced(3).failure_class(),
            Some(FailureClass::Contention)
        );
        assert_eq!(
            LedgerError::InFlightLimitExceeded(sender).failure_class(),
            Some(FailureClass::Contention)
        );
        assert_eq!(
            LedgerError::Timeout("rpc".into()).failure_class(),
            Some(FailureClass::Network)
        );
        assert_eq!(
            LedgerError::rejected(RejectCode::SequenceGap, "x").failure_class(),
            Some(FailureClass::Contention)
        );
        assert!(!LedgerError::rejected(RejectCode::InvalidState, "x").is_transient());
        assert!(!LedgerError::rejected(RejectCode::AlreadyReleased, "x").is_transient());
    }

    #[test]
    fn test_reject_code_passthrough() {
        let err = DispatchError::Rejected(LedgerError::rejected(RejectCode::AlreadyReleased, "paid"));
        assert_eq!(err.reject_code(), Some(RejectCode::AlreadyReleased));

        let err = DispatchError::SubmissionFailed {
            attempts: 4,
            last_cause: LedgerError::Timeout("rpc".into()),
        };
        assert_eq!(err.reject_code(), None);
        assert!(err.to_string().contains("4 attempts"));
    }
}
