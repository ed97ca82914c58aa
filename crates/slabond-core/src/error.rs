use crate::state_machine::{GuaranteeEvent, GuaranteeStatus};

/// Core domain errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid state transition: {event:?} is not allowed from {from}")]
    InvalidStateTransition {
        from: GuaranteeStatus,
        event: GuaranteeEvent,
    },

    #[error("guarantee validation failed: {0}")]
    ValidationError(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}
