use std::fmt;

use crate::error::CoreError;

/// Lifecycle status of a guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuaranteeStatus {
    /// Escrow locked, SLA running.
    Active,
    /// Completed on time; escrow refunded to the customer.
    Fulfilled,
    /// Completed late (or failed); escrow paid out as penalty.
    Breached,
    /// Withdrawn by the customer before completion. Final state.
    Cancelled,
    /// Outcome contested; awaiting arbitration. Final state for this engine.
    Disputed,
}

impl GuaranteeStatus {
    /// No further transition is possible from this state.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Disputed)
    }

    /// The guarantee has left ACTIVE, so its escrow has been released.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Fulfilled => "FULFILLED",
            Self::Breached => "BREACHED",
            Self::Cancelled => "CANCELLED",
            Self::Disputed => "DISPUTED",
        }
    }
}

impl fmt::Display for GuaranteeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events that trigger lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum GuaranteeEvent {
    /// Delivery confirmed at or before the deadline.
    CompletedOnTime,
    /// Delivery confirmed after the deadline, or failed.
    CompletedLate,
    /// The owning customer withdrew the guarantee.
    Cancelled,
    /// The customer or an administrator contested the outcome.
    Disputed,
}

impl GuaranteeEvent {
    pub const ALL: [GuaranteeEvent; 4] = [
        Self::CompletedOnTime,
        Self::CompletedLate,
        Self::Cancelled,
        Self::Disputed,
    ];
}

/// Guarantee lifecycle transition table.
///
/// Valid transitions:
/// - Active → Fulfilled (CompletedOnTime)
/// - Active → Breached (CompletedLate)
/// - Active → Cancelled (Cancelled)
/// - Fulfilled → Disputed (Disputed)
/// - Breached → Disputed (Disputed)
pub struct GuaranteeStateMachine;

impl GuaranteeStateMachine {
    /// Attempt a state transition based on an event.
    pub fn transition(
        current: GuaranteeStatus,
        event: GuaranteeEvent,
    ) -> Result<GuaranteeStatus, CoreError> {
        let next = Self::next(current, event).ok_or(CoreError::InvalidStateTransition {
            from: current,
            event,
        })?;

        tracing::debug!(
            from = %current,
            to = %next,
            event = ?event,
            "guarantee state transition"
        );

        Ok(next)
    }

    fn next(current: GuaranteeStatus, event: GuaranteeEvent) -> Option<GuaranteeStatus> {
        match (current, event) {
            (GuaranteeStatus::Active, GuaranteeEvent::CompletedOnTime) => Some(GuaranteeStatus::Fulfilled),
            (GuaranteeStatus::Active, GuaranteeEvent::CompletedLate) => Some(GuaranteeStatus::Breached),
            (GuaranteeStatus::Active, GuaranteeEvent::Cancelled) => Some(GuaranteeStatus::Cancelled),

            (GuaranteeStatus::Fulfilled, GuaranteeEvent::Disputed) => Some(GuaranteeStatus::Disputed),
            (GuaranteeStatus::Breached, GuaranteeEvent::Disputed) => Some(GuaranteeStatus::Disputed),

            _ => None,
        }
    }

    /// Whether `from -> to` is an edge of the table, whatever the event.
    pub fn is_edge(from: GuaranteeStatus, to: GuaranteeStatus) -> bool {
        GuaranteeEvent::ALL
            .iter()
            .any(|event| Self::next(from, *event) == Some(to))
    }

    /// Check if a transition is valid without performing it.
    pub fn can_transition(current: GuaranteeStatus, event: GuaranteeEvent) -> bool {
        Self::transition(current, event).is_ok()
    }
}
