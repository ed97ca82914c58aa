//! SLA classification.
//!
//! SLA status is never stored as an independent fact: it is recomputed from
//! the deadline and either the current time (pending items) or the recorded
//! completion time.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::UnixSeconds;

/// Compliance classification of a tracked item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlaStatus {
    OnTime,
    AtRisk,
    Delayed,
    ExceededExpectations,
}

impl SlaStatus {
    /// Entering this status warrants an emergency alert.
    pub fn is_alerting(&self) -> bool {
        matches!(self, Self::AtRisk | Self::Delayed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnTime => "ON_TIME",
            Self::AtRisk => "AT_RISK",
            Self::Delayed => "DELAYED",
            Self::ExceededExpectations => "EXCEEDED_EXPECTATIONS",
        }
    }
}

impl fmt::Display for SlaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Thresholds for SLA classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaPolicy {
    /// Remaining time at or below which a pending item is AT_RISK.
    pub at_risk_window: i64,
    /// Completion earlier than the deadline by more than this is EXCEEDED_EXPECTATIONS.
    pub exceeded_margin: i64,
}

impl Default for SlaPolicy {
    fn default() -> Self {
        Self {
            at_risk_window: 2 * 3600,
            exceeded_margin: 3600,
        }
    }
}

impl SlaPolicy {
    /// `max(0, deadline - now)`.
    pub fn remaining(deadline: UnixSeconds, now: UnixSeconds) -> i64 {
        deadline.saturating_sub(now).max(0)
    }

    /// Status of an item that has not completed yet.
    pub fn classify_pending(&self, deadline: UnixSeconds, now: UnixSeconds) -> SlaStatus {
        let remaining = Self::remaining(deadline, now);
        if remaining == 0 {
            SlaStatus::Delayed
        } else if remaining <= self.at_risk_window {
            SlaStatus::AtRisk
        } else {
            SlaStatus::OnTime
        }
    }

    /// Status of a completed item.
    pub fn classify_completion(
        &self,
        deadline: UnixSeconds,
        completed_at: UnixSeconds,
        on_time: bool,
    ) -> SlaStatus {
        if !on_time {
            return SlaStatus::Delayed;
        }
        if deadline.saturating_sub(completed_at) > self.exceeded_margin {
            SlaStatus::ExceededExpectations
        } else {
            SlaStatus::OnTime
        }
    }

    /// Inclusive deadline boundary: completing exactly at the deadline is on time.
    pub fn is_on_time(deadline: UnixSeconds, completed_at: UnixSeconds) -> bool {
        completed_at <= deadline
    }
}
