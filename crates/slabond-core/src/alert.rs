use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Address, GuaranteeId, UnixSeconds};

/// Why an emergency alert was raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AlertReason {
    /// Remaining time fell inside the at-risk window.
    SlaAtRisk,
    /// The deadline passed without completion.
    SlaDelayed,
    /// The outcome was disputed; carries the stated reason.
    Disputed(String),
}

impl fmt::Display for AlertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SlaAtRisk => write!(f, "SLA at risk"),
            Self::SlaDelayed => write!(f, "SLA delayed"),
            Self::Disputed(reason) => write!(f, "disputed: {}", reason),
        }
    }
}

/// Outbound notification to a guarantee's escalation contacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub guarantee_id: GuaranteeId,
    pub reason: AlertReason,
    pub timestamp: UnixSeconds,
    pub notified_contacts: Vec<Address>,
}
