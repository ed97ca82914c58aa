use serde::{Deserialize, Serialize};

use crate::sla::SlaPolicy;
use crate::types::Address;

/// Configuration of the settlement engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Identity that signs and submits every ledger transaction.
    #[serde(default = "default_operator")]
    pub operator: Address,
    /// Principals allowed to open disputes on any guarantee.
    #[serde(default)]
    pub administrators: Vec<Address>,
    /// Remaining time (seconds) at or below which an item is AT_RISK.
    #[serde(default = "default_at_risk_window")]
    pub at_risk_window_secs: i64,
    /// Early-completion margin (seconds) for EXCEEDED_EXPECTATIONS.
    #[serde(default = "default_exceeded_margin")]
    pub exceeded_margin_secs: i64,
    /// Accepted distance (seconds) between attested and commit time of a time-proof.
    #[serde(default = "default_skew_tolerance")]
    pub clock_skew_tolerance_secs: i64,
    /// Number of ledger block hashes in a time-proof path.
    #[serde(default = "default_proof_depth")]
    pub proof_depth: usize,
}

fn default_operator() -> Address {
    Address::from_label("slabond-operator")
}
fn default_at_risk_window() -> i64 {
    2 * 3600
}
fn default_exceeded_margin() -> i64 {
    3600
}
fn default_skew_tolerance() -> i64 {
    300
}
fn default_proof_depth() -> usize {
    8
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            operator: default_operator(),
            administrators: Vec::new(),
            at_risk_window_secs: default_at_risk_window(),
            exceeded_margin_secs: default_exceeded_margin(),
            clock_skew_tolerance_secs: default_skew_tolerance(),
            proof_depth: default_proof_depth(),
        }
    }
}

impl EngineConfig {
    pub fn sla_policy(&self) -> SlaPolicy {
        SlaPolicy {
            at_risk_window: self.at_risk_window_secs,
            exceeded_margin: self.exceeded_margin_secs,
        }
    }

    pub fn is_administrator(&self, principal: &Address) -> bool {
        self.administrators.contains(principal)
    }
}
