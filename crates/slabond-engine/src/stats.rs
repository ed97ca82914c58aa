use serde::{Deserialize, Serialize};

/// Running outcome counters. Only ever incremented.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceAggregate {
    /// Completed guarantees, on time or not.
    pub total: u64,
    pub on_time: u64,
    pub delayed: u64,
    pub penalties_paid: u64,
    pub total_penalty_amount: u128,
    pub cancelled: u64,
}

impl PerformanceAggregate {
    pub fn record_on_time(&mut self) {
        self.total += 1;
        self.on_time += 1;
    }

    /// A breach; `penalty` is the escrow paid out.
    pub fn record_breach(&mut self, penalty: u128) {
        self.total += 1;
        self.delayed += 1;
        self.penalties_paid += 1;
        self.total_penalty_amount = self.total_penalty_amount.saturating_add(penalty);
    }

    pub fn record_cancelled(&mut self) {
        self.cancelled += 1;
    }

    /// On-time share of completions in basis points; 0 before any completion.
    pub fn on_time_rate_bps(&self) -> u64 {
        if self.total == 0 {
            return 0;
        }
        self.on_time * 10_000 / self.total
    }
}
