use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use slabond_core::GuaranteeId;
use tokio::sync::watch;

use crate::engine::{GuaranteeEngine, SlaEvaluation};
use crate::error::EngineError;

/// SLA sweep settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between sweeps.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    60
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

/// Summary of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub evaluated: usize,
    pub alerts_raised: usize,
    pub errors: usize,
}

/// Periodically re-evaluates the SLA of every ACTIVE guarantee.
pub struct SlaMonitor {
    engine: Arc<GuaranteeEngine>,
    interval: Duration,
}

impl SlaMonitor {
    pub fn new(engine: Arc<GuaranteeEngine>, config: MonitorConfig) -> Self {
        Self {
            engine,
            interval: Duration::from_secs(config.interval_secs.max(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn evaluate(&self, id: &GuaranteeId) -> Result<SlaEvaluation, EngineError> {
        self.engine.observe_sla(id).await
    }

    /// Evaluate every ACTIVE guarantee once. Failures are counted, not returned.
    pub async fn evaluate_all(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for id in self.engine.active_ids() {
            match self.engine.observe_sla(&id).await {
                Ok(evaluation) => {
                    report.evaluated += 1;
                    if evaluation.alerted {
                        report.alerts_raised += 1;
                    }
                }
                Err(err) => {
                    report.errors += 1;
                    tracing::warn!(guarantee_id = %id, error = %err, "SLA evaluation failed");
                }
            }
        }
        report
    }

    /// Sweep on every tick until `shutdown` turns true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.interval.as_secs(), "SLA monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.evaluate_all().await;
                    if report.alerts_raised > 0 || report.errors > 0 {
                        tracing::info!(
                            evaluated = report.evaluated,
                            alerts = report.alerts_raised,
                            errors = report.errors,
                            "SLA sweep finished"
                        );
                    } else {
                        tracing::debug!(evaluated = report.evaluated, "SLA sweep finished");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("SLA monitor stopped");
    }
}
