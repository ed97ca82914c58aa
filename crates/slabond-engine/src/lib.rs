//! SLABond engine
//!
//! The guarantee lifecycle: creation with locked escrow, completion,
//! cancellation and dispute, each decided under a per-guarantee lock and
//! committed through the ledger [`Dispatcher`](slabond_ledger::Dispatcher)
//! before the in-memory escrow mirror and performance counters change. The
//! [`SlaMonitor`] sweeps active guarantees and raises alerts on SLA changes.

pub mod alert;
pub mod engine;
pub mod error;
pub mod escrow;
pub mod monitor;
pub mod stats;

pub use alert::{AlertSink, ChannelAlertSink};
pub use engine::{GuaranteeEngine, SlaEvaluation};
pub use error::{EngineError, ErrorKind};
pub use escrow::{EscrowBook, EscrowRecord};
pub use monitor::{MonitorConfig, SlaMonitor, SweepReport};
pub use stats::PerformanceAggregate;
