//! SLABond core
//!
//! Shared vocabulary of the guarantee settlement engine: identifiers and
//! amounts, the guarantee record as held in memory and as committed to the
//! ledger, the lifecycle transition table, and SLA classification.

pub mod alert;
pub mod clock;
pub mod config;
pub mod error;
pub mod guarantee;
pub mod sla;
pub mod state_machine;
pub mod types;

pub use alert::{Alert, AlertReason};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::CoreError;
pub use guarantee::{CommittedGuarantee, Guarantee, GuaranteeRequest, GuaranteeRequestBuilder};
pub use sla::{SlaPolicy, SlaStatus};
pub use state_machine::{GuaranteeEvent, GuaranteeStateMachine, GuaranteeStatus};
pub use types::{Address, Denomination, Digest, GuaranteeId, ItemId, UnixSeconds};
