//! SLABond ledger layer
//!
//! Everything between a decided guarantee transition and its commitment on
//! the external ledger: the [`LedgerClient`] interface, the JSON transaction
//! payloads, committed events and subscriptions, an in-memory reference
//! ledger, and the [`Dispatcher`] that owns per-sender sequence numbers and
//! retries transient failures.

pub mod adapters;
pub mod dispatcher;
pub mod error;
pub mod traits;
pub mod types;

pub use adapters::memory::{InMemoryLedger, LedgerFault};
pub use dispatcher::{Dispatcher, PendingSubmission, RetryPolicy, SubmissionId, SubmissionReceipt};
pub use error::{DispatchError, FailureClass, LedgerError, RejectCode};
pub use traits::{ChainView, LedgerClient};
pub use types::{
    BlockRef, EscrowRelease, EventFilter, EventSubscription, EventTopic, LedgerEvent,
    LedgerEventKind, ReleaseReason, TxPayload, TxRef, TxStatus,
};
