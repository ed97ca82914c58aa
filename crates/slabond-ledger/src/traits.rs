use async_trait::async_trait;
use slabond_core::{Address, CommittedGuarantee, GuaranteeId};

use crate::error::LedgerError;
use crate::types::{BlockRef, EventFilter, EventSubscription, TxPayload, TxRef, TxStatus};

/// Client interface to the external append-only ledger.
///
/// Submission is not idempotent: resubmitting a payload that already landed
/// produces a second transaction, which the ledger validates against
/// committed state on its own.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a payload from `sender` at `sequence`.
    async fn submit(
        &self,
        payload: &TxPayload,
        sender: &Address,
        sequence: u64,
    ) -> Result<TxRef, LedgerError>;

    /// Number of transactions from `sender` included in blocks.
    async fn confirmed_count(&self, sender: &Address) -> Result<u64, LedgerError>;

    /// Next sequence number counting transactions still in the pool.
    async fn pending_count(&self, sender: &Address) -> Result<u64, LedgerError>;

    async fn tx_status(&self, tx_ref: &TxRef) -> Result<TxStatus, LedgerError>;

    /// Committed fields of a guarantee, `None` if never committed.
    async fn read_state(&self, id: &GuaranteeId)
        -> Result<Option<CommittedGuarantee>, LedgerError>;

    /// Stream of committed events matching `filter`.
    fn subscribe(&self, filter: EventFilter) -> EventSubscription;

    /// Return the unique identifier of this ledger (e.g. "ledger-memory").
    fn ledger_id(&self) -> &str;
}

/// Synchronous read access to block headers, used to anchor time-proofs.
pub trait ChainView: Send + Sync {
    fn head(&self) -> BlockRef;

    fn block(&self, height: u64) -> Option<BlockRef>;
}
