use std::fmt;

use serde::{Deserialize, Serialize};
use slabond_core::{
    Address, Alert, CommittedGuarantee, Denomination, Digest, GuaranteeId, GuaranteeStatus,
    UnixSeconds,
};
use tokio::sync::broadcast;

use crate::error::LedgerError;

/// Reference to a submitted transaction: BLAKE3 over sender, sequence and payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxRef(pub Digest);

impl TxRef {
    pub fn compute(sender: &Address, sequence: u64, payload: &[u8]) -> Self {
        Self(slabond_crypto::hash_fields(&[
            sender.as_bytes(),
            &sequence.to_be_bytes(),
            payload,
        ]))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxRef({})", self.to_hex())
    }
}

/// Lifecycle of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TxStatus {
    /// Accepted into the pool, not yet in a block.
    Pending,
    /// Included in the block at `height`.
    Confirmed { height: u64 },
    /// Included but reverted; carries the ledger's reason.
    Failed { reason: String },
}

/// Why escrow leaves the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    /// Returned after on-time fulfillment.
    Fulfilled,
    /// Paid out as the breach penalty.
    Penalty,
    /// Returned on cancellation.
    Cancelled,
}

impl fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fulfilled => write!(f, "fulfilled"),
            Self::Penalty => write!(f, "penalty"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A single escrow payout instruction carried by a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRelease {
    pub amount: u128,
    pub denomination: Denomination,
    pub recipient: Address,
    pub reason: ReleaseReason,
}

/// State-changing transaction committed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxPayload {
    /// Commit a new ACTIVE guarantee and lock its escrow.
    CreateGuarantee {
        guarantee: CommittedGuarantee,
        denomination: Denomination,
    },
    /// Move a guarantee from `from` to `to`, optionally releasing escrow.
    Transition {
        id: GuaranteeId,
        from: GuaranteeStatus,
        to: GuaranteeStatus,
        completed_at: Option<UnixSeconds>,
        penalty_paid: bool,
        release: Option<EscrowRelease>,
    },
    /// Record an emergency alert.
    Alert(Alert),
}

impl TxPayload {
    pub fn guarantee_id(&self) -> GuaranteeId {
        match self {
            Self::CreateGuarantee { guarantee, .. } => guarantee.id,
            Self::Transition { id, .. } => *id,
            Self::Alert(alert) => alert.guarantee_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateGuarantee { .. } => "create_guarantee",
            Self::Transition { .. } => "transition",
            Self::Alert(_) => "alert",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, LedgerError> {
        serde_json::to_vec(self).map_err(|e| LedgerError::Encoding(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, LedgerError> {
        serde_json::from_slice(bytes).map_err(|e| LedgerError::Encoding(e.to_string()))
    }
}

/// A block header as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub height: u64,
    pub timestamp: UnixSeconds,
    pub hash: Digest,
    pub parent: Digest,
}

/// Coarse category of a committed event, used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTopic {
    Creation,
    StatusChange,
    EscrowRelease,
    Alert,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventKind {
    GuaranteeCreated {
        id: GuaranteeId,
        customer: Address,
        escrow_amount: u128,
    },
    StatusChanged {
        id: GuaranteeId,
        from: GuaranteeStatus,
        to: GuaranteeStatus,
    },
    EscrowReleased {
        id: GuaranteeId,
        amount: u128,
        recipient: Address,
        reason: ReleaseReason,
    },
    AlertRaised(Alert),
}

impl LedgerEventKind {
    pub fn guarantee_id(&self) -> GuaranteeId {
        match self {
            Self::GuaranteeCreated { id, .. }
            | Self::StatusChanged { id, .. }
            | Self::EscrowReleased { id, .. } => *id,
            Self::AlertRaised(alert) => alert.guarantee_id,
        }
    }

    pub fn topic(&self) -> EventTopic {
        match self {
            Self::GuaranteeCreated { .. } => EventTopic::Creation,
            Self::StatusChanged { .. } => EventTopic::StatusChange,
            Self::EscrowReleased { .. } => EventTopic::EscrowRelease,
            Self::AlertRaised(_) => EventTopic::Alert,
        }
    }
}

/// An event committed in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub height: u64,
    pub tx_ref: TxRef,
    pub kind: LedgerEventKind,
}

/// Selects which committed events a subscription receives.
///
/// An empty topic list matches every topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub guarantee: Option<GuaranteeId>,
    pub topics: Vec<EventTopic>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_guarantee(id: GuaranteeId) -> Self {
        Self {
            guarantee: Some(id),
            topics: Vec::new(),
        }
    }

    pub fn with_topic(mut self, topic: EventTopic) -> Self {
        self.topics.push(topic);
        self
    }

    pub fn matches(&self, event: &LedgerEvent) -> bool {
        if let Some(id) = self.guarantee {
            if event.kind.guarantee_id() != id {
                return false;
            }
        }
        self.topics.is_empty() || self.topics.contains(&event.kind.topic())
    }
}

/// Stream of committed events matching a filter.
pub struct EventSubscription {
    rx: broadcast::Receiver<LedgerEvent>,
    filter: EventFilter,
}

impl EventSubscription {
    pub fn new(rx: broadcast::Receiver<LedgerEvent>, filter: EventFilter) -> Self {
        Self { rx, filter }
    }

    /// Next matching event, or `None` once the ledger is gone.
    ///
    /// A lagging subscriber skips the events it missed.
    pub async fn next(&mut self) -> Option<LedgerEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slabond_core::AlertReason;

    fn alert(id: GuaranteeId) -> Alert {
        Alert {
            guarantee_id: id,
            reason: AlertReason::SlaDelayed,
            timestamp: 1_700_000_000,
            notified_contacts: vec![Address::from_label("desk")],
        }
    }

    #[test]
    fn test_tx_ref_depends_on_sequence() {
        let sender = Address::from_label("operator");
        let a = TxRef::compute(&sender, 0, b"payload");
        let b = TxRef::compute(&sender, 1, b"payload");
        assert_ne!(a, b);
        assert_eq!(a, TxRef::compute(&sender, 0, b"payload"));
        assert!(a.to_string().starts_with("0x"));
    }

    #[test]
    fn test_payload_json_encoding() {
        let id = GuaranteeId::from_bytes(&[7u8; 32]).unwrap();
        let payload = TxPayload::Transition {
            id,
            from: GuaranteeStatus::Active,
            to: GuaranteeStatus::Breached,
            completed_at: Some(1_700_000_100),
            penalty_paid: true,
            release: Some(EscrowRelease {
                amount: 15,
                denomination: Denomination::Native,
                recipient: Address::from_label("alice"),
                reason: ReleaseReason::Penalty,
            }),
        };
        let bytes = payload.encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["transition"]["to"], "BREACHED");
        assert_eq!(json["transition"]["id"], id.to_hex());
        assert_eq!(json["transition"]["release"]["amount"], 15);
        assert_eq!(TxPayload::decode(&bytes).unwrap(), payload);
        assert_eq!(payload.guarantee_id(), id);
        assert_eq!(payload.kind(), "transition");
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(
            TxPayload::decode(b"not json"),
            Err(LedgerError::Encoding(_))
        ));
    }

    #[test]
    fn test_event_filter() {
        let id = GuaranteeId::random();
        let other = GuaranteeId::random();
        let event = LedgerEvent {
            height: 3,
            tx_ref: TxRef([0u8; 32]),
            kind: LedgerEventKind::AlertRaised(alert(id)),
        };

        assert!(EventFilter::all().matches(&event));
        assert!(EventFilter::for_guarantee(id).matches(&event));
        assert!(!EventFilter::for_guarantee(other).matches(&event));
        assert!(EventFilter::all().with_topic(EventTopic::Alert).matches(&event));
        assert!(!EventFilter::all()
            .with_topic(EventTopic::EscrowRelease)
            .matches(&event));
    }

    #[tokio::test]
    async fn test_subscription_skips_unmatched() {
        let (tx, rx) = broadcast::channel(16);
        let id = GuaranteeId::random();
        let mut sub = EventSubscription::new(rx, EventFilter::for_guarantee(id));

        tx.send(LedgerEvent {
            height: 1,
            tx_ref: TxRef([1u8; 32]),
            kind: LedgerEventKind::AlertRaised(alert(GuaranteeId::random())),
        })
        .unwrap();
        tx.send(LedgerEvent {
            height: 2,
            tx_ref: TxRef([2u8; 32]),
            kind: LedgerEventKind::AlertRaised(alert(id)),
        })
        .unwrap();
        drop(tx);

        let event = sub.next().await.unwrap();
        assert_eq!(event.height, 2);
        assert!(sub.next().await.is_none());
    }
}
