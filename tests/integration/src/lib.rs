//! Shared harness for the cross-crate scenarios under `tests/`.
//!
//! Builds a complete settlement stack on a manual clock: reference ledger,
//! dispatcher, time-proof registry with an Ed25519 authority, and the engine.

use std::sync::Arc;

use slabond_core::{
    Address, Alert, Denomination, EngineConfig, GuaranteeRequest, ItemId, ManualClock,
};
use slabond_crypto::KeyPair;
use slabond_engine::{ChannelAlertSink, GuaranteeEngine, MonitorConfig, SlaMonitor};
use slabond_ledger::{Dispatcher, InMemoryLedger, RetryPolicy};
use slabond_timeproof::{
    Ed25519AttestationVerifier, Ed25519Attestor, ProofSettings, TimeProofRegistry, TimeStamper,
};
use tokio::sync::mpsc::UnboundedReceiver;

pub const HOUR: i64 = 3600;
/// Start of every scenario: 2023-11-14T22:13:20Z.
pub const T0: i64 = 1_700_000_000;

pub struct Stack {
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<InMemoryLedger>,
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<TimeProofRegistry>,
    pub engine: Arc<GuaranteeEngine>,
    pub monitor: SlaMonitor,
    pub alerts: UnboundedReceiver<Alert>,
    /// An external time authority allowed to request proofs.
    pub courier: Address,
}

impl Stack {
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default())
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        let clock = Arc::new(ManualClock::new(T0));
        let ledger = Arc::new(InMemoryLedger::new(clock.clone()));
        let dispatcher = Arc::new(Dispatcher::new(ledger.clone(), policy));

        let attestor = Ed25519Attestor::new(KeyPair::from_seed(&[11u8; 32]));
        let verifier = Ed25519AttestationVerifier::new(attestor.public_key());
        let config = EngineConfig {
            administrators: vec![admin()],
            ..EngineConfig::default()
        };
        let registry = Arc::new(TimeProofRegistry::new(
            ledger.clone(),
            clock.clone(),
            Arc::new(attestor),
            Arc::new(verifier),
            ProofSettings::from(&config),
        ));
        let courier = Address::from_label("courier-time-authority");
        registry.authorize(courier);
        let stamper = TimeStamper::new(
            registry.clone(),
            Address::from_label("engine-time-authority"),
            vec![b"engine-cert".to_vec()],
        );

        let (sink, alerts) = ChannelAlertSink::new();
        let engine = Arc::new(
            GuaranteeEngine::new(config, clock.clone(), dispatcher.clone(), Arc::new(sink))
                .with_stamper(stamper),
        );
        let monitor = SlaMonitor::new(engine.clone(), MonitorConfig::default());

        Self {
            clock,
            ledger,
            dispatcher,
            registry,
            engine,
            monitor,
            alerts,
            courier,
        }
    }

    /// Native-asset balance of the customer on the ledger.
    pub fn customer_balance(&self) -> i128 {
        self.ledger.balance(&customer(), &Denomination::Native)
    }

    pub fn drain_alerts(&mut self) -> Vec<Alert> {
        let mut alerts = Vec::new();
        while let Ok(alert) = self.alerts.try_recv() {
            alerts.push(alert);
        }
        alerts
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

pub fn customer() -> Address {
    Address::from_label("customer")
}

pub fn admin() -> Address {
    Address::from_label("arbiter")
}

pub fn escalation_contact() -> Address {
    Address::from_label("on-call")
}

/// A guarantee on `item` with penalty 10 and escrow 15.
pub fn request(item: &str, deadline: i64) -> GuaranteeRequest {
    GuaranteeRequest::builder()
        .item(ItemId::new(item))
        .deadline(deadline)
        .penalty(10)
        .escrow(15)
        .customer(customer())
        .terms(format!("deliver {} by {}", item, deadline).as_bytes())
        .contact(escalation_contact())
        .build()
        .unwrap_or_else(|err| panic!("test request for {} is invalid: {}", item, err))
}
