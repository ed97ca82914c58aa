//! The SLABond node orchestrator.
//!
//! Wires the reference ledger, the dispatcher, the time-proof registry and
//! the guarantee engine together, runs the SLA monitor in a background task
//! and logs alerts and committed ledger events until shut down.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use slabond_core::{Address, Alert, Clock, SystemClock};
use slabond_engine::{ChannelAlertSink, GuaranteeEngine, SlaMonitor};
use slabond_ledger::{
    Dispatcher, EventFilter, EventSubscription, InMemoryLedger, LedgerClient, LedgerEvent,
    LedgerEventKind,
};
use slabond_timeproof::{
    Ed25519AttestationVerifier, Ed25519Attestor, ProofSettings, TimeProofRegistry, TimeStamper,
};

use crate::config::NodeConfig;

/// The SLABond node.
pub struct SlabondNode {
    config: NodeConfig,
    ledger: Arc<InMemoryLedger>,
    engine: Arc<GuaranteeEngine>,
    monitor: Arc<SlaMonitor>,
    /// Alerts fanned out by the engine.
    alert_rx: Option<mpsc::UnboundedReceiver<Alert>>,
    /// Committed ledger events.
    events: Option<EventSubscription>,
    shutdown_tx: watch::Sender<bool>,
    monitor_task: Option<JoinHandle<()>>,
}

impl SlabondNode {
    /// Create a node on the system clock.
    pub fn new(config: NodeConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: NodeConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let ledger = Arc::new(InMemoryLedger::new(clock.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            ledger.clone(),
            config.dispatcher.clone(),
        ));

        let keypair = config.time_authority.keypair()?;
        let verifier = Ed25519AttestationVerifier::new(keypair.public_key());
        let authority_key = keypair.public_key();
        let registry = Arc::new(TimeProofRegistry::new(
            ledger.clone(),
            clock.clone(),
            Arc::new(Ed25519Attestor::new(keypair)),
            Arc::new(verifier),
            ProofSettings::from(&config.engine),
        ));
        let stamper = TimeStamper::new(
            registry,
            Address::from_label(&format!("time-authority:{}", authority_key)),
            vec![config.time_authority.certificate.clone().into_bytes()],
        );

        let (sink, alert_rx) = ChannelAlertSink::new();
        let engine = Arc::new(
            GuaranteeEngine::new(config.engine.clone(), clock, dispatcher, Arc::new(sink))
                .with_stamper(stamper),
        );
        let monitor = Arc::new(SlaMonitor::new(engine.clone(), config.monitor));
        let (shutdown_tx, _) = watch::channel(false);

        tracing::info!(
            ledger = ledger.ledger_id(),
            operator = %config.engine.operator,
            authority = %authority_key.fingerprint(),
            "SLABond node created"
        );

        Ok(Self {
            config,
            ledger,
            engine,
            monitor,
            alert_rx: Some(alert_rx),
            events: None,
            shutdown_tx,
            monitor_task: None,
        })
    }

    /// Subscribe to ledger events and start the SLA monitor.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!("starting SLABond node");

        self.events = Some(self.ledger.subscribe(EventFilter::all()));

        let monitor = self.monitor.clone();
        let shutdown = self.shutdown_tx.subscribe();
        self.monitor_task = Some(tokio::spawn(async move {
            monitor.run(shutdown).await;
        }));
        tracing::info!(
            interval_secs = self.config.monitor.interval_secs,
            "SLA monitor spawned"
        );
        Ok(())
    }

    /// Log alerts and ledger events until either stream ends.
    pub async fn run(&mut self) -> Result<()> {
        let mut alert_rx = self
            .alert_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("node already running"))?;
        let mut events = self
            .events
            .take()
            .ok_or_else(|| anyhow::anyhow!("node not started"))?;

        tracing::info!("entering main event loop");

        loop {
            tokio::select! {
                alert = alert_rx.recv() => {
                    match alert {
                        Some(alert) => Self::handle_alert(&alert),
                        None => {
                            tracing::info!("alert channel closed");
                            break;
                        }
                    }
                }
                event = events.next() => {
                    match event {
                        Some(event) => Self::handle_ledger_event(&event),
                        None => {
                            tracing::info!("ledger event stream closed");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Stop the monitor and report final counters.
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("shutting down SLABond node");

        // No receiver left means the monitor already stopped.
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.monitor_task.take() {
            task.await?;
        }

        let stats = self.engine.stats();
        tracing::info!(
            guarantees = self.engine.len(),
            completed = stats.total,
            on_time = stats.on_time,
            penalties = stats.penalties_paid,
            cancelled = stats.cancelled,
            on_time_bps = stats.on_time_rate_bps(),
            escrow_locked = %self.engine.escrow_book().total_locked(),
            escrow_released = %self.engine.escrow_book().total_released(),
            pending_submissions = self.engine.dispatcher().pending().len(),
            "SLABond node shut down"
        );
        Ok(())
    }

    pub fn engine(&self) -> &Arc<GuaranteeEngine> {
        &self.engine
    }

    fn handle_alert(alert: &Alert) {
        let contacts: Vec<String> = alert
            .notified_contacts
            .iter()
            .map(|c| c.to_string())
            .collect();
        tracing::warn!(
            guarantee_id = %alert.guarantee_id,
            reason = %alert.reason,
            timestamp = alert.timestamp,
            contacts = ?contacts,
            "emergency alert"
        );
    }

    fn handle_ledger_event(event: &LedgerEvent) {
        match &event.kind {
            LedgerEventKind::GuaranteeCreated {
                id,
                customer,
                escrow_amount,
            } => {
                tracing::info!(
                    height = event.height,
                    guarantee_id = %id,
                    customer = %customer,
                    escrow = %escrow_amount,
                    "guarantee committed"
                );
            }
            LedgerEventKind::StatusChanged { id, from, to } => {
                tracing::info!(
                    height = event.height,
                    guarantee_id = %id,
                    from = %from,
                    to = %to,
                    "status change committed"
                );
            }
            LedgerEventKind::EscrowReleased {
                id,
                amount,
                recipient,
                reason,
            } => {
                tracing::info!(
                    height = event.height,
                    guarantee_id = %id,
                    amount = %amount,
                    recipient = %recipient,
                    reason = %reason,
                    "escrow release committed"
                );
            }
            LedgerEventKind::AlertRaised(alert) => {
                tracing::debug!(
                    height = event.height,
                    guarantee_id = %alert.guarantee_id,
                    reason = %alert.reason,
                    "alert committed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slabond_core::{GuaranteeRequest, GuaranteeStatus, ItemId, ManualClock};
    use std::time::Duration;

    const T0: i64 = 1_700_000_000;

    fn request(deadline: i64) -> GuaranteeRequest {
        GuaranteeRequest::builder()
            .item(ItemId::new("parcel-7"))
            .deadline(deadline)
            .penalty(10)
            .escrow(15)
            .customer(Address::from_label("customer"))
            .contact(Address::from_label("ops"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_node_lifecycle() {
        let mut node = SlabondNode::new(NodeConfig::default()).unwrap();
        node.start().await.unwrap();

        let now = SystemClock.now();
        let id = node.engine().create(request(now + 48 * 3600)).await.unwrap();
        let status = node
            .engine()
            .record_completion(&id, now + 3600, true)
            .await
            .unwrap();
        assert_eq!(status, GuaranteeStatus::Fulfilled);
        assert!(node.engine().get(&id).unwrap().last_proof.is_some());

        node.shutdown().await.unwrap();
        assert!(node.monitor_task.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_task_alerts() {
        let clock = Arc::new(ManualClock::new(T0));
        let mut config = NodeConfig::default();
        config.monitor.interval_secs = 1;
        let mut node = SlabondNode::with_clock(config, clock.clone()).unwrap();

        let id = node.engine().create(request(T0 + 600)).await.unwrap();
        let mut alerts = node.alert_rx.take().unwrap();
        node.start().await.unwrap();

        clock.advance(600);
        tokio::time::sleep(Duration::from_secs(2)).await;
        let alert = alerts.recv().await.unwrap();
        assert_eq!(alert.guarantee_id, id);

        node.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_requires_start() {
        let mut node = SlabondNode::new(NodeConfig::default()).unwrap();
        assert!(node.run().await.is_err());
    }
}
