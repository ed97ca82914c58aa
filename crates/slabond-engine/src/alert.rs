use slabond_core::Alert;
use tokio::sync::mpsc;

/// Receives emergency alerts bound for escalation contacts.
///
/// Delivery to the contacts themselves happens elsewhere.
pub trait AlertSink: Send + Sync {
    fn notify(&self, alert: &Alert);
}

/// Forwards alerts into an unbounded tokio channel.
pub struct ChannelAlertSink {
    tx: mpsc::UnboundedSender<Alert>,
}

impl ChannelAlertSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelAlertSink {
    fn notify(&self, alert: &Alert) {
        if self.tx.send(alert.clone()).is_err() {
            tracing::warn!(
                guarantee_id = %alert.guarantee_id,
                reason = %alert.reason,
                "Alert receiver dropped; alert not forwarded"
            );
        }
    }
}
