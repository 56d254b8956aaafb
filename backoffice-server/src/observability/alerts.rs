//! In-process alert bus
//!
//! Integrity failures (a broken ledger chain, a stalled outbox) are published
//! here and logged under the `alert` target. The [`AlertDispatcher`] forwards
//! them to an optional webhook.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    LedgerTampered,
    OutboxStalled,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub subject: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AlertBus {
    tx: broadcast::Sender<Alert>,
}

impl Default for AlertBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl AlertBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn raise(&self, kind: AlertKind, subject: impl Into<String>, message: impl Into<String>) {
        let alert = Alert {
            kind,
            subject: subject.into(),
            message: message.into(),
            at: shared::util::now(),
        };
        tracing::error!(
            target: "alert",
            kind = ?alert.kind,
            subject = %alert.subject,
            "{}",
            alert.message
        );
        // No subscribers is fine; the log line above is the record
        let _ = self.tx.send(alert);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.tx.subscribe()
    }
}

/// Forwards alerts to a webhook until shutdown
pub struct AlertDispatcher {
    rx: broadcast::Receiver<Alert>,
    client: reqwest::Client,
    webhook_url: Option<String>,
    shutdown: CancellationToken,
}

impl AlertDispatcher {
    pub fn new(bus: &AlertBus, webhook_url: Option<String>, shutdown: CancellationToken) -> Self {
        Self {
            rx: bus.subscribe(),
            client: reqwest::Client::new(),
            webhook_url,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(webhook = self.webhook_url.is_some(), "Alert dispatcher started");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = self.rx.recv() => match received {
                    Ok(alert) => self.forward(&alert).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Alert dispatcher lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        tracing::info!("Alert dispatcher stopped");
    }

    async fn forward(&self, alert: &Alert) {
        let Some(url) = &self.webhook_url else {
            return;
        };
        match self.client.post(url).json(alert).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(kind = ?alert.kind, "Alert forwarded");
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "Alert webhook rejected alert");
            }
            Err(e) => tracing::warn!(error = %e, "Alert webhook unreachable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_raise_reaches_subscribers() {
        let bus = AlertBus::default();
        let mut rx = bus.subscribe();
        bus.raise(AlertKind::LedgerTampered, "item-1", "chain broken at seq 2");
        let alert = rx.recv().await.unwrap();
        assert_eq!(alert.kind, AlertKind::LedgerTampered);
        assert_eq!(alert.subject, "item-1");
    }
}
