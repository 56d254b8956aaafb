//! LOW_STOCK outbox delivery
//!
//! Events are written by the stock batch in the same transaction as the
//! entries that triggered them. [`OutboxWorker`] polls the table in seq order
//! and hands events to the procurement collaborator, deleting each row only
//! after the hand-off succeeded, so the table holds only undelivered events.

use async_trait::async_trait;
use redb::ReadableTable;
use shared::models::{OutboxEvent, OutboxPayload};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::db::tables::OUTBOX;
use crate::db::{Storage, StorageError, StorageResult};
use crate::observability::alerts::{AlertBus, AlertKind};

/// Receiver of procurement events
#[async_trait]
pub trait ProcurementSink: Send + Sync {
    async fn deliver(&self, event: &OutboxEvent) -> Result<(), String>;
}

/// Posts events as JSON to a webhook
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ProcurementSink for WebhookSink {
    async fn deliver(&self, event: &OutboxEvent) -> Result<(), String> {
        let response = self
            .client
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("webhook responded {}", response.status()))
        }
    }
}

/// Logs events when no procurement endpoint is configured
pub struct LogSink;

#[async_trait]
impl ProcurementSink for LogSink {
    async fn deliver(&self, event: &OutboxEvent) -> Result<(), String> {
        match &event.payload {
            OutboxPayload::LowStock(e) => tracing::info!(
                target: "procurement",
                item_id = %e.item_id,
                venue_id = %e.venue_id,
                current_stock = %e.current_stock,
                reorder_qty = %e.reorder_qty,
                "LOW_STOCK"
            ),
        }
        Ok(())
    }
}

/// Undelivered events in seq order
pub fn pending(storage: &Storage, limit: usize) -> StorageResult<Vec<OutboxEvent>> {
    let read_txn = storage.begin_read()?;
    let table = read_txn.open_table(OUTBOX)?;
    let mut out = Vec::new();
    for row in table.iter()?.take(limit) {
        let (_, value) = row?;
        out.push(serde_json::from_slice(value.value())?);
    }
    Ok(out)
}

fn record_failure(storage: &Storage, seq: u64) -> StorageResult<()> {
    let txn = storage.begin_write()?;
    {
        let mut table = txn.open_table(OUTBOX)?;
        let current: Option<OutboxEvent> = match table.get(seq)? {
            Some(v) => Some(serde_json::from_slice(v.value())?),
            None => None,
        };
        if let Some(mut event) = current {
            event.attempts += 1;
            let value = serde_json::to_vec(&event)?;
            table.insert(seq, value.as_slice())?;
        }
    }
    txn.commit().map_err(StorageError::from)?;
    Ok(())
}

fn acknowledge(storage: &Storage, seq: u64) -> StorageResult<()> {
    let txn = storage.begin_write()?;
    {
        let mut table = txn.open_table(OUTBOX)?;
        table.remove(seq)?;
    }
    txn.commit().map_err(StorageError::from)?;
    Ok(())
}

pub struct OutboxWorker {
    storage: Storage,
    sink: Box<dyn ProcurementSink>,
    poll_interval: Duration,
    shutdown: CancellationToken,
    alerts: Option<AlertBus>,
}

const BATCH_SIZE: usize = 50;
/// Consecutive failures of the head event before an alert is raised
const STALL_AFTER: u32 = 10;

impl OutboxWorker {
    pub fn new(
        storage: Storage,
        sink: Box<dyn ProcurementSink>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            storage,
            sink,
            poll_interval,
            shutdown,
            alerts: None,
        }
    }

    pub fn with_alerts(mut self, alerts: AlertBus) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub async fn run(self) {
        tracing::info!("Outbox worker started");
        loop {
            if let Err(e) = self.drain_once().await {
                tracing::error!(error = %e, "Outbox drain failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Outbox worker received shutdown signal");
                    return;
                }
            }
        }
    }

    /// Deliver one batch; returns how many events were delivered
    pub async fn drain_once(&self) -> StorageResult<usize> {
        let mut delivered = 0;
        for event in pending(&self.storage, BATCH_SIZE)? {
            match self.sink.deliver(&event).await {
                Ok(()) => {
                    acknowledge(&self.storage, event.seq)?;
                    tracing::debug!(seq = event.seq, "Outbox event delivered");
                    delivered += 1;
                }
                Err(reason) => {
                    tracing::warn!(seq = event.seq, attempts = event.attempts + 1, %reason, "Outbox delivery failed");
                    record_failure(&self.storage, event.seq)?;
                    if event.attempts + 1 == STALL_AFTER {
                        if let Some(alerts) = &self.alerts {
                            alerts.raise(
                                AlertKind::OutboxStalled,
                                format!("outbox:{}", event.seq),
                                format!("Procurement delivery failing: {reason}"),
                            );
                        }
                    }
                    // Keep order: later events wait for this one
                    break;
                }
            }
        }
        Ok(delivered)
    }
}
