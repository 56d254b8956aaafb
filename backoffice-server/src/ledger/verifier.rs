//! Periodic chain verification

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{Ledger, LedgerResult};
use crate::observability::alerts::{AlertBus, AlertKind};

pub struct LedgerVerifier {
    ledger: Ledger,
    alerts: AlertBus,
    interval: Duration,
    shutdown: CancellationToken,
}

impl LedgerVerifier {
    pub fn new(
        ledger: Ledger,
        alerts: AlertBus,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            ledger,
            alerts,
            interval,
            shutdown,
        }
    }

    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Ledger verifier started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Ledger verifier received shutdown signal");
                    return;
                }
            }
            let ledger = self.ledger.clone();
            let alerts = self.alerts.clone();
            match tokio::task::spawn_blocking(move || verify_all(&ledger, &alerts)).await {
                Ok(Ok(broken)) => tracing::info!(broken, "Ledger verification pass finished"),
                Ok(Err(e)) => tracing::error!(error = %e, "Ledger verification failed"),
                Err(e) => tracing::error!(error = %e, "Ledger verification task failed"),
            }
        }
    }
}

/// Verify every item's chain; raises an alert per broken chain and returns
/// how many were broken
pub fn verify_all(ledger: &Ledger, alerts: &AlertBus) -> LedgerResult<usize> {
    let mut broken = 0;
    for item_id in ledger.item_ids()? {
        let result = ledger.verify(&item_id)?;
        if let Some(seq) = result.first_broken_seq {
            broken += 1;
            alerts.raise(
                AlertKind::LedgerTampered,
                item_id.clone(),
                format!("Ledger chain for {item_id} is broken at seq {seq}"),
            );
        }
    }
    Ok(broken)
}
