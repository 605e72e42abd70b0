//! Background reconciliation of stuck payments.
//!
//! Callbacks and webhooks can both get lost: the payer closes the browser
//! mid-redirect, the gateway's webhook delivery fails. This worker sweeps
//! transactions that stayed INITIATED or PENDING past a minimum age and asks
//! the gateway for their authoritative status through the same path a manual
//! verify takes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::services::settlement::SettlementService;

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// Whether the worker runs at all.
    pub enabled: bool,
    /// How often the worker wakes up to sweep.
    pub poll_interval: Duration,
    /// Maximum transactions inspected per cycle.
    pub batch_size: i64,
    /// Only transactions untouched for at least this long are swept; fresher
    /// ones are still expected to settle through a callback or webhook.
    pub min_age_minutes: i64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(300),
            batch_size: 25,
            min_age_minutes: 15,
        }
    }
}

impl ReconciliationConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.enabled = std::env::var("RECON_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(cfg.enabled);
        cfg.poll_interval = Duration::from_secs(
            std::env::var("RECON_POLL_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.poll_interval.as_secs()),
        );
        cfg.batch_size = std::env::var("RECON_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.batch_size);
        cfg.min_age_minutes = std::env::var("RECON_MIN_AGE_MINUTES")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(cfg.min_age_minutes);
        cfg
    }
}

pub struct ReconciliationWorker {
    settlement: Arc<SettlementService>,
    config: ReconciliationConfig,
}

impl ReconciliationWorker {
    pub fn new(settlement: Arc<SettlementService>, config: ReconciliationConfig) -> Self {
        Self { settlement, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            min_age_minutes = self.config.min_age_minutes,
            "payment reconciliation worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("payment reconciliation worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.run_cycle().await {
                        warn!(error = %e, "reconciliation cycle failed");
                    }
                }
            }
        }

        info!("payment reconciliation worker stopped");
    }

    async fn run_cycle(&self) -> anyhow::Result<()> {
        let min_age = chrono::Duration::minutes(self.config.min_age_minutes);
        self.settlement
            .reconcile_stale(min_age, self.config.batch_size)
            .await?;
        Ok(())
    }
}
