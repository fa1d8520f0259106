//! Per-chain confirmation worker

use crate::config::ChainConfig;
use crate::error::RelayerResult;
use crate::state::{BatchReport, Store};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Promotes a chain's logs that reached the confirmation threshold
pub struct ChainConfirmer {
    chain: String,
    threshold: u64,
    interval: Duration,
    stuck_timeout_secs: i64,
    store: Arc<dyn Store>,
}

impl ChainConfirmer {
    pub fn new(chain: &str, config: &ChainConfig, stuck_timeout_secs: u64, store: Arc<dyn Store>) -> Self {
        Self {
            chain: chain.to_string(),
            threshold: config.confirmation_blocks,
            interval: Duration::from_millis(config.confirm_interval_ms),
            stuck_timeout_secs: stuck_timeout_secs as i64,
            store,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        info!(
            "Confirmation worker started for chain {} (threshold {})",
            self.chain, self.threshold
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            // aborted batches are retried whole on the next tick
            if let Err(e) = self.tick().await {
                error!("Confirmation batch failed for chain {}: {}", self.chain, e);
            }
        }

        info!("Confirmation worker stopped for chain {}", self.chain);
    }

    /// Confirm one batch
    pub async fn tick(&self) -> RelayerResult<BatchReport> {
        let now = chrono::Utc::now().timestamp();
        let report = self
            .store
            .confirm_batch(&self.chain, self.threshold, now, self.stuck_timeout_secs)
            .await?;

        if report.confirmed_logs > 0 {
            info!(
                "Chain {}: confirmed {} logs, {} new swaps, {} transitions",
                self.chain,
                report.confirmed_logs,
                report.events_created,
                report.transitions.len()
            );
            crate::metrics::record_batch(&self.chain, &report);
        }

        Ok(report)
    }
}
