//! Per-chain log scanner
//!
//! Each tick scans `[checkpoint + 1, head - safety_lag]` (capped at
//! `max_block_range` blocks), decodes bridge events and persists them as
//! unconfirmed logs together with the new checkpoint. Logs that match a
//! bridge signature but fail to decode are kept aside for audit before the
//! checkpoint moves past them.

use super::client::ChainClient;
use super::WorkerStatus;
use crate::config::ChainConfig;
use crate::error::RelayerResult;
use crate::events::EventParser;
use crate::state::{SkippedLog, Store, TxLog};

use dashmap::DashMap;
use ethers::types::Log;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Result of one scan tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Nothing new below the safe head
    Idle { head: u64 },
    Scanned {
        from: u64,
        to: u64,
        found: usize,
        recorded: usize,
    },
}

pub struct ChainWatcher {
    chain: String,
    config: ChainConfig,
    client: Arc<dyn ChainClient>,
    store: Arc<dyn Store>,
    parser: EventParser,
    status: Arc<DashMap<String, WorkerStatus>>,
}

impl ChainWatcher {
    pub fn new(
        chain: &str,
        config: ChainConfig,
        is_home: bool,
        client: Arc<dyn ChainClient>,
        store: Arc<dyn Store>,
        status: Arc<DashMap<String, WorkerStatus>>,
    ) -> Self {
        Self {
            chain: chain.to_string(),
            config,
            client,
            store,
            parser: EventParser::new(chain, is_home),
            status,
        }
    }

    /// Run until shutdown is signalled
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.fetch_interval_ms));
        info!("Watcher started for chain {}", self.chain);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            let result = self.tick().await;
            self.update_status(&result);
            if let Err(e) = result {
                error!("Watcher error for chain {}: {}", self.chain, e);
            }
        }

        info!("Watcher stopped for chain {}", self.chain);
    }

    /// Scan one window of blocks
    pub async fn tick(&self) -> RelayerResult<ScanOutcome> {
        let head = self.client.block_number().await?;
        crate::metrics::record_block_height(&self.chain, head);

        let safe_head = head.saturating_sub(self.config.safety_lag_blocks);
        let from = match self.store.get_checkpoint(&self.chain).await? {
            Some(checkpoint) => checkpoint + 1,
            None => self.config.start_block,
        };

        if from > safe_head {
            self.store.refresh_confirmations(&self.chain, head).await?;
            return Ok(ScanOutcome::Idle { head });
        }

        let range = self.config.max_block_range.max(1);
        let to = safe_head.min(from + range - 1);

        let raw = self.client.fetch_logs(from, to).await?;
        let (logs, skipped) = self.decode(&raw);

        if !skipped.is_empty() {
            self.store.record_skipped_logs(&skipped).await?;
        }
        let recorded = self.store.record_scan(&self.chain, &logs, to).await?;
        self.store.refresh_confirmations(&self.chain, head).await?;

        crate::metrics::record_blocks_scanned(&self.chain, to - from + 1);
        crate::metrics::record_logs_recorded(&self.chain, recorded);

        if !logs.is_empty() {
            info!(
                "Chain {}: blocks {}..={} yielded {} logs ({} new)",
                self.chain,
                from,
                to,
                logs.len(),
                recorded
            );
        } else {
            debug!("Chain {}: scanned blocks {}..={}", self.chain, from, to);
        }

        Ok(ScanOutcome::Scanned {
            from,
            to,
            found: logs.len(),
            recorded,
        })
    }

    /// Decode raw logs, dropping unknown ones and setting malformed ones aside
    fn decode(&self, raw: &[Log]) -> (Vec<TxLog>, Vec<SkippedLog>) {
        let now = chrono::Utc::now().timestamp();
        let mut logs = Vec::with_capacity(raw.len());
        let mut skipped = Vec::new();

        for log in raw {
            let event = match self.parser.parse_log(log) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        "Chain {}: skipping malformed log in tx {:?}: {}",
                        self.chain, log.transaction_hash, e
                    );
                    crate::metrics::record_decode_error(&self.chain);
                    skipped.push(SkippedLog {
                        chain: self.chain.clone(),
                        tx_hash: log
                            .transaction_hash
                            .map(|h| format!("{:?}", h))
                            .unwrap_or_default(),
                        log_index: log.log_index.map(|i| i.low_u64()),
                        block_height: log.block_number.map(|b| b.as_u64()),
                        reason: e.to_string(),
                        create_time: now,
                    });
                    continue;
                }
            };

            let position = match self.parser.position(log) {
                Ok(position) => position,
                Err(e) => {
                    warn!("Chain {}: skipping unmined log: {}", self.chain, e);
                    continue;
                }
            };

            if let Some(tx_log) = event.to_tx_log(&self.chain, &position, now) {
                debug!(
                    "Chain {}: {} log ({}) for swap {} at block {}",
                    self.chain,
                    event.name(),
                    tx_log.tx_type,
                    tx_log.swap_id,
                    tx_log.block_height
                );
                logs.push(tx_log);
            }
        }

        (logs, skipped)
    }

    fn update_status(&self, result: &RelayerResult<ScanOutcome>) {
        let now = chrono::Utc::now().timestamp();
        let mut entry = self
            .status
            .entry(self.chain.clone())
            .or_insert_with(|| WorkerStatus::new(&self.chain));

        entry.last_tick_time = Some(now);
        match result {
            Ok(ScanOutcome::Scanned { to, .. }) => {
                entry.last_scanned_block = Some(*to);
                entry.error = None;
            }
            Ok(ScanOutcome::Idle { .. }) => {
                entry.error = None;
            }
            Err(e) => {
                entry.error = Some(e.to_string());
            }
        }
    }
}
