//! Chain module - chain connections and per-chain workers
//!
//! This module provides:
//! - Multi-RPC provider management with automatic failover
//! - The log watcher and confirmation worker run for every chain
//! - Per-chain worker status for the status API

pub mod client;
pub mod confirmer;
pub mod provider;
pub mod watcher;

pub use client::{ChainClient, ReceiptStatus};
pub use confirmer::ChainConfirmer;
pub use provider::EvmClient;
pub use watcher::ChainWatcher;

use crate::config::Settings;
use crate::error::{RelayerError, RelayerResult};
use crate::tx::TransactionSender;

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Last known state of a chain's watcher
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    pub chain: String,
    pub last_scanned_block: Option<u64>,
    pub last_tick_time: Option<i64>,
    pub error: Option<String>,
}

impl WorkerStatus {
    pub fn new(chain: &str) -> Self {
        Self {
            chain: chain.to_string(),
            last_scanned_block: None,
            last_tick_time: None,
            error: None,
        }
    }
}

/// Manages connections to all configured chains
pub struct ChainManager {
    /// Clients indexed by chain name
    clients: DashMap<String, Arc<dyn ChainClient>>,
    /// Watcher status indexed by chain name
    status: Arc<DashMap<String, WorkerStatus>>,
}

impl ChainManager {
    /// Connect every enabled chain. Only the home chain gets a signing sender.
    pub fn connect(settings: &Settings) -> RelayerResult<Self> {
        let manager = Self::default();

        for (name, chain_config) in settings.enabled_chains() {
            let sender = if *name == settings.relayer.home_chain {
                let wallet = TransactionSender::load_wallet(&settings.wallet)?;
                let sender = TransactionSender::new(
                    wallet,
                    chain_config.evm_chain_id,
                    Duration::from_secs(chain_config.rpc_timeout_secs),
                );
                info!("Chain {}: reporting from {:?}", name, sender.address());
                Some(sender)
            } else {
                None
            };

            info!(
                "Initializing chain {} (bridge id {}, EVM id {})",
                name, chain_config.chain_id, chain_config.evm_chain_id
            );
            let client = EvmClient::new(name, chain_config, sender)?;
            manager.insert(name, Arc::new(client));
        }

        Ok(manager)
    }

    pub fn insert(&self, chain: &str, client: Arc<dyn ChainClient>) {
        self.status
            .insert(chain.to_string(), WorkerStatus::new(chain));
        self.clients.insert(chain.to_string(), client);
    }

    /// Get client for a specific chain
    pub fn client(&self, chain: &str) -> RelayerResult<Arc<dyn ChainClient>> {
        self.clients
            .get(chain)
            .map(|c| c.value().clone())
            .ok_or_else(|| RelayerError::ChainNotFound {
                chain: chain.to_string(),
            })
    }

    /// Shared status map the watchers write into
    pub fn status_handle(&self) -> Arc<DashMap<String, WorkerStatus>> {
        self.status.clone()
    }

    /// Snapshot of every chain's watcher status, ordered by chain name
    pub fn status_of_workers(&self) -> BTreeMap<String, WorkerStatus> {
        self.status
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Get all connected chain names
    pub fn connected_chains(&self) -> Vec<String> {
        let mut chains: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        chains.sort();
        chains
    }
}

impl Default for ChainManager {
    fn default() -> Self {
        Self {
            clients: DashMap::new(),
            status: Arc::new(DashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::client::MockChainClient;

    #[test]
    fn test_status_of_workers() {
        let manager = ChainManager::default();
        manager.insert("LA", Arc::new(MockChainClient::new()));
        manager.insert("ETH", Arc::new(MockChainClient::new()));

        manager.status_handle().alter("ETH", |_, mut s| {
            s.last_scanned_block = Some(42);
            s
        });

        let status = manager.status_of_workers();
        assert_eq!(status.keys().collect::<Vec<_>>(), vec!["ETH", "LA"]);
        assert_eq!(status["ETH"].last_scanned_block, Some(42));
        assert!(manager.client("BSC").is_err());
        assert_eq!(manager.connected_chains(), vec!["ETH", "LA"]);
    }
}
