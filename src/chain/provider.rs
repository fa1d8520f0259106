//! Chain provider with multi-RPC support and automatic failover

use super::client::{ChainClient, ReceiptStatus};
use crate::config::ChainConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::events::topics;
use crate::tx::{SubmittedTx, TransactionSender, UpdatePayload};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Multi-provider wrapper with automatic failover
pub struct EvmClient {
    name: String,
    contract_address: Address,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    rpc_timeout: Duration,
    /// Present only on chains the relayer writes to
    sender: Option<TransactionSender>,
}

impl EvmClient {
    pub fn new(name: &str, config: &ChainConfig, sender: Option<TransactionSender>) -> RelayerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider.interval(Duration::from_millis(100)));
                    debug!("Added HTTP provider for chain {}: {}", name, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RelayerError::ChainConnection {
                chain: name.to_string(),
                message: "No valid RPC providers".to_string(),
            });
        }

        let contract_address = config
            .contract_address
            .parse()
            .map_err(|e| RelayerError::Config(format!("Invalid contract address for {}: {}", name, e)))?;

        Ok(Self {
            name: name.to_string(),
            contract_address,
            http_providers,
            current_provider: AtomicUsize::new(0),
            rpc_timeout: Duration::from_secs(config.rpc_timeout_secs),
            sender,
        })
    }

    /// Get the active HTTP provider
    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.name, next);
    }

    fn connection_error(&self, message: impl Into<String>) -> RelayerError {
        RelayerError::ChainConnection {
            chain: self.name.clone(),
            message: message.into(),
        }
    }

    /// Run a read call against each provider in turn until one answers in time
    async fn with_failover<'a, T, F, Fut>(&'a self, operation: &str, call: F) -> RelayerResult<T>
    where
        F: Fn(&'a Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        for _ in 0..self.http_providers.len() {
            match tokio::time::timeout(self.rpc_timeout, call(self.http())).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    warn!("{} failed on chain {}: {}", operation, self.name, e);
                }
                Err(_) => {
                    warn!("{} timed out on chain {}", operation, self.name);
                }
            }
            self.failover();
        }

        Err(self.connection_error(format!("All providers failed: {}", operation)))
    }
}

#[async_trait]
impl ChainClient for EvmClient {
    async fn block_number(&self) -> RelayerResult<u64> {
        self.with_failover("get_block_number", |p| p.get_block_number())
            .await
            .map(|b| b.as_u64())
    }

    async fn fetch_logs(&self, from: u64, to: u64) -> RelayerResult<Vec<Log>> {
        let filter = Filter::new()
            .address(self.contract_address)
            .topic0(vec![*topics::DEPOSIT, *topics::PROPOSAL])
            .from_block(from)
            .to_block(to);

        self.with_failover("get_logs", |p| {
            let filter = filter.clone();
            async move { p.get_logs(&filter).await }
        })
        .await
    }

    async fn submit_update(&self, payload: &UpdatePayload) -> RelayerResult<SubmittedTx> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| RelayerError::Wallet(format!("No sender configured for chain {}", self.name)))?;

        sender
            .send(self.http(), self.contract_address, payload.calldata())
            .await
    }

    async fn receipt_status(&self, tx_hash: &str) -> RelayerResult<ReceiptStatus> {
        let hash: H256 = tx_hash
            .parse()
            .map_err(|e| RelayerError::Transaction(format!("Invalid tx hash {}: {}", tx_hash, e)))?;

        let receipt = self
            .with_failover("get_transaction_receipt", |p| p.get_transaction_receipt(hash))
            .await?;

        Ok(match receipt {
            None => ReceiptStatus::NotFound,
            Some(r) if r.status == Some(U64::from(1)) => ReceiptStatus::Success,
            Some(_) => ReceiptStatus::Failed,
        })
    }
}
