//! Signs and broadcasts relayer transactions

use crate::config::WalletConfig;
use crate::error::{RelayerError, RelayerResult};

use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// A transaction accepted by a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTx {
    pub tx_hash: String,
    pub nonce: u64,
}

/// Transaction sender bound to one wallet and one EVM chain
pub struct TransactionSender {
    wallet: LocalWallet,
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
    max_attempts: u32,
    retry_delay: Duration,
    send_timeout: Duration,
    /// Serializes nonce selection and broadcast
    submit_lock: Mutex<()>,
}

impl TransactionSender {
    pub fn new(wallet: LocalWallet, evm_chain_id: u64, send_timeout: Duration) -> Self {
        info!(
            "Transaction sender initialized with wallet {:?} on EVM chain {}",
            wallet.address(),
            evm_chain_id
        );

        Self {
            wallet: wallet.with_chain_id(evm_chain_id),
            gas_limit_buffer_percent: 20,
            gas_price_buffer_percent: 10,
            max_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            send_timeout,
            submit_lock: Mutex::new(()),
        }
    }

    /// Load the signing key from the configured environment variable
    pub fn load_wallet(config: &WalletConfig) -> RelayerResult<LocalWallet> {
        let key = std::env::var(&config.private_key_env).map_err(|_| {
            RelayerError::Wallet(format!(
                "No wallet configured. Set {}",
                config.private_key_env
            ))
        })?;

        key.trim()
            .parse::<LocalWallet>()
            .map_err(|e| RelayerError::Wallet(format!("Invalid private key: {}", e)))
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Build, sign and broadcast a call to `to`
    pub async fn send(
        &self,
        provider: &Provider<Http>,
        to: Address,
        data: Bytes,
    ) -> RelayerResult<SubmittedTx> {
        let _guard = self.submit_lock.lock().await;

        let nonce = self.pending_nonce(provider).await?;
        let gas_price = self.gas_price(provider).await?;

        let request = TransactionRequest::new()
            .from(self.wallet.address())
            .to(to)
            .data(data)
            .nonce(nonce)
            .gas_price(gas_price);
        let mut tx = TypedTransaction::Legacy(request);

        let gas_limit = self.estimate_gas(provider, &tx).await?;
        tx.set_gas(gas_limit);
        tx.set_chain_id(self.wallet.chain_id());

        let tx_hash = self.send_with_retry(provider, &tx).await?;

        Ok(SubmittedTx {
            tx_hash: format!("{:?}", tx_hash),
            nonce: nonce.as_u64(),
        })
    }

    async fn pending_nonce(&self, provider: &Provider<Http>) -> RelayerResult<U256> {
        provider
            .get_transaction_count(self.wallet.address(), Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| RelayerError::Transaction(format!("Failed to fetch nonce: {}", e)))
    }

    async fn gas_price(&self, provider: &Provider<Http>) -> RelayerResult<U256> {
        let price = provider
            .get_gas_price()
            .await
            .map_err(|e| RelayerError::Transaction(format!("Failed to fetch gas price: {}", e)))?;
        let buffered = price + price * self.gas_price_buffer_percent / 100;
        debug!("Gas price {} (buffered {})", price, buffered);
        Ok(buffered)
    }

    async fn estimate_gas(
        &self,
        provider: &Provider<Http>,
        tx: &TypedTransaction,
    ) -> RelayerResult<U256> {
        let estimate = provider
            .estimate_gas(tx, None)
            .await
            .map_err(|e| RelayerError::Transaction(format!("Gas estimation failed: {}", e)))?;
        Ok(estimate + estimate * self.gas_limit_buffer_percent / 100)
    }

    /// Send transaction with retry logic
    async fn send_with_retry(
        &self,
        provider: &Provider<Http>,
        tx: &TypedTransaction,
    ) -> RelayerResult<H256> {
        let signature = self
            .wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| RelayerError::Wallet(e.to_string()))?;
        let signed_tx = tx.rlp_signed(&signature);

        let mut attempts = 0;
        let mut last_error = None;

        while attempts < self.max_attempts {
            attempts += 1;

            match timeout(self.send_timeout, provider.send_raw_transaction(signed_tx.clone())).await {
                Ok(Ok(pending_tx)) => {
                    let tx_hash = pending_tx.tx_hash();
                    info!(
                        "Transaction sent: {:?} (attempt {}/{})",
                        tx_hash, attempts, self.max_attempts
                    );
                    return Ok(tx_hash);
                }
                Ok(Err(e)) => {
                    let error_msg = e.to_string();

                    // Already known to the node: the signed payload fixes the hash
                    if error_msg.contains("already known") {
                        return Ok(tx.hash(&signature));
                    }
                    if error_msg.contains("nonce too low") || error_msg.contains("insufficient funds") {
                        error!("Transaction rejected: {}", error_msg);
                        return Err(RelayerError::Transaction(error_msg));
                    }

                    warn!("Transaction send failed (attempt {}): {}", attempts, error_msg);
                    last_error = Some(RelayerError::Transaction(error_msg));
                }
                Err(_) => {
                    warn!("Transaction send timeout (attempt {})", attempts);
                    last_error = Some(RelayerError::Timeout {
                        operation: "send transaction".to_string(),
                    });
                }
            }

            if attempts < self.max_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| RelayerError::Transaction("Unknown error".to_string())))
    }
}
