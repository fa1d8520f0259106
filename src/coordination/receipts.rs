//! Receipt tracking for transactions the relayer submitted

use crate::chain::{ChainClient, ReceiptStatus};
use crate::error::RelayerResult;
use crate::state::{Store, TxSentStatus};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct ReceiptTracker {
    chain: String,
    client: Arc<dyn ChainClient>,
    store: Arc<dyn Store>,
    interval: Duration,
}

impl ReceiptTracker {
    pub fn new(chain: &str, client: Arc<dyn ChainClient>, store: Arc<dyn Store>, interval: Duration) -> Self {
        Self {
            chain: chain.to_string(),
            client,
            store,
            interval,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            if let Err(e) = self.tick().await {
                error!("Receipt check failed for chain {}: {}", self.chain, e);
            }
        }

        info!("Receipt tracker stopped for chain {}", self.chain);
    }

    /// Look up receipts of unsettled submissions; returns how many changed
    pub async fn tick(&self) -> RelayerResult<usize> {
        let mut changed = 0;

        for sent in self.store.unsettled_tx_sent(&self.chain).await? {
            if sent.tx_hash.is_empty() {
                continue;
            }

            let next = match self.client.receipt_status(&sent.tx_hash).await {
                Ok(ReceiptStatus::Success) => TxSentStatus::Confirmed,
                Ok(ReceiptStatus::Failed) => TxSentStatus::Failed,
                Ok(ReceiptStatus::NotFound) => TxSentStatus::NotFound,
                Err(e) => {
                    warn!("Receipt lookup for {} failed: {}", sent.tx_hash, e);
                    continue;
                }
            };

            if next == sent.status {
                continue;
            }
            if next == TxSentStatus::Failed {
                error!("Transaction {} for swap {} reverted", sent.tx_hash, sent.swap_id);
            } else {
                debug!("Transaction {} is now {}", sent.tx_hash, next.as_str());
            }

            self.store.update_tx_sent_status(sent.id, next).await?;
            changed += 1;
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::client::MockChainClient;
    use crate::error::RelayerError;
    use crate::state::{MemoryStore, NewTxSent, TxType};

    fn pending(hash: &str) -> NewTxSent {
        NewTxSent {
            chain: "LA".to_string(),
            tx_type: TxType::Update,
            swap_id: format!("swap-{}", hash),
            tx_hash: hash.to_string(),
            nonce: 1,
            status: TxSentStatus::Pending,
            err_msg: String::new(),
        }
    }

    #[tokio::test]
    async fn test_receipts_settle_sent_rows() {
        let store = Arc::new(MemoryStore::new());
        for hash in ["0x01", "0x02", "0x03", "0x04"] {
            store.insert_tx_sent(pending(hash)).await.unwrap();
        }

        let mut client = MockChainClient::new();
        client.expect_receipt_status().returning(|hash| match hash {
            "0x01" => Ok(ReceiptStatus::Success),
            "0x02" => Ok(ReceiptStatus::Failed),
            "0x03" => Ok(ReceiptStatus::NotFound),
            _ => Err(RelayerError::Timeout {
                operation: "get_transaction_receipt".to_string(),
            }),
        });

        let tracker = ReceiptTracker::new("LA", Arc::new(client), store.clone(), Duration::from_secs(15));
        assert_eq!(tracker.tick().await.unwrap(), 3);

        let statuses: Vec<_> = store.tx_sent().await.into_iter().map(|t| t.status).collect();
        assert_eq!(
            statuses,
            vec![
                TxSentStatus::Confirmed,
                TxSentStatus::Failed,
                TxSentStatus::NotFound,
                TxSentStatus::Pending
            ]
        );

        // not-found rows stay under watch, settled ones do not
        let unsettled = store.unsettled_tx_sent("LA").await.unwrap();
        assert_eq!(unsettled.len(), 2);
    }
}
