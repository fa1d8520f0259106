//! Chain access used by the workers

use crate::error::RelayerResult;
use crate::tx::{SubmittedTx, UpdatePayload};

use async_trait::async_trait;
use ethers::types::Log;

/// Outcome of looking up a transaction receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Failed,
    NotFound,
}

/// Reads and writes one chain's bridge contract
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current head block number
    async fn block_number(&self) -> RelayerResult<u64>;

    /// Bridge contract logs in `[from, to]`
    async fn fetch_logs(&self, from: u64, to: u64) -> RelayerResult<Vec<Log>>;

    /// Submit an `updateSwapStatus` call
    async fn submit_update(&self, payload: &UpdatePayload) -> RelayerResult<SubmittedTx>;

    async fn receipt_status(&self, tx_hash: &str) -> RelayerResult<ReceiptStatus>;
}
