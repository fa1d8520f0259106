//! Transactional store interface shared by all workers

use super::batch::BatchReport;
use super::model::{
    Event, EventStatus, NewTxSent, SentResult, SentWrite, SkippedLog, TxLog, TxSent, TxSentStatus,
    TxType,
};
use crate::error::RelayerResult;

use async_trait::async_trait;

/// Persistence for events, observed logs and sent transactions.
///
/// Every method that touches more than one record runs in a single
/// transaction: either all of its writes are visible afterwards or none are.
#[async_trait]
pub trait Store: Send + Sync {
    /// Verify the backend is reachable
    async fn health_check(&self) -> RelayerResult<()>;

    /// Last fully scanned block of a chain
    async fn get_checkpoint(&self, chain: &str) -> RelayerResult<Option<u64>>;

    /// Insert scanned logs and advance the chain checkpoint to `to_block`.
    ///
    /// Logs already recorded (same chain, hash and log index) are skipped.
    /// Returns the number of logs inserted.
    async fn record_scan(&self, chain: &str, logs: &[TxLog], to_block: u64) -> RelayerResult<usize>;

    /// Keep undecodable logs for audit; already-kept ones are ignored
    async fn record_skipped_logs(&self, skipped: &[SkippedLog]) -> RelayerResult<usize>;

    /// Recompute `confirmed_num` of the chain's unconfirmed logs against `head`
    async fn refresh_confirmations(&self, chain: &str, head: u64) -> RelayerResult<u64>;

    /// Confirm every unconfirmed log of `chain` with at least `threshold`
    /// confirmations and apply them to their swaps.
    async fn confirm_batch(
        &self,
        chain: &str,
        threshold: u64,
        now: i64,
        stuck_timeout_secs: i64,
    ) -> RelayerResult<BatchReport>;

    async fn get_event(&self, swap_id: &str) -> RelayerResult<Option<Event>>;

    async fn events_by_statuses(&self, statuses: &[EventStatus]) -> RelayerResult<Vec<Event>>;

    /// Move a swap from `expected` to `next` and apply `sent`, atomically.
    ///
    /// The status is re-read inside the transaction; when it is no longer
    /// `expected` nothing is written and `false` is returned.
    async fn settle_report(
        &self,
        swap_id: &str,
        expected: EventStatus,
        next: EventStatus,
        sent: Option<SentWrite>,
    ) -> RelayerResult<bool>;

    /// Record a sent transaction on its own, ahead of submission
    async fn insert_tx_sent(&self, sent: NewTxSent) -> RelayerResult<TxSent>;

    /// Write a submission result onto an existing row
    async fn finish_tx_sent(&self, id: i64, result: &SentResult) -> RelayerResult<()>;

    async fn tx_sent_for_swap(&self, swap_id: &str, tx_type: TxType) -> RelayerResult<Vec<TxSent>>;

    async fn tx_sent_by_hash(&self, tx_hash: &str) -> RelayerResult<Option<TxSent>>;

    /// Sent transactions of a chain still waiting on a receipt
    async fn unsettled_tx_sent(&self, chain: &str) -> RelayerResult<Vec<TxSent>>;

    async fn update_tx_sent_status(&self, id: i64, status: TxSentStatus) -> RelayerResult<()>;

    /// Swaps whose stuck-check deadline is at or before `now`
    async fn overdue_swaps(&self, now: i64) -> RelayerResult<Vec<Event>>;

    async fn clear_deadline(&self, swap_id: &str) -> RelayerResult<()>;
}
