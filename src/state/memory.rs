//! In-process store for development and tests
//!
//! All tables live behind one mutex. Multi-record operations work on a copy
//! of the tables and swap it in only once every write succeeded, so a failed
//! operation leaves nothing behind.

use super::batch::{plan_batch, BatchReport};
use super::model::{
    Event, EventStatus, NewTxSent, SentResult, SentWrite, SkippedLog, TxLog, TxLogStatus,
    TxSent, TxSentStatus, TxType,
};
use super::store::Store;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct Tables {
    events: BTreeMap<String, Event>,
    tx_logs: Vec<TxLog>,
    tx_sent: Vec<TxSent>,
    skipped_logs: Vec<SkippedLog>,
    checkpoints: HashMap<String, u64>,
    next_log_id: i64,
    next_sent_id: i64,
}

/// Store keeping every table in memory
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_next_commit: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn commit(&self, tables: &mut Tables, staged: Tables) -> RelayerResult<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(RelayerError::Store("commit aborted".to_string()));
        }
        *tables = staged;
        Ok(())
    }
}

/// Test hooks and direct table access
#[cfg(test)]
impl MemoryStore {
    /// Make the next multi-record operation fail right before it commits
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Snapshot of all logs, in insertion order
    pub async fn tx_logs(&self) -> Vec<TxLog> {
        self.tables.lock().await.tx_logs.clone()
    }

    pub async fn skipped_logs(&self) -> Vec<SkippedLog> {
        self.tables.lock().await.skipped_logs.clone()
    }

    /// Snapshot of all sent transactions
    pub async fn tx_sent(&self) -> Vec<TxSent> {
        self.tables.lock().await.tx_sent.clone()
    }

    /// Insert or replace an event row directly
    pub async fn put_event(&self, event: Event) {
        self.tables
            .lock()
            .await
            .events
            .insert(event.swap_id.clone(), event);
    }

    pub async fn event_count(&self) -> usize {
        self.tables.lock().await.events.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> RelayerResult<()> {
        Ok(())
    }

    async fn get_checkpoint(&self, chain: &str) -> RelayerResult<Option<u64>> {
        Ok(self.tables.lock().await.checkpoints.get(chain).copied())
    }

    async fn record_scan(&self, chain: &str, logs: &[TxLog], to_block: u64) -> RelayerResult<usize> {
        let mut tables = self.tables.lock().await;
        let mut staged = tables.clone();

        let mut seen: HashSet<(String, String, u64)> = staged
            .tx_logs
            .iter()
            .map(|l| (l.chain.clone(), l.tx_hash.clone(), l.log_index))
            .collect();

        let mut inserted = 0;
        for log in logs {
            let key = (log.chain.clone(), log.tx_hash.clone(), log.log_index);
            if !seen.insert(key) {
                debug!("Log {}:{} already recorded", log.tx_hash, log.log_index);
                continue;
            }
            staged.next_log_id += 1;
            let mut row = log.clone();
            row.id = staged.next_log_id;
            row.status = TxLogStatus::Init;
            staged.tx_logs.push(row);
            inserted += 1;
        }
        staged.checkpoints.insert(chain.to_string(), to_block);

        self.commit(&mut tables, staged)?;
        Ok(inserted)
    }

    async fn record_skipped_logs(&self, skipped: &[SkippedLog]) -> RelayerResult<usize> {
        let mut tables = self.tables.lock().await;
        let mut kept = 0;
        for log in skipped {
            let known = tables.skipped_logs.iter().any(|s| {
                s.chain == log.chain && s.tx_hash == log.tx_hash && s.log_index == log.log_index
            });
            if !known {
                tables.skipped_logs.push(log.clone());
                kept += 1;
            }
        }
        Ok(kept)
    }

    async fn refresh_confirmations(&self, chain: &str, head: u64) -> RelayerResult<u64> {
        let mut tables = self.tables.lock().await;
        let mut updated = 0;
        for log in tables
            .tx_logs
            .iter_mut()
            .filter(|l| l.chain == chain && l.status == TxLogStatus::Init)
        {
            log.confirmed_num = head.saturating_sub(log.block_height);
            updated += 1;
        }
        Ok(updated)
    }

    async fn confirm_batch(
        &self,
        chain: &str,
        threshold: u64,
        now: i64,
        stuck_timeout_secs: i64,
    ) -> RelayerResult<BatchReport> {
        let mut tables = self.tables.lock().await;

        let ready: Vec<TxLog> = tables
            .tx_logs
            .iter()
            .filter(|l| {
                l.chain == chain && l.status == TxLogStatus::Init && l.confirmed_num >= threshold
            })
            .cloned()
            .collect();
        if ready.is_empty() {
            return Ok(BatchReport::default());
        }

        let swap_ids: HashSet<&str> = ready.iter().map(|l| l.swap_id.as_str()).collect();
        let existing: HashMap<String, Event> = tables
            .events
            .iter()
            .filter(|(id, _)| swap_ids.contains(id.as_str()))
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect();
        let prior: Vec<TxLog> = tables
            .tx_logs
            .iter()
            .filter(|l| l.status == TxLogStatus::Confirmed && swap_ids.contains(l.swap_id.as_str()))
            .cloned()
            .collect();

        let plan = plan_batch(&ready, &existing, &prior, now, stuck_timeout_secs);

        let mut staged = tables.clone();
        let confirmed: HashSet<i64> = plan.confirmed_log_ids.iter().copied().collect();
        for log in staged.tx_logs.iter_mut().filter(|l| confirmed.contains(&l.id)) {
            log.status = TxLogStatus::Confirmed;
            log.update_time = now;
        }
        for event in &plan.events {
            staged.events.insert(event.swap_id.clone(), event.clone());
        }

        self.commit(&mut tables, staged)?;
        Ok(BatchReport::from(&plan))
    }

    async fn get_event(&self, swap_id: &str) -> RelayerResult<Option<Event>> {
        Ok(self.tables.lock().await.events.get(swap_id).cloned())
    }

    async fn events_by_statuses(&self, statuses: &[EventStatus]) -> RelayerResult<Vec<Event>> {
        Ok(self
            .tables
            .lock()
            .await
            .events
            .values()
            .filter(|e| e.status.map_or(false, |s| statuses.contains(&s)))
            .cloned()
            .collect())
    }

    async fn settle_report(
        &self,
        swap_id: &str,
        expected: EventStatus,
        next: EventStatus,
        sent: Option<SentWrite>,
    ) -> RelayerResult<bool> {
        let mut tables = self.tables.lock().await;
        let now = chrono::Utc::now().timestamp();

        let mut staged = tables.clone();
        match staged.events.get_mut(swap_id) {
            Some(event) if event.status == Some(expected) => {
                event.status = Some(next);
                event.update_time = now;
            }
            _ => return Ok(false),
        }
        match sent {
            Some(SentWrite::Insert(sent)) => {
                staged.next_sent_id += 1;
                let id = staged.next_sent_id;
                staged.tx_sent.push(sent.into_row(id, now));
            }
            Some(SentWrite::Finish(id, result)) => {
                let row = staged
                    .tx_sent
                    .iter_mut()
                    .find(|t| t.id == id)
                    .ok_or_else(|| RelayerError::Store(format!("tx_sent {} not found", id)))?;
                result.apply(row, now);
            }
            None => {}
        }

        self.commit(&mut tables, staged)?;
        Ok(true)
    }

    async fn insert_tx_sent(&self, sent: NewTxSent) -> RelayerResult<TxSent> {
        let mut tables = self.tables.lock().await;
        tables.next_sent_id += 1;
        let row = sent.into_row(tables.next_sent_id, chrono::Utc::now().timestamp());
        tables.tx_sent.push(row.clone());
        Ok(row)
    }

    async fn finish_tx_sent(&self, id: i64, result: &SentResult) -> RelayerResult<()> {
        let mut tables = self.tables.lock().await;
        let row = tables
            .tx_sent
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| RelayerError::Store(format!("tx_sent {} not found", id)))?;
        result.apply(row, chrono::Utc::now().timestamp());
        Ok(())
    }

    async fn tx_sent_for_swap(&self, swap_id: &str, tx_type: TxType) -> RelayerResult<Vec<TxSent>> {
        let mut rows: Vec<TxSent> = self
            .tables
            .lock()
            .await
            .tx_sent
            .iter()
            .filter(|t| t.swap_id == swap_id && t.tx_type == tx_type)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(rows)
    }

    async fn tx_sent_by_hash(&self, tx_hash: &str) -> RelayerResult<Option<TxSent>> {
        Ok(self
            .tables
            .lock()
            .await
            .tx_sent
            .iter()
            .find(|t| !t.tx_hash.is_empty() && t.tx_hash.eq_ignore_ascii_case(tx_hash))
            .cloned())
    }

    async fn unsettled_tx_sent(&self, chain: &str) -> RelayerResult<Vec<TxSent>> {
        Ok(self
            .tables
            .lock()
            .await
            .tx_sent
            .iter()
            .filter(|t| t.chain == chain && t.status.is_unsettled())
            .cloned()
            .collect())
    }

    async fn update_tx_sent_status(&self, id: i64, status: TxSentStatus) -> RelayerResult<()> {
        let mut tables = self.tables.lock().await;
        let row = tables
            .tx_sent
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| RelayerError::Store(format!("tx_sent {} not found", id)))?;
        row.status = status;
        row.update_time = chrono::Utc::now().timestamp();
        Ok(())
    }

    async fn overdue_swaps(&self, now: i64) -> RelayerResult<Vec<Event>> {
        Ok(self
            .tables
            .lock()
            .await
            .events
            .values()
            .filter(|e| e.check_deadline.map_or(false, |d| d <= now))
            .cloned()
            .collect())
    }

    async fn clear_deadline(&self, swap_id: &str) -> RelayerResult<()> {
        if let Some(event) = self.tables.lock().await.events.get_mut(swap_id) {
            event.check_deadline = None;
        }
        Ok(())
    }
}
