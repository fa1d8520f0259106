//! Report-back of final destination outcomes to the home chain
//!
//! Every submission is recorded as an `init` TxSent row before the
//! transaction goes out, and completed together with the swap's status. A
//! row left in `init` without a hash means the result of a submission was
//! never written; such swaps are held until an operator marks the row failed.

use crate::chain::ChainClient;
use crate::error::RelayerResult;
use crate::state::{
    Event, EventStatus, NewTxSent, SentResult, SentWrite, Store, TxSentStatus, TxType,
};
use crate::tx::{SubmittedTx, UpdatePayload, STATUS_FAILURE, STATUS_SUCCESS};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Statuses the loop picks up
const REPORTABLE: [EventStatus; 2] = [EventStatus::PassedConfirmed, EventStatus::PassedFailed];

/// What happened to one swap during a tick
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// Destination is the home chain, no transaction needed
    Shortcut(EventStatus),
    /// An earlier submission for this swap is still live
    AlreadySent,
    /// An earlier submission never had its result written; held for an operator
    Unresolved(i64),
    Submitted(SubmittedTx),
    /// The swap lacks data the update call needs
    Rejected(String),
    SubmitFailed(String),
    /// Status moved under us, nothing written
    Superseded,
}

/// Reports swaps in `PassedConfirmed` or `PassedFailed`. No worker in this
/// binary writes those statuses; they come from the destination-side
/// executor that settles passed transactions in the same store.
pub struct ReportLoop {
    home_chain: String,
    /// Normalized bridge id of the home chain
    home_chain_id: String,
    client: Arc<dyn ChainClient>,
    store: Arc<dyn Store>,
    interval: Duration,
}

impl ReportLoop {
    pub fn new(
        home_chain: &str,
        home_chain_id: &str,
        client: Arc<dyn ChainClient>,
        store: Arc<dyn Store>,
        interval: Duration,
    ) -> Self {
        Self {
            home_chain: home_chain.to_string(),
            home_chain_id: normalize_chain_id(home_chain_id),
            client,
            store,
            interval,
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);
        info!("Report loop started for home chain {}", self.home_chain);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            if let Err(e) = self.tick().await {
                error!("Report tick failed: {}", e);
            }
        }

        info!("Report loop stopped");
    }

    /// Report every swap whose destination outcome is final
    pub async fn tick(&self) -> RelayerResult<Vec<(String, ReportOutcome)>> {
        let events = self.store.events_by_statuses(&REPORTABLE).await?;
        if !events.is_empty() {
            debug!("{} swaps awaiting report", events.len());
        }

        let mut outcomes = Vec::with_capacity(events.len());
        for event in events {
            match self.report(&event).await {
                Ok(outcome) => outcomes.push((event.swap_id.clone(), outcome)),
                Err(e) if e.is_retryable() => {
                    warn!("Report of swap {} deferred: {}", event.swap_id, e);
                }
                Err(e) => {
                    error!("Report of swap {} failed: {}", event.swap_id, e);
                }
            }
        }

        Ok(outcomes)
    }

    /// Report one swap
    pub async fn report(&self, event: &Event) -> RelayerResult<ReportOutcome> {
        let expected = match event.status {
            Some(status) if REPORTABLE.contains(&status) => status,
            _ => return Ok(ReportOutcome::Superseded),
        };
        let succeeded = expected == EventStatus::PassedConfirmed;

        if normalize_chain_id(&event.destination_chain_id) == self.home_chain_id {
            let next = if succeeded {
                EventStatus::UpdateConfirmed
            } else {
                EventStatus::UpdateFailed
            };
            let outcome = self
                .settle(event, expected, next, None, ReportOutcome::Shortcut(next))
                .await?;
            debug!("Swap {} settled on the home chain: {}", event.swap_id, next);
            return Ok(outcome);
        }

        let previous = self.store.tx_sent_for_swap(&event.swap_id, TxType::Update).await?;
        if let Some(live) = previous.iter().find(|t| t.status != TxSentStatus::Failed) {
            if live.tx_hash.is_empty() {
                error!(
                    "Swap {} has update row {} with no recorded result, not resubmitting",
                    event.swap_id, live.id
                );
                return Ok(ReportOutcome::Unresolved(live.id));
            }
            warn!(
                "Swap {} already has update {} ({}), not resubmitting",
                event.swap_id,
                live.tx_hash,
                live.status.as_str()
            );
            return self
                .settle(event, expected, EventStatus::UpdateConfirmed, None, ReportOutcome::AlreadySent)
                .await;
        }

        let status_code = if succeeded { STATUS_SUCCESS } else { STATUS_FAILURE };
        let payload = match UpdatePayload::from_event(event, status_code) {
            Ok(payload) => payload,
            Err(e) => {
                let message = e.to_string();
                error!("Swap {} cannot be reported: {}", event.swap_id, message);
                crate::metrics::record_update_failed(&self.home_chain);
                let sent = self.sent_row(event, TxSentStatus::Failed, &message);
                return self
                    .settle(
                        event,
                        expected,
                        EventStatus::UpdateFailed,
                        Some(SentWrite::Insert(sent)),
                        ReportOutcome::Rejected(message),
                    )
                    .await;
            }
        };

        let row = self
            .store
            .insert_tx_sent(self.sent_row(event, TxSentStatus::Init, ""))
            .await?;

        match self.client.submit_update(&payload).await {
            Ok(submitted) => {
                info!(
                    "Reported swap {} (status {}) in tx {} nonce {}",
                    event.swap_id, status_code, submitted.tx_hash, submitted.nonce
                );
                crate::metrics::record_update_submitted(&self.home_chain);
                let result = SentResult {
                    tx_hash: submitted.tx_hash.clone(),
                    nonce: submitted.nonce,
                    status: TxSentStatus::Pending,
                    err_msg: String::new(),
                };
                self.settle(
                    event,
                    expected,
                    EventStatus::UpdateConfirmed,
                    Some(SentWrite::Finish(row.id, result)),
                    ReportOutcome::Submitted(submitted),
                )
                .await
            }
            Err(e) => {
                let message = e.to_string();
                error!("Update submission for swap {} failed: {}", event.swap_id, message);
                crate::metrics::record_update_failed(&self.home_chain);
                let result = SentResult {
                    tx_hash: String::new(),
                    nonce: 0,
                    status: TxSentStatus::Failed,
                    err_msg: message.clone(),
                };
                self.settle(
                    event,
                    expected,
                    EventStatus::UpdateFailed,
                    Some(SentWrite::Finish(row.id, result)),
                    ReportOutcome::SubmitFailed(message),
                )
                .await
            }
        }
    }

    async fn settle(
        &self,
        event: &Event,
        expected: EventStatus,
        next: EventStatus,
        sent: Option<SentWrite>,
        outcome: ReportOutcome,
    ) -> RelayerResult<ReportOutcome> {
        let finish = match &sent {
            Some(SentWrite::Finish(id, result)) => Some((*id, result.clone())),
            _ => None,
        };

        if self
            .store
            .settle_report(&event.swap_id, expected, next, sent)
            .await?
        {
            return Ok(outcome);
        }

        warn!(
            "Swap {} left {} before its report was written ({:?})",
            event.swap_id, expected, outcome
        );
        // the submission still happened
        if let Some((id, result)) = finish {
            self.store.finish_tx_sent(id, &result).await?;
        }
        Ok(ReportOutcome::Superseded)
    }

    fn sent_row(&self, event: &Event, status: TxSentStatus, err_msg: &str) -> NewTxSent {
        NewTxSent {
            chain: self.home_chain.clone(),
            tx_type: TxType::Update,
            swap_id: event.swap_id.clone(),
            tx_hash: String::new(),
            nonce: 0,
            status,
            err_msg: err_msg.to_string(),
        }
    }
}

fn normalize_chain_id(id: &str) -> String {
    id.trim_start_matches("0x").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::client::MockChainClient;
    use crate::error::RelayerError;
    use crate::state::MemoryStore;
    use crate::tx::reportable_event;

    const HOME_ID: &str = "0000000000000001";

    fn report_loop(client: MockChainClient, store: Arc<MemoryStore>) -> ReportLoop {
        ReportLoop::new("LA", HOME_ID, Arc::new(client), store, Duration::from_secs(60))
    }

    async fn status_of(store: &MemoryStore, swap_id: &str) -> Option<EventStatus> {
        store.get_event(swap_id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_same_chain_shortcut_sends_nothing() {
        let store = Arc::new(MemoryStore::new());
        let mut event = reportable_event("a");
        event.destination_chain_id = format!("0x{}", HOME_ID);
        store.put_event(event).await;

        let mut client = MockChainClient::new();
        client.expect_submit_update().never();

        let outcomes = report_loop(client, store.clone()).tick().await.unwrap();
        assert_eq!(
            outcomes,
            vec![("a".to_string(), ReportOutcome::Shortcut(EventStatus::UpdateConfirmed))]
        );
        assert_eq!(status_of(&store, "a").await, Some(EventStatus::UpdateConfirmed));
        assert!(store.tx_sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_amount_fails_fast() {
        let store = Arc::new(MemoryStore::new());
        let mut event = reportable_event("a");
        event.status = Some(EventStatus::PassedFailed);
        event.in_amount.clear();
        store.put_event(event).await;

        let mut client = MockChainClient::new();
        client.expect_submit_update().never();

        report_loop(client, store.clone()).tick().await.unwrap();

        let sent = store.tx_sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, TxSentStatus::Failed);
        assert_eq!(sent[0].tx_type, TxType::Update);
        assert!(sent[0].err_msg.contains("missing amount"));
        assert_eq!(status_of(&store, "a").await, Some(EventStatus::UpdateFailed));
    }

    #[tokio::test]
    async fn test_submission_recorded_as_pending() {
        let store = Arc::new(MemoryStore::new());
        store.put_event(reportable_event("a")).await;

        let mut client = MockChainClient::new();
        client
            .expect_submit_update()
            .withf(|payload| payload.status == STATUS_SUCCESS && payload.deposit_nonce == 5)
            .times(1)
            .returning(|_| {
                Ok(SubmittedTx {
                    tx_hash: "0xabc".to_string(),
                    nonce: 7,
                })
            });

        let loop_ = report_loop(client, store.clone());
        loop_.tick().await.unwrap();

        let sent = store.tx_sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, TxSentStatus::Pending);
        assert_eq!(sent[0].tx_hash, "0xabc");
        assert_eq!(sent[0].nonce, 7);
        assert_eq!(sent[0].chain, "LA");
        assert_eq!(status_of(&store, "a").await, Some(EventStatus::UpdateConfirmed));

        // settled swaps are not picked up again
        assert!(loop_.tick().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_failure_marks_update_failed() {
        let store = Arc::new(MemoryStore::new());
        let mut event = reportable_event("a");
        event.status = Some(EventStatus::PassedFailed);
        store.put_event(event).await;

        let mut client = MockChainClient::new();
        client
            .expect_submit_update()
            .withf(|payload| payload.status == STATUS_FAILURE)
            .returning(|_| Err(RelayerError::Transaction("execution reverted".to_string())));

        report_loop(client, store.clone()).tick().await.unwrap();

        let sent = store.tx_sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, TxSentStatus::Failed);
        assert!(sent[0].err_msg.contains("execution reverted"));
        assert_eq!(status_of(&store, "a").await, Some(EventStatus::UpdateFailed));
    }

    #[tokio::test]
    async fn test_live_submission_is_not_repeated() {
        let store = Arc::new(MemoryStore::new());
        store.put_event(reportable_event("a")).await;
        store
            .insert_tx_sent(NewTxSent {
                chain: "LA".to_string(),
                tx_type: TxType::Update,
                swap_id: "a".to_string(),
                tx_hash: "0xabc".to_string(),
                nonce: 7,
                status: TxSentStatus::Pending,
                err_msg: String::new(),
            })
            .await;

        let mut client = MockChainClient::new();
        client.expect_submit_update().never();

        let outcomes = report_loop(client, store.clone()).tick().await.unwrap();
        assert_eq!(outcomes[0].1, ReportOutcome::AlreadySent);
        assert_eq!(store.tx_sent().await.len(), 1);
        assert_eq!(status_of(&store, "a").await, Some(EventStatus::UpdateConfirmed));
    }

    #[tokio::test]
    async fn test_one_bad_swap_does_not_block_others() {
        let store = Arc::new(MemoryStore::new());
        let mut broken = reportable_event("a");
        broken.receiver_addr = "not-an-address".to_string();
        store.put_event(broken).await;
        store.put_event(reportable_event("b")).await;
        let mut early = reportable_event("c");
        early.status = Some(EventStatus::ClaimConfirmed);
        store.put_event(early).await;

        let mut client = MockChainClient::new();
        client.expect_submit_update().times(1).returning(|_| {
            Ok(SubmittedTx {
                tx_hash: "0xdef".to_string(),
                nonce: 1,
            })
        });

        report_loop(client, store.clone()).tick().await.unwrap();

        assert_eq!(status_of(&store, "a").await, Some(EventStatus::UpdateFailed));
        assert_eq!(status_of(&store, "b").await, Some(EventStatus::UpdateConfirmed));
        assert_eq!(status_of(&store, "c").await, Some(EventStatus::ClaimConfirmed));
    }

    #[tokio::test]
    async fn test_superseded_status_is_left_alone() {
        let store = Arc::new(MemoryStore::new());
        let mut event = reportable_event("a");
        event.destination_chain_id = HOME_ID.to_string();
        store.put_event(event.clone()).await;

        // another worker got there first
        let mut moved = event.clone();
        moved.status = Some(EventStatus::SpendConfirmed);
        store.put_event(moved).await;

        let outcome = report_loop(MockChainClient::new(), store.clone())
            .report(&event)
            .await
            .unwrap();
        assert_eq!(outcome, ReportOutcome::Superseded);
        assert_eq!(status_of(&store, "a").await, Some(EventStatus::SpendConfirmed));
    }

    #[tokio::test]
    async fn test_unwritten_submission_is_held() {
        let store = Arc::new(MemoryStore::new());
        store.put_event(reportable_event("a")).await;

        let mut client = MockChainClient::new();
        client.expect_submit_update().times(2).returning(|_| {
            Ok(SubmittedTx {
                tx_hash: "0xabc".to_string(),
                nonce: 7,
            })
        });
        let loop_ = report_loop(client, store.clone());

        // submitted, but the result never reaches the store
        store.fail_next_commit();
        assert!(loop_.tick().await.unwrap().is_empty());
        let sent = store.tx_sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, TxSentStatus::Init);
        assert!(sent[0].tx_hash.is_empty());
        assert_eq!(status_of(&store, "a").await, Some(EventStatus::PassedConfirmed));

        let outcomes = loop_.tick().await.unwrap();
        assert_eq!(outcomes, vec![("a".to_string(), ReportOutcome::Unresolved(sent[0].id))]);
        assert_eq!(store.tx_sent().await.len(), 1);

        // released by an operator
        store
            .update_tx_sent_status(sent[0].id, TxSentStatus::Failed)
            .await
            .unwrap();
        let outcomes = loop_.tick().await.unwrap();
        assert!(matches!(outcomes[0].1, ReportOutcome::Submitted(_)));
        assert_eq!(status_of(&store, "a").await, Some(EventStatus::UpdateConfirmed));
        assert_eq!(store.tx_sent().await.len(), 2);
    }

    #[tokio::test]
    async fn test_superseded_submission_keeps_its_hash() {
        let store = Arc::new(MemoryStore::new());
        let event = reportable_event("a");
        let mut moved = event.clone();
        moved.status = Some(EventStatus::SpendConfirmed);
        store.put_event(moved).await;

        let mut client = MockChainClient::new();
        client.expect_submit_update().times(1).returning(|_| {
            Ok(SubmittedTx {
                tx_hash: "0xabc".to_string(),
                nonce: 7,
            })
        });

        let outcome = report_loop(client, store.clone()).report(&event).await.unwrap();
        assert_eq!(outcome, ReportOutcome::Superseded);

        let sent = store.tx_sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].status, TxSentStatus::Pending);
        assert_eq!(sent[0].tx_hash, "0xabc");
        assert_eq!(status_of(&store, "a").await, Some(EventStatus::SpendConfirmed));
    }
}
