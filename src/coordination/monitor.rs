//! Stuck-swap sweep
//!
//! Swaps that reach `ClaimConfirmed` get a check deadline. Once it passes,
//! a swap that still has not settled is reported as stuck.

use crate::error::RelayerResult;
use crate::state::Store;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

pub struct StuckSweep {
    store: Arc<dyn Store>,
    interval: Duration,
}

impl StuckSweep {
    pub fn new(store: Arc<dyn Store>, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            if let Err(e) = self.sweep(chrono::Utc::now().timestamp()).await {
                error!("Stuck-swap sweep failed: {}", e);
            }
        }

        info!("Stuck-swap sweep stopped");
    }

    /// Check every swap whose deadline is at or before `now`; returns the stuck ones
    pub async fn sweep(&self, now: i64) -> RelayerResult<Vec<String>> {
        let mut stuck = Vec::new();

        for event in self.store.overdue_swaps(now).await? {
            let settled = event.status.map_or(false, |s| s.is_settled());
            if !settled {
                let status = event.status.map_or("none", |s| s.as_str());
                error!(
                    "Swap {} stuck in {} (nonce {}, {} -> {})",
                    event.swap_id,
                    status,
                    event.deposit_nonce,
                    event.origin_chain_id,
                    event.destination_chain_id
                );
                crate::metrics::record_stuck_swap();
                stuck.push(event.swap_id.clone());
            }
            self.store.clear_deadline(&event.swap_id).await?;
        }

        Ok(stuck)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::batch::tests::log;
    use crate::state::{EventStatus, MemoryStore, TxType};

    async fn put(store: &MemoryStore, swap_id: &str, status: EventStatus, deadline: i64) {
        let mut event = log(1, swap_id, TxType::Deposit).to_event(0);
        event.status = Some(status);
        event.check_deadline = Some(deadline);
        store.put_event(event).await;
    }

    #[tokio::test]
    async fn test_sweep_reports_unsettled_and_clears_deadlines() {
        let store = Arc::new(MemoryStore::new());
        put(&store, "stuck", EventStatus::ClaimConfirmed, 100).await;
        put(&store, "done", EventStatus::SpendConfirmed, 100).await;
        put(&store, "later", EventStatus::ClaimConfirmed, 500).await;

        let sweep = StuckSweep::new(store.clone(), Duration::from_secs(30));
        assert_eq!(sweep.sweep(200).await.unwrap(), vec!["stuck".to_string()]);

        for swap_id in ["stuck", "done"] {
            assert_eq!(store.get_event(swap_id).await.unwrap().unwrap().check_deadline, None);
        }
        assert_eq!(
            store.get_event("later").await.unwrap().unwrap().check_deadline,
            Some(500)
        );

        // reported once only
        assert!(sweep.sweep(200).await.unwrap().is_empty());
    }
}
