//! Relay orchestrator: owns and starts every background worker

use super::monitor::StuckSweep;
use super::receipts::ReceiptTracker;
use super::report::ReportLoop;
use crate::chain::{ChainConfirmer, ChainManager, ChainWatcher};
use crate::config::Settings;
use crate::error::{RelayerError, RelayerResult};
use crate::state::Store;

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::info;

/// Cross-chain relay engine
pub struct Relayer {
    settings: Settings,
    chain_manager: Arc<ChainManager>,
    store: Arc<dyn Store>,
    shutdown_tx: watch::Sender<bool>,
}

impl Relayer {
    pub fn new(settings: Settings, chain_manager: Arc<ChainManager>, store: Arc<dyn Store>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            settings,
            chain_manager,
            store,
            shutdown_tx,
        }
    }

    /// Spawn one watcher, confirmation worker and receipt tracker per chain,
    /// plus the report loop and the stuck-swap sweep.
    pub fn start(&self) -> RelayerResult<Vec<JoinHandle<()>>> {
        let relayer = &self.settings.relayer;
        let home_chain = &relayer.home_chain;
        let home_config = self
            .settings
            .home_chain()
            .ok_or_else(|| RelayerError::ChainNotFound {
                chain: home_chain.clone(),
            })?;

        let mut handles = Vec::new();

        for (name, config) in self.settings.enabled_chains() {
            let client = self.chain_manager.client(name)?;

            let watcher = Arc::new(ChainWatcher::new(
                name,
                config.clone(),
                name == home_chain,
                client.clone(),
                self.store.clone(),
                self.chain_manager.status_handle(),
            ));
            handles.push(tokio::spawn(watcher.run(self.shutdown_tx.subscribe())));

            let confirmer = Arc::new(ChainConfirmer::new(
                name,
                config,
                relayer.stuck_timeout_secs,
                self.store.clone(),
            ));
            handles.push(tokio::spawn(confirmer.run(self.shutdown_tx.subscribe())));

            let receipts = Arc::new(ReceiptTracker::new(
                name,
                client,
                self.store.clone(),
                Duration::from_secs(relayer.receipt_interval_secs),
            ));
            handles.push(tokio::spawn(receipts.run(self.shutdown_tx.subscribe())));
        }

        let report = Arc::new(ReportLoop::new(
            home_chain,
            &home_config.chain_id,
            self.chain_manager.client(home_chain)?,
            self.store.clone(),
            Duration::from_secs(relayer.report_interval_secs),
        ));
        handles.push(tokio::spawn(report.run(self.shutdown_tx.subscribe())));

        let sweep = Arc::new(StuckSweep::new(
            self.store.clone(),
            Duration::from_secs(relayer.sweep_interval_secs),
        ));
        handles.push(tokio::spawn(sweep.run(self.shutdown_tx.subscribe())));

        info!(
            "Relayer started {} workers across {} chains",
            handles.len(),
            self.settings.enabled_chains().len()
        );
        Ok(handles)
    }

    /// Ask every worker to stop after its current tick
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        info!("Relayer stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::client::MockChainClient;
    use crate::config::tests::SAMPLE;
    use crate::events::swap_id;
    use crate::events::tests::{foreign_deposit_log, FOREIGN, HOME};
    use crate::state::{EventStatus, MemoryStore, TxLogStatus, TxType};

    fn settings() -> Settings {
        let mut settings = Settings::from_toml_str(SAMPLE).unwrap();
        settings.chains.get_mut("ETH").unwrap().start_block = 100;
        settings
    }

    fn eth_client(head: u64) -> MockChainClient {
        let mut client = MockChainClient::new();
        client.expect_block_number().returning(move || Ok(head));
        client
            .expect_fetch_logs()
            .returning(|from, to| {
                let log = foreign_deposit_log(5, 1000, 120);
                let height = log.block_number.map(|b| b.as_u64()).unwrap_or_default();
                Ok(if (from..=to).contains(&height) { vec![log] } else { vec![] })
            });
        client
    }

    async fn scan_and_confirm(store: Arc<MemoryStore>, head: u64) {
        let settings = settings();
        let status = Arc::new(dashmap::DashMap::new());
        let watcher = ChainWatcher::new(
            "ETH",
            settings.chains["ETH"].clone(),
            false,
            Arc::new(eth_client(head)),
            store.clone(),
            status,
        );
        watcher.tick().await.unwrap();

        let confirmer = ChainConfirmer::new("ETH", &settings.chains["ETH"], 300, store);
        confirmer.tick().await.unwrap();
    }

    #[tokio::test]
    async fn test_deposit_path() {
        let store = Arc::new(MemoryStore::new());
        let expected_id = swap_id(&FOREIGN, &HOME, 5);

        // 1000 - 120 confirmations
        scan_and_confirm(store.clone(), 1000).await;

        let event = store.get_event(&expected_id).await.unwrap().unwrap();
        assert_eq!(event.status, Some(EventStatus::DepositConfirmed));
        assert_eq!(event.deposit_nonce, 5);
        assert_eq!(event.in_amount, "1000");
        assert_eq!(store.event_count().await, 1);
        assert!(store.tx_logs().await.iter().all(|l| l.status == TxLogStatus::Confirmed));
    }

    #[tokio::test]
    async fn test_deposit_waits_for_threshold() {
        let store = Arc::new(MemoryStore::new());
        // 8 confirmations against a threshold of 12
        scan_and_confirm(store.clone(), 128).await;

        assert_eq!(store.event_count().await, 0);
        assert_eq!(store.tx_logs().await[0].confirmed_num, 8);
    }

    #[tokio::test]
    async fn test_stale_deposit_replay_does_not_regress() {
        let store = Arc::new(MemoryStore::new());
        let id = swap_id(&FOREIGN, &HOME, 5);
        scan_and_confirm(store.clone(), 1000).await;

        let mut claimed = store.get_event(&id).await.unwrap().unwrap();
        claimed.status = Some(EventStatus::ClaimConfirmed);
        store.put_event(claimed).await;

        // the deposit shows up again under a new position, as after a reorg
        let mut replay = store.tx_logs().await[0].clone();
        replay.log_index += 1;
        store.record_scan("ETH", &[replay], 1000).await.unwrap();
        store.refresh_confirmations("ETH", 1000).await.unwrap();

        let settings = settings();
        let report = ChainConfirmer::new("ETH", &settings.chains["ETH"], 300, store.clone())
            .tick()
            .await
            .unwrap();
        assert_eq!(report.confirmed_logs, 1);
        assert!(report.transitions.is_empty());
        assert_eq!(
            store.get_event(&id).await.unwrap().unwrap().status,
            Some(EventStatus::ClaimConfirmed)
        );
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn test_destination_first_is_reconciled() {
        let store = Arc::new(MemoryStore::new());
        let id = swap_id(&FOREIGN, &HOME, 5);

        // claim seen and confirmed on the home chain before the deposit
        let mut claim = crate::state::batch::tests::log(1, &id, TxType::Claim);
        claim.chain = "LA".to_string();
        store.record_scan("LA", &[claim], 200).await.unwrap();
        store.refresh_confirmations("LA", 300).await.unwrap();
        let settings = settings();
        ChainConfirmer::new("LA", &settings.chains["LA"], 300, store.clone())
            .tick()
            .await
            .unwrap();
        assert_eq!(store.get_event(&id).await.unwrap().unwrap().status, None);

        scan_and_confirm(store.clone(), 1000).await;

        let event = store.get_event(&id).await.unwrap().unwrap();
        assert_eq!(event.status, Some(EventStatus::ClaimConfirmed));
        assert!(event.check_deadline.is_some());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let settings = settings();
        let manager = Arc::new(ChainManager::default());
        for name in ["LA", "ETH"] {
            let mut client = MockChainClient::new();
            client.expect_block_number().returning(|| Ok(0));
            client.expect_fetch_logs().returning(|_, _| Ok(vec![]));
            client.expect_submit_update().never();
            manager.insert(name, Arc::new(client));
        }

        let relayer = Relayer::new(settings, manager.clone(), Arc::new(MemoryStore::new()));
        let handles = relayer.start().unwrap();
        // three per chain, the report loop and the sweep
        assert_eq!(handles.len(), 8);

        relayer.stop();
        let joined = tokio::time::timeout(Duration::from_secs(5), futures::future::join_all(handles)).await;
        assert!(joined.is_ok());
        assert!(manager.status_of_workers().contains_key("ETH"));
    }
}
