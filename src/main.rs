//! Bridge Relayer - cross-chain swap lifecycle tracking
//!
//! This relayer watches the bridge contracts on every configured chain,
//! confirms observed deposits and proposals into a per-swap status, and
//! reports final outcomes back to the home chain.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

mod api;
mod chain;
mod config;
mod coordination;
mod error;
mod events;
mod gas;
mod metrics;
mod state;
mod tx;

use chain::ChainManager;
use config::Settings;
use coordination::Relayer;
use gas::GasPriceFetcher;
use metrics::MetricsServer;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Bridge Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} chains (home chain {})",
        settings.enabled_chains().len(),
        settings.relayer.home_chain
    );

    // Open the store; the relayer cannot run without it
    let store = state::open_store(&settings.database)
        .await
        .context("Failed to open store")?;
    info!("Store ready");

    // Initialize chain connections
    let chain_manager = Arc::new(ChainManager::connect(&settings)?);
    info!("Chain connections initialized: {:?}", chain_manager.connected_chains());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start relay workers
    let relayer = Relayer::new(settings.clone(), chain_manager.clone(), store.clone());
    let mut worker_handles = relayer.start()?;

    // Start gas price poller
    let gas = Arc::new(GasPriceFetcher::new(&settings.gas_price));
    worker_handles.push(tokio::spawn(gas.clone().run(shutdown_rx.clone())));

    // Bind the API before reporting the service as up
    let api_state = api::AppState {
        settings: Arc::new(settings.clone()),
        store: store.clone(),
        chain_manager: chain_manager.clone(),
        gas,
        started: Instant::now(),
    };
    let mut api_handle = tokio::spawn(api::run_server(
        settings.api.clone(),
        api_state,
        shutdown_rx.clone(),
    ));

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = server.run(shutdown).await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    info!("Bridge Relayer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal, or the API failing to serve
    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping...");
        }
        result = &mut api_handle => {
            relayer.stop();
            let _ = shutdown_tx.send(true);
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e).context("API server failed"),
                Err(e) => Err(e).context("API server task panicked"),
            };
        }
    }

    // Graceful shutdown
    relayer.stop();
    let _ = shutdown_tx.send(true);

    let grace = Duration::from_secs(settings.api.shutdown_grace_secs);
    match tokio::time::timeout(grace, &mut api_handle).await {
        Ok(Ok(Err(e))) => error!("API server error: {}", e),
        Ok(_) => {}
        Err(_) => {
            warn!("API server did not drain within {:?}", grace);
            api_handle.abort();
        }
    }

    if tokio::time::timeout(grace, futures::future::join_all(worker_handles))
        .await
        .is_err()
    {
        warn!("Workers still busy after {:?}, exiting anyway", grace);
    }
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Bridge Relayer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,bridge_relayer=debug,sqlx=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
