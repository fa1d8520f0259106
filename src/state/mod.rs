//! State management and persistence
//!
//! Handles:
//! - Swap events and their guarded status transitions
//! - Observed logs and their confirmation batches
//! - Block checkpoints for restart recovery
//! - Submission tracking

pub mod batch;
pub mod machine;
mod manager;
mod memory;
pub mod model;
mod store;

pub use batch::{AppliedTransition, BatchReport};
pub use manager::StateManager;
pub use memory::MemoryStore;
pub use model::{
    Event, EventStatus, NewTxSent, SentResult, SentWrite, SkippedLog, TxLog, TxLogStatus,
    TxSent, TxSentStatus, TxType,
};
pub use store::Store;

use crate::config::DatabaseConfig;
use crate::error::RelayerResult;

use std::sync::Arc;
use tracing::{info, warn};

/// Open the store named by the database URL and run migrations
pub async fn open_store(config: &DatabaseConfig) -> RelayerResult<Arc<dyn Store>> {
    if config.url.starts_with("memory://") {
        warn!("Using in-memory store, state is lost on restart");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let manager = StateManager::new(config).await?;
    info!("Database connection established");
    manager.run_migrations().await?;
    Ok(Arc::new(manager))
}
