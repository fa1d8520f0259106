//! Coordination of the swap lifecycle across chains
//!
//! The relayer:
//! 1. Watches every chain and confirms observed logs
//! 2. Reports final destination outcomes back to the home chain
//! 3. Tracks receipts of the transactions it submitted
//! 4. Flags swaps that stall after being claimed

pub mod engine;
pub mod monitor;
pub mod receipts;
pub mod report;

pub use engine::Relayer;
pub use monitor::StuckSweep;
pub use receipts::ReceiptTracker;
pub use report::{ReportLoop, ReportOutcome};
