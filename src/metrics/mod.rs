//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain heads and scanning progress
//! - Log confirmation and status transitions
//! - Late arrivals and stuck swaps
//! - Report-back submissions

use crate::error::{RelayerError, RelayerResult};
use crate::state::BatchReport;

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_int_counter, CounterVec, Encoder, GaugeVec,
    IntCounter, TextEncoder,
};
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_BLOCK_HEIGHT: GaugeVec = register_gauge_vec!(
        "bridge_chain_block_height",
        "Latest head block seen per chain",
        &["chain"]
    ).expect("metric registration");

    pub static ref BLOCKS_SCANNED: CounterVec = register_counter_vec!(
        "bridge_blocks_scanned_total",
        "Blocks scanned for bridge logs",
        &["chain"]
    ).expect("metric registration");

    pub static ref LOGS_RECORDED: CounterVec = register_counter_vec!(
        "bridge_logs_recorded_total",
        "New bridge logs recorded",
        &["chain"]
    ).expect("metric registration");

    pub static ref DECODE_ERRORS: CounterVec = register_counter_vec!(
        "bridge_decode_errors_total",
        "Bridge logs skipped because they failed to decode",
        &["chain"]
    ).expect("metric registration");

    // Confirmation metrics
    pub static ref LOGS_CONFIRMED: CounterVec = register_counter_vec!(
        "bridge_logs_confirmed_total",
        "Logs promoted to confirmed",
        &["chain"]
    ).expect("metric registration");

    pub static ref TRANSITIONS: CounterVec = register_counter_vec!(
        "bridge_status_transitions_total",
        "Swap status transitions by target status",
        &["chain", "status"]
    ).expect("metric registration");

    pub static ref LATE_ARRIVALS: CounterVec = register_counter_vec!(
        "bridge_late_arrivals_total",
        "Logs confirmed after their swap was already reported",
        &["chain"]
    ).expect("metric registration");

    pub static ref STUCK_SWAPS: IntCounter = register_int_counter!(
        "bridge_stuck_swaps_total",
        "Swaps still unsettled when their check deadline passed"
    ).expect("metric registration");

    // Report-back metrics
    pub static ref UPDATES_SUBMITTED: CounterVec = register_counter_vec!(
        "bridge_updates_submitted_total",
        "Status update transactions submitted",
        &["chain"]
    ).expect("metric registration");

    pub static ref UPDATES_FAILED: CounterVec = register_counter_vec!(
        "bridge_updates_failed_total",
        "Status updates that failed or could not be built",
        &["chain"]
    ).expect("metric registration");
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayerError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| RelayerError::Internal(format!("Metrics server error: {}", e)))
    }
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

// Helper functions to record metrics

pub fn record_block_height(chain: &str, block_number: u64) {
    CHAIN_BLOCK_HEIGHT
        .with_label_values(&[chain])
        .set(block_number as f64);
}

pub fn record_blocks_scanned(chain: &str, blocks: u64) {
    BLOCKS_SCANNED.with_label_values(&[chain]).inc_by(blocks as f64);
}

pub fn record_logs_recorded(chain: &str, logs: usize) {
    LOGS_RECORDED.with_label_values(&[chain]).inc_by(logs as f64);
}

pub fn record_decode_error(chain: &str) {
    DECODE_ERRORS.with_label_values(&[chain]).inc();
}

pub fn record_batch(chain: &str, report: &BatchReport) {
    LOGS_CONFIRMED
        .with_label_values(&[chain])
        .inc_by(report.confirmed_logs as f64);
    for transition in &report.transitions {
        TRANSITIONS
            .with_label_values(&[chain, transition.to.as_str()])
            .inc();
    }
    if report.late_arrivals > 0 {
        LATE_ARRIVALS
            .with_label_values(&[chain])
            .inc_by(report.late_arrivals as f64);
    }
}

pub fn record_stuck_swap() {
    STUCK_SWAPS.inc();
}

pub fn record_update_submitted(chain: &str) {
    UPDATES_SUBMITTED.with_label_values(&[chain]).inc();
}

pub fn record_update_failed(chain: &str) {
    UPDATES_FAILED.with_label_values(&[chain]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AppliedTransition, EventStatus, TxType};

    #[test]
    fn test_record_batch_counts_late_arrivals() {
        let before = LATE_ARRIVALS.with_label_values(&["TEST"]).get();
        let report = BatchReport {
            confirmed_logs: 2,
            events_created: 0,
            events_touched: 1,
            transitions: vec![AppliedTransition {
                swap_id: "a".to_string(),
                tx_type: TxType::Claim,
                from: Some(EventStatus::DepositConfirmed),
                to: EventStatus::ClaimConfirmed,
                replayed: false,
            }],
            late_arrivals: 1,
        };

        record_batch("TEST", &report);
        assert_eq!(LATE_ARRIVALS.with_label_values(&["TEST"]).get(), before + 1.0);
        assert!(TRANSITIONS
            .with_label_values(&["TEST", "claim_confirmed"])
            .get()
            >= 1.0);
    }

    #[tokio::test]
    async fn test_metrics_handler_renders_text() {
        record_stuck_swap();
        let body = metrics_handler().await.unwrap();
        assert!(body.contains("bridge_stuck_swaps_total"));
    }
}
