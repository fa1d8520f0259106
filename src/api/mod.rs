//! Read-only HTTP API for worker status, gas prices and sent transactions

use crate::chain::{ChainManager, WorkerStatus};
use crate::config::{ApiConfig, Settings};
use crate::error::{RelayerError, RelayerResult};
use crate::gas::{GasPrice, GasPriceFetcher};
use crate::state::{Store, TxSent};

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn Store>,
    pub chain_manager: Arc<ChainManager>,
    pub gas: Arc<GasPriceFetcher>,
    pub started: Instant,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_origin(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .route("/gas-price/:chain", get(get_gas_price))
        .route("/tx-sent/:tx_hash", get(get_tx_sent))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP API server until `shutdown` fires
pub async fn run_server(
    config: ApiConfig,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> RelayerResult<()> {
    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayerError::Internal(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|e| RelayerError::Internal(format!("API server error: {}", e)))
}

impl IntoResponse for RelayerError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayerError::TransactionNotFound { .. } | RelayerError::ChainNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn index() -> impl IntoResponse {
    Json(IndexResponse {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints: vec![
            "/health",
            "/status",
            "/gas-price/{chain}",
            "/gas-price/{chain_id}?v=2",
            "/tx-sent/{tx_hash}",
        ],
    })
}

/// Health check endpoint - store reachability
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.store.health_check().await.is_ok();
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if database { "ok" } else { "degraded" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database,
        }),
    )
}

/// Per-chain watcher status
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
        home_chain: state.settings.relayer.home_chain.clone(),
        workers: state.chain_manager.status_of_workers(),
    })
}

#[derive(Debug, Deserialize)]
struct GasPriceQuery {
    v: Option<u32>,
}

async fn get_gas_price(
    State(state): State<AppState>,
    Path(chain): Path<String>,
    Query(query): Query<GasPriceQuery>,
) -> Result<Json<GasPrice>, RelayerError> {
    let name = if query.v == Some(2) {
        state
            .settings
            .chain_name_by_id(&chain)
            .map(str::to_string)
            .ok_or_else(|| RelayerError::ChainNotFound {
                chain: chain.clone(),
            })?
    } else {
        chain
    };

    state
        .gas
        .get_gas_price(&name)
        .map(Json)
        .ok_or(RelayerError::ChainNotFound { chain: name })
}

async fn get_tx_sent(
    State(state): State<AppState>,
    Path(tx_hash): Path<String>,
) -> Result<Json<TxSent>, RelayerError> {
    state
        .store
        .tx_sent_by_hash(&tx_hash)
        .await?
        .map(Json)
        .ok_or(RelayerError::TransactionNotFound { tx_hash })
}

// Response types

#[derive(Serialize)]
struct IndexResponse {
    name: String,
    version: String,
    endpoints: Vec<&'static str>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    database: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_seconds: u64,
    home_chain: String,
    workers: BTreeMap<String, WorkerStatus>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;
    use crate::state::{MemoryStore, NewTxSent, TxSentStatus, TxType};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn app() -> (Router, Arc<MemoryStore>) {
        let mut settings = Settings::from_toml_str(SAMPLE).unwrap();
        // keep the poll offline
        settings.gas_price.sources.remove("ETH");
        let gas = Arc::new(GasPriceFetcher::new(&settings.gas_price));
        gas.refresh().await;

        let store = Arc::new(MemoryStore::new());
        let state = AppState {
            settings: Arc::new(settings),
            store: store.clone(),
            chain_manager: Arc::new(ChainManager::default()),
            gas,
            started: Instant::now(),
        };
        (router(state), store)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_tx_sent_lookup() {
        let (app, store) = app().await;
        store
            .insert_tx_sent(NewTxSent {
                chain: "LA".to_string(),
                tx_type: TxType::Update,
                swap_id: "a".to_string(),
                tx_hash: "0xAbC".to_string(),
                nonce: 3,
                status: TxSentStatus::Pending,
                err_msg: String::new(),
            })
            .await
            .unwrap();

        let (status, body) = get(app.clone(), "/tx-sent/0xabc").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["swap_id"], "a");
        assert_eq!(body["type"], "update");

        let (status, _) = get(app, "/tx-sent/0xdead").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_gas_price_by_name_and_id() {
        let (app, _) = app().await;

        let (status, _) = get(app.clone(), "/gas-price/ETH").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = get(app.clone(), "/gas-price/OP").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["price"], 0.001);

        // bridge id of LA, which has no source
        let (status, _) = get(app.clone(), "/gas-price/0x0000000000000001?v=2").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get(app, "/gas-price/ffffffffffffffff?v=2").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_and_health() {
        let (app, _) = app().await;
        let (status, body) = get(app.clone(), "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["home_chain"], "LA");

        let (status, body) = get(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["database"], true);
    }
}
