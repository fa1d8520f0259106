//! Periodic gas price poller
//!
//! Every configured chain maps to either a fixed price or an HTTP endpoint
//! plus a JSON pointer and a scale factor. All sources are evaluated the same
//! way; the latest good value per chain is cached.

use crate::config::{GasPriceConfig, GasPriceSource};
use crate::error::{RelayerError, RelayerResult};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Cached price of one chain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GasPrice {
    pub chain: String,
    pub price: f64,
    pub updated_at: i64,
}

pub struct GasPriceFetcher {
    sources: HashMap<String, GasPriceSource>,
    interval: Duration,
    http_client: reqwest::Client,
    cache: DashMap<String, GasPrice>,
}

impl GasPriceFetcher {
    pub fn new(config: &GasPriceConfig) -> Self {
        Self {
            sources: config.sources.clone(),
            interval: Duration::from_secs(config.interval_secs),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            cache: DashMap::new(),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if self.sources.is_empty() {
            info!("No gas price sources configured");
            return;
        }

        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }
            self.refresh().await;
        }

        info!("Gas price poller stopped");
    }

    /// Poll every source once, keeping the previous value on failure
    pub async fn refresh(&self) {
        let now = chrono::Utc::now().timestamp();

        for (chain, source) in &self.sources {
            match self.fetch(chain, source).await {
                Ok(price) => {
                    debug!("Gas price for {}: {}", chain, price);
                    self.cache.insert(
                        chain.clone(),
                        GasPrice {
                            chain: chain.clone(),
                            price,
                            updated_at: now,
                        },
                    );
                }
                Err(e) => warn!("Gas price refresh failed: {}", e),
            }
        }
    }

    async fn fetch(&self, chain: &str, source: &GasPriceSource) -> RelayerResult<f64> {
        if let Some(fixed) = source.fixed {
            return Ok(fixed);
        }

        let error = |message: String| RelayerError::GasPrice {
            chain: chain.to_string(),
            message,
        };
        let url = source
            .url
            .as_deref()
            .ok_or_else(|| error("no url configured".to_string()))?;

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(error(format!("HTTP {}", response.status())));
        }
        let body: Value = response.json().await.map_err(|e| error(e.to_string()))?;

        evaluate(source, &body).map_err(error)
    }

    pub fn get_gas_price(&self, chain: &str) -> Option<GasPrice> {
        self.cache.get(chain).map(|p| p.value().clone())
    }
}

/// Apply a source's pointer and scale to a response body
pub fn evaluate(source: &GasPriceSource, body: &Value) -> Result<f64, String> {
    if let Some(fixed) = source.fixed {
        return Ok(fixed);
    }

    let pointer = source.json_pointer.as_deref().unwrap_or("");
    let raw = body
        .pointer(pointer)
        .ok_or_else(|| format!("nothing at {}", pointer))?;

    let value = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| format!("value at {} is not numeric: {}", pointer, raw))?;

    Ok(value * source.scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source(pointer: &str, scale: f64) -> GasPriceSource {
        GasPriceSource {
            url: Some("http://localhost/gas".to_string()),
            json_pointer: Some(pointer.to_string()),
            scale,
            fixed: None,
        }
    }

    #[test]
    fn test_evaluate_shapes() {
        let etherscan = json!({"status": "1", "result": {"ProposeGasPrice": "21"}});
        assert_eq!(evaluate(&source("/result/ProposeGasPrice", 1.0), &etherscan), Ok(21.0));

        let nested = json!({"data": {"normal": {"price": 3_000_000_000u64}}});
        let price = evaluate(&source("/data/normal/price", 1e-9), &nested).unwrap();
        assert!((price - 3.0).abs() < 1e-9);

        let array = json!([{"fast": 5.5}]);
        assert_eq!(evaluate(&source("/0/fast", 2.0), &array), Ok(11.0));
    }

    #[test]
    fn test_evaluate_errors() {
        let body = json!({"result": {"price": "n/a"}});
        assert!(evaluate(&source("/result/missing", 1.0), &body).is_err());
        assert!(evaluate(&source("/result/price", 1.0), &body).is_err());
        assert!(evaluate(&source("/result", 1.0), &body).is_err());
    }

    #[tokio::test]
    async fn test_fixed_sources_fill_cache() {
        let mut config = GasPriceConfig::default();
        config.sources.insert(
            "OP".to_string(),
            GasPriceSource {
                url: None,
                json_pointer: None,
                scale: 1.0,
                fixed: Some(0.001),
            },
        );

        let fetcher = GasPriceFetcher::new(&config);
        assert!(fetcher.get_gas_price("OP").is_none());
        fetcher.refresh().await;
        assert_eq!(fetcher.get_gas_price("OP").unwrap().price, 0.001);
        assert!(fetcher.get_gas_price("ETH").is_none());
    }
}
