//! Configuration management for the bridge relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chains: HashMap<String, ChainConfig>,
    #[serde(default)]
    pub gas_price: GasPriceConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    /// Name of the chain that receives status reports (key into `chains`)
    pub home_chain: String,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    #[serde(default = "default_stuck_timeout")]
    pub stuck_timeout_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_receipt_interval")]
    pub receipt_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres URL, or `memory://` for the in-process store
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_grace_period")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Bridge chain id (bytes8, hex without 0x)
    pub chain_id: String,
    /// EVM chain id used for transaction signing
    pub evm_chain_id: u64,
    pub rpc_urls: Vec<String>,
    pub contract_address: String,
    pub confirmation_blocks: u64,
    #[serde(default = "default_safety_lag")]
    pub safety_lag_blocks: u64,
    #[serde(default)]
    pub start_block: u64,
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    #[serde(default = "default_fetch_interval")]
    pub fetch_interval_ms: u64,
    #[serde(default = "default_confirm_interval")]
    pub confirm_interval_ms: u64,
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GasPriceConfig {
    #[serde(default = "default_gas_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_gas_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub sources: HashMap<String, GasPriceSource>,
}

impl Default for GasPriceConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_gas_interval(),
            timeout_secs: default_gas_timeout(),
            sources: HashMap::new(),
        }
    }
}

/// Where a chain's gas price comes from.
///
/// Either a fixed value, or an HTTP endpoint plus a JSON pointer into its
/// response and a factor the raw number is multiplied by.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GasPriceSource {
    pub url: Option<String>,
    pub json_pointer: Option<String>,
    #[serde(default = "default_scale")]
    pub scale: f64,
    pub fixed: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key_env: default_private_key_env(),
        }
    }
}

fn default_report_interval() -> u64 {
    60
}
fn default_stuck_timeout() -> u64 {
    300
}
fn default_sweep_interval() -> u64 {
    30
}
fn default_receipt_interval() -> u64 {
    15
}
fn default_max_connections() -> u32 {
    10
}
fn default_min_connections() -> u32 {
    1
}
fn default_grace_period() -> u64 {
    3
}
fn default_safety_lag() -> u64 {
    2
}
fn default_max_block_range() -> u64 {
    1000
}
fn default_fetch_interval() -> u64 {
    5000
}
fn default_confirm_interval() -> u64 {
    5000
}
fn default_rpc_timeout() -> u64 {
    10
}
fn default_gas_interval() -> u64 {
    60
}
fn default_gas_timeout() -> u64 {
    10
}
fn default_scale() -> f64 {
    1.0
}
fn default_private_key_env() -> String {
    "RELAYER_PRIVATE_KEY".to_string()
}

impl Settings {
    /// Load settings from the file named by `BRIDGE_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("BRIDGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        match self.chains.get(&self.relayer.home_chain) {
            Some(home) if home.enabled => {}
            Some(_) => anyhow::bail!("Home chain {} is disabled", self.relayer.home_chain),
            None => anyhow::bail!("Home chain {} is not configured", self.relayer.home_chain),
        }

        for (name, chain) in &self.chains {
            if !chain.enabled {
                continue;
            }
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
            if chain.contract_address.is_empty() {
                anyhow::bail!("Chain {} has no contract address configured", name);
            }
            let id = chain.chain_id.trim_start_matches("0x");
            if id.len() != 16 || hex::decode(id).is_err() {
                anyhow::bail!("Chain {} has invalid bridge chain id {}", name, chain.chain_id);
            }
        }

        for (name, source) in &self.gas_price.sources {
            if source.fixed.is_none() && (source.url.is_none() || source.json_pointer.is_none()) {
                anyhow::bail!("Gas price source {} needs either `fixed` or `url` + `json_pointer`", name);
            }
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        let mut chains: Vec<_> = self.chains.iter().filter(|(_, c)| c.enabled).collect();
        chains.sort_by(|a, b| a.0.cmp(b.0));
        chains
    }

    /// Configuration of the home chain
    pub fn home_chain(&self) -> Option<&ChainConfig> {
        self.chains.get(&self.relayer.home_chain)
    }

    /// Resolve a bridge chain id to the configured chain name
    pub fn chain_name_by_id(&self, chain_id: &str) -> Option<&str> {
        let wanted = chain_id.trim_start_matches("0x").to_lowercase();
        self.chains
            .iter()
            .find(|(_, c)| c.chain_id.trim_start_matches("0x").to_lowercase() == wanted)
            .map(|(name, _)| name.as_str())
    }
}

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid regex");
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const SAMPLE: &str = r#"
[relayer]
home_chain = "LA"

[database]
url = "memory://"

[api]
host = "127.0.0.1"
port = 8080

[metrics]
enabled = false
port = 9090

[chains.LA]
chain_id = "0000000000000001"
evm_chain_id = 225
rpc_urls = ["http://localhost:8545"]
contract_address = "0x0000000000000000000000000000000000000001"
confirmation_blocks = 3
enabled = true

[chains.ETH]
chain_id = "0000000000000002"
evm_chain_id = 1
rpc_urls = ["http://localhost:8546"]
contract_address = "0x0000000000000000000000000000000000000002"
confirmation_blocks = 12
enabled = true

[gas_price.sources.ETH]
url = "https://gas.example.com/eth"
json_pointer = "/data/normal/price"
scale = 0.000000001

[gas_price.sources.OP]
fixed = 0.001
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("BRIDGE_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${BRIDGE_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_load_sample_config() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        assert_eq!(settings.relayer.report_interval_secs, 60);
        assert_eq!(settings.relayer.stuck_timeout_secs, 300);
        assert_eq!(settings.enabled_chains().len(), 2);
        assert_eq!(settings.home_chain().unwrap().evm_chain_id, 225);
        assert_eq!(settings.chains["ETH"].safety_lag_blocks, 2);
        assert_eq!(settings.chain_name_by_id("0x0000000000000002"), Some("ETH"));
        assert_eq!(settings.gas_price.sources["OP"].fixed, Some(0.001));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.api.port, 8080);
        assert_eq!(settings.api.shutdown_grace_secs, 3);
    }

    #[test]
    fn test_missing_home_chain_rejected() {
        let input = SAMPLE.replace("home_chain = \"LA\"", "home_chain = \"BSC\"");
        assert!(Settings::from_toml_str(&input).is_err());
    }

    #[test]
    fn test_invalid_chain_id_rejected() {
        let input = SAMPLE.replace("\"0000000000000002\"", "\"02\"");
        assert!(Settings::from_toml_str(&input).is_err());
    }
}
