//! Chain service configuration with TOML file support.

use std::path::{Path, PathBuf};
use std::time::Duration;

use coffer_store::StoreWindows;
use coffer_types::{parse_address, Address, AddressOnNetwork, BaseAsset, FungibleAsset, Network};
use serde::{Deserialize, Serialize};

use crate::logging::LogFormat;
use crate::scanner::ScannerConfig;
use crate::service::ServiceSettings;
use crate::tracker::TrackerConfig;
use crate::ChainError;

/// Configuration for the chain service.
///
/// Loaded from a TOML file via [`ChainConfig::from_toml_file`] or built
/// programmatically. Every field has a default.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Directory holding the LMDB environment.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter, e.g. "info" or "debug,coffer_chain=trace".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // ── Lifecycle queue ─────────────────────────────────────────────────
    #[serde(default = "default_transactions_per_drain")]
    pub transactions_per_drain: usize,

    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,

    /// How long a failing transaction lookup keeps being retried.
    #[serde(default = "default_transaction_lifetime_secs")]
    pub transaction_lifetime_secs: u64,

    // ── Historic scan ───────────────────────────────────────────────────
    #[serde(default = "default_history_window_blocks")]
    pub history_window_blocks: u64,

    #[serde(default = "default_history_head_margin")]
    pub history_head_margin: u64,

    #[serde(default = "default_history_max_windows")]
    pub history_max_windows: u64,

    #[serde(default = "default_history_sweep_interval_secs")]
    pub history_sweep_interval_secs: u64,

    // ── Refresh cadence ─────────────────────────────────────────────────
    #[serde(default = "default_balance_refresh_secs")]
    pub balance_refresh_secs: u64,

    #[serde(default = "default_gas_refresh_secs")]
    pub gas_refresh_secs: u64,

    // ── Store recency windows ───────────────────────────────────────────
    #[serde(default = "default_latest_block_max_age_secs")]
    pub latest_block_max_age_secs: u64,

    #[serde(default = "default_balance_max_age_secs")]
    pub balance_max_age_secs: u64,

    // ── Name lookups ────────────────────────────────────────────────────
    #[serde(default = "default_name_batch_debounce_ms")]
    pub name_batch_debounce_ms: u64,

    #[serde(default = "default_name_batch_max")]
    pub name_batch_max: usize,

    /// Networks to connect to.
    #[serde(default = "default_networks")]
    pub networks: Vec<NetworkConfig>,

    /// Accounts tracked at start-up, in addition to those already stored.
    #[serde(default)]
    pub tracked_accounts: Vec<TrackedAccountConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub chain_id: u64,
    #[serde(default = "default_base_asset_name")]
    pub base_asset_name: String,
    #[serde(default = "default_base_asset_symbol")]
    pub base_asset_symbol: String,
    #[serde(default = "default_base_asset_decimals")]
    pub base_asset_decimals: u8,
    pub rpc_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    /// Reverse-records contract for batched name lookups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse_records: Option<String>,
    /// Multicall3 deployment, when not at the canonical address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multicall: Option<String>,
    /// Tokens whose balances are refreshed and which annotation recognises.
    #[serde(default)]
    pub assets: Vec<AssetConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetConfig {
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub address: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAccountConfig {
    pub chain_id: u64,
    pub address: String,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_data_dir() -> PathBuf {
    PathBuf::from("./coffer_data")
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_transactions_per_drain() -> usize {
    5
}

fn default_drain_interval_secs() -> u64 {
    15
}

fn default_transaction_lifetime_secs() -> u64 {
    36_000
}

fn default_history_window_blocks() -> u64 {
    128_000
}

fn default_history_head_margin() -> u64 {
    20
}

fn default_history_max_windows() -> u64 {
    10
}

fn default_history_sweep_interval_secs() -> u64 {
    300
}

fn default_balance_refresh_secs() -> u64 {
    60
}

fn default_gas_refresh_secs() -> u64 {
    60
}

fn default_latest_block_max_age_secs() -> u64 {
    600
}

fn default_balance_max_age_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_name_batch_debounce_ms() -> u64 {
    50
}

fn default_name_batch_max() -> usize {
    100
}

fn default_base_asset_name() -> String {
    "Ether".to_string()
}

fn default_base_asset_symbol() -> String {
    "ETH".to_string()
}

fn default_base_asset_decimals() -> u8 {
    18
}

fn default_networks() -> Vec<NetworkConfig> {
    vec![NetworkConfig {
        name: "Ethereum".to_string(),
        chain_id: 1,
        base_asset_name: default_base_asset_name(),
        base_asset_symbol: default_base_asset_symbol(),
        base_asset_decimals: default_base_asset_decimals(),
        rpc_url: "http://127.0.0.1:8545".to_string(),
        ws_url: None,
        reverse_records: None,
        multicall: None,
        assets: Vec::new(),
    }]
}

// ── Impl ───────────────────────────────────────────────────────────────

impl ChainConfig {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ChainError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ChainError::Config(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ChainError> {
        toml::from_str(s).map_err(|e| ChainError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).expect("ChainConfig is always serializable to TOML")
    }

    pub fn log_format(&self) -> Result<LogFormat, ChainError> {
        self.log_format.parse().map_err(ChainError::Config)
    }

    pub fn store_windows(&self) -> StoreWindows {
        StoreWindows {
            latest_block_max_age: Duration::from_secs(self.latest_block_max_age_secs),
            balance_max_age: Duration::from_secs(self.balance_max_age_secs),
        }
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            tracker: TrackerConfig {
                batch_size: self.transactions_per_drain,
                lifetime: Duration::from_secs(self.transaction_lifetime_secs),
            },
            scanner: ScannerConfig {
                window: self.history_window_blocks,
                head_margin: self.history_head_margin,
                max_windows: self.history_max_windows,
                ..ScannerConfig::default()
            },
            drain_interval: Duration::from_secs(self.drain_interval_secs),
            history_sweep_interval: Duration::from_secs(self.history_sweep_interval_secs),
            balance_refresh_interval: Duration::from_secs(self.balance_refresh_secs),
            gas_refresh_interval: Duration::from_secs(self.gas_refresh_secs),
            ..ServiceSettings::default()
        }
    }

    pub fn name_batch_debounce(&self) -> Duration {
        Duration::from_millis(self.name_batch_debounce_ms)
    }

    pub fn network(&self, chain_id: u64) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.chain_id == chain_id)
    }

    /// Resolve the configured start-up accounts against the configured
    /// networks.
    pub fn tracked_accounts(&self) -> Result<Vec<AddressOnNetwork>, ChainError> {
        self.tracked_accounts
            .iter()
            .map(|account| {
                let network = self
                    .network(account.chain_id)
                    .ok_or_else(|| {
                        ChainError::Config(format!(
                            "tracked account {} on unknown chain {}",
                            account.address, account.chain_id
                        ))
                    })?
                    .network();
                Ok(AddressOnNetwork::new(
                    config_address(&account.address)?,
                    network,
                ))
            })
            .collect()
    }
}

impl NetworkConfig {
    pub fn network(&self) -> Network {
        Network::evm(
            self.name.clone(),
            self.chain_id,
            BaseAsset::new(
                self.base_asset_name.clone(),
                self.base_asset_symbol.clone(),
                self.base_asset_decimals,
            ),
        )
    }

    pub fn reverse_records(&self) -> Result<Option<Address>, ChainError> {
        self.reverse_records.as_deref().map(config_address).transpose()
    }

    pub fn multicall(&self) -> Result<Option<Address>, ChainError> {
        self.multicall.as_deref().map(config_address).transpose()
    }

    pub fn fungible_assets(&self) -> Result<Vec<FungibleAsset>, ChainError> {
        self.assets
            .iter()
            .map(|asset| {
                Ok(FungibleAsset {
                    name: asset.name.clone(),
                    symbol: asset.symbol.clone(),
                    decimals: asset.decimals,
                    contract_address: config_address(&asset.address)?,
                    chain_id: self.chain_id,
                    logo_url: None,
                })
            })
            .collect()
    }
}

fn config_address(raw: &str) -> Result<Address, ChainError> {
    parse_address(raw).map_err(|e| ChainError::Config(format!("{raw}: {e}")))
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_format: default_log_format(),
            log_level: default_log_level(),
            transactions_per_drain: default_transactions_per_drain(),
            drain_interval_secs: default_drain_interval_secs(),
            transaction_lifetime_secs: default_transaction_lifetime_secs(),
            history_window_blocks: default_history_window_blocks(),
            history_head_margin: default_history_head_margin(),
            history_max_windows: default_history_max_windows(),
            history_sweep_interval_secs: default_history_sweep_interval_secs(),
            balance_refresh_secs: default_balance_refresh_secs(),
            gas_refresh_secs: default_gas_refresh_secs(),
            latest_block_max_age_secs: default_latest_block_max_age_secs(),
            balance_max_age_secs: default_balance_max_age_secs(),
            name_batch_debounce_ms: default_name_batch_debounce_ms(),
            name_batch_max: default_name_batch_max(),
            networks: default_networks(),
            tracked_accounts: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = ChainConfig::default();
        let toml_str = config.to_toml_string();
        let parsed = ChainConfig::from_toml_str(&toml_str).expect("should parse");
        assert_eq!(parsed.networks, config.networks);
        assert_eq!(parsed.transaction_lifetime_secs, 36_000);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = ChainConfig::from_toml_str("").expect("empty toml should use defaults");
        assert_eq!(config.transactions_per_drain, 5);
        assert_eq!(config.history_window_blocks, 128_000);
        assert_eq!(config.history_head_margin, 20);
        assert_eq!(config.history_max_windows, 10);
        assert_eq!(config.balance_max_age_secs, 604_800);
        assert_eq!(config.log_format, "human");
        assert_eq!(config.networks.len(), 1);
    }

    #[test]
    fn partial_toml_overrides() {
        let toml = r#"
            transactions_per_drain = 10
            log_format = "json"

            [[networks]]
            name = "Polygon"
            chain_id = 137
            base_asset_name = "Matic Token"
            base_asset_symbol = "MATIC"
            rpc_url = "https://polygon.example"
            ws_url = "wss://polygon.example"

            [[networks.assets]]
            symbol = "USDC"
            name = "USD Coin"
            decimals = 6
            address = "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"

            [[tracked_accounts]]
            chain_id = 137
            address = "0x000000000000000000000000000000000000abcd"
        "#;
        let config = ChainConfig::from_toml_str(toml).expect("should parse");
        assert_eq!(config.transactions_per_drain, 10);
        assert_eq!(config.log_format().unwrap(), LogFormat::Json);
        assert_eq!(config.drain_interval_secs, 15);

        let polygon = config.network(137).expect("configured");
        assert_eq!(polygon.network().base_asset.symbol, "MATIC");
        assert_eq!(polygon.base_asset_decimals, 18);
        assert_eq!(polygon.fungible_assets().unwrap()[0].decimals, 6);

        let tracked = config.tracked_accounts().unwrap();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].network.chain_id, 137);
    }

    #[test]
    fn settings_follow_config() {
        let config = ChainConfig {
            transactions_per_drain: 3,
            transaction_lifetime_secs: 60,
            history_window_blocks: 1_000,
            ..ChainConfig::default()
        };
        let settings = config.service_settings();
        assert_eq!(settings.tracker.batch_size, 3);
        assert_eq!(settings.tracker.lifetime, Duration::from_secs(60));
        assert_eq!(settings.scanner.window, 1_000);
        assert_eq!(settings.scanner.attempts, 3);
    }

    #[test]
    fn tracked_account_on_unknown_chain_is_rejected() {
        let config = ChainConfig {
            tracked_accounts: vec![TrackedAccountConfig {
                chain_id: 999,
                address: "0x000000000000000000000000000000000000abcd".into(),
            }],
            ..ChainConfig::default()
        };
        assert!(matches!(config.tracked_accounts(), Err(ChainError::Config(_))));
    }

    #[test]
    fn missing_file_returns_config_error() {
        let result = ChainConfig::from_toml_file("/nonexistent/coffer.toml");
        assert!(matches!(result, Err(ChainError::Config(_))));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coffer.toml");
        std::fs::write(&path, "gas_refresh_secs = 5\n").unwrap();
        let config = ChainConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.gas_refresh_secs, 5);
    }
}
