//! Configuration loading and validation
//!
//! The configuration file is JSON. It is deserialized into a raw shape that
//! mirrors the file, then validated into [`Config`], where every address is
//! parsed and every duration is checked. A half-valid configuration never
//! leaves this module.
//!
//! # Example file:
//! ```json
//! {
//!   "network": "base-sepolia",
//!   "chainId": 84532,
//!   "contracts": {
//!     "factory": { "address": "0x5FbDB2315678afecb367f032d93F642f64180aa3" },
//!     "payment": { "address": "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512" },
//!     "nftContracts": []
//!   },
//!   "eventFilters": { "enabled": true },
//!   "syncSettings": {
//!     "storeSync": { "enabled": true, "intervalSeconds": 30 },
//!     "autoDiscovery": { "enabled": true }
//!   }
//! }
//! ```

use alloy_primitives::Address;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 12;
const DEFAULT_MAX_BLOCK_RANGE: u64 = 2_000;

/// Validation failures. Any of these aborts startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {field} address {value:?}: {reason}")]
    InvalidAddress {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("factory and payment must be distinct, both are 0x{0:x}")]
    SameFixedRoles(Address),

    #[error("store sync is enabled but intervalSeconds is 0")]
    ZeroSyncInterval,

    #[error("indexer pollIntervalSeconds must be greater than 0")]
    ZeroPollInterval,

    #[error("indexer maxBlockRange must be greater than 0")]
    ZeroBlockRange,

    #[error("chainId must be greater than 0")]
    ZeroChainId,
}

/// Validated runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Human-readable network name, informational only
    pub network: String,
    /// Chain the contract store is keyed by
    pub chain_id: u64,
    /// Factory contract whose creation events grow the watch set
    pub factory: Address,
    /// Payment contract, always watched
    pub payment: Address,
    /// Collection contracts known ahead of time
    pub preload: Vec<Address>,
    /// When false every address passes the filter
    pub filtering_enabled: bool,
    /// Feed fetched logs through the discovery parser
    pub auto_discovery: bool,
    pub sync: SyncSettings,
    pub indexer: IndexerSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub enabled: bool,
    pub interval: Duration,
}

/// Settings for the block-range driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexerSettings {
    pub poll_interval: Duration,
    pub max_block_range: u64,
    pub start_block: Option<u64>,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_json_str(&contents)
            .with_context(|| format!("Invalid config file: {:?}", path))
    }

    /// Parse and validate a configuration document.
    pub fn from_json_str(contents: &str) -> Result<Self> {
        let raw: RawConfig =
            serde_json::from_str(contents).context("Failed to parse config JSON")?;
        Ok(raw.validate()?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    #[serde(default)]
    network: String,
    chain_id: u64,
    contracts: RawContracts,
    #[serde(default)]
    event_filters: RawEventFilters,
    #[serde(default)]
    sync_settings: RawSyncSettings,
    #[serde(default)]
    indexer: RawIndexer,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContracts {
    factory: RawContract,
    payment: RawContract,
    #[serde(default)]
    nft_contracts: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawContract {
    address: String,
    // Informational, kept so documented config files parse unchanged
    #[serde(default)]
    #[allow(dead_code)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEventFilters {
    #[serde(default = "default_true")]
    enabled: bool,
}

impl Default for RawEventFilters {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSyncSettings {
    #[serde(default)]
    store_sync: RawStoreSync,
    #[serde(default)]
    auto_discovery: RawAutoDiscovery,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStoreSync {
    #[serde(default)]
    enabled: bool,
    #[serde(default = "default_sync_interval")]
    interval_seconds: u64,
}

impl Default for RawStoreSync {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: DEFAULT_SYNC_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawAutoDiscovery {
    #[serde(default = "default_true")]
    enabled: bool,
}

impl Default for RawAutoDiscovery {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIndexer {
    #[serde(default = "default_poll_interval")]
    poll_interval_seconds: u64,
    #[serde(default = "default_max_block_range")]
    max_block_range: u64,
    #[serde(default)]
    start_block: Option<u64>,
}

impl Default for RawIndexer {
    fn default() -> Self {
        Self {
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECS,
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
            start_block: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sync_interval() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_max_block_range() -> u64 {
    DEFAULT_MAX_BLOCK_RANGE
}

impl RawConfig {
    fn validate(self) -> Result<Config, ConfigError> {
        if self.chain_id == 0 {
            return Err(ConfigError::ZeroChainId);
        }

        let factory = parse_field("factory", &self.contracts.factory.address)?;
        let payment = parse_field("payment", &self.contracts.payment.address)?;
        if factory == payment {
            return Err(ConfigError::SameFixedRoles(factory));
        }

        let mut preload = Vec::with_capacity(self.contracts.nft_contracts.len());
        for entry in &self.contracts.nft_contracts {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            preload.push(parse_field("nftContracts", entry)?);
        }

        let store_sync = &self.sync_settings.store_sync;
        if store_sync.enabled && store_sync.interval_seconds == 0 {
            return Err(ConfigError::ZeroSyncInterval);
        }
        if self.indexer.poll_interval_seconds == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.indexer.max_block_range == 0 {
            return Err(ConfigError::ZeroBlockRange);
        }

        Ok(Config {
            network: self.network,
            chain_id: self.chain_id,
            factory,
            payment,
            preload,
            filtering_enabled: self.event_filters.enabled,
            auto_discovery: self.sync_settings.auto_discovery.enabled,
            sync: SyncSettings {
                enabled: store_sync.enabled,
                interval: Duration::from_secs(store_sync.interval_seconds),
            },
            indexer: IndexerSettings {
                poll_interval: Duration::from_secs(self.indexer.poll_interval_seconds),
                max_block_range: self.indexer.max_block_range,
                start_block: self.indexer.start_block,
            },
        })
    }
}

fn parse_field(field: &'static str, value: &str) -> Result<Address, ConfigError> {
    parse_address(value).map_err(|e| ConfigError::InvalidAddress {
        field,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// Parse an address from a hex string.
///
/// Accepts addresses with or without 0x prefix, in any letter case. Exactly
/// 40 hex digits are required; a truncated address is an error, never padded.
pub fn parse_address(s: &str) -> Result<Address> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);

    if digits.len() != 40 {
        anyhow::bail!(
            "Address must be 40 hex digits (20 bytes), got {} digits",
            digits.len()
        );
    }
    let bytes = hex::decode(digits).with_context(|| format!("Invalid hex address: {}", s))?;

    Ok(Address::from_slice(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FACTORY: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
    const PAYMENT: &str = "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512";

    fn minimal(extra: &str) -> String {
        format!(
            r#"{{
                "network": "anvil",
                "chainId": 31337,
                "contracts": {{
                    "factory": {{ "address": "{FACTORY}", "name": "Factory" }},
                    "payment": {{ "address": "{PAYMENT}" }},
                    "nftContracts": ["0x0742d35Cc6634C0532925a3b844Bc9e7595f0bEb", ""]
                }}{extra}
            }}"#
        )
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_json_str(&minimal("")).unwrap();
        assert_eq!(config.chain_id, 31337);
        assert_eq!(config.preload.len(), 1);
        assert!(config.filtering_enabled);
        assert!(config.auto_discovery);
        assert!(!config.sync.enabled);
        assert_eq!(config.sync.interval, Duration::from_secs(30));
        assert_eq!(config.indexer.poll_interval, Duration::from_secs(12));
        assert_eq!(config.indexer.max_block_range, 2_000);
        assert_eq!(config.indexer.start_block, None);
    }

    #[test]
    fn test_full_settings() {
        let extra = r#",
            "eventFilters": { "enabled": false },
            "syncSettings": {
                "storeSync": { "enabled": true, "intervalSeconds": 5 },
                "autoDiscovery": { "enabled": false }
            },
            "indexer": { "pollIntervalSeconds": 2, "maxBlockRange": 500, "startBlock": 100 }"#;
        let config = Config::from_json_str(&minimal(extra)).unwrap();
        assert!(!config.filtering_enabled);
        assert!(!config.auto_discovery);
        assert!(config.sync.enabled);
        assert_eq!(config.sync.interval, Duration::from_secs(5));
        assert_eq!(config.indexer.max_block_range, 500);
        assert_eq!(config.indexer.start_block, Some(100));
    }

    #[test]
    fn test_invalid_factory_rejected() {
        let doc = minimal("").replace(FACTORY, "0x1234");
        let err = Config::from_json_str(&doc).unwrap_err();
        let config_err = err.downcast_ref::<ConfigError>().unwrap();
        assert!(matches!(
            config_err,
            ConfigError::InvalidAddress { field: "factory", .. }
        ));
    }

    #[test]
    fn test_truncated_factory_rejected() {
        // One digit short; must not load as a zero-padded address
        let truncated = &FACTORY[..FACTORY.len() - 1];
        let doc = minimal("").replace(FACTORY, truncated);
        let err = Config::from_json_str(&doc).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidAddress { field: "factory", .. })
        ));
    }

    #[test]
    fn test_chain_id_required() {
        let missing = minimal("").replace(r#""chainId": 31337,"#, "");
        assert!(Config::from_json_str(&missing).is_err());

        let zero = minimal("").replace("31337", "0");
        let err = Config::from_json_str(&zero).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::ZeroChainId)
        );
    }

    #[test]
    fn test_same_fixed_roles_rejected() {
        let doc = minimal("").replace(PAYMENT, FACTORY);
        let err = Config::from_json_str(&doc).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::SameFixedRoles(_))
        ));
    }

    #[test]
    fn test_zero_sync_interval_rejected() {
        let extra = r#",
            "syncSettings": { "storeSync": { "enabled": true, "intervalSeconds": 0 } }"#;
        let err = Config::from_json_str(&minimal(extra)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::ZeroSyncInterval)
        );
    }

    #[test]
    fn test_zero_block_range_rejected() {
        let extra = r#", "indexer": { "maxBlockRange": 0 }"#;
        let err = Config::from_json_str(&minimal(extra)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::ZeroBlockRange)
        );
    }

    #[test]
    fn test_missing_contracts_section() {
        assert!(Config::from_json_str(r#"{ "chainId": 1 }"#).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", minimal("")).unwrap();
        file.flush().unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.network, "anvil");
    }

    #[test]
    fn test_parse_address() {
        let addr1 = parse_address("0x0742d35Cc6634C0532925a3b844Bc9e7595f0bEb").unwrap();
        let addr2 = parse_address("0742d35cc6634c0532925a3b844bc9e7595f0beb").unwrap();
        assert_eq!(addr1, addr2);
        assert!(parse_address("0x0742d35Cc6634C0532925a3b844Bc9e7595f0b").is_err());
        assert!(parse_address("0x0742d35Cc6634C0532925a3b844Bc9e7595f0bE").is_err());
        assert!(parse_address("0x0742d35Cc6634C0532925a3b844Bc9e7595f0bEz").is_err());
    }
}
