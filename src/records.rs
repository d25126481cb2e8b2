//! Record types for the contract store
//!
//! These structs represent the data stored in the contract store.
//! They use postcard for binary serialization, which is compact and deterministic.

use crate::discovery::ContractCreated;
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a collection contract.
///
/// Only `Deleted` contracts are excluded from store sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractStatus {
    Active,
    Inactive,
    Deleted,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Active => "active",
            ContractStatus::Inactive => "inactive",
            ContractStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(ContractStatus::Active),
            "inactive" => Ok(ContractStatus::Inactive),
            "deleted" => Ok(ContractStatus::Deleted),
            other => anyhow::bail!("Unknown contract status: {}", other),
        }
    }
}

/// A collection contract known to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRecord {
    pub contract_address: Address,
    pub chain_id: u64,
    pub collection_id: U256,
    pub creator: Address,
    pub name: String,
    pub symbol: String,
    pub base_uri: String,
    /// Generation model the collection was created with, if known
    pub model_id: Option<u64>,
    pub network: String,
    pub status: ContractStatus,
    /// Unix epoch seconds; set by the store on first insert when zero
    pub created_at: u64,
    /// Unix epoch seconds; refreshed by the store on every write
    pub updated_at: u64,
}

impl ContractRecord {
    /// A bare active record for an address, metadata left empty.
    pub fn new(chain_id: u64, contract_address: Address) -> Self {
        Self {
            contract_address,
            chain_id,
            collection_id: U256::ZERO,
            creator: Address::ZERO,
            name: String::new(),
            symbol: String::new(),
            base_uri: String::new(),
            model_id: None,
            network: String::new(),
            status: ContractStatus::Active,
            created_at: 0,
            updated_at: 0,
        }
    }

    /// Build a record from a discovered creation event.
    pub fn from_event(event: &ContractCreated, chain_id: u64, network: &str) -> Self {
        let mut record = Self::new(chain_id, event.contract_address);
        record.collection_id = event.collection_id;
        record.creator = event.creator;
        record.network = network.to_string();
        if let Some(meta) = &event.metadata {
            record.name = meta.name.clone();
            record.symbol = meta.symbol.clone();
            record.base_uri = meta.base_uri.clone();
        }
        record
    }

    /// Whether store sync should hand this contract to the registry.
    pub fn is_syncable(&self) -> bool {
        self.status != ContractStatus::Deleted
    }

    /// Compare everything except the write timestamps.
    pub(crate) fn same_content(&self, other: &ContractRecord) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.created_at = 0;
        a.updated_at = 0;
        b.created_at = 0;
        b.updated_at = 0;
        a == b
    }
}
