//! Sieve - watched-address log indexer for factory-created collections
//!
//! This library keeps the set of contracts worth indexing, narrows
//! `eth_getLogs` queries to that set, discovers new collection contracts
//! from factory events, and persists them in a local contract store.

pub mod keys;
pub mod records;
pub mod store;
pub mod cli;
pub mod admin;

// Indexer modules
pub mod config;
pub mod discovery;
pub mod filter;
pub mod registry;
pub mod rpc;
pub mod sync;
pub mod types;
pub mod watcher;

// Re-export the main types for convenience
pub use config::Config;
pub use discovery::{ContractCreated, DiscoveryParser};
pub use filter::{FilterStatistics, FilteredLogFetcher};
pub use records::{ContractRecord, ContractStatus};
pub use registry::AddressRegistry;
pub use store::{ContractStore, RocksContractStore};
