//! Watched-address registry
//!
//! The set of contract addresses whose logs get fetched: the factory, the
//! payment contract, and every collection contract added at runtime by
//! discovery or store sync. Membership only grows for the lifetime of the
//! process.
//!
//! A single `RwLock` guards the set. Readers (membership checks, snapshots
//! for the next fetch) share it, writers take it exclusively, so a batch
//! insert is never observed half-applied.

use crate::config::Config;
use alloy_primitives::Address;
use std::collections::{BTreeSet, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Canonical string form of an address: lowercase, `0x`-prefixed.
pub fn canonical_hex(addr: &Address) -> String {
    format!("0x{:x}", addr)
}

/// Point-in-time summary of the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub enabled: bool,
    pub factory: Address,
    pub payment: Address,
    /// Collection contracts added at runtime (fixed roles excluded)
    pub dynamic_count: usize,
    /// Fixed roles plus dynamic members
    pub total_watched: usize,
    pub auto_discovery: bool,
    pub sync_enabled: bool,
}

struct Members {
    factory: Address,
    payment: Address,
    dynamic: HashSet<Address>,
}

impl Members {
    fn is_fixed(&self, addr: &Address) -> bool {
        *addr == self.factory || *addr == self.payment
    }

    fn contains(&self, addr: &Address) -> bool {
        self.is_fixed(addr) || self.dynamic.contains(addr)
    }

    /// Distinct addresses in the watch set.
    fn len(&self) -> usize {
        let fixed = if self.factory == self.payment { 1 } else { 2 };
        fixed + self.dynamic.len()
    }

    /// Insert a dynamic member. Fixed roles are already members.
    fn insert(&mut self, addr: Address) -> bool {
        if self.is_fixed(&addr) {
            return false;
        }
        self.dynamic.insert(addr)
    }
}

/// Thread-safe watch set, shared as `Arc<AddressRegistry>`.
pub struct AddressRegistry {
    members: RwLock<Members>,
    enabled: bool,
    auto_discovery: bool,
    sync_enabled: bool,
}

impl AddressRegistry {
    /// Create a registry with the two fixed roles and an optional preload list.
    pub fn new(
        factory: Address,
        payment: Address,
        preload: impl IntoIterator<Item = Address>,
        enabled: bool,
    ) -> Self {
        let mut members = Members {
            factory,
            payment,
            dynamic: HashSet::new(),
        };
        for addr in preload {
            members.insert(addr);
        }

        Self {
            members: RwLock::new(members),
            enabled,
            auto_discovery: false,
            sync_enabled: false,
        }
    }

    /// Build the registry described by a validated configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new(
            config.factory,
            config.payment,
            config.preload.iter().copied(),
            config.filtering_enabled,
        );
        registry.auto_discovery = config.auto_discovery;
        registry.sync_enabled = config.sync.enabled;
        registry
    }

    // Inserts are single HashSet operations; a poisoned set is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, Members> {
        self.members.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Members> {
        self.members.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether filtering is active. When it is not, every address matches.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn factory(&self) -> Address {
        self.read().factory
    }

    pub fn payment(&self) -> Address {
        self.read().payment
    }

    /// Check whether logs from `addr` should be indexed.
    pub fn contains(&self, addr: &Address) -> bool {
        if !self.enabled {
            return true;
        }
        self.read().contains(addr)
    }

    /// Add a single collection contract.
    ///
    /// Returns `true` if the address was not already watched.
    pub fn add(&self, addr: Address) -> bool {
        let mut members = self.write();
        let added = members.insert(addr);
        if added {
            info!(
                "Watching new contract {} (dynamic: {})",
                canonical_hex(&addr),
                members.dynamic.len()
            );
        } else {
            debug!("Contract {} already watched", canonical_hex(&addr));
        }
        added
    }

    /// Add many collection contracts under one write lock.
    ///
    /// Returns how many of them were new.
    pub fn add_batch<I>(&self, addrs: I) -> usize
    where
        I: IntoIterator<Item = Address>,
    {
        let mut members = self.write();
        let added = addrs
            .into_iter()
            .filter(|addr| members.insert(*addr))
            .count();
        if added > 0 {
            info!(
                "Added {} new contracts (dynamic: {})",
                added,
                members.dynamic.len()
            );
        } else {
            debug!("No new contracts in batch");
        }
        added
    }

    /// All watched addresses, fixed roles included.
    pub fn snapshot(&self) -> BTreeSet<Address> {
        let members = self.read();
        let mut set: BTreeSet<Address> = members.dynamic.iter().copied().collect();
        set.insert(members.factory);
        set.insert(members.payment);
        set
    }

    /// The watch set as canonical strings, sorted, ready to use as an
    /// `eth_getLogs` address parameter.
    pub fn filter_as_query_parameter(&self) -> Vec<String> {
        let mut filter: Vec<String> = self.snapshot().iter().map(canonical_hex).collect();
        filter.sort();
        filter
    }

    /// Number of dynamic members.
    pub fn dynamic_count(&self) -> usize {
        self.read().dynamic.len()
    }

    pub fn stats(&self) -> RegistryStats {
        let members = self.read();
        RegistryStats {
            enabled: self.enabled,
            factory: members.factory,
            payment: members.payment,
            dynamic_count: members.dynamic.len(),
            total_watched: members.len(),
            auto_discovery: self.auto_discovery,
            sync_enabled: self.sync_enabled,
        }
    }
}
