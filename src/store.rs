//! ContractStore trait and RocksDB implementation
//!
//! The authoritative record of collection contracts, keyed by chain id and
//! address. Store sync reads it to seed and refresh the registry; the
//! watcher writes newly discovered contracts back to it so they survive
//! restarts.

use crate::keys::{
    decode_contract_key, encode_contract_key, encode_contract_prefix, encode_meta_key,
    META_HEAD_BLOCK,
};
use crate::records::{ContractRecord, ContractStatus};
use crate::sync::{AddressSource, ChangeFeed};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Capacity of the change channel; slower subscribers see `Lagged`.
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Contract counts for one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub total_contracts: usize,
    pub active_contracts: usize,
}

/// Trait defining the interface for contract storage.
///
/// All methods return Results for proper error handling.
pub trait ContractStore: Send + Sync {
    /// Insert or update a contract.
    ///
    /// The stored `created_at` is kept on update; `updated_at` is refreshed
    /// whenever something changed.
    fn upsert_contract(&self, record: &ContractRecord) -> Result<UpsertOutcome>;

    /// Get a contract by chain and address.
    fn get_contract(&self, chain_id: u64, addr: Address) -> Result<Option<ContractRecord>>;

    /// Change a contract's status. Returns `false` if the contract is unknown.
    fn set_status(&self, chain_id: u64, addr: Address, status: ContractStatus) -> Result<bool>;

    /// All contracts of a chain, ordered by address.
    fn list_contracts(&self, chain_id: u64) -> Result<Vec<ContractRecord>>;

    /// Get the last block processed by the watcher.
    fn get_head(&self) -> Result<Option<u64>>;

    /// Set the last block processed by the watcher.
    fn set_head(&self, block: u64) -> Result<()>;

    /// Addresses of every contract not marked deleted.
    fn contract_addresses(&self, chain_id: u64) -> Result<Vec<Address>> {
        Ok(self
            .list_contracts(chain_id)?
            .into_iter()
            .filter(ContractRecord::is_syncable)
            .map(|record| record.contract_address)
            .collect())
    }

    /// Active contracts, newest first.
    fn active_contracts(&self, chain_id: u64) -> Result<Vec<ContractRecord>> {
        let mut active: Vec<ContractRecord> = self
            .list_contracts(chain_id)?
            .into_iter()
            .filter(|record| record.status == ContractStatus::Active)
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(active)
    }

    fn stats(&self, chain_id: u64) -> Result<StoreStats> {
        let contracts = self.list_contracts(chain_id)?;
        Ok(StoreStats {
            total_contracts: contracts.len(),
            active_contracts: contracts
                .iter()
                .filter(|record| record.status == ContractStatus::Active)
                .count(),
        })
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// RocksDB-backed implementation of ContractStore.
///
/// Uses column families to organize different types of data:
/// - contracts: contract records
/// - meta: metadata (head block)
///
/// Every write is also published to subscribers (see [`subscribe`](Self::subscribe)).
pub struct RocksContractStore {
    db: DB,
    changes: broadcast::Sender<ContractRecord>,
}

impl RocksContractStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all required column families if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let column_families = vec![
            ColumnFamilyDescriptor::new("contracts", Options::default()),
            ColumnFamilyDescriptor::new("meta", Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, column_families)
            .context("Failed to open RocksDB database")?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self { db, changes })
    }

    /// Receive every record written from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ContractRecord> {
        self.changes.subscribe()
    }

    /// Get a column family handle by name.
    fn get_cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .with_context(|| format!("Column family '{}' not found", name))
    }

    fn put_record(&self, record: &ContractRecord) -> Result<()> {
        let cf = self.get_cf("contracts")?;
        let key = encode_contract_key(record.chain_id, record.contract_address);
        let value =
            postcard::to_allocvec(record).context("Failed to serialize contract record")?;
        self.db
            .put_cf(cf, &key, &value)
            .context("Failed to put contract")?;

        // No subscribers is not an error
        let _ = self.changes.send(record.clone());
        Ok(())
    }
}

impl ContractStore for RocksContractStore {
    fn upsert_contract(&self, record: &ContractRecord) -> Result<UpsertOutcome> {
        let now = now_secs();
        let mut record = record.clone();

        let outcome = match self.get_contract(record.chain_id, record.contract_address)? {
            Some(existing) => {
                if existing.same_content(&record) {
                    return Ok(UpsertOutcome::Unchanged);
                }
                record.created_at = existing.created_at;
                UpsertOutcome::Updated
            }
            None => {
                if record.created_at == 0 {
                    record.created_at = now;
                }
                UpsertOutcome::Inserted
            }
        };
        record.updated_at = now;

        self.put_record(&record)?;
        debug!(
            "{:?} contract 0x{:x} on chain {}",
            outcome, record.contract_address, record.chain_id
        );
        Ok(outcome)
    }

    fn get_contract(&self, chain_id: u64, addr: Address) -> Result<Option<ContractRecord>> {
        let cf = self.get_cf("contracts")?;
        let key = encode_contract_key(chain_id, addr);
        match self.db.get_cf(cf, &key).context("Failed to get contract")? {
            Some(bytes) => {
                let record = postcard::from_bytes(&bytes)
                    .context("Failed to deserialize contract record")?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn set_status(&self, chain_id: u64, addr: Address, status: ContractStatus) -> Result<bool> {
        let mut record = match self.get_contract(chain_id, addr)? {
            Some(record) => record,
            None => return Ok(false),
        };
        if record.status != status {
            record.status = status;
            record.updated_at = now_secs();
            self.put_record(&record)?;
        }
        Ok(true)
    }

    fn list_contracts(&self, chain_id: u64) -> Result<Vec<ContractRecord>> {
        let cf = self.get_cf("contracts")?;
        let prefix = encode_contract_prefix(chain_id);

        let mut contracts = Vec::new();
        let iter = self.db.iterator_cf(
            cf,
            rocksdb::IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, value) = item.context("Failed to read iterator")?;

            // Stop once we've left this chain's key range
            if !key.starts_with(&prefix) {
                break;
            }

            let (_, addr) =
                decode_contract_key(&key).context("Failed to decode contract key")?;
            let record: ContractRecord = postcard::from_bytes(&value)
                .with_context(|| format!("Failed to deserialize contract 0x{:x}", addr))?;
            contracts.push(record);
        }

        Ok(contracts)
    }

    fn get_head(&self) -> Result<Option<u64>> {
        let cf = self.get_cf("meta")?;
        let key = encode_meta_key(META_HEAD_BLOCK);
        match self.db.get_cf(cf, &key).context("Failed to get head block")? {
            Some(bytes) => {
                let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    anyhow::anyhow!("Head block must be 8 bytes (u64), got {}", bytes.len())
                })?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    fn set_head(&self, block: u64) -> Result<()> {
        let cf = self.get_cf("meta")?;
        let key = encode_meta_key(META_HEAD_BLOCK);
        let value = block.to_be_bytes();
        self.db
            .put_cf(cf, &key, &value)
            .context("Failed to set head block")?;
        Ok(())
    }
}

/// The contract store of one chain, seen as a sync source.
#[derive(Clone)]
pub struct StoreSource {
    store: Arc<RocksContractStore>,
    chain_id: u64,
}

impl StoreSource {
    pub fn new(store: Arc<RocksContractStore>, chain_id: u64) -> Self {
        Self { store, chain_id }
    }
}

#[async_trait]
impl AddressSource for StoreSource {
    async fn fetch_addresses(&self) -> Result<Vec<Address>> {
        self.store.contract_addresses(self.chain_id)
    }
}

#[async_trait]
impl ChangeFeed for StoreSource {
    async fn watch(
        &self,
        cancel: CancellationToken,
        on_change: &(dyn Fn(Address) + Send + Sync),
    ) -> Result<()> {
        let mut changes = self.store.subscribe();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                change = changes.recv() => match change {
                    Ok(record) => {
                        if record.chain_id == self.chain_id && record.is_syncable() {
                            on_change(record.contract_address);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Change feed lagged, {} updates skipped until next sync", skipped);
                    }
                    Err(RecvError::Closed) => return Ok(()),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    const A: Address = address!("0000000000000000000000000000000000000aaa");
    const B: Address = address!("0000000000000000000000000000000000000bbb");
    const C: Address = address!("0000000000000000000000000000000000000ccc");

    fn create_test_store() -> (RocksContractStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksContractStore::open(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_contract_roundtrip() {
        let (store, _temp_dir) = create_test_store();
        let mut record = ContractRecord::new(1, A);
        record.name = "Cats".to_string();

        assert_eq!(store.upsert_contract(&record).unwrap(), UpsertOutcome::Inserted);
        let stored = store.get_contract(1, A).unwrap().unwrap();
        assert_eq!(stored.name, "Cats");
        assert!(stored.created_at > 0);
        assert_eq!(stored.created_at, stored.updated_at);

        assert_eq!(store.get_contract(2, A).unwrap(), None);
    }

    #[test]
    fn test_upsert_keeps_created_at() {
        let (store, _temp_dir) = create_test_store();
        let mut record = ContractRecord::new(1, A);
        record.created_at = 1_000;
        store.upsert_contract(&record).unwrap();

        assert_eq!(store.upsert_contract(&record).unwrap(), UpsertOutcome::Unchanged);

        record.symbol = "CAT".to_string();
        record.created_at = 0;
        assert_eq!(store.upsert_contract(&record).unwrap(), UpsertOutcome::Updated);
        let stored = store.get_contract(1, A).unwrap().unwrap();
        assert_eq!(stored.created_at, 1_000);
        assert_eq!(stored.symbol, "CAT");
    }

    #[test]
    fn test_contract_addresses_skip_deleted() {
        let (store, _temp_dir) = create_test_store();
        for addr in [A, B, C] {
            store.upsert_contract(&ContractRecord::new(1, addr)).unwrap();
        }
        store.upsert_contract(&ContractRecord::new(2, C)).unwrap();

        assert!(store.set_status(1, B, ContractStatus::Inactive).unwrap());
        assert!(store.set_status(1, C, ContractStatus::Deleted).unwrap());
        let unknown = address!("0000000000000000000000000000000000000ddd");
        assert!(!store.set_status(1, unknown, ContractStatus::Deleted).unwrap());

        assert_eq!(store.contract_addresses(1).unwrap(), vec![A, B]);
        assert_eq!(store.contract_addresses(2).unwrap(), vec![C]);
    }

    #[test]
    fn test_active_contracts_newest_first() {
        let (store, _temp_dir) = create_test_store();
        for (addr, created_at) in [(A, 10), (B, 30), (C, 20)] {
            let mut record = ContractRecord::new(1, addr);
            record.created_at = created_at;
            store.upsert_contract(&record).unwrap();
        }
        store.set_status(1, C, ContractStatus::Inactive).unwrap();

        let active: Vec<Address> = store
            .active_contracts(1)
            .unwrap()
            .into_iter()
            .map(|r| r.contract_address)
            .collect();
        assert_eq!(active, vec![B, A]);

        assert_eq!(
            store.stats(1).unwrap(),
            StoreStats {
                total_contracts: 3,
                active_contracts: 2,
            }
        );
    }

    #[test]
    fn test_head_block_set_get() {
        let (store, _temp_dir) = create_test_store();

        // Initially should be None
        assert_eq!(store.get_head().unwrap(), None);

        store.set_head(12345).unwrap();
        assert_eq!(store.get_head().unwrap(), Some(12345));

        store.set_head(67890).unwrap();
        assert_eq!(store.get_head().unwrap(), Some(67890));
    }

    #[test]
    fn test_reopen_persists() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = RocksContractStore::open(temp_dir.path()).unwrap();
            store.upsert_contract(&ContractRecord::new(1, A)).unwrap();
            store.set_head(7).unwrap();
        }
        let store = RocksContractStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.contract_addresses(1).unwrap(), vec![A]);
        assert_eq!(store.get_head().unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_store_source_fetches_chain_addresses() {
        let (store, _temp_dir) = create_test_store();
        store.upsert_contract(&ContractRecord::new(1, A)).unwrap();
        store.upsert_contract(&ContractRecord::new(5, B)).unwrap();

        let source = StoreSource::new(Arc::new(store), 1);
        assert_eq!(source.fetch_addresses().await.unwrap(), vec![A]);
    }

    #[tokio::test]
    async fn test_change_feed_delivers_writes() {
        let (store, _temp_dir) = create_test_store();
        let store = Arc::new(store);
        let source = StoreSource::new(Arc::clone(&store), 1);
        let cancel = CancellationToken::new();
        let seen = Mutex::new(Vec::new());

        let record_change = |addr: Address| seen.lock().unwrap().push(addr);
        let watch = source.watch(cancel.clone(), &record_change);

        let writer = async {
            // Let the watcher subscribe before writing
            tokio::time::sleep(Duration::from_millis(20)).await;
            store.upsert_contract(&ContractRecord::new(1, A)).unwrap();
            store.upsert_contract(&ContractRecord::new(9, B)).unwrap();
            let mut deleted = ContractRecord::new(1, C);
            deleted.status = ContractStatus::Deleted;
            store.upsert_contract(&deleted).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        };

        let (result, _) = tokio::join!(watch, writer);
        result.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![A]);
    }
}
