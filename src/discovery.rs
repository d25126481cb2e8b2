//! Factory event discovery
//!
//! Watches the factory's `NFTContractCreated` logs and adds every newly
//! deployed collection contract to the [`AddressRegistry`], so the next
//! fetch already includes it.
//!
//! Topic layout of the event:
//! - topics[0] = event signature
//! - topics[1] = new contract address (indexed, left-padded to 32 bytes)
//! - topics[2] = creator (indexed, left-padded to 32 bytes)
//!
//! The data holds `(uint256 collectionId, string name, string symbol, string baseURI)`.
//!
//! Parsing is pure computation plus one registry insert; it never performs I/O.

use crate::registry::{canonical_hex, AddressRegistry};
use crate::types::Log;
use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{sol, SolEvent};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

sol! {
    /// Emitted by the factory for every collection it deploys.
    event NFTContractCreated(
        uint256 collectionId,
        address indexed contractAddress,
        address indexed creator,
        string name,
        string symbol,
        string baseURI
    );
}

/// Canonical signature of the factory's creation event.
pub const CONTRACT_CREATED_EVENT: &str = NFTContractCreated::SIGNATURE;

/// keccak256 of [`CONTRACT_CREATED_EVENT`].
pub fn contract_created_signature() -> B256 {
    NFTContractCreated::SIGNATURE_HASH
}

/// A log that carried the creation signature but could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    #[error("creation log {block_number}:{log_index} has {found} topics, expected 3")]
    MissingTopics {
        block_number: u64,
        log_index: u64,
        found: usize,
    },

    #[error("topic {slot} of creation log {block_number}:{log_index} is not an address: {word}")]
    NotAnAddress {
        slot: usize,
        word: B256,
        block_number: u64,
        log_index: u64,
    },
}

/// Collection metadata carried in the event data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionMetadata {
    pub name: String,
    pub symbol: String,
    pub base_uri: String,
}

/// A decoded `NFTContractCreated` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCreated {
    pub collection_id: U256,
    pub contract_address: Address,
    pub creator: Address,
    /// `None` when the string fields could not be decoded
    pub metadata: Option<CollectionMetadata>,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
}

/// Outcome of running the parser over a batch of logs.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Successfully decoded creation events, in log order
    pub events: Vec<ContractCreated>,
    /// Events whose contract was not yet in the registry
    pub added: usize,
    /// Creation logs rejected as malformed
    pub errors: usize,
}

impl DiscoveryReport {
    /// Number of creation events processed.
    pub fn discovered(&self) -> usize {
        self.events.len()
    }
}

/// Parser that turns factory logs into registry inserts.
pub struct DiscoveryParser {
    registry: Arc<AddressRegistry>,
    factory: Address,
    signature: B256,
}

impl DiscoveryParser {
    /// Create a parser for the registry's factory address.
    pub fn new(registry: Arc<AddressRegistry>) -> Self {
        let factory = registry.factory();
        Self {
            registry,
            factory,
            signature: contract_created_signature(),
        }
    }

    /// Check whether a log is a creation event from the factory.
    ///
    /// The emitter is checked first: a matching signature from any other
    /// contract is ignored.
    fn is_creation_event(&self, log: &Log) -> bool {
        log.address == self.factory && log.signature() == Some(&self.signature)
    }

    /// Decode one log and insert the discovered contract.
    ///
    /// Returns `Ok(None)` for logs that are not creation events from the factory.
    pub fn parse_one(&self, log: &Log) -> Result<Option<ContractCreated>, DiscoveryError> {
        Ok(self.process(log)?.map(|(event, _)| event))
    }

    fn process(&self, log: &Log) -> Result<Option<(ContractCreated, bool)>, DiscoveryError> {
        if !self.is_creation_event(log) {
            return Ok(None);
        }

        let event = decode_contract_created(log)?;
        let added = self.registry.add(event.contract_address);
        debug!(
            "Discovered contract {} (collection {}) at block {}",
            canonical_hex(&event.contract_address),
            event.collection_id,
            event.block_number
        );
        Ok(Some((event, added)))
    }

    /// Run the parser over a batch of logs.
    ///
    /// Malformed creation logs are logged and counted; they never stop the batch.
    pub fn parse_batch(&self, logs: &[Log]) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();

        for log in logs {
            match self.process(log) {
                Ok(Some((event, added))) => {
                    if added {
                        report.added += 1;
                    }
                    report.events.push(event);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Skipping malformed creation log: {}", e);
                    report.errors += 1;
                }
            }
        }

        report
    }

    /// Process a historically retrieved batch.
    ///
    /// Same pipeline as [`parse_batch`](Self::parse_batch); re-running it over
    /// already seen logs is absorbed by the registry.
    pub fn backfill(&self, logs: &[Log]) -> DiscoveryReport {
        info!("Starting discovery backfill over {} logs", logs.len());
        let report = self.parse_batch(logs);
        info!(
            "Backfill complete: {} creation events, {} new contracts, {} malformed",
            report.discovered(),
            report.added,
            report.errors
        );
        report
    }
}

/// Decode a creation log whose emitter and signature were already checked.
fn decode_contract_created(log: &Log) -> Result<ContractCreated, DiscoveryError> {
    if log.topics.len() < 3 {
        return Err(DiscoveryError::MissingTopics {
            block_number: log.block_number,
            log_index: log.log_index,
            found: log.topics.len(),
        });
    }

    let contract_address = address_from_topic(log, 1)?;
    let creator = address_from_topic(log, 2)?;
    let (collection_id, metadata) = decode_event_data(&log.data);

    Ok(ContractCreated {
        collection_id,
        contract_address,
        creator,
        metadata,
        block_number: log.block_number,
        transaction_hash: log.transaction_hash,
        log_index: log.log_index,
    })
}

/// Read an indexed address from a 32-byte topic (last 20 bytes).
///
/// The 12 leading bytes of an ABI-encoded address are always zero.
fn address_from_topic(log: &Log, slot: usize) -> Result<Address, DiscoveryError> {
    let word = log.topics[slot];
    if word[..12].iter().any(|b| *b != 0) {
        return Err(DiscoveryError::NotAnAddress {
            slot,
            word,
            block_number: log.block_number,
            log_index: log.log_index,
        });
    }
    Ok(Address::from_slice(&word[12..]))
}

/// Decode `(collectionId, name, symbol, baseURI)` from the event data.
///
/// Metadata is best-effort: when the payload does not decode, the collection
/// id is taken from the first head word (zero on short data) and `metadata`
/// is `None`.
fn decode_event_data(data: &[u8]) -> (U256, Option<CollectionMetadata>) {
    match NFTContractCreated::abi_decode_data(data) {
        Ok((collection_id, name, symbol, base_uri)) => (
            collection_id,
            Some(CollectionMetadata {
                name,
                symbol,
                base_uri,
            }),
        ),
        Err(e) => {
            debug!("Creation event data did not decode: {}", e);
            let collection_id = data
                .get(..32)
                .map(U256::from_be_slice)
                .unwrap_or(U256::ZERO);
            (collection_id, None)
        }
    }
}
