//! Main indexing loop
//!
//! Orchestrates polling the chain tip, fetching logs through the address
//! filter, discovering new collection contracts, and persisting them to the
//! contract store.

use crate::config::Config;
use crate::discovery::{ContractCreated, DiscoveryParser, DiscoveryReport};
use crate::filter::{FilteredLogFetcher, LogSource};
use crate::records::ContractRecord;
use crate::registry::{canonical_hex, AddressRegistry};
use crate::store::{ContractStore, RocksContractStore, StoreSource};
use crate::sync::ExternalSync;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Source of the current chain height.
#[async_trait]
pub trait ChainTip: Send + Sync {
    async fn latest_block(&self) -> Result<u64>;
}

/// Totals for one processed block range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeSummary {
    pub logs: usize,
    pub discovered: usize,
    pub added: usize,
    pub persisted: usize,
    pub malformed: usize,
}

impl RangeSummary {
    fn absorb(&mut self, logs: usize, report: &DiscoveryReport, persisted: usize) {
        self.logs += logs;
        self.discovered += report.discovered();
        self.added += report.added;
        self.persisted += persisted;
        self.malformed += report.errors;
    }
}

/// Indexer driver over a chain connection `S`.
pub struct Watcher<S> {
    config: Config,
    registry: Arc<AddressRegistry>,
    store: Arc<RocksContractStore>,
    fetcher: FilteredLogFetcher<S>,
    parser: DiscoveryParser,
    next_block: u64,
}

impl<S: LogSource + ChainTip> Watcher<S> {
    /// Create a new watcher.
    pub fn new(
        config: Config,
        registry: Arc<AddressRegistry>,
        store: Arc<RocksContractStore>,
        chain: S,
    ) -> Self {
        let fetcher = FilteredLogFetcher::new(chain, config.filtering_enabled);
        let parser = DiscoveryParser::new(Arc::clone(&registry));
        Self {
            config,
            registry,
            store,
            fetcher,
            parser,
            next_block: 0,
        }
    }

    pub fn registry(&self) -> &Arc<AddressRegistry> {
        &self.registry
    }

    pub fn fetcher(&self) -> &FilteredLogFetcher<S> {
        &self.fetcher
    }

    /// Next block the watcher will fetch.
    pub fn next_block(&self) -> u64 {
        self.next_block
    }

    /// Initialize the watcher.
    ///
    /// Merges the contract store into the registry before anything is
    /// fetched, then picks the starting block: the block after the stored
    /// head, else the configured start block, else the current chain tip.
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing watcher on {} (chain {})", self.config.network, self.config.chain_id);

        let source = StoreSource::new(Arc::clone(&self.store), self.config.chain_id);
        let sync = ExternalSync::new(Arc::clone(&self.registry), self.config.sync);
        let added = sync
            .sync_once(&source)
            .await
            .context("Initial store sync failed")?;

        self.next_block = match self.store.get_head().context("Failed to get head")? {
            Some(head) => {
                info!("Resuming from stored head {}", head);
                head + 1
            }
            None => match self.config.indexer.start_block {
                Some(start) => {
                    info!("First run, starting at configured block {}", start);
                    start
                }
                None => {
                    let tip = self
                        .fetcher
                        .source()
                        .latest_block()
                        .await
                        .context("Failed to get latest block number")?;
                    info!("First run, starting at chain tip {}", tip);
                    tip
                }
            },
        };

        let stats = self.registry.stats();
        info!(
            "Watching {} contracts ({} from store, filtering {}, discovery {})",
            stats.total_watched,
            added,
            if stats.enabled { "on" } else { "off" },
            if stats.auto_discovery { "on" } else { "off" },
        );
        Ok(())
    }

    /// Process `from..=to` in chunks of at most `maxBlockRange` blocks.
    ///
    /// The head is advanced after each chunk, so a failure resumes at the
    /// first unprocessed chunk.
    pub async fn process_block_range(&mut self, from: u64, to: u64) -> Result<RangeSummary> {
        self.process_chunks(from, to, false).await
    }

    /// Re-scan a historical range for creation events.
    ///
    /// Already known contracts are absorbed by the registry and the store;
    /// the stored head is not moved backwards.
    pub async fn backfill(&mut self, from: u64, to: u64) -> Result<RangeSummary> {
        info!("Backfilling blocks {} to {}", from, to);
        self.process_chunks(from, to, true).await
    }

    async fn process_chunks(
        &mut self,
        from: u64,
        to: u64,
        historical: bool,
    ) -> Result<RangeSummary> {
        let mut summary = RangeSummary::default();
        if from > to {
            return Ok(summary); // Nothing to process
        }

        let max_range = self.config.indexer.max_block_range.max(1);
        let mut start = from;

        while start <= to {
            let end = to.min(start.saturating_add(max_range - 1));

            // Pick up contracts added by sync or earlier chunks
            self.fetcher.refresh_from(&self.registry);
            let logs = self.fetcher.fetch_logs(start, end).await?;

            let report = if !self.config.auto_discovery {
                DiscoveryReport::default()
            } else if historical {
                self.parser.backfill(&logs)
            } else {
                self.parser.parse_batch(&logs)
            };
            let persisted = self.persist(&report.events).with_context(|| {
                format!("Failed to persist contracts from blocks {}-{}", start, end)
            })?;
            summary.absorb(logs.len(), &report, persisted);

            if !historical {
                self.store
                    .set_head(end)
                    .context("Failed to update head block")?;
                self.next_block = end + 1;
            }

            let stats = self.fetcher.stats();
            info!(
                "Completed blocks {}-{}: {} logs, {} new contracts, filter efficiency {:.1}%",
                start,
                end,
                logs.len(),
                report.added,
                stats.efficiency()
            );

            if end == u64::MAX {
                break;
            }
            start = end + 1;
        }

        Ok(summary)
    }

    /// Store discovered contracts that the store does not know yet.
    ///
    /// Existing records are left alone so an operator's status change is
    /// never overwritten by a replayed event.
    fn persist(&self, events: &[ContractCreated]) -> Result<usize> {
        let mut persisted = 0;
        for event in events {
            let chain_id = self.config.chain_id;
            if self.store.get_contract(chain_id, event.contract_address)?.is_some() {
                continue;
            }
            let record = ContractRecord::from_event(event, chain_id, &self.config.network);
            self.store.upsert_contract(&record)?;
            debug!("Persisted contract {}", canonical_hex(&event.contract_address));
            persisted += 1;
        }
        Ok(persisted)
    }

    /// Check the chain tip once and process any new blocks.
    pub async fn poll_once(&mut self) -> Result<RangeSummary> {
        let latest = self
            .fetcher
            .source()
            .latest_block()
            .await
            .context("Failed to get latest block number")?;

        if self.next_block > latest {
            debug!("Up to date. Next block: {}, Latest: {}", self.next_block, latest);
            return Ok(RangeSummary::default());
        }

        info!("New blocks available: next={}, latest={}", self.next_block, latest);
        self.process_block_range(self.next_block, latest)
            .await
            .context("Failed to process block range")
    }

    /// Run the main watcher loop until `cancel` fires.
    ///
    /// Poll failures are logged and retried on the next tick.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            "Starting watcher loop (poll interval: {:?})",
            self.config.indexer.poll_interval
        );

        while !cancel.is_cancelled() {
            if let Err(e) = self.poll_once().await {
                warn!("Poll failed: {:#}", e);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.indexer.poll_interval) => {}
            }
        }

        let stats = self.fetcher.stats();
        info!(
            "Watcher stopped: {} blocks, {} logs received, {} kept ({:.1}% filtered)",
            stats.blocks_processed,
            stats.total_logs_received,
            stats.logs_after_filter,
            stats.efficiency()
        );
    }
}
