//! Filtered log retrieval
//!
//! Wraps the outbound `eth_getLogs` call with the watched-address allow-list
//! and keeps retrieval statistics.
//!
//! An empty allow-list never narrows a query: with filtering enabled but no
//! addresses, the range is fetched unconstrained rather than returning
//! nothing.

use crate::registry::{canonical_hex, AddressRegistry};
use crate::types::Log;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, info};

/// A log retrieval request over an inclusive block range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub from_block: u64,
    pub to_block: u64,
    /// Canonical addresses to restrict the query to; `None` fetches all emitters
    pub addresses: Option<Vec<String>>,
}

/// Anything that can answer a [`LogQuery`].
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>>;
}

/// Retrieval counters, accumulated across fetches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStatistics {
    pub total_logs_received: u64,
    pub logs_after_filter: u64,
    pub blocks_processed: u64,
    pub contracts_watched: usize,
    pub filter_enabled: bool,
}

impl FilterStatistics {
    pub fn efficiency(&self) -> f64 {
        efficiency(self)
    }
}

/// Percentage of received logs dropped by the filter.
///
/// Zero when nothing was received.
pub fn efficiency(stats: &FilterStatistics) -> f64 {
    if stats.total_logs_received == 0 {
        return 0.0;
    }
    (1.0 - stats.logs_after_filter as f64 / stats.total_logs_received as f64) * 100.0
}

/// Log fetcher that applies the current allow-list.
///
/// The fetcher does not own the registry; it is handed a snapshot through
/// [`update_filter`](Self::update_filter) or [`refresh_from`](Self::refresh_from).
pub struct FilteredLogFetcher<S> {
    source: S,
    filter_enabled: bool,
    allow_list: Vec<String>,
    allowed: HashSet<Address>,
    stats: FilterStatistics,
}

impl<S: LogSource> FilteredLogFetcher<S> {
    pub fn new(source: S, filter_enabled: bool) -> Self {
        Self {
            source,
            filter_enabled,
            allow_list: Vec::new(),
            allowed: HashSet::new(),
            stats: FilterStatistics {
                filter_enabled,
                ..FilterStatistics::default()
            },
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Replace the allow-list.
    pub fn update_filter<I>(&mut self, addresses: I)
    where
        I: IntoIterator<Item = Address>,
    {
        self.allowed = addresses.into_iter().collect();
        let mut allow_list: Vec<String> = self.allowed.iter().map(canonical_hex).collect();
        allow_list.sort();
        self.allow_list = allow_list;
        self.stats.contracts_watched = self.allow_list.len();
        debug!("Updated address filter: {} addresses", self.allow_list.len());
    }

    /// Replace the allow-list with the registry's current snapshot.
    pub fn refresh_from(&mut self, registry: &AddressRegistry) {
        self.update_filter(registry.snapshot());
    }

    pub fn allow_list(&self) -> &[String] {
        &self.allow_list
    }

    /// Whether the next fetch will carry the allow-list.
    pub fn is_constrained(&self) -> bool {
        self.filter_enabled && !self.allow_list.is_empty()
    }

    pub fn stats(&self) -> FilterStatistics {
        self.stats
    }

    /// Fetch logs for `from..=to`.
    ///
    /// Errors from the source are returned with the block range attached;
    /// retrying is up to the caller.
    pub async fn fetch_logs(&mut self, from: u64, to: u64) -> Result<Vec<Log>> {
        if from > to {
            return Ok(Vec::new());
        }

        let constrained = self.is_constrained();
        let query = LogQuery {
            from_block: from,
            to_block: to,
            addresses: constrained.then(|| self.allow_list.clone()),
        };

        let logs = self
            .source
            .get_logs(&query)
            .await
            .with_context(|| format!("Failed to fetch logs for blocks {}-{}", from, to))?;
        let received = logs.len();

        // Some providers ignore the address parameter
        let logs: Vec<Log> = if constrained {
            logs.into_iter()
                .filter(|log| self.allowed.contains(&log.address))
                .collect()
        } else {
            logs
        };

        self.stats.total_logs_received += received as u64;
        self.stats.logs_after_filter += logs.len() as u64;
        self.stats.blocks_processed = self
            .stats
            .blocks_processed
            .saturating_add((to - from).saturating_add(1));

        if constrained {
            info!(
                "Fetched {} logs from {} contracts (blocks {}-{})",
                logs.len(),
                self.allow_list.len(),
                from,
                to
            );
        } else {
            info!("Fetched {} unfiltered logs (blocks {}-{})", logs.len(), from, to);
        }

        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, B256};
    use std::sync::Mutex;

    const FACTORY: Address = address!("5fbdb2315678afecb367f032d93f642f64180aa3");
    const PAYMENT: Address = address!("e7f1725e7734ce288f8367e1bb143e90bb3f0512");
    const STRANGER: Address = address!("0000000000000000000000000000000000000001");

    fn log_from(address: Address) -> Log {
        Log {
            address,
            topics: vec![B256::ZERO],
            data: Vec::new(),
            block_number: 1,
            transaction_hash: B256::ZERO,
            log_index: 0,
            removed: false,
        }
    }

    /// Records every query and answers with a fixed set of logs.
    struct RecordingSource {
        logs: Vec<Log>,
        queries: Mutex<Vec<LogQuery>>,
    }

    impl RecordingSource {
        fn new(logs: Vec<Log>) -> Self {
            Self {
                logs,
                queries: Mutex::new(Vec::new()),
            }
        }

        fn last_query(&self) -> LogQuery {
            self.queries.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl LogSource for RecordingSource {
        async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>> {
            self.queries.lock().unwrap().push(query.clone());
            Ok(self.logs.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl LogSource for FailingSource {
        async fn get_logs(&self, _query: &LogQuery) -> Result<Vec<Log>> {
            anyhow::bail!("connection reset by peer")
        }
    }

    #[test]
    fn test_efficiency() {
        let stats = FilterStatistics {
            total_logs_received: 1000,
            logs_after_filter: 100,
            ..FilterStatistics::default()
        };
        assert_eq!(efficiency(&stats), 90.0);
        assert_eq!(efficiency(&FilterStatistics::default()), 0.0);
    }

    #[tokio::test]
    async fn test_constrained_fetch_attaches_allow_list() {
        let source = RecordingSource::new(vec![log_from(FACTORY), log_from(PAYMENT)]);
        let mut fetcher = FilteredLogFetcher::new(source, true);
        fetcher.update_filter([PAYMENT, FACTORY]);

        let logs = fetcher.fetch_logs(10, 19).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(
            fetcher.source().last_query(),
            LogQuery {
                from_block: 10,
                to_block: 19,
                addresses: Some(vec![canonical_hex(&FACTORY), canonical_hex(&PAYMENT)]),
            }
        );
    }

    #[tokio::test]
    async fn test_empty_allow_list_fetches_unconstrained() {
        let source = RecordingSource::new(vec![log_from(FACTORY), log_from(STRANGER)]);
        let mut fetcher = FilteredLogFetcher::new(source, true);
        fetcher.update_filter([FACTORY, PAYMENT]);
        fetcher.update_filter(Vec::new());

        let logs = fetcher.fetch_logs(10, 19).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(fetcher.source().last_query().addresses, None);
    }

    #[tokio::test]
    async fn test_disabled_filter_fetches_unconstrained() {
        let source = RecordingSource::new(vec![log_from(STRANGER)]);
        let mut fetcher = FilteredLogFetcher::new(source, false);
        fetcher.update_filter([FACTORY, PAYMENT]);

        assert!(!fetcher.is_constrained());
        let logs = fetcher.fetch_logs(1, 1).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(fetcher.source().last_query().addresses, None);
    }

    #[tokio::test]
    async fn test_logs_outside_allow_list_dropped_and_counted() {
        let source = RecordingSource::new(vec![
            log_from(FACTORY),
            log_from(STRANGER),
            log_from(STRANGER),
            log_from(STRANGER),
        ]);
        let mut fetcher = FilteredLogFetcher::new(source, true);
        fetcher.update_filter([FACTORY, PAYMENT]);

        let logs = fetcher.fetch_logs(100, 109).await.unwrap();
        assert_eq!(logs.len(), 1);

        let stats = fetcher.stats();
        assert_eq!(stats.total_logs_received, 4);
        assert_eq!(stats.logs_after_filter, 1);
        assert_eq!(stats.blocks_processed, 10);
        assert_eq!(stats.contracts_watched, 2);
        assert!(stats.filter_enabled);
        assert_eq!(stats.efficiency(), 75.0);
    }

    #[tokio::test]
    async fn test_refresh_from_registry() {
        let registry = AddressRegistry::new(FACTORY, PAYMENT, [STRANGER], true);
        let mut fetcher = FilteredLogFetcher::new(RecordingSource::new(Vec::new()), true);
        fetcher.refresh_from(&registry);

        assert_eq!(fetcher.allow_list(), registry.filter_as_query_parameter().as_slice());
    }

    #[tokio::test]
    async fn test_error_carries_block_range() {
        let mut fetcher = FilteredLogFetcher::new(FailingSource, true);
        fetcher.update_filter([FACTORY]);

        let err = fetcher.fetch_logs(500, 599).await.unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("blocks 500-599"));
        assert!(message.contains("connection reset by peer"));
        assert_eq!(fetcher.stats().blocks_processed, 0);
    }

    #[tokio::test]
    async fn test_inverted_range_is_empty() {
        let source = RecordingSource::new(vec![log_from(FACTORY)]);
        let mut fetcher = FilteredLogFetcher::new(source, true);
        assert!(fetcher.fetch_logs(20, 10).await.unwrap().is_empty());
        assert!(fetcher.source().queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_range_block_count_saturates() {
        let mut fetcher = FilteredLogFetcher::new(RecordingSource::new(Vec::new()), true);
        fetcher.update_filter([FACTORY]);

        fetcher.fetch_logs(0, u64::MAX).await.unwrap();
        assert_eq!(fetcher.stats().blocks_processed, u64::MAX);
        fetcher.fetch_logs(0, 9).await.unwrap();
        assert_eq!(fetcher.stats().blocks_processed, u64::MAX);
    }
}
