//! Store synchronization
//!
//! Merges the authoritative contract list into the [`AddressRegistry`]:
//! once at startup, then on a fixed interval. Sync is add-only; contracts
//! the store later marks deleted stay watched until restart.
//!
//! A [`ChangeFeed`] can push changes between ticks. It goes through the same
//! idempotent insert, so polling and the feed always agree.

use crate::config::SyncSettings;
use crate::registry::{canonical_hex, AddressRegistry};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Authoritative list of collection contracts.
#[async_trait]
pub trait AddressSource: Send + Sync {
    /// Every address the source currently considers a valid member.
    async fn fetch_addresses(&self) -> Result<Vec<Address>>;
}

/// Push-based notification of contracts added or updated in the source.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Invoke `on_change` for each changed, non-deleted contract until
    /// `cancel` fires or the feed ends.
    async fn watch(
        &self,
        cancel: CancellationToken,
        on_change: &(dyn Fn(Address) + Send + Sync),
    ) -> Result<()>;
}

/// Periodic sync of the registry against an [`AddressSource`].
pub struct ExternalSync {
    registry: Arc<AddressRegistry>,
    enabled: bool,
    interval: Duration,
}

impl ExternalSync {
    pub fn new(registry: Arc<AddressRegistry>, settings: SyncSettings) -> Self {
        Self {
            registry,
            enabled: settings.enabled,
            interval: settings.interval,
        }
    }

    /// Fetch the source's list once and merge it.
    ///
    /// Returns the number of contracts that were not yet watched.
    pub async fn sync_once(&self, source: &dyn AddressSource) -> Result<usize> {
        let addresses = source
            .fetch_addresses()
            .await
            .context("Failed to fetch contract addresses from store")?;

        if addresses.is_empty() {
            debug!("Store returned no contracts");
            return Ok(0);
        }

        let fetched = addresses.len();
        let added = self.registry.add_batch(addresses);
        info!("Synced {} contracts from store ({} new)", fetched, added);
        Ok(added)
    }

    /// Sync immediately, then every interval until `cancel` fires.
    ///
    /// Failures are logged and retried on the next tick. An in-flight sync
    /// always completes; no sync starts after cancellation. Returns the number
    /// of sync attempts made, zero when sync is disabled.
    pub async fn run_loop(&self, cancel: CancellationToken, source: &dyn AddressSource) -> usize {
        if !self.enabled {
            info!("Store sync is disabled");
            return 0;
        }

        info!("Starting store sync (interval: {:?})", self.interval);
        let mut attempts = 0;

        while !cancel.is_cancelled() {
            attempts += 1;
            if let Err(e) = self.sync_once(source).await {
                warn!("Store sync failed: {:#}", e);
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Store sync stopped after {} attempts", attempts);
        attempts
    }

    /// Forward a change feed into the registry until `cancel` fires.
    pub async fn run_watch(&self, cancel: CancellationToken, feed: &dyn ChangeFeed) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        info!("Watching store for contract changes");
        let registry = Arc::clone(&self.registry);
        let on_change = move |addr: Address| {
            if registry.add(addr) {
                debug!("Change feed added {}", canonical_hex(&addr));
            }
        };
        feed.watch(cancel, &on_change)
            .await
            .context("Store change feed failed")?;
        info!("Store change feed stopped");
        Ok(())
    }
}
