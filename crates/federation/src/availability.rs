//! Source availability tracking
//!
//! [`AvailabilityCache`] is read concurrently by every request; only the
//! [`SourcePoller`] writes it. The poller is the single place that calls a
//! source's live probe. Request paths look at cached status alone, and a
//! source that has never been polled counts as unavailable.

use crate::registry::{RegistryEvent, SourceBinding, SourceRegistry};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub source_id: String,
    pub available: bool,
    pub last_checked: DateTime<Utc>,
}

/// Last known availability per source id
#[derive(Debug, Default)]
pub struct AvailabilityCache {
    statuses: DashMap<String, SourceStatus>,
}

impl AvailabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// False for sources that were never polled
    pub fn is_available(&self, source_id: &str) -> bool {
        self.statuses
            .get(source_id)
            .map(|status| status.available)
            .unwrap_or(false)
    }

    pub fn status(&self, source_id: &str) -> Option<SourceStatus> {
        self.statuses.get(source_id).map(|s| s.clone())
    }

    /// Replace the entry for one source; returns the previous availability
    pub fn record(&self, source_id: &str, available: bool) -> Option<bool> {
        let status = SourceStatus {
            source_id: source_id.to_string(),
            available,
            last_checked: Utc::now(),
        };
        self.statuses
            .insert(source_id.to_string(), status)
            .map(|previous| previous.available)
    }

    pub fn remove(&self, source_id: &str) -> Option<SourceStatus> {
        self.statuses.remove(source_id).map(|(_, status)| status)
    }

    pub fn snapshot(&self) -> Vec<SourceStatus> {
        let mut statuses: Vec<SourceStatus> =
            self.statuses.iter().map(|entry| entry.value().clone()).collect();
        statuses.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        statuses
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    /// A probe slower than this counts as unavailable
    pub probe_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

type RefreshReply = oneshot::Sender<usize>;

/// Background task keeping the cache fresh
pub struct SourcePoller {
    registry: Arc<SourceRegistry>,
    cache: Arc<AvailabilityCache>,
    config: PollerConfig,
    refresh_tx: mpsc::UnboundedSender<RefreshReply>,
    refresh_rx: Mutex<Option<mpsc::UnboundedReceiver<RefreshReply>>>,
    running: AtomicBool,
}

impl SourcePoller {
    pub fn new(registry: Arc<SourceRegistry>, cache: Arc<AvailabilityCache>, config: PollerConfig) -> Self {
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        Self {
            registry,
            cache,
            config,
            refresh_tx,
            refresh_rx: Mutex::new(Some(refresh_rx)),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Poll every source now. While the background task runs the poll is
    /// executed by that task, so the cache keeps a single writer.
    pub async fn refresh(&self) -> usize {
        if self.is_running() {
            let (reply, done) = oneshot::channel();
            if self.refresh_tx.send(reply).is_ok() {
                if let Ok(available) = done.await {
                    return available;
                }
            }
            debug!("Availability poller stopped before serving a refresh; polling inline");
        }
        self.poll_once().await
    }

    pub fn cache(&self) -> &Arc<AvailabilityCache> {
        &self.cache
    }

    /// Probe every registered source concurrently and record the results.
    /// Returns the number of sources found available.
    pub async fn poll_once(&self) -> usize {
        let bindings = self.registry.all();
        let probe_timeout = self.config.probe_timeout;

        let probes = bindings.into_iter().map(|binding| {
            tokio::spawn(async move {
                let available = probe(&binding, probe_timeout).await;
                (binding.id().to_string(), available)
            })
        });

        let mut available_count = 0;
        for result in join_all(probes).await {
            match result {
                Ok((source_id, available)) => {
                    if self.apply(&source_id, available) && available {
                        available_count += 1;
                    }
                }
                Err(e) => warn!("Availability probe task failed: {}", e),
            }
        }

        debug!(
            sources_count = self.registry.len(),
            available = available_count,
            "Availability poll complete"
        );
        available_count
    }

    /// Probe one source now, e.g. right after it is bound
    pub async fn poll_source(&self, source_id: &str) -> Option<bool> {
        let binding = self.registry.get(source_id)?;
        let available = probe(&binding, self.config.probe_timeout).await;
        self.apply(source_id, available).then_some(available)
    }

    /// Record a probe result. The registration check follows the write so an
    /// unbind racing the write cannot leave an entry behind. Returns false
    /// when the source is no longer bound.
    fn apply(&self, source_id: &str, available: bool) -> bool {
        let previous = self.cache.record(source_id, available);
        if self.registry.get(source_id).is_none() {
            self.cache.remove(source_id);
            debug!("Source '{}' unbound while being probed", source_id);
            return false;
        }
        match previous {
            Some(previous) if previous != available => {
                if available {
                    info!("Source '{}' is now available", source_id);
                } else {
                    warn!("Source '{}' became unavailable", source_id);
                }
            }
            None => info!("Source '{}' first polled: available={}", source_id, available),
            _ => {}
        }
        true
    }

    /// Run until `shutdown` is cancelled. The first poll happens immediately.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut events = self.registry.subscribe();
        let mut refreshes = self.refresh_rx.lock().take();
        if refreshes.is_none() {
            warn!("Availability poller started twice; on-demand refreshes stay with the first task");
        }
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            let mut ticker = interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut events_open = true;

            info!("Availability poller started (interval {:?})", self.config.interval);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.poll_once().await;
                    }
                    Some(reply) = next_refresh(&mut refreshes) => {
                        let _ = reply.send(self.poll_once().await);
                    }
                    event = events.recv(), if events_open => match event {
                        Ok(RegistryEvent::Bound { source_id }) => {
                            self.poll_source(&source_id).await;
                        }
                        Ok(RegistryEvent::Unbound { source_id }) => {
                            self.cache.remove(&source_id);
                            debug!("Dropped availability entry for '{}'", source_id);
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Poller missed {} registry events; re-polling all sources", skipped);
                            self.reconcile();
                            self.poll_once().await;
                        }
                        Err(RecvError::Closed) => events_open = false,
                    },
                }
            }

            self.running.store(false, Ordering::SeqCst);
            info!("Availability poller stopped");
        })
    }

    /// Drop entries for sources no longer registered
    fn reconcile(&self) {
        for status in self.cache.snapshot() {
            if self.registry.get(&status.source_id).is_none() {
                self.cache.remove(&status.source_id);
            }
        }
    }
}

async fn next_refresh(refreshes: &mut Option<mpsc::UnboundedReceiver<RefreshReply>>) -> Option<RefreshReply> {
    match refreshes {
        Some(refreshes) => refreshes.recv().await,
        None => std::future::pending().await,
    }
}

async fn probe(binding: &SourceBinding, probe_timeout: Duration) -> bool {
    match timeout(probe_timeout, binding.source().is_available()).await {
        Ok(available) => available,
        Err(_) => {
            warn!(
                "Availability probe for '{}' timed out after {:?}",
                binding.id(),
                probe_timeout
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::memory::InMemoryCatalog;

    fn setup() -> (Arc<SourceRegistry>, Arc<InMemoryCatalog>, SourcePoller) {
        let registry = Arc::new(SourceRegistry::new());
        let source = Arc::new(InMemoryCatalog::new("fed-a"));
        registry
            .register(SourceBinding::federated(source.clone()))
            .unwrap();
        let poller = SourcePoller::new(
            registry.clone(),
            Arc::new(AvailabilityCache::new()),
            PollerConfig {
                interval: Duration::from_millis(20),
                probe_timeout: Duration::from_millis(50),
            },
        );
        (registry, source, poller)
    }

    #[test]
    fn test_unpolled_source_is_unavailable() {
        let cache = AvailabilityCache::new();
        assert!(!cache.is_available("never-seen"));
        assert_eq!(cache.record("a", true), None);
        assert_eq!(cache.record("a", false), Some(true));
        assert!(!cache.is_available("a"));
    }

    #[tokio::test]
    async fn test_poll_once_records_probe_results() {
        let (_registry, source, poller) = setup();

        assert_eq!(poller.poll_once().await, 1);
        assert!(poller.cache().is_available("fed-a"));

        source.set_available(false);
        assert_eq!(poller.poll_once().await, 0);
        assert!(!poller.cache().is_available("fed-a"));
        assert_eq!(source.calls.probes(), 2);
    }

    #[tokio::test]
    async fn test_slow_probe_counts_as_unavailable() {
        struct Stuck;

        #[async_trait::async_trait]
        impl catalog_core::Source for Stuck {
            fn id(&self) -> &str {
                "stuck"
            }

            async fn is_available(&self) -> bool {
                tokio::time::sleep(Duration::from_secs(5)).await;
                true
            }
        }

        #[async_trait::async_trait]
        impl catalog_core::ReadableSource for Stuck {
            async fn query(
                &self,
                _request: &catalog_core::QueryRequest,
            ) -> anyhow::Result<catalog_core::SourceResponse> {
                Ok(catalog_core::SourceResponse::default())
            }
        }

        let (registry, _source, poller) = setup();
        registry.register(SourceBinding::federated(Arc::new(Stuck))).unwrap();

        poller.poll_once().await;
        assert!(poller.cache().is_available("fed-a"));
        assert!(!poller.cache().is_available("stuck"));
    }

    #[tokio::test]
    async fn test_background_poller_follows_registry() {
        let (registry, _source, poller) = setup();
        let cache = poller.cache().clone();
        let shutdown = CancellationToken::new();
        let handle = Arc::new(poller).start(shutdown.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.is_available("fed-a"));

        registry
            .register(SourceBinding::federated(Arc::new(InMemoryCatalog::new("fed-b"))))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.is_available("fed-b"));

        registry.unregister("fed-a");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.status("fed-a").is_none());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_source_unbound_mid_probe_leaves_no_entry() {
        struct Leaving {
            registry: Arc<SourceRegistry>,
        }

        #[async_trait::async_trait]
        impl catalog_core::Source for Leaving {
            fn id(&self) -> &str {
                "leaving"
            }

            async fn is_available(&self) -> bool {
                self.registry.unregister("leaving");
                true
            }
        }

        #[async_trait::async_trait]
        impl catalog_core::ReadableSource for Leaving {
            async fn query(
                &self,
                _request: &catalog_core::QueryRequest,
            ) -> anyhow::Result<catalog_core::SourceResponse> {
                Ok(catalog_core::SourceResponse::default())
            }
        }

        let (registry, _source, poller) = setup();
        registry
            .register(SourceBinding::federated(Arc::new(Leaving { registry: registry.clone() })))
            .unwrap();

        assert_eq!(poller.poll_once().await, 1);
        assert!(poller.cache().status("leaving").is_none());
        assert!(poller.cache().is_available("fed-a"));
    }

    #[tokio::test]
    async fn test_refresh_runs_on_the_background_task() {
        let (registry, source, _) = setup();
        let poller = Arc::new(SourcePoller::new(
            registry,
            Arc::new(AvailabilityCache::new()),
            PollerConfig {
                interval: Duration::from_secs(3600),
                probe_timeout: Duration::from_millis(50),
            },
        ));
        let shutdown = CancellationToken::new();
        let handle = poller.clone().start(shutdown.clone());
        assert!(poller.is_running());

        // first tick fires immediately
        tokio::time::sleep(Duration::from_millis(20)).await;
        source.set_available(false);
        assert_eq!(poller.refresh().await, 0);
        assert!(!poller.cache().is_available("fed-a"));

        shutdown.cancel();
        handle.await.unwrap();
        assert!(!poller.is_running());

        source.set_available(true);
        assert_eq!(poller.refresh().await, 1);
    }
}
