//! Fan-out / fan-in dispatch
//!
//! Every resolved source gets its own task. Tasks share a bounded pool of
//! permits, and each one runs under the operation deadline: when the
//! deadline passes the source's call is dropped, which cancels it wherever
//! the transport supports cancellation. The caller suspends at a single
//! join point until every task has finished or timed out.

use crate::config::FrameworkConfig;
use crate::registry::SourceBinding;
use crate::strategy::{FederationStrategy, PartialResult};
use anyhow::anyhow;
use catalog_core::{CatalogError, Item, ItemUpdate, ProcessingDetail, QueryRequest, QueryResponse, Update};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// One destination's outcome
struct Dispatched<T> {
    source_id: String,
    result: Result<T, String>,
    elapsed: Duration,
}

/// Per-destination results of a multi-destination write
#[derive(Debug, Clone)]
pub struct WriteOutcome<T> {
    /// Destinations that accepted the write, with what they returned, in target order
    pub committed: Vec<(String, Vec<T>)>,
    pub failures: Vec<ProcessingDetail>,
}

impl<T> WriteOutcome<T> {
    pub fn committed_ids(&self) -> Vec<String> {
        self.committed.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn is_total_failure(&self) -> bool {
        self.committed.is_empty()
    }

    pub fn into_items(self) -> Vec<T> {
        self.committed.into_iter().flat_map(|(_, items)| items).collect()
    }
}

pub struct FederationEngine {
    config: Arc<FrameworkConfig>,
    strategy: Arc<dyn FederationStrategy>,
    permits: Arc<Semaphore>,
}

impl FederationEngine {
    pub fn new(config: Arc<FrameworkConfig>, strategy: Arc<dyn FederationStrategy>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_dispatch));
        Self {
            config,
            strategy,
            permits,
        }
    }

    pub fn strategy(&self) -> &Arc<dyn FederationStrategy> {
        &self.strategy
    }

    /// Federated query as seen by callers: merged, and in fanout mode with
    /// every item attributed to the framework itself
    pub async fn federate(
        &self,
        targets: &[Arc<SourceBinding>],
        request: &QueryRequest,
    ) -> Result<QueryResponse, CatalogError> {
        let mut response = self.query(targets, request).await?;
        if self.config.fanout {
            self.mask_origins(response.results.iter_mut().map(|r| &mut r.item));
        }
        Ok(response)
    }

    /// Query every target concurrently and merge through the strategy.
    /// Fails only when every target failed.
    pub async fn query(
        &self,
        targets: &[Arc<SourceBinding>],
        request: &QueryRequest,
    ) -> Result<QueryResponse, CatalogError> {
        if targets.is_empty() {
            return Err(CatalogError::Federation("no sources to query".to_string()));
        }

        let started = Instant::now();
        let deadline = request.query.timeout.unwrap_or(self.config.default_query_timeout);
        let source_request = Arc::new(self.strategy.source_request(request, targets.len()));

        let dispatched = self
            .dispatch(targets, Some(deadline), |binding| {
                let reader = binding.reader().cloned();
                let source_request = source_request.clone();
                async move {
                    let reader = reader.ok_or_else(|| anyhow!("source '{}' is not readable", binding.id()))?;
                    reader.query(&source_request).await
                }
            })
            .await;

        let partials: Vec<PartialResult> = dispatched
            .into_iter()
            .map(|d| match d.result {
                Ok(response) => {
                    let mut results = response.results;
                    for result in &mut results {
                        result.item.source_id.get_or_insert_with(|| d.source_id.clone());
                    }
                    PartialResult::success(d.source_id, results, response.hits, response.exact)
                        .with_elapsed(d.elapsed)
                }
                Err(error) => PartialResult::failure(d.source_id, error).with_elapsed(d.elapsed),
            })
            .collect();

        if partials.iter().all(|p| !p.is_success()) {
            let reasons: Vec<String> = partials
                .iter()
                .map(|p| format!("{}: {}", p.source_id, p.error.as_deref().unwrap_or("unknown")))
                .collect();
            warn!("Every source failed the query ({})", reasons.join("; "));
            return Err(CatalogError::Federation(format!(
                "all sources failed: {}",
                reasons.join("; ")
            )));
        }

        let response = self.strategy.merge(request, partials);
        info!(
            strategy = self.strategy.name(),
            sources_count = targets.len() as u64,
            items_count = response.results.len() as u64,
            duration_ms = started.elapsed().as_millis() as u64,
            "Federated query completed"
        );
        Ok(response)
    }

    pub async fn create(&self, targets: &[Arc<SourceBinding>], items: Vec<Item>) -> WriteOutcome<Item> {
        let items = Arc::new(items);
        let dispatched = self
            .dispatch(targets, None, |binding| {
                let items = items.as_ref().clone();
                async move { writer(&binding)?.create(items).await }
            })
            .await;

        collect_writes(dispatched, "create", |item: &mut Item, source_id| {
            item.source_id.get_or_insert_with(|| source_id.to_string());
        })
    }

    pub async fn update(&self, targets: &[Arc<SourceBinding>], updates: Vec<ItemUpdate>) -> WriteOutcome<Update> {
        let updates = Arc::new(updates);
        let dispatched = self
            .dispatch(targets, None, |binding| {
                let updates = updates.as_ref().clone();
                async move { writer(&binding)?.update(updates).await }
            })
            .await;

        collect_writes(dispatched, "update", |update: &mut Update, source_id| {
            update.new.source_id.get_or_insert_with(|| source_id.to_string());
            update.old.source_id.get_or_insert_with(|| source_id.to_string());
        })
    }

    pub async fn delete(&self, targets: &[Arc<SourceBinding>], ids: Vec<String>) -> WriteOutcome<Item> {
        let ids = Arc::new(ids);
        let dispatched = self
            .dispatch(targets, None, |binding| {
                let ids = ids.as_ref().clone();
                async move { writer(&binding)?.delete(ids).await }
            })
            .await;

        collect_writes(dispatched, "delete", |item: &mut Item, source_id| {
            item.source_id.get_or_insert_with(|| source_id.to_string());
        })
    }

    /// Replace every origin with the framework id
    pub fn mask_origins<'a>(&self, items: impl Iterator<Item = &'a mut Item>) {
        for item in items {
            item.source_id = Some(self.config.id.clone());
        }
    }

    async fn dispatch<T, F, Fut>(
        &self,
        targets: &[Arc<SourceBinding>],
        deadline: Option<Duration>,
        call: F,
    ) -> Vec<Dispatched<T>>
    where
        T: Send + 'static,
        F: Fn(Arc<SourceBinding>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let mut source_ids = Vec::with_capacity(targets.len());
        let mut handles = Vec::with_capacity(targets.len());

        for binding in targets {
            let permits = self.permits.clone();
            let source_id = binding.id().to_string();
            let work = call(binding.clone());
            let task_source = source_id.clone();

            handles.push(tokio::spawn(async move {
                let started = Instant::now();
                let run = async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| anyhow!("dispatch pool closed"))?;
                    work.await
                };

                let result = match deadline {
                    Some(limit) => match timeout(limit, run).await {
                        Ok(result) => result.map_err(|e| e.to_string()),
                        Err(_) => {
                            warn!("Source '{}' missed its {:?} deadline", task_source, limit);
                            Err(format!("timed out after {:?}", limit))
                        }
                    },
                    None => run.await.map_err(|e| e.to_string()),
                };
                (result, started.elapsed())
            }));
            source_ids.push(source_id);
        }

        join_all(handles)
            .await
            .into_iter()
            .zip(source_ids)
            .map(|(joined, source_id)| match joined {
                Ok((result, elapsed)) => {
                    if let Err(error) = &result {
                        debug!("Source '{}' failed after {:?}: {}", source_id, elapsed, error);
                    }
                    Dispatched {
                        source_id,
                        result,
                        elapsed,
                    }
                }
                Err(e) => Dispatched {
                    source_id,
                    result: Err(format!("dispatch task failed: {}", e)),
                    elapsed: Duration::ZERO,
                },
            })
            .collect()
    }
}

fn writer(binding: &SourceBinding) -> anyhow::Result<Arc<dyn catalog_core::WritableSource>> {
    binding
        .writer()
        .cloned()
        .ok_or_else(|| anyhow!("source '{}' does not accept writes", binding.id()))
}

fn collect_writes<T, F>(dispatched: Vec<Dispatched<Vec<T>>>, operation: &str, mut attribute: F) -> WriteOutcome<T>
where
    F: FnMut(&mut T, &str),
{
    let mut outcome = WriteOutcome {
        committed: Vec::new(),
        failures: Vec::new(),
    };

    for d in dispatched {
        match d.result {
            Ok(mut items) => {
                for item in &mut items {
                    attribute(item, &d.source_id);
                }
                debug!("{} of {} items committed to '{}'", operation, items.len(), d.source_id);
                outcome.committed.push((d.source_id, items));
            }
            Err(error) => {
                warn!("{} failed on '{}': {}", operation, d.source_id, error);
                outcome.failures.push(ProcessingDetail::new(d.source_id, error));
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::SortedFederationStrategy;
    use catalog_core::memory::InMemoryCatalog;
    use catalog_core::{Filter, HitCount, Query};

    fn engine(config: FrameworkConfig) -> FederationEngine {
        FederationEngine::new(Arc::new(config), Arc::new(SortedFederationStrategy::default()))
    }

    fn federated(id: &str, items: usize) -> (Arc<InMemoryCatalog>, Arc<SourceBinding>) {
        let source = Arc::new(
            InMemoryCatalog::new(id).with_items((0..items).map(|i| Item::new().with_title(format!("{id}-{i}")))),
        );
        (source.clone(), Arc::new(SourceBinding::federated(source)))
    }

    #[tokio::test]
    async fn test_query_merges_all_sources() {
        let (_, a) = federated("a", 3);
        let (_, b) = federated("b", 2);
        let response = engine(FrameworkConfig::default())
            .query(&[a, b], &QueryRequest::new(Query::new(Filter::Any)))
            .await
            .unwrap();

        assert_eq!(response.results.len(), 5);
        assert_eq!(response.hits, HitCount::estimated(5));
        assert!(response.items().all(|i| i.source_id.is_some()));
    }

    #[tokio::test]
    async fn test_exact_count_is_summed_when_requested() {
        let (_, a) = federated("a", 3);
        let (_, b) = federated("b", 2);
        let response = engine(FrameworkConfig::default())
            .query(&[a, b], &QueryRequest::new(Query::new(Filter::Any).exact_count()))
            .await
            .unwrap();

        assert_eq!(response.hits, HitCount::exact(5));
    }

    #[tokio::test]
    async fn test_slow_source_times_out_without_failing_the_query() {
        let (_, fast) = federated("fast", 2);
        let (slow_source, slow) = federated("slow", 2);
        slow_source.set_latency(Duration::from_secs(5));

        let request = QueryRequest::new(Query::new(Filter::Any).with_timeout(Duration::from_millis(50)));
        let started = Instant::now();
        let response = engine(FrameworkConfig::default()).query(&[fast, slow], &request).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.processing_details.len(), 1);
        assert_eq!(response.processing_details[0].source_id, "slow");
        assert!(!response.hits.exact);
    }

    #[tokio::test]
    async fn test_query_fails_when_every_source_fails() {
        let (slow_source, slow) = federated("slow", 1);
        slow_source.set_latency(Duration::from_secs(5));
        let request = QueryRequest::new(Query::new(Filter::Any).with_timeout(Duration::from_millis(20)));

        let err = engine(FrameworkConfig::default()).query(&[slow], &request).await.unwrap_err();
        assert!(matches!(err, CatalogError::Federation(_)));
    }

    #[tokio::test]
    async fn test_fanout_masks_origins() {
        let (_, a) = federated("a", 1);
        let (_, b) = federated("b", 1);
        let config = FrameworkConfig {
            id: "facade".to_string(),
            fanout: true,
            ..FrameworkConfig::default()
        };
        let response = engine(config)
            .federate(&[a, b], &QueryRequest::new(Query::new(Filter::Any)))
            .await
            .unwrap();
        assert!(response.items().all(|i| i.source_id.as_deref() == Some("facade")));
    }

    #[tokio::test]
    async fn test_write_failure_does_not_roll_back_other_destinations() {
        let good = Arc::new(InMemoryCatalog::new("good"));
        let bad = Arc::new(InMemoryCatalog::new("bad"));
        bad.set_fail_writes(true);
        let targets = vec![
            Arc::new(SourceBinding::remote_store(good.clone())),
            Arc::new(SourceBinding::remote_store(bad.clone())),
        ];

        let outcome = engine(FrameworkConfig::default())
            .create(&targets, vec![Item::new(), Item::new()])
            .await;

        assert_eq!(outcome.committed_ids(), vec!["good"]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].source_id, "bad");
        assert_eq!(good.len(), 2);
        assert!(bad.is_empty());
    }

    #[tokio::test]
    async fn test_pool_bounds_concurrency() {
        let config = FrameworkConfig {
            max_concurrent_dispatch: 1,
            ..FrameworkConfig::default()
        };
        let sources: Vec<_> = (0..3)
            .map(|i| {
                let (source, binding) = federated(&format!("s{i}"), 1);
                source.set_latency(Duration::from_millis(30));
                binding
            })
            .collect();

        let started = Instant::now();
        let response = engine(config)
            .query(&sources, &QueryRequest::new(Query::new(Filter::Any)))
            .await
            .unwrap();
        assert_eq!(response.results.len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(90));
    }
}
