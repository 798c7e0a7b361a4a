//! Query-then-act bulk operations
//!
//! Phase one pages through every match with a fixed page size until a page
//! comes back empty. Phase two deletes the collected ids in fixed-size
//! batches, one batch at a time. The two phases are not atomic: the report
//! states what was actually deleted.

use async_trait::async_trait;
use catalog_core::{
    CatalogError, DeleteRequest, DeleteResponse, Filter, ProcessingDetail, Query, QueryRequest, QueryResponse,
    RequestContext,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// The operations a bulk run drives, normally the framework facade itself
#[async_trait]
pub trait BatchOperations: Send + Sync {
    async fn query_page(&self, request: QueryRequest) -> Result<QueryResponse, CatalogError>;

    async fn delete_batch(&self, request: DeleteRequest) -> Result<DeleteResponse, CatalogError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// 1-based batch number
    pub batch: usize,
    pub ids: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDeleteReport {
    pub matched: usize,
    pub deleted: usize,
    /// Including the empty page that ends the scan
    pub pages_queried: usize,
    pub batches: usize,
    /// Per-destination problems reported by individual batches
    pub errors: Vec<ProcessingDetail>,
    pub failed_batches: Vec<BatchFailure>,
}

#[derive(Debug, Clone)]
pub struct BatchTransactionCoordinator {
    page_size: usize,
    batch_size: usize,
}

impl BatchTransactionCoordinator {
    pub fn new(page_size: usize, batch_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            batch_size: batch_size.max(1),
        }
    }

    pub async fn delete_matching(
        &self,
        operations: &dyn BatchOperations,
        filter: &Filter,
        context: &RequestContext,
    ) -> Result<BatchDeleteReport, CatalogError> {
        let mut report = BatchDeleteReport::default();
        let ids = self.collect_matches(operations, filter, context, &mut report).await?;
        report.matched = ids.len();

        info!(
            "Matched {} items in {} pages; deleting in batches of {}",
            ids.len(),
            report.pages_queried,
            self.batch_size
        );

        for (index, chunk) in ids.chunks(self.batch_size).enumerate() {
            let batch = index + 1;
            report.batches += 1;
            let request = DeleteRequest::new(chunk.iter().cloned()).in_context(context.clone());

            match operations.delete_batch(request).await {
                Ok(response) => {
                    debug!("Batch {} deleted {} of {} items", batch, response.deleted.len(), chunk.len());
                    report.deleted += response.deleted.len();
                    report.errors.extend(response.processing_errors);
                }
                Err(e) => {
                    warn!("Delete batch {} ({} ids) failed: {}", batch, chunk.len(), e);
                    report.failed_batches.push(BatchFailure {
                        batch,
                        ids: chunk.len(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Bulk delete finished: {} matched, {} deleted, {} failed batches",
            report.matched,
            report.deleted,
            report.failed_batches.len()
        );
        Ok(report)
    }

    async fn collect_matches(
        &self,
        operations: &dyn BatchOperations,
        filter: &Filter,
        context: &RequestContext,
        report: &mut BatchDeleteReport,
    ) -> Result<Vec<String>, CatalogError> {
        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        let mut start_index = 1;

        loop {
            let request = QueryRequest::new(Query::new(filter.clone()).page(start_index, self.page_size))
                .in_context(context.clone());
            let page = operations.query_page(request).await?;
            report.pages_queried += 1;

            if page.results.is_empty() {
                break;
            }
            start_index += page.results.len();

            for item in page.items() {
                if seen.insert(item.id.clone()) {
                    ids.push(item.id.clone());
                }
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::Item;
    use catalog_core::QueryResult;
    use parking_lot::Mutex;

    /// Serves pages over a fixed set of ids and records every call
    struct Recorder {
        ids: Vec<String>,
        pages: Mutex<Vec<(usize, usize)>>,
        batches: Mutex<Vec<usize>>,
        fail_batch: Option<usize>,
    }

    impl Recorder {
        fn with(count: usize) -> Self {
            Self {
                ids: (0..count).map(|i| format!("id-{i}")).collect(),
                pages: Mutex::new(Vec::new()),
                batches: Mutex::new(Vec::new()),
                fail_batch: None,
            }
        }
    }

    #[async_trait]
    impl BatchOperations for Recorder {
        async fn query_page(&self, request: QueryRequest) -> Result<QueryResponse, CatalogError> {
            let start = request.query.start_index;
            let size = request.query.page_size;
            self.pages.lock().push((start, size));
            let results = self
                .ids
                .iter()
                .skip(start - 1)
                .take(size)
                .map(|id| QueryResult::new(Item::with_id(id.clone())))
                .collect();
            Ok(QueryResponse {
                results,
                ..Default::default()
            })
        }

        async fn delete_batch(&self, request: DeleteRequest) -> Result<DeleteResponse, CatalogError> {
            let number = {
                let mut batches = self.batches.lock();
                batches.push(request.ids.len());
                batches.len()
            };
            if self.fail_batch == Some(number) {
                return Err(CatalogError::ingest("backend refused"));
            }
            Ok(DeleteResponse {
                deleted: request.ids.into_iter().map(Item::with_id).collect(),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_800_matches_take_three_pages_and_two_batches() {
        let recorder = Recorder::with(800);
        let report = BatchTransactionCoordinator::new(500, 500)
            .delete_matching(&recorder, &Filter::Any, &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(*recorder.pages.lock(), vec![(1, 500), (501, 500), (801, 500)]);
        assert_eq!(*recorder.batches.lock(), vec![500, 300]);
        assert_eq!(report.matched, 800);
        assert_eq!(report.deleted, 800);
        assert_eq!(report.pages_queried, 3);
        assert_eq!(report.batches, 2);
    }

    #[tokio::test]
    async fn test_no_matches_means_no_batches() {
        let recorder = Recorder::with(0);
        let report = BatchTransactionCoordinator::new(500, 500)
            .delete_matching(&recorder, &Filter::Any, &RequestContext::new())
            .await
            .unwrap();
        assert_eq!(report.pages_queried, 1);
        assert_eq!(report.batches, 0);
        assert!(recorder.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_batch_is_reported_and_later_batches_still_run() {
        let mut recorder = Recorder::with(25);
        recorder.fail_batch = Some(2);
        let report = BatchTransactionCoordinator::new(10, 10)
            .delete_matching(&recorder, &Filter::Any, &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(report.batches, 3);
        assert_eq!(report.deleted, 15);
        assert_eq!(report.failed_batches.len(), 1);
        assert_eq!(report.failed_batches[0].batch, 2);
        assert_eq!(report.failed_batches[0].ids, 10);
    }
}
