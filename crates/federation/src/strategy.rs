//! Federation strategies: how a query is shaped per source and how the
//! per-source partial results are merged back into one response.

use catalog_core::{
    compare_values, HitCount, ProcessingDetail, QueryRequest, QueryResponse, QueryResult, SortBy, SortOrder,
};
use std::cmp::Ordering;
use std::time::Duration;

/// What one source produced during a federated dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct PartialResult {
    pub source_id: String,
    pub results: Vec<QueryResult>,
    pub hits: u64,
    pub exact: bool,
    /// Set when the source failed or missed its deadline; `results` is then empty
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl PartialResult {
    pub fn success(source_id: impl Into<String>, results: Vec<QueryResult>, hits: u64, exact: bool) -> Self {
        Self {
            source_id: source_id.into(),
            results,
            hits,
            exact,
            error: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn failure(source_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            results: Vec::new(),
            hits: 0,
            exact: false,
            error: Some(error.into()),
            elapsed: Duration::ZERO,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

pub trait FederationStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// The query each of `source_count` sources receives
    fn source_request(&self, request: &QueryRequest, source_count: usize) -> QueryRequest;

    /// Combine partial results. Arrival order must not matter beyond the
    /// order the engine hands them over in (resolution order).
    fn merge(&self, request: &QueryRequest, partials: Vec<PartialResult>) -> QueryResponse;
}

/// Concatenate, stable-sort by the requested key, window to the requested page.
///
/// With offset handling and more than one source, every source is asked for
/// results `1..=start+size-1` so the merged set can be windowed to the
/// caller's page. A single source gets the query untouched and its page is
/// passed through.
#[derive(Debug, Clone)]
pub struct SortedFederationStrategy {
    offset_handling: bool,
}

impl SortedFederationStrategy {
    pub fn new(offset_handling: bool) -> Self {
        Self { offset_handling }
    }

    fn windowed(&self, source_count: usize) -> bool {
        self.offset_handling && source_count > 1
    }
}

impl Default for SortedFederationStrategy {
    fn default() -> Self {
        Self::new(true)
    }
}

impl FederationStrategy for SortedFederationStrategy {
    fn name(&self) -> &str {
        "sorted"
    }

    fn source_request(&self, request: &QueryRequest, source_count: usize) -> QueryRequest {
        let mut source_request = request.clone();
        if self.windowed(source_count) {
            let query = &mut source_request.query;
            query.page_size = query.start_index.saturating_sub(1).saturating_add(query.page_size);
            query.start_index = 1;
        }
        source_request
    }

    fn merge(&self, request: &QueryRequest, partials: Vec<PartialResult>) -> QueryResponse {
        let source_count = partials.len();
        let query = &request.query;

        let mut results = Vec::new();
        let mut processing_details = Vec::new();
        let mut total = 0u64;
        let mut exact = true;

        for partial in partials {
            match partial.error {
                Some(error) => {
                    exact = false;
                    processing_details.push(ProcessingDetail::new(partial.source_id, error));
                }
                None => {
                    total += partial.hits;
                    exact &= partial.exact;
                    results.extend(partial.results);
                }
            }
        }

        if let Some(sort) = &query.sort {
            sort_results(&mut results, sort);
        }

        let results = if self.windowed(source_count) {
            results
                .into_iter()
                .skip(query.start_index.saturating_sub(1))
                .take(query.page_size)
                .collect()
        } else if source_count > 1 {
            results.into_iter().take(query.page_size).collect()
        } else {
            results
        };

        // A sum across sources is only exact when the caller asked for it
        let hits = if exact && (query.requires_exact_count || source_count == 1) {
            HitCount::exact(total)
        } else {
            if query.requires_exact_count {
                processing_details.push(ProcessingDetail::new(
                    "federation",
                    "exact hit count requested but not every source reported one",
                ));
            }
            HitCount::estimated(total)
        };

        QueryResponse {
            results,
            hits,
            properties: Default::default(),
            processing_details,
        }
    }
}

/// Stable sort by relevance, distance or an attribute; absent keys sort last
pub fn sort_results(results: &mut [QueryResult], sort: &SortBy) {
    let compare = |a: &QueryResult, b: &QueryResult| -> Ordering {
        match sort.attribute.as_str() {
            SortBy::RELEVANCE => compare_scores(a.relevance, b.relevance, sort.order),
            SortBy::DISTANCE => compare_scores(a.distance, b.distance, sort.order),
            attribute => {
                let ordering = compare_values(a.item.get(attribute), b.item.get(attribute));
                let both_present = a.item.has(attribute) && b.item.has(attribute);
                match sort.order {
                    SortOrder::Descending if both_present => ordering.reverse(),
                    _ => ordering,
                }
            }
        }
    };
    results.sort_by(compare);
}

fn compare_scores(a: Option<f64>, b: Option<f64>, order: SortOrder) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => {
            let ordering = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
            match order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            }
        }
    }
}
