//! In-memory reference backends
//!
//! Small, composable implementations of the capability traits. The CLI binds
//! them as real sources; tests use their knobs (availability, latency,
//! failure injection, call counters) as fakes.

use crate::*;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Call counters exposed for assertions
#[derive(Debug, Default)]
pub struct CallCounters {
    pub probes: AtomicUsize,
    pub queries: AtomicUsize,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl CallCounters {
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Item store that can act as a local index, a federated source or a remote store
pub struct InMemoryCatalog {
    id: String,
    version: String,
    items: RwLock<Vec<Item>>,
    resources: RwLock<HashMap<String, Resource>>,
    available: AtomicBool,
    fail_writes: AtomicBool,
    exact_counts: AtomicBool,
    latency: Mutex<Duration>,
    security: SecurityAttributes,
    content_types: BTreeSet<String>,
    pub calls: CallCounters,
}

impl InMemoryCatalog {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: "1.0".to_string(),
            items: RwLock::new(Vec::new()),
            resources: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            exact_counts: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
            security: SecurityAttributes::new(),
            content_types: BTreeSet::new(),
            calls: CallCounters::default(),
        }
    }

    pub fn with_items(self, items: impl IntoIterator<Item = Item>) -> Self {
        self.seed(items);
        self
    }

    pub fn with_security<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.security
            .entry(key.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_types.insert(content_type.into());
        self
    }

    pub fn with_resource(self, uri: impl Into<String>, resource: Resource) -> Self {
        self.resources.write().insert(uri.into(), resource);
        self
    }

    /// Insert items directly, bypassing counters
    pub fn seed(&self, items: impl IntoIterator<Item = Item>) {
        let mut store = self.items.write();
        for mut item in items {
            if item.id.is_empty() {
                item.id = new_id();
            }
            item.source_id = Some(self.id.clone());
            store.push(item);
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_exact_counts(&self, exact: bool) {
        self.exact_counts.store(exact, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn get(&self, id: &str) -> Option<Item> {
        self.items.read().iter().find(|i| i.id == id).cloned()
    }

    pub fn items(&self) -> Vec<Item> {
        self.items.read().clone()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("source '{}' rejected the write", self.id);
        }
        Ok(())
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait::async_trait]
impl Source for InMemoryCatalog {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> &str {
        &self.version
    }

    async fn is_available(&self) -> bool {
        self.calls.probes.fetch_add(1, Ordering::SeqCst);
        self.available.load(Ordering::SeqCst)
    }

    fn security_attributes(&self) -> SecurityAttributes {
        self.security.clone()
    }

    fn content_types(&self) -> BTreeSet<String> {
        self.content_types.clone()
    }
}

#[async_trait::async_trait]
impl ReadableSource for InMemoryCatalog {
    async fn query(&self, request: &QueryRequest) -> Result<SourceResponse> {
        self.calls.queries.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let query = &request.query;
        let mut matched: Vec<Item> = self
            .items
            .read()
            .iter()
            .filter(|item| query.filter.evaluate(item))
            .cloned()
            .collect();

        if let Some(sort) = &query.sort {
            matched.sort_by(|a, b| {
                let ordering = compare_values(a.get(&sort.attribute), b.get(&sort.attribute));
                match sort.order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            });
        }

        let hits = matched.len() as u64;
        let results = matched
            .into_iter()
            .skip(query.start_index.saturating_sub(1))
            .take(query.page_size)
            .map(QueryResult::new)
            .collect();

        Ok(SourceResponse {
            results,
            hits,
            exact: self.exact_counts.load(Ordering::SeqCst),
        })
    }

    fn supports_resources(&self) -> bool {
        true
    }

    async fn retrieve_resource(
        &self,
        uri: &str,
        qualifier: Option<&str>,
        _properties: &Properties,
    ) -> Result<Option<Resource>> {
        let key = match qualifier {
            Some(q) => format!("{}#{}", uri, q),
            None => uri.to_string(),
        };
        Ok(self.resources.read().get(&key).cloned())
    }
}

#[async_trait::async_trait]
impl WritableSource for InMemoryCatalog {
    async fn create(&self, items: Vec<Item>) -> Result<Vec<Item>> {
        self.calls.creates.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;

        let mut store = self.items.write();
        let mut created = Vec::with_capacity(items.len());
        for mut item in items {
            if item.id.is_empty() {
                item.id = new_id();
            }
            if store.iter().any(|existing| existing.id == item.id) {
                anyhow::bail!("item '{}' already exists in '{}'", item.id, self.id);
            }
            item.source_id = Some(self.id.clone());
            store.push(item.clone());
            created.push(item);
        }
        Ok(created)
    }

    async fn update(&self, updates: Vec<ItemUpdate>) -> Result<Vec<Update>> {
        self.calls.updates.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;

        let mut store = self.items.write();
        let mut updated = Vec::new();
        for ItemUpdate { id, mut item } in updates {
            if let Some(slot) = store.iter_mut().find(|existing| existing.id == id) {
                item.id = id;
                item.source_id = Some(self.id.clone());
                let old = std::mem::replace(slot, item.clone());
                updated.push(Update { old, new: item });
            }
        }
        Ok(updated)
    }

    async fn delete(&self, ids: Vec<String>) -> Result<Vec<Item>> {
        self.calls.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;

        let wanted: BTreeSet<String> = ids.into_iter().collect();
        let mut store = self.items.write();
        let mut deleted = Vec::new();
        store.retain(|item| {
            if wanted.contains(&item.id) {
                deleted.push(item.clone());
                false
            } else {
                true
            }
        });
        Ok(deleted)
    }
}

/// Content store holding bytes in memory
pub struct InMemoryContentStore {
    id: String,
    content: RwLock<HashMap<String, ContentItem>>,
    available: AtomicBool,
    fail_writes: AtomicBool,
    pub calls: CallCounters,
}

impl InMemoryContentStore {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            calls: CallCounters::default(),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.content.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.read().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.content.read().contains_key(id)
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("content store '{}' rejected the write", self.id);
        }
        Ok(())
    }

    fn stamp(mut content: ContentItem) -> ContentItem {
        if content.id.is_empty() {
            content.id = new_id();
        }
        let uri = format!("{}:{}", CONTENT_SCHEME, content.id);
        content.item.set(attributes::RESOURCE_URI, uri);
        content
            .item
            .set(attributes::CONTENT_TYPE, content.mime_type.clone());
        content
    }
}

#[async_trait::async_trait]
impl Source for InMemoryContentStore {
    fn id(&self) -> &str {
        &self.id
    }

    async fn is_available(&self) -> bool {
        self.calls.probes.fetch_add(1, Ordering::SeqCst);
        self.available.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ContentStore for InMemoryContentStore {
    async fn create(&self, content: Vec<ContentItem>) -> Result<Vec<ContentItem>> {
        self.calls.creates.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;

        let stored: Vec<ContentItem> = content.into_iter().map(Self::stamp).collect();
        let mut map = self.content.write();
        for item in &stored {
            map.insert(item.id.clone(), item.clone());
        }
        Ok(stored)
    }

    async fn update(&self, content: Vec<ContentItem>) -> Result<Vec<ContentItem>> {
        self.calls.updates.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;

        let mut map = self.content.write();
        let mut stored = Vec::with_capacity(content.len());
        for mut item in content {
            // Replacement content keeps the id already recorded on the item
            if item.id.is_empty() {
                if let Some(existing) = item.item.content_id() {
                    item.id = existing.to_string();
                }
            }
            let item = Self::stamp(item);
            map.insert(item.id.clone(), item.clone());
            stored.push(item);
        }
        Ok(stored)
    }

    async fn delete(&self, ids: Vec<String>) -> Result<Vec<String>> {
        self.calls.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;

        let mut map = self.content.write();
        Ok(ids.into_iter().filter(|id| map.remove(id).is_some()).collect())
    }

    async fn read(&self, id: &str, _qualifier: Option<&str>) -> Result<Option<ContentItem>> {
        Ok(self.content.read().get(id).cloned())
    }
}
