//! The catalog framework facade
//!
//! Every operation follows the same path:
//! request -> pipeline (pre) -> destination resolution -> engine dispatch ->
//! pipeline (post) -> notifications -> response.
//!
//! Writes resolve their destinations before any plugin runs, so a write to
//! an unavailable local index fails without side effects.

use crate::availability::{AvailabilityCache, PollerConfig, SourcePoller};
use crate::batch::{BatchDeleteReport, BatchOperations, BatchTransactionCoordinator};
use crate::config::FrameworkConfig;
use crate::engine::FederationEngine;
use crate::hooks::{apply_defaults, apply_injection};
use crate::notifier::EventNotifier;
use crate::pipeline::{PluginChain, RequestPipeline};
use crate::registry::{SourceBinding, SourceRegistry};
use crate::resolver::{DestinationResolver, WriteTargets};
use crate::strategy::{FederationStrategy, SortedFederationStrategy};
use async_trait::async_trait;
use catalog_core::{
    attributes, properties, AttributeInjector, Capability, CatalogError, CatalogResult, ContentItem, CreateRequest,
    CreateResponse, DefaultAttributeValues, DeleteByFilterRequest, DeleteRequest, DeleteResponse, DeliveryConfig,
    EventBus, Filter, Item, ItemUpdate, OperationKind, PluginStage, ProcessingDetail, Query, QueryRequest,
    QueryResponse, Request, Resource, ResourceRequest, ResourceResponse, ResourceTarget, SourceDescriptor,
    SourceInfoRequest, SourceInfoResponse, UpdateRequest, UpdateResponse, Uuid, VersioningHook, CONTENT_SCHEME,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct CatalogFramework {
    config: Arc<FrameworkConfig>,
    registry: Arc<SourceRegistry>,
    availability: Arc<AvailabilityCache>,
    poller: Arc<SourcePoller>,
    resolver: DestinationResolver,
    pipeline: RequestPipeline,
    engine: FederationEngine,
    notifier: EventNotifier,
    batch: BatchTransactionCoordinator,
    injectors: Vec<Arc<dyn AttributeInjector>>,
    defaults: Vec<Arc<dyn DefaultAttributeValues>>,
    versioning: Vec<Arc<dyn VersioningHook>>,
    shutdown: CancellationToken,
    poller_task: Mutex<Option<JoinHandle<()>>>,
}

pub struct CatalogFrameworkBuilder {
    config: FrameworkConfig,
    registry: Option<Arc<SourceRegistry>>,
    sources: Vec<SourceBinding>,
    plugins: PluginChain,
    strategy: Option<Arc<dyn FederationStrategy>>,
    injectors: Vec<Arc<dyn AttributeInjector>>,
    defaults: Vec<Arc<dyn DefaultAttributeValues>>,
    versioning: Vec<Arc<dyn VersioningHook>>,
    bus: Option<Arc<EventBus>>,
}

impl CatalogFrameworkBuilder {
    pub fn new(config: FrameworkConfig) -> Self {
        Self {
            config,
            registry: None,
            sources: Vec::new(),
            plugins: PluginChain::default(),
            strategy: None,
            injectors: Vec::new(),
            defaults: Vec::new(),
            versioning: Vec::new(),
            bus: None,
        }
    }

    /// Share an existing registry instead of creating one
    pub fn registry(mut self, registry: Arc<SourceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn source(mut self, binding: SourceBinding) -> Self {
        self.sources.push(binding);
        self
    }

    pub fn plugins(mut self, plugins: PluginChain) -> Self {
        self.plugins = plugins;
        self
    }

    pub fn strategy(mut self, strategy: Arc<dyn FederationStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn injector(mut self, injector: Arc<dyn AttributeInjector>) -> Self {
        self.injectors.push(injector);
        self
    }

    pub fn defaults(mut self, defaults: Arc<dyn DefaultAttributeValues>) -> Self {
        self.defaults.push(defaults);
        self
    }

    pub fn versioning_hook(mut self, hook: Arc<dyn VersioningHook>) -> Self {
        self.versioning.push(hook);
        self
    }

    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn build(self) -> Result<CatalogFramework, CatalogError> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let registry = self.registry.unwrap_or_default();
        for binding in self.sources {
            registry.register(binding)?;
        }

        let availability = Arc::new(AvailabilityCache::new());
        let poller = Arc::new(SourcePoller::new(
            registry.clone(),
            availability.clone(),
            PollerConfig {
                interval: config.poll_interval,
                probe_timeout: config.probe_timeout,
            },
        ));

        let strategy = self
            .strategy
            .unwrap_or_else(|| Arc::new(SortedFederationStrategy::new(config.offset_handling)));
        let bus = self.bus.unwrap_or_else(|| {
            Arc::new(EventBus::new(DeliveryConfig {
                handler_timeout_ms: config.notification_timeout.as_millis() as u64,
                ..DeliveryConfig::default()
            }))
        });

        info!(
            "Catalog framework '{}' built: {} sources, {} plugins, strategy '{}'",
            config.id,
            registry.len(),
            self.plugins.len(),
            strategy.name()
        );

        Ok(CatalogFramework {
            resolver: DestinationResolver::new(registry.clone(), availability.clone()),
            pipeline: RequestPipeline::new(self.plugins),
            engine: FederationEngine::new(config.clone(), strategy),
            notifier: EventNotifier::new(bus, config.id.clone()),
            batch: BatchTransactionCoordinator::new(config.query_page_size, config.delete_batch_size),
            injectors: self.injectors,
            defaults: self.defaults,
            versioning: self.versioning,
            shutdown: CancellationToken::new(),
            poller_task: Mutex::new(None),
            config,
            registry,
            availability,
            poller,
        })
    }
}

impl CatalogFramework {
    pub fn builder(config: FrameworkConfig) -> CatalogFrameworkBuilder {
        CatalogFrameworkBuilder::new(config)
    }

    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn availability(&self) -> &Arc<AvailabilityCache> {
        &self.availability
    }

    pub fn events(&self) -> &Arc<EventBus> {
        self.notifier.bus()
    }

    pub fn bind(&self, binding: SourceBinding) -> Result<(), CatalogError> {
        self.registry.register(binding)
    }

    pub fn unbind(&self, source_id: &str) -> bool {
        self.registry.unregister(source_id).is_some()
    }

    /// Start the background availability poller. Idempotent.
    pub fn start(&self) {
        let mut task = self.poller_task.lock();
        if task.is_none() {
            *task = Some(self.poller.clone().start(self.shutdown.child_token()));
        }
    }

    /// Run one poll cycle now. Once started, the background poller runs it.
    pub async fn refresh_availability(&self) -> usize {
        self.poller.refresh().await
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let task = self.poller_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Availability poller ended abnormally: {}", e);
            }
        }
        self.notifier.bus().shutdown().await;
        info!("Catalog framework '{}' shut down", self.config.id);
    }

    pub async fn create(&self, request: CreateRequest) -> CatalogResult<CreateResponse> {
        let started = Instant::now();
        if request.items.is_empty() && request.content.is_empty() {
            return Err(CatalogError::ingest("nothing to create"));
        }

        let targets = self.resolver.resolve_write(&request.context, request.is_content_bearing())?;
        self.reject_fanout_local_write(&targets, OperationKind::Create)?;

        let mut request = request;
        let now = Utc::now();
        for item in request
            .items
            .iter_mut()
            .chain(request.content.iter_mut().map(|c| &mut c.item))
        {
            self.prepare_new(item, now);
        }

        let Request::Create(request) = self.pipeline.pre(Request::Create(request)).await? else {
            return Err(kind_changed(OperationKind::Create));
        };
        if request.items.is_empty() && request.content.is_empty() {
            return Err(CatalogError::ingest("every item was refused by access control"));
        }

        let context = request.context;
        let mut items = request.items;
        let mut committed_content = Vec::new();
        if let Some(binding) = &targets.content {
            let stored = self.write_content(binding, request.content, false).await?;
            committed_content.push(binding.id().to_string());
            items.extend(stored.into_iter().map(|c| c.item));
        }

        let outcome = self.engine.create(&targets.stores, items).await;
        if outcome.is_total_failure() {
            return Err(CatalogError::Ingest {
                message: "create failed on every destination".to_string(),
                committed: committed_content,
                failures: outcome.failures,
            });
        }

        let processing_errors = outcome.failures.clone();
        let created = outcome
            .into_items()
            .into_iter()
            .map(|item| apply_injection(item, &self.injectors))
            .collect();
        let response = CreateResponse {
            created,
            properties: context.properties.clone(),
            processing_errors,
        };
        let response = self.pipeline.post_create(response, &context).await?;

        if let Some(local) = self.local_target(&targets) {
            self.notifier.created(&local, &response.created).await;
        }

        info!(
            items_count = response.created.len() as u64,
            duration_ms = started.elapsed().as_millis() as u64,
            "Create completed on {:?}",
            targets.ids()
        );
        Ok(response)
    }

    pub async fn update(&self, request: UpdateRequest) -> CatalogResult<UpdateResponse> {
        let started = Instant::now();
        if request.updates.is_empty() && request.content.is_empty() {
            return Err(CatalogError::ingest("nothing to update"));
        }
        if request.content.iter().any(|c| c.item.id.is_empty()) {
            return Err(CatalogError::ingest("content update does not name an item"));
        }

        let targets = self.resolver.resolve_write(&request.context, request.is_content_bearing())?;
        self.reject_fanout_local_write(&targets, OperationKind::Update)?;

        let mut request = request;
        let now = Utc::now().to_rfc3339();
        for update in &mut request.updates {
            let mut item = apply_defaults(std::mem::take(&mut update.item), &self.defaults);
            item.id = update.id.clone();
            item.set(attributes::MODIFIED, now.clone());
            update.item = item;
        }
        for content in &mut request.content {
            let mut item = apply_defaults(std::mem::take(&mut content.item), &self.defaults);
            item.set(attributes::MODIFIED, now.clone());
            content.item = item;
        }

        let Request::Update(request) = self.pipeline.pre(Request::Update(request)).await? else {
            return Err(kind_changed(OperationKind::Update));
        };
        if request.updates.is_empty() && request.content.is_empty() {
            return Err(CatalogError::ingest("every update was refused by access control"));
        }

        let existing = if self.versioning.is_empty() && request.content.is_empty() {
            HashMap::new()
        } else {
            self.fetch_existing(&targets.stores, &request.target_ids()).await
        };

        let mut updates = request.updates;
        for hook in &self.versioning {
            for pending in updates.iter().map(|u| &u.item).chain(request.content.iter().map(|c| &c.item)) {
                if let Some(old) = existing.get(&pending.id) {
                    hook.before_update(old, pending).await.map_err(|e| {
                        warn!("Versioning hook '{}' refused update of '{}': {}", hook.name(), pending.id, e);
                        CatalogError::ingest(format!("versioning hook '{}' refused update of '{}': {}", hook.name(), pending.id, e))
                    })?;
                }
            }
        }

        let context = request.context;
        let mut committed_content = Vec::new();
        if let Some(binding) = &targets.content {
            let mut content = request.content;
            for c in &mut content {
                if c.id.is_empty() && c.item.content_id().is_none() {
                    if let Some(old_id) = existing.get(&c.item.id).and_then(|old| old.content_id()) {
                        c.id = old_id.to_string();
                    }
                }
            }
            let stored = self.write_content(binding, content, true).await?;
            committed_content.push(binding.id().to_string());
            updates.extend(stored.into_iter().map(|c| ItemUpdate {
                id: c.item.id.clone(),
                item: c.item,
            }));
        }

        let outcome = self.engine.update(&targets.stores, updates).await;
        if outcome.is_total_failure() {
            return Err(CatalogError::Ingest {
                message: "update failed on every destination".to_string(),
                committed: committed_content,
                failures: outcome.failures,
            });
        }

        let mut processing_errors = outcome.failures.clone();
        let updated = outcome.into_items();
        for hook in &self.versioning {
            for update in &updated {
                if let Err(e) = hook.after_update(&update.old, &update.new).await {
                    warn!("Versioning hook '{}' failed after update of '{}': {}", hook.name(), update.new.id, e);
                    processing_errors.push(ProcessingDetail::new(hook.name(), e.to_string()));
                }
            }
        }

        let updated = updated
            .into_iter()
            .map(|u| catalog_core::Update {
                old: apply_injection(u.old, &self.injectors),
                new: apply_injection(u.new, &self.injectors),
            })
            .collect();
        let response = UpdateResponse {
            updated,
            properties: context.properties.clone(),
            processing_errors,
        };
        let response = self.pipeline.post_update(response, &context).await?;

        if let Some(local) = self.local_target(&targets) {
            self.notifier.updated(&local, &response.updated).await;
        }

        info!(
            items_count = response.updated.len() as u64,
            duration_ms = started.elapsed().as_millis() as u64,
            "Update completed on {:?}",
            targets.ids()
        );
        Ok(response)
    }

    pub async fn delete(&self, request: DeleteRequest) -> CatalogResult<DeleteResponse> {
        let started = Instant::now();
        if request.ids.is_empty() {
            return Err(CatalogError::ingest("nothing to delete"));
        }

        let targets = self.resolver.resolve_write(&request.context, false)?;
        self.reject_fanout_local_write(&targets, OperationKind::Delete)?;

        let Request::Delete(request) = self.pipeline.pre(Request::Delete(request)).await? else {
            return Err(kind_changed(OperationKind::Delete));
        };
        if request.ids.is_empty() {
            return Err(CatalogError::ingest("every id was refused by access control"));
        }

        if !self.versioning.is_empty() {
            let existing = self.fetch_existing(&targets.stores, &request.ids).await;
            for hook in &self.versioning {
                for id in &request.ids {
                    if let Some(item) = existing.get(id) {
                        hook.before_delete(item).await.map_err(|e| {
                            warn!("Versioning hook '{}' refused delete of '{}': {}", hook.name(), id, e);
                            CatalogError::ingest(format!("versioning hook '{}' refused delete of '{}': {}", hook.name(), id, e))
                        })?;
                    }
                }
            }
        }

        let context = request.context;
        let outcome = self.engine.delete(&targets.stores, request.ids).await;
        if outcome.is_total_failure() {
            return Err(CatalogError::Ingest {
                message: "delete failed on every destination".to_string(),
                committed: Vec::new(),
                failures: outcome.failures,
            });
        }

        let mut processing_errors = outcome.failures.clone();
        let deleted = outcome.into_items();

        if let Some(local) = self.local_target(&targets) {
            if let Some(detail) = self.delete_content(&local, &deleted).await {
                processing_errors.push(detail);
            }
        }

        for hook in &self.versioning {
            for item in &deleted {
                if let Err(e) = hook.after_delete(item).await {
                    warn!("Versioning hook '{}' failed after delete of '{}': {}", hook.name(), item.id, e);
                    processing_errors.push(ProcessingDetail::new(hook.name(), e.to_string()));
                }
            }
        }

        let deleted = deleted
            .into_iter()
            .map(|item| apply_injection(item, &self.injectors))
            .collect();
        let response = DeleteResponse {
            deleted,
            properties: context.properties.clone(),
            processing_errors,
        };
        let response = self.pipeline.post_delete(response, &context).await?;

        if let Some(local) = self.local_target(&targets) {
            self.notifier.deleted(&local, &response.deleted).await;
        }

        info!(
            items_count = response.deleted.len() as u64,
            duration_ms = started.elapsed().as_millis() as u64,
            "Delete completed on {:?}",
            targets.ids()
        );
        Ok(response)
    }

    pub async fn query(&self, request: QueryRequest) -> CatalogResult<QueryResponse> {
        request.query.validate().map_err(CatalogError::UnsupportedQuery)?;

        let mut request = request;
        if self.config.fanout {
            request.enterprise = true;
        }

        let Request::Query(request) = self.pipeline.pre(Request::Query(request)).await? else {
            return Err(kind_changed(OperationKind::Query));
        };
        request.query.validate().map_err(CatalogError::UnsupportedQuery)?;

        let resolution = self.resolver.resolve_query(&request.context, request.enterprise)?;
        let mut response = self.engine.federate(&resolution.targets, &request).await?;

        if !resolution.dropped.is_empty() {
            let dropped: Vec<&str> = resolution.dropped.iter().map(|d| d.source_id.as_str()).collect();
            response
                .properties
                .insert(properties::DROPPED_DESTINATIONS.to_string(), serde_json::json!(dropped));
            response.processing_details.extend(resolution.dropped);
        }

        for result in &mut response.results {
            result.item = apply_injection(std::mem::take(&mut result.item), &self.injectors);
        }

        self.pipeline.post_query(response, &request).await
    }

    pub async fn get_resource(&self, request: ResourceRequest) -> CatalogResult<ResourceResponse> {
        let Request::GetResource(request) = self.pipeline.pre(Request::GetResource(request)).await? else {
            return Err(kind_changed(OperationKind::GetResource));
        };

        let (item, source_id) = self.locate(&request).await?;
        let resource = self.read_resource(&item, &source_id, &request).await?;

        let mut item = apply_injection(item, &self.injectors);
        let source_id = if self.config.fanout {
            self.engine.mask_origins(std::iter::once(&mut item));
            self.config.id.clone()
        } else {
            source_id
        };

        let response = ResourceResponse {
            resource,
            item,
            source_id,
            properties: request.context.properties.clone(),
        };
        self.pipeline.post_resource(response, &request).await
    }

    /// Retrieval qualifiers the owning source offers for an item
    pub async fn get_resource_options(&self, item_id: &str, source_id: Option<&str>) -> CatalogResult<BTreeSet<String>> {
        let mut request = ResourceRequest::by_id(item_id);
        if let Some(source_id) = source_id {
            request = request.from_source(source_id);
        }

        let (item, owner) = self.locate(&request).await?;
        let binding = self
            .registry
            .get(&owner)
            .ok_or_else(|| CatalogError::ResourceNotSupported(format!("source '{}' is not bound", owner)))?;
        let reader = binding
            .reader()
            .ok_or_else(|| CatalogError::ResourceNotSupported(format!("source '{}' is not readable", owner)))?;
        Ok(reader.resource_options(&item))
    }

    pub async fn get_source_info(&self, request: SourceInfoRequest) -> CatalogResult<SourceInfoResponse> {
        let Request::GetSourceInfo(request) = self.pipeline.pre(Request::GetSourceInfo(request)).await? else {
            return Err(kind_changed(OperationKind::GetSourceInfo));
        };

        let mut descriptors = vec![self.own_descriptor()];
        if !self.config.fanout {
            let bindings = if request.enterprise {
                self.registry.federated()
            } else {
                request
                    .source_ids
                    .iter()
                    .map(|id| self.registry.get(id).ok_or_else(|| CatalogError::unavailable(id.clone())))
                    .collect::<Result<Vec<_>, _>>()?
            };
            for binding in bindings {
                if descriptors.iter().all(|d| d.id != binding.id()) {
                    descriptors.push(self.describe(&binding));
                }
            }
        }

        Ok(SourceInfoResponse {
            descriptors,
            properties: request.context.properties.clone(),
        })
    }

    /// Delete everything matching a filter, page by page and batch by batch
    pub async fn delete_by_filter(&self, request: DeleteByFilterRequest) -> CatalogResult<BatchDeleteReport> {
        request.filter.validate().map_err(CatalogError::UnsupportedQuery)?;
        self.batch.delete_matching(self, &request.filter, &request.context).await
    }

    fn prepare_new(&self, item: &mut Item, now: DateTime<Utc>) {
        let mut prepared = apply_defaults(std::mem::take(item), &self.defaults);
        if prepared.id.is_empty() {
            prepared.id = Uuid::new_v4().simple().to_string();
        }
        let stamp = now.to_rfc3339();
        if !prepared.has(attributes::CREATED) {
            prepared.set(attributes::CREATED, stamp.clone());
        }
        if !prepared.has(attributes::MODIFIED) {
            prepared.set(attributes::MODIFIED, stamp);
        }
        *item = prepared;
    }

    fn reject_fanout_local_write(&self, targets: &WriteTargets, kind: OperationKind) -> Result<(), CatalogError> {
        if self.config.fanout && targets.includes_local() {
            return Err(CatalogError::ingest(format!(
                "fanout framework '{}' does not support local {} operations",
                self.config.id, kind
            )));
        }
        Ok(())
    }

    fn local_target(&self, targets: &WriteTargets) -> Option<String> {
        targets
            .stores
            .iter()
            .find(|s| s.has(Capability::Local))
            .map(|s| s.id().to_string())
    }

    async fn write_content(
        &self,
        binding: &SourceBinding,
        content: Vec<ContentItem>,
        replace: bool,
    ) -> Result<Vec<ContentItem>, CatalogError> {
        let store = binding
            .content()
            .ok_or_else(|| CatalogError::ingest(format!("'{}' is not a content store", binding.id())))?;
        let result = if replace {
            store.update(content).await
        } else {
            store.create(content).await
        };
        result.map_err(|e| {
            warn!("Content store '{}' rejected the write: {}", binding.id(), e);
            CatalogError::Ingest {
                message: format!("content store '{}' rejected the write", binding.id()),
                committed: Vec::new(),
                failures: vec![ProcessingDetail::new(binding.id(), e.to_string())],
            }
        })
    }

    /// Remove stored content of deleted local items; problems become a diagnostic
    async fn delete_content(&self, local_id: &str, deleted: &[Item]) -> Option<ProcessingDetail> {
        let content_ids: Vec<String> = deleted
            .iter()
            .filter(|item| item.source_id.as_deref() == Some(local_id))
            .filter_map(|item| item.content_id().map(str::to_string))
            .collect();
        if content_ids.is_empty() {
            return None;
        }

        let binding = self.registry.content_store()?;
        let store = binding.content()?;
        if !self.availability.is_available(binding.id()) {
            return Some(ProcessingDetail::new(
                binding.id(),
                format!("content for {} deleted items left behind: store unavailable", content_ids.len()),
            ));
        }
        match store.delete(content_ids).await {
            Ok(removed) => {
                debug!("Removed {} content entries from '{}'", removed.len(), binding.id());
                None
            }
            Err(e) => {
                warn!("Content cleanup on '{}' failed: {}", binding.id(), e);
                Some(ProcessingDetail::new(binding.id(), e.to_string()))
            }
        }
    }

    /// Current versions of `ids` from the first readable target holding them
    async fn fetch_existing(&self, stores: &[Arc<SourceBinding>], ids: &[String]) -> HashMap<String, Item> {
        let mut found = HashMap::new();
        if ids.is_empty() {
            return found;
        }

        let lookup = QueryRequest::new(Query::new(Filter::ids(ids.iter().cloned())).page(1, ids.len()));
        for binding in stores {
            let Some(reader) = binding.reader() else {
                continue;
            };
            match reader.query(&lookup).await {
                Ok(response) => {
                    for result in response.results {
                        found.entry(result.item.id.clone()).or_insert(result.item);
                    }
                }
                Err(e) => debug!("Could not read current items from '{}': {}", binding.id(), e),
            }
        }
        found
    }

    /// Find the item a resource request points at and the source that owns it
    async fn locate(&self, request: &ResourceRequest) -> Result<(Item, String), CatalogError> {
        let mut context = request.context.clone();
        if let Some(source_id) = &request.source_id {
            let binding = self
                .registry
                .get(source_id)
                .ok_or_else(|| CatalogError::ResourceNotSupported(format!("source '{}' is not bound", source_id)))?;
            if binding.reader().is_none() {
                return Err(CatalogError::ResourceNotSupported(format!(
                    "source '{}' is not readable",
                    source_id
                )));
            }
            if !self.availability.is_available(source_id) {
                return Err(CatalogError::unavailable(source_id.clone()));
            }
            context.destinations = BTreeSet::from([source_id.clone()]);
        }

        let (filter, wanted) = match &request.target {
            ResourceTarget::ById(id) => (Filter::ids([id.clone()]), format!("item '{}'", id)),
            ResourceTarget::ByUri(uri) => (
                Filter::equals(attributes::RESOURCE_URI, strip_fragment(uri)),
                format!("resource '{}'", uri),
            ),
        };

        let enterprise = request.enterprise || self.config.fanout;
        let not_found = |reason: String| CatalogError::ResourceNotFound(format!("{}: {}", wanted, reason));
        let resolution = self
            .resolver
            .resolve_query(&context, enterprise)
            .map_err(|e| not_found(e.to_string()))?;
        let lookup = QueryRequest::new(Query::new(filter).page(1, 1)).in_context(context);
        let response = self
            .engine
            .query(&resolution.targets, &lookup)
            .await
            .map_err(|e| not_found(e.to_string()))?;

        let item = response
            .results
            .into_iter()
            .next()
            .map(|r| r.item)
            .ok_or_else(|| not_found("no such item".to_string()))?;
        let owner = item
            .source_id
            .clone()
            .or_else(|| request.source_id.clone())
            .ok_or_else(|| not_found("owning source unknown".to_string()))?;
        Ok((item, owner))
    }

    async fn read_resource(&self, item: &Item, owner: &str, request: &ResourceRequest) -> Result<Resource, CatalogError> {
        let uri = match &request.target {
            ResourceTarget::ByUri(uri) => uri.clone(),
            ResourceTarget::ById(id) => item
                .resource_uri()
                .map(str::to_string)
                .ok_or_else(|| CatalogError::ResourceNotFound(format!("item '{}' has no resource", id)))?,
        };
        let qualifier = request
            .qualifier
            .clone()
            .or_else(|| uri.split_once('#').map(|(_, q)| q.to_string()));

        let owned_locally = self.registry.local_index().is_some_and(|local| local.id() == owner);
        if let Some(content_id) = content_id_of(&uri).filter(|_| owned_locally) {
            let binding = self
                .registry
                .content_store()
                .ok_or_else(|| CatalogError::ResourceNotSupported("no content store is bound".to_string()))?;
            let store = binding
                .content()
                .ok_or_else(|| CatalogError::ResourceNotSupported("no content store is bound".to_string()))?;
            return match store.read(content_id, qualifier.as_deref()).await {
                Ok(Some(content)) => Ok(Resource {
                    name: content.filename,
                    mime_type: content.mime_type,
                    data: content.data,
                    properties: Default::default(),
                }),
                Ok(None) => Err(CatalogError::ResourceNotFound(format!("content '{}'", content_id))),
                Err(e) => Err(CatalogError::ResourceNotFound(format!("content '{}': {}", content_id, e))),
            };
        }

        let binding = self
            .registry
            .get(owner)
            .ok_or_else(|| CatalogError::ResourceNotSupported(format!("source '{}' is not bound", owner)))?;
        let reader = binding
            .reader()
            .filter(|reader| reader.supports_resources())
            .ok_or_else(|| CatalogError::ResourceNotSupported(format!("source '{}' does not serve resources", owner)))?;

        match reader
            .retrieve_resource(strip_fragment(&uri), qualifier.as_deref(), &request.context.properties)
            .await
        {
            Ok(Some(resource)) => Ok(resource),
            Ok(None) => Err(CatalogError::ResourceNotFound(format!("'{}' on '{}'", uri, owner))),
            Err(e) => Err(CatalogError::ResourceNotFound(format!("'{}' on '{}': {}", uri, owner, e))),
        }
    }

    fn own_descriptor(&self) -> SourceDescriptor {
        let local = self.registry.local_index();
        let mut capabilities = BTreeSet::from([Capability::Readable]);
        let mut content_types = BTreeSet::new();
        if let Some(local) = &local {
            capabilities.extend([Capability::Local, Capability::Writable]);
            content_types.extend(local.source().content_types());
        }
        if self.registry.content_store().is_some() {
            capabilities.insert(Capability::Content);
        }
        if !self.registry.federated().is_empty() {
            capabilities.insert(Capability::Federated);
        }

        let status = local.as_ref().and_then(|l| self.availability.status(l.id()));
        SourceDescriptor {
            id: self.config.id.clone(),
            version: self.config.version.clone(),
            available: local.is_none() || status.as_ref().is_some_and(|s| s.available),
            last_checked: status.map(|s| s.last_checked),
            capabilities,
            content_types,
        }
    }

    fn describe(&self, binding: &SourceBinding) -> SourceDescriptor {
        let status = self.availability.status(binding.id());
        SourceDescriptor {
            id: binding.id().to_string(),
            version: binding.source().version().to_string(),
            available: status.as_ref().is_some_and(|s| s.available),
            last_checked: status.map(|s| s.last_checked),
            capabilities: binding.capabilities().clone(),
            content_types: binding.source().content_types(),
        }
    }
}

#[async_trait]
impl BatchOperations for CatalogFramework {
    async fn query_page(&self, request: QueryRequest) -> Result<QueryResponse, CatalogError> {
        self.query(request).await
    }

    async fn delete_batch(&self, request: DeleteRequest) -> Result<DeleteResponse, CatalogError> {
        self.delete(request).await
    }
}

fn kind_changed(kind: OperationKind) -> CatalogError {
    CatalogError::Plugin {
        plugin: "pipeline".to_string(),
        stage: PluginStage::Access,
        message: format!("{} request changed kind during processing", kind),
    }
}

fn strip_fragment(uri: &str) -> &str {
    uri.split_once('#').map(|(base, _)| base).unwrap_or(uri)
}

fn content_id_of(uri: &str) -> Option<&str> {
    strip_fragment(uri)
        .strip_prefix(CONTENT_SCHEME)
        .and_then(|rest| rest.strip_prefix(':'))
        .filter(|id| !id.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::memory::{InMemoryCatalog, InMemoryContentStore};

    async fn local_framework() -> (CatalogFramework, Arc<InMemoryCatalog>) {
        let local = Arc::new(InMemoryCatalog::new("local"));
        let framework = CatalogFramework::builder(FrameworkConfig::default())
            .source(SourceBinding::local_index(local.clone()))
            .build()
            .unwrap();
        framework.refresh_availability().await;
        (framework, local)
    }

    #[test]
    fn test_content_uri_parsing() {
        assert_eq!(content_id_of("content:abc#preview"), Some("abc"));
        assert_eq!(content_id_of("content:"), None);
        assert_eq!(content_id_of("https://x/y"), None);
        assert_eq!(strip_fragment("a#b"), "a");
    }

    #[test]
    fn test_invalid_config_is_rejected_at_build() {
        let config = FrameworkConfig {
            max_concurrent_dispatch: 0,
            ..FrameworkConfig::default()
        };
        assert!(matches!(
            CatalogFramework::builder(config).build(),
            Err(CatalogError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_create_stamps_ids_and_timestamps() {
        let (framework, local) = local_framework().await;
        let response = framework
            .create(CreateRequest::new(vec![Item::new().with_title("a")]))
            .await
            .unwrap();

        let created = &response.created[0];
        assert_eq!(created.id.len(), 32);
        assert!(created.has(attributes::CREATED));
        assert!(created.has(attributes::MODIFIED));
        assert_eq!(created.source_id.as_deref(), Some("local"));
        assert_eq!(local.len(), 1);
    }

    #[tokio::test]
    async fn test_unpolled_local_index_refuses_writes() {
        let local = Arc::new(InMemoryCatalog::new("local"));
        let framework = CatalogFramework::builder(FrameworkConfig::default())
            .source(SourceBinding::local_index(local.clone()))
            .build()
            .unwrap();

        let err = framework
            .create(CreateRequest::new(vec![Item::new()]))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::SourceUnavailable { .. }));
        assert!(local.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_query_is_unsupported() {
        let (framework, local) = local_framework().await;
        let err = framework
            .query(QueryRequest::new(Query::new(Filter::Any).page(0, 10)))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnsupportedQuery(_)));
        assert_eq!(local.calls.queries(), 0);
    }

    #[tokio::test]
    async fn test_content_create_then_resource_round_trip() {
        let local = Arc::new(InMemoryCatalog::new("local"));
        let content = Arc::new(InMemoryContentStore::new("content"));
        let framework = CatalogFramework::builder(FrameworkConfig::default())
            .source(SourceBinding::local_index(local.clone()))
            .source(SourceBinding::content_store(content.clone()))
            .build()
            .unwrap();
        framework.refresh_availability().await;

        let response = framework
            .create(CreateRequest::with_content(vec![ContentItem::new(
                "notes.txt",
                "text/plain",
                b"hello".to_vec(),
                Item::new().with_title("notes"),
            )]))
            .await
            .unwrap();
        let item = &response.created[0];
        assert!(item.content_id().is_some());
        assert_eq!(content.len(), 1);

        let resource = framework
            .get_resource(ResourceRequest::by_id(item.id.clone()))
            .await
            .unwrap();
        assert_eq!(resource.resource.data, b"hello".to_vec());
        assert_eq!(resource.resource.name, "notes.txt");
        assert_eq!(resource.source_id, "local");

        framework.delete(DeleteRequest::new([item.id.clone()])).await.unwrap();
        assert!(content.is_empty());
    }

    #[tokio::test]
    async fn test_failed_index_write_names_committed_content_store() {
        let local = Arc::new(InMemoryCatalog::new("local"));
        local.set_fail_writes(true);
        let content = Arc::new(InMemoryContentStore::new("content"));
        let framework = CatalogFramework::builder(FrameworkConfig::default())
            .source(SourceBinding::local_index(local))
            .source(SourceBinding::content_store(content))
            .build()
            .unwrap();
        framework.refresh_availability().await;

        let err = framework
            .create(CreateRequest::with_content(vec![ContentItem::new(
                "a.bin",
                "application/octet-stream",
                vec![1, 2, 3],
                Item::new(),
            )]))
            .await
            .unwrap_err();
        match err {
            CatalogError::Ingest { committed, failures, .. } => {
                assert_eq!(committed, vec!["content"]);
                assert_eq!(failures[0].source_id, "local");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fanout_refuses_local_writes() {
        let local = Arc::new(InMemoryCatalog::new("local"));
        let config = FrameworkConfig {
            fanout: true,
            ..FrameworkConfig::default()
        };
        let framework = CatalogFramework::builder(config)
            .source(SourceBinding::local_index(local.clone()))
            .build()
            .unwrap();
        framework.refresh_availability().await;

        assert!(framework.create(CreateRequest::new(vec![Item::new()])).await.is_err());
        assert!(local.is_empty());
    }

    #[tokio::test]
    async fn test_start_and_shutdown_poller() {
        let local = Arc::new(InMemoryCatalog::new("local"));
        let config = FrameworkConfig {
            poll_interval: std::time::Duration::from_millis(10),
            ..FrameworkConfig::default()
        };
        let framework = CatalogFramework::builder(config)
            .source(SourceBinding::local_index(local))
            .build()
            .unwrap();

        framework.start();
        framework.start();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(framework.availability().is_available("local"));
        assert_eq!(framework.refresh_availability().await, 1);
        framework.shutdown().await;
    }
}
