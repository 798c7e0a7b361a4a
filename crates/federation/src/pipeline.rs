//! Plugin pipeline
//!
//! Phase A runs before dispatch: policy plugins attach permission metadata,
//! access plugins enforce it, then the pre-operation plugins for the request
//! kind run in registration order. Phase B runs the post-operation plugins
//! over the assembled response. Any plugin failure aborts the operation.

use catalog_core::{
    properties, AccessPlugin, CatalogError, CreateResponse, DeleteResponse, OperationKind, PluginError,
    PluginStage, PolicyPlugin, PolicyResponse, PostIngestPlugin, PostQueryPlugin, PostResourcePlugin,
    PreIngestPlugin, PreQueryPlugin, PreResourcePlugin, QueryRequest, QueryResponse, Request,
    RequestContext, ResourceRequest, ResourceResponse, SecurityAttributes, UpdateResponse,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::security;

/// Ordered plugin lists, one per stage. Built once at startup.
#[derive(Clone, Default)]
pub struct PluginChain {
    pub policy: Vec<Arc<dyn PolicyPlugin>>,
    pub access: Vec<Arc<dyn AccessPlugin>>,
    pub pre_ingest: Vec<Arc<dyn PreIngestPlugin>>,
    pub pre_query: Vec<Arc<dyn PreQueryPlugin>>,
    pub pre_resource: Vec<Arc<dyn PreResourcePlugin>>,
    pub post_ingest: Vec<Arc<dyn PostIngestPlugin>>,
    pub post_query: Vec<Arc<dyn PostQueryPlugin>>,
    pub post_resource: Vec<Arc<dyn PostResourcePlugin>>,
}

impl PluginChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, plugin: Arc<dyn PolicyPlugin>) -> Self {
        self.policy.push(plugin);
        self
    }

    pub fn with_access(mut self, plugin: Arc<dyn AccessPlugin>) -> Self {
        self.access.push(plugin);
        self
    }

    pub fn with_pre_ingest(mut self, plugin: Arc<dyn PreIngestPlugin>) -> Self {
        self.pre_ingest.push(plugin);
        self
    }

    pub fn with_pre_query(mut self, plugin: Arc<dyn PreQueryPlugin>) -> Self {
        self.pre_query.push(plugin);
        self
    }

    pub fn with_pre_resource(mut self, plugin: Arc<dyn PreResourcePlugin>) -> Self {
        self.pre_resource.push(plugin);
        self
    }

    pub fn with_post_ingest(mut self, plugin: Arc<dyn PostIngestPlugin>) -> Self {
        self.post_ingest.push(plugin);
        self
    }

    pub fn with_post_query(mut self, plugin: Arc<dyn PostQueryPlugin>) -> Self {
        self.post_query.push(plugin);
        self
    }

    pub fn with_post_resource(mut self, plugin: Arc<dyn PostResourcePlugin>) -> Self {
        self.post_resource.push(plugin);
        self
    }

    pub fn len(&self) -> usize {
        self.policy.len()
            + self.access.len()
            + self.pre_ingest.len()
            + self.pre_query.len()
            + self.pre_resource.len()
            + self.post_ingest.len()
            + self.post_query.len()
            + self.post_resource.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct RequestPipeline {
    chain: PluginChain,
}

impl RequestPipeline {
    pub fn new(chain: PluginChain) -> Self {
        Self { chain }
    }

    pub fn chain(&self) -> &PluginChain {
        &self.chain
    }

    /// Phase A. Returns the request as rewritten by the plugins.
    pub async fn pre(&self, request: Request) -> Result<Request, CatalogError> {
        let kind = request.kind();
        let request = self.apply_policy(request).await?;
        let request = self.apply_access(request).await?;

        match request {
            Request::Create(mut create) => {
                for plugin in &self.chain.pre_ingest {
                    create = plugin
                        .process_create(create)
                        .await
                        .map_err(|e| fail(plugin.name(), PluginStage::PreIngest, kind, e))?;
                }
                Ok(Request::Create(create))
            }
            Request::Update(mut update) => {
                for plugin in &self.chain.pre_ingest {
                    update = plugin
                        .process_update(update)
                        .await
                        .map_err(|e| fail(plugin.name(), PluginStage::PreIngest, kind, e))?;
                }
                Ok(Request::Update(update))
            }
            Request::Delete(mut delete) => {
                for plugin in &self.chain.pre_ingest {
                    delete = plugin
                        .process_delete(delete)
                        .await
                        .map_err(|e| fail(plugin.name(), PluginStage::PreIngest, kind, e))?;
                }
                Ok(Request::Delete(delete))
            }
            Request::Query(mut query) => {
                for plugin in &self.chain.pre_query {
                    query = plugin
                        .process(query)
                        .await
                        .map_err(|e| fail(plugin.name(), PluginStage::PreQuery, kind, e))?;
                }
                Ok(Request::Query(query))
            }
            Request::GetResource(mut resource) => {
                for plugin in &self.chain.pre_resource {
                    resource = plugin
                        .process(resource)
                        .await
                        .map_err(|e| fail(plugin.name(), PluginStage::PreResource, kind, e))?;
                }
                Ok(Request::GetResource(resource))
            }
            other @ Request::GetSourceInfo(_) => Ok(other),
        }
    }

    async fn apply_policy(&self, mut request: Request) -> Result<Request, CatalogError> {
        if self.chain.policy.is_empty() {
            return Ok(request);
        }

        let kind = request.kind();
        let mut operation = read_operation_policy(request.context());
        let mut items = read_item_policy(request.context());

        for plugin in &self.chain.policy {
            let response = plugin
                .process(&request)
                .await
                .map_err(|e| fail(plugin.name(), PluginStage::Policy, kind, e))?;
            if response.is_empty() {
                continue;
            }
            debug!("Policy plugin '{}' attached requirements to {}", plugin.name(), kind);
            security::merge(&mut operation, &response.operation);
            for (key, required) in &response.items {
                security::merge(items.entry(key.clone()).or_default(), required);
            }
        }

        write_policy(request.context_mut(), &PolicyResponse { operation, items });
        Ok(request)
    }

    async fn apply_access(&self, mut request: Request) -> Result<Request, CatalogError> {
        let kind = request.kind();
        for plugin in &self.chain.access {
            request = plugin
                .process(request)
                .await
                .map_err(|e| fail(plugin.name(), PluginStage::Access, kind, e))?;
            if request.kind() != kind {
                error!("Access plugin '{}' changed a {} request into {}", plugin.name(), kind, request.kind());
                return Err(CatalogError::Plugin {
                    plugin: plugin.name().to_string(),
                    stage: PluginStage::Access,
                    message: format!("request kind changed from {} to {}", kind, request.kind()),
                });
            }
        }
        Ok(request)
    }

    pub async fn post_create(&self, mut response: CreateResponse, context: &RequestContext) -> Result<CreateResponse, CatalogError> {
        for plugin in &self.chain.post_ingest {
            let before: Vec<String> = response.created.iter().map(|item| item.id.clone()).collect();
            response = plugin
                .process_create(response, context)
                .await
                .map_err(|e| fail(plugin.name(), PluginStage::PostIngest, OperationKind::Create, e))?;
            ensure_same_items(plugin.name(), &before, response.created.iter().map(|item| item.id.clone()))?;
        }
        Ok(response)
    }

    pub async fn post_update(&self, mut response: UpdateResponse, context: &RequestContext) -> Result<UpdateResponse, CatalogError> {
        for plugin in &self.chain.post_ingest {
            let before: Vec<String> = response.updated.iter().map(|update| update.new.id.clone()).collect();
            response = plugin
                .process_update(response, context)
                .await
                .map_err(|e| fail(plugin.name(), PluginStage::PostIngest, OperationKind::Update, e))?;
            ensure_same_items(plugin.name(), &before, response.updated.iter().map(|update| update.new.id.clone()))?;
        }
        Ok(response)
    }

    pub async fn post_delete(&self, mut response: DeleteResponse, context: &RequestContext) -> Result<DeleteResponse, CatalogError> {
        for plugin in &self.chain.post_ingest {
            let before: Vec<String> = response.deleted.iter().map(|item| item.id.clone()).collect();
            response = plugin
                .process_delete(response, context)
                .await
                .map_err(|e| fail(plugin.name(), PluginStage::PostIngest, OperationKind::Delete, e))?;
            ensure_same_items(plugin.name(), &before, response.deleted.iter().map(|item| item.id.clone()))?;
        }
        Ok(response)
    }

    pub async fn post_query(&self, mut response: QueryResponse, request: &QueryRequest) -> Result<QueryResponse, CatalogError> {
        for plugin in &self.chain.post_query {
            response = plugin
                .process(response, request)
                .await
                .map_err(|e| fail(plugin.name(), PluginStage::PostQuery, OperationKind::Query, e))?;
        }
        Ok(response)
    }

    pub async fn post_resource(
        &self,
        mut response: ResourceResponse,
        request: &ResourceRequest,
    ) -> Result<ResourceResponse, CatalogError> {
        for plugin in &self.chain.post_resource {
            response = plugin
                .process(response, request)
                .await
                .map_err(|e| fail(plugin.name(), PluginStage::PostResource, OperationKind::GetResource, e))?;
        }
        Ok(response)
    }
}

/// Post-ingest plugins may enrich items but not add, drop or re-identify them
fn ensure_same_items(plugin: &str, before: &[String], after: impl Iterator<Item = String>) -> Result<(), CatalogError> {
    let after: Vec<String> = after.collect();
    if before == after.as_slice() {
        return Ok(());
    }
    error!(
        "Post-ingest plugin '{}' changed the affected items ({} before, {} after)",
        plugin,
        before.len(),
        after.len()
    );
    Err(CatalogError::Plugin {
        plugin: plugin.to_string(),
        stage: PluginStage::PostIngest,
        message: "affected items were added, removed or re-identified".to_string(),
    })
}

/// Map a plugin failure onto the error kind of the operation it aborted
fn fail(plugin: &str, stage: PluginStage, kind: OperationKind, err: PluginError) -> CatalogError {
    match err {
        PluginError::StopProcessing(reason) => {
            warn!("Plugin '{}' stopped {} during {}: {}", plugin, kind, stage, reason);
            let message = format!("plugin '{}' stopped processing during {}: {}", plugin, stage, reason);
            match kind {
                OperationKind::Create | OperationKind::Update | OperationKind::Delete => CatalogError::ingest(message),
                OperationKind::GetResource => CatalogError::ResourceNotSupported(message),
                OperationKind::Query | OperationKind::GetSourceInfo => CatalogError::Federation(message),
            }
        }
        PluginError::ExecutionFailure(message) => {
            error!("Plugin '{}' failed during {} of {}: {}", plugin, stage, kind, message);
            CatalogError::Plugin {
                plugin: plugin.to_string(),
                stage,
                message,
            }
        }
    }
}

/// Operation-level requirements attached by policy plugins
pub fn read_operation_policy(context: &RequestContext) -> SecurityAttributes {
    context
        .properties
        .get(properties::OPERATION_POLICY)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default()
}

/// Item-level requirements attached by policy plugins, keyed by item id or `#<index>`
pub fn read_item_policy(context: &RequestContext) -> HashMap<String, SecurityAttributes> {
    context
        .properties
        .get(properties::ITEM_POLICY)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or_default()
}

fn write_policy(context: &mut RequestContext, policy: &PolicyResponse) {
    if !policy.operation.is_empty() {
        if let Ok(value) = serde_json::to_value(&policy.operation) {
            context.properties.insert(properties::OPERATION_POLICY.to_string(), value);
        }
    }
    if !policy.items.is_empty() {
        if let Ok(value) = serde_json::to_value(&policy.items) {
            context.properties.insert(properties::ITEM_POLICY.to_string(), value);
        }
    }
}
