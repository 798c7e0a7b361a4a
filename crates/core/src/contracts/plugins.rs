//! Plugin SPI, one trait per pipeline stage
//!
//! Every plugin consumes the request or response of its stage and returns
//! it (possibly rewritten), or fails with [`PluginError`]. Pass-through
//! defaults let a plugin implement only the operations it cares about.

use crate::*;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginStage {
    Policy,
    Access,
    PreIngest,
    PreQuery,
    PreResource,
    PostIngest,
    PostQuery,
    PostResource,
}

impl fmt::Display for PluginStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginStage::Policy => "policy",
            PluginStage::Access => "access",
            PluginStage::PreIngest => "pre-ingest",
            PluginStage::PreQuery => "pre-query",
            PluginStage::PreResource => "pre-resource",
            PluginStage::PostIngest => "post-ingest",
            PluginStage::PostQuery => "post-query",
            PluginStage::PostResource => "post-resource",
        };
        f.write_str(name)
    }
}

/// Permission requirements a policy plugin attaches to a request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyResponse {
    /// Required of the subject for the operation as a whole
    pub operation: SecurityAttributes,
    /// Required per payload item, keyed by item id or `#<index>` for id-less items
    pub items: HashMap<String, SecurityAttributes>,
}

impl PolicyResponse {
    pub fn is_empty(&self) -> bool {
        self.operation.is_empty() && self.items.is_empty()
    }
}

#[async_trait::async_trait]
pub trait PolicyPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, request: &Request) -> PluginResult<PolicyResponse>;
}

#[async_trait::async_trait]
pub trait AccessPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// May drop payload items or abort; must not change the request kind
    async fn process(&self, request: Request) -> PluginResult<Request>;
}

#[async_trait::async_trait]
pub trait PreIngestPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn process_create(&self, request: CreateRequest) -> PluginResult<CreateRequest> {
        Ok(request)
    }

    async fn process_update(&self, request: UpdateRequest) -> PluginResult<UpdateRequest> {
        Ok(request)
    }

    async fn process_delete(&self, request: DeleteRequest) -> PluginResult<DeleteRequest> {
        Ok(request)
    }
}

#[async_trait::async_trait]
pub trait PreQueryPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, request: QueryRequest) -> PluginResult<QueryRequest>;
}

#[async_trait::async_trait]
pub trait PreResourcePlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, request: ResourceRequest) -> PluginResult<ResourceRequest>;
}

#[async_trait::async_trait]
pub trait PostIngestPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn process_create(
        &self,
        response: CreateResponse,
        _context: &RequestContext,
    ) -> PluginResult<CreateResponse> {
        Ok(response)
    }

    async fn process_update(
        &self,
        response: UpdateResponse,
        _context: &RequestContext,
    ) -> PluginResult<UpdateResponse> {
        Ok(response)
    }

    async fn process_delete(
        &self,
        response: DeleteResponse,
        _context: &RequestContext,
    ) -> PluginResult<DeleteResponse> {
        Ok(response)
    }
}

#[async_trait::async_trait]
pub trait PostQueryPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn process(
        &self,
        response: QueryResponse,
        request: &QueryRequest,
    ) -> PluginResult<QueryResponse>;
}

#[async_trait::async_trait]
pub trait PostResourcePlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn process(
        &self,
        response: ResourceResponse,
        request: &ResourceRequest,
    ) -> PluginResult<ResourceResponse>;
}
