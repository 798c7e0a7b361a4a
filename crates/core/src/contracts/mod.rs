//! Contracts the framework consumes from its collaborators
//!
//! Backends are bound at runtime and are only ever reached through these
//! traits: a local index, content stores, federated read-only sources and
//! remote read-write stores all implement some subset of them.

use crate::*;
use std::collections::BTreeSet;

pub mod hooks;
pub mod plugins;

pub use hooks::*;
pub use plugins::*;

/// Identity and liveness shared by every backend
#[async_trait::async_trait]
pub trait Source: Send + Sync {
    /// Stable identifier used for destinations and result attribution
    fn id(&self) -> &str;

    fn version(&self) -> &str {
        "1.0"
    }

    fn description(&self) -> &str {
        ""
    }

    /// Live probe. Only the availability poller calls this.
    async fn is_available(&self) -> bool;

    /// Attributes a caller must hold to use this source; empty means open
    fn security_attributes(&self) -> SecurityAttributes {
        SecurityAttributes::new()
    }

    fn content_types(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

/// One source's answer to a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceResponse {
    pub results: Vec<QueryResult>,
    pub hits: u64,
    /// False when `hits` is an estimate
    pub exact: bool,
}

impl SourceResponse {
    pub fn exact(results: Vec<QueryResult>, hits: u64) -> Self {
        Self {
            results,
            hits,
            exact: true,
        }
    }

    pub fn estimated(results: Vec<QueryResult>, hits: u64) -> Self {
        Self {
            results,
            hits,
            exact: false,
        }
    }
}

#[async_trait::async_trait]
pub trait ReadableSource: Source {
    async fn query(&self, request: &QueryRequest) -> Result<SourceResponse>;

    fn supports_resources(&self) -> bool {
        false
    }

    /// `Ok(None)` when nothing lives at `uri`
    async fn retrieve_resource(
        &self,
        uri: &str,
        qualifier: Option<&str>,
        properties: &Properties,
    ) -> Result<Option<Resource>> {
        let _ = (qualifier, properties);
        Err(anyhow::anyhow!(
            "source '{}' cannot retrieve resource '{}'",
            self.id(),
            uri
        ))
    }

    /// Retrieval qualifiers offered for an item: the fragments of its derived resource URIs
    fn resource_options(&self, item: &Item) -> BTreeSet<String> {
        item.string_values(attributes::DERIVED_RESOURCE_URI)
            .into_iter()
            .filter_map(|uri| uri.split_once('#').map(|(_, q)| q.to_string()))
            .filter(|q| !q.is_empty())
            .collect()
    }
}

#[async_trait::async_trait]
pub trait WritableSource: Source {
    /// Returns the stored items, ids assigned
    async fn create(&self, items: Vec<Item>) -> Result<Vec<Item>>;

    /// Returns old/new pairs for the ids that existed
    async fn update(&self, updates: Vec<ItemUpdate>) -> Result<Vec<Update>>;

    /// Returns the items that were removed
    async fn delete(&self, ids: Vec<String>) -> Result<Vec<Item>>;
}

/// Binary storage paired with the local index
#[async_trait::async_trait]
pub trait ContentStore: Source {
    /// Stores content and returns it with ids assigned and the paired item's
    /// `resource-uri` pointing back at the stored content
    async fn create(&self, content: Vec<ContentItem>) -> Result<Vec<ContentItem>>;

    async fn update(&self, content: Vec<ContentItem>) -> Result<Vec<ContentItem>>;

    /// Returns the ids that were removed
    async fn delete(&self, ids: Vec<String>) -> Result<Vec<String>>;

    async fn read(&self, id: &str, qualifier: Option<&str>) -> Result<Option<ContentItem>>;
}
