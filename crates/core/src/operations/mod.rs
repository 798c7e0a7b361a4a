//! Typed operation requests and responses
//!
//! Every call into the framework carries exactly one request kind. The
//! shared [`RequestContext`] holds the free-form properties, the explicit
//! destination set and the caller subject.

use crate::*;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

pub type Properties = HashMap<String, serde_json::Value>;

/// Property keys the pipeline reads and writes
pub mod properties {
    /// Operation-level permission requirements attached by policy plugins
    pub const OPERATION_POLICY: &str = "operation.security";
    /// Per-item permission requirements keyed by item id (or payload index for new items)
    pub const ITEM_POLICY: &str = "item.security";
    /// Destination ids the resolver dropped while resolving a query
    pub const DROPPED_DESTINATIONS: &str = "federation.dropped";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    Query,
    GetResource,
    GetSourceInfo,
}

impl OperationKind {
    pub fn is_write(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Query => "query",
            Self::GetResource => "get_resource",
            Self::GetSourceInfo => "get_source_info",
        };
        f.write_str(name)
    }
}

/// State shared by every request kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub properties: Properties,
    /// Empty means "the local index" (plus the content store for content writes)
    #[serde(default)]
    pub destinations: BTreeSet<String>,
    #[serde(default)]
    pub subject: Option<Subject>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to<I, S>(mut self, destinations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.destinations = destinations.into_iter().map(Into::into).collect();
        self
    }

    pub fn as_subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub items: Vec<Item>,
    /// Content paired with items; each carries its own item
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default)]
    pub context: RequestContext,
}

impl CreateRequest {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            content: Vec::new(),
            context: RequestContext::default(),
        }
    }

    pub fn with_content(content: Vec<ContentItem>) -> Self {
        Self {
            items: Vec::new(),
            content,
            context: RequestContext::default(),
        }
    }

    pub fn in_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn is_content_bearing(&self) -> bool {
        !self.content.is_empty()
    }
}

/// Replacement of the item stored under `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemUpdate {
    pub id: String,
    pub item: Item,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub updates: Vec<ItemUpdate>,
    /// Replacement content; `item.id` names the item being updated
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default)]
    pub context: RequestContext,
}

impl UpdateRequest {
    pub fn new(updates: Vec<ItemUpdate>) -> Self {
        Self {
            updates,
            content: Vec::new(),
            context: RequestContext::default(),
        }
    }

    /// Updates keyed by the items' own ids
    pub fn of_items(items: Vec<Item>) -> Self {
        Self::new(
            items
                .into_iter()
                .map(|item| ItemUpdate {
                    id: item.id.clone(),
                    item,
                })
                .collect(),
        )
    }

    pub fn with_content(content: Vec<ContentItem>) -> Self {
        Self {
            updates: Vec::new(),
            content,
            context: RequestContext::default(),
        }
    }

    pub fn in_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn is_content_bearing(&self) -> bool {
        !self.content.is_empty()
    }

    /// Ids targeted by plain and content updates
    pub fn target_ids(&self) -> Vec<String> {
        self.updates
            .iter()
            .map(|u| u.id.clone())
            .chain(self.content.iter().map(|c| c.item.id.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub ids: Vec<String>,
    #[serde(default)]
    pub context: RequestContext,
}

impl DeleteRequest {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
            context: RequestContext::default(),
        }
    }

    pub fn in_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: Query,
    /// Query every federated source in addition to the local index
    #[serde(default)]
    pub enterprise: bool,
    #[serde(default)]
    pub context: RequestContext,
}

impl QueryRequest {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            enterprise: false,
            context: RequestContext::default(),
        }
    }

    pub fn enterprise(mut self) -> Self {
        self.enterprise = true;
        self
    }

    pub fn in_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }
}

/// Bulk delete of everything matching a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteByFilterRequest {
    pub filter: Filter,
    #[serde(default)]
    pub context: RequestContext,
}

impl DeleteByFilterRequest {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            context: RequestContext::default(),
        }
    }

    pub fn in_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceTarget {
    ById(String),
    ByUri(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub target: ResourceTarget,
    /// Source owning the item; `None` means the local index unless `enterprise`
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub enterprise: bool,
    /// Derived resource qualifier (e.g. "preview")
    #[serde(default)]
    pub qualifier: Option<String>,
    #[serde(default)]
    pub context: RequestContext,
}

impl ResourceRequest {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            target: ResourceTarget::ById(id.into()),
            source_id: None,
            enterprise: false,
            qualifier: None,
            context: RequestContext::default(),
        }
    }

    pub fn by_uri(uri: impl Into<String>) -> Self {
        Self {
            target: ResourceTarget::ByUri(uri.into()),
            ..Self::by_id(String::new())
        }
    }

    pub fn from_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn enterprise(mut self) -> Self {
        self.enterprise = true;
        self
    }

    pub fn qualified(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceInfoRequest {
    /// Describe every federated source as well as the framework itself
    #[serde(default)]
    pub enterprise: bool,
    #[serde(default)]
    pub source_ids: BTreeSet<String>,
    #[serde(default)]
    pub context: RequestContext,
}

impl SourceInfoRequest {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn enterprise() -> Self {
        Self {
            enterprise: true,
            ..Self::default()
        }
    }

    pub fn of<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source_ids: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Any framework request, as seen by policy and access plugins
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Create(CreateRequest),
    Update(UpdateRequest),
    Delete(DeleteRequest),
    Query(QueryRequest),
    GetResource(ResourceRequest),
    GetSourceInfo(SourceInfoRequest),
}

impl Request {
    pub fn kind(&self) -> OperationKind {
        match self {
            Request::Create(_) => OperationKind::Create,
            Request::Update(_) => OperationKind::Update,
            Request::Delete(_) => OperationKind::Delete,
            Request::Query(_) => OperationKind::Query,
            Request::GetResource(_) => OperationKind::GetResource,
            Request::GetSourceInfo(_) => OperationKind::GetSourceInfo,
        }
    }

    pub fn context(&self) -> &RequestContext {
        match self {
            Request::Create(r) => &r.context,
            Request::Update(r) => &r.context,
            Request::Delete(r) => &r.context,
            Request::Query(r) => &r.context,
            Request::GetResource(r) => &r.context,
            Request::GetSourceInfo(r) => &r.context,
        }
    }

    pub fn context_mut(&mut self) -> &mut RequestContext {
        match self {
            Request::Create(r) => &mut r.context,
            Request::Update(r) => &mut r.context,
            Request::Delete(r) => &mut r.context,
            Request::Query(r) => &mut r.context,
            Request::GetResource(r) => &mut r.context,
            Request::GetSourceInfo(r) => &mut r.context,
        }
    }

    /// Items carried by a write request, in payload order
    pub fn payload_items(&self) -> Vec<&Item> {
        match self {
            Request::Create(r) => r
                .items
                .iter()
                .chain(r.content.iter().map(|c| &c.item))
                .collect(),
            Request::Update(r) => r
                .updates
                .iter()
                .map(|u| &u.item)
                .chain(r.content.iter().map(|c| &c.item))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A non-fatal failure attributed to one source or destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingDetail {
    pub source_id: String,
    pub message: String,
}

impl ProcessingDetail {
    pub fn new(source_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateResponse {
    pub created: Vec<Item>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub processing_errors: Vec<ProcessingDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub old: Item,
    pub new: Item,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateResponse {
    pub updated: Vec<Update>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub processing_errors: Vec<ProcessingDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: Vec<Item>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub processing_errors: Vec<ProcessingDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub item: Item,
    #[serde(default)]
    pub relevance: Option<f64>,
    #[serde(default)]
    pub distance: Option<f64>,
}

impl QueryResult {
    pub fn new(item: Item) -> Self {
        Self {
            item,
            relevance: None,
            distance: None,
        }
    }
}

/// Aggregate total; `exact` is false when any contributor only estimated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitCount {
    pub count: u64,
    pub exact: bool,
}

impl HitCount {
    pub fn exact(count: u64) -> Self {
        Self { count, exact: true }
    }

    pub fn estimated(count: u64) -> Self {
        Self {
            count,
            exact: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<QueryResult>,
    pub hits: HitCount,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub processing_details: Vec<ProcessingDetail>,
}

impl QueryResponse {
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.results.iter().map(|r| &r.item)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceResponse {
    pub resource: Resource,
    pub item: Item,
    pub source_id: String,
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub id: String,
    pub version: String,
    pub available: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub capabilities: BTreeSet<Capability>,
    #[serde(default)]
    pub content_types: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceInfoResponse {
    pub descriptors: Vec<SourceDescriptor>,
    #[serde(default)]
    pub properties: Properties,
}

impl SourceInfoResponse {
    pub fn descriptor(&self, id: &str) -> Option<&SourceDescriptor> {
        self.descriptors.iter().find(|d| d.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_kind_and_context() {
        let mut request = Request::Delete(DeleteRequest::new(["a"]));
        assert_eq!(request.kind(), OperationKind::Delete);
        assert!(request.kind().is_write());

        request
            .context_mut()
            .properties
            .insert("k".to_string(), serde_json::json!(1));
        assert_eq!(request.context().properties.get("k"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn test_payload_items_include_content_items() {
        let content = ContentItem::new("a.txt", "text/plain", b"hi".to_vec(), Item::new().with_title("a"));
        let mut create = CreateRequest::new(vec![Item::new().with_title("b")]);
        create.content.push(content);
        let request = Request::Create(create);
        let titles: Vec<_> = request.payload_items().iter().filter_map(|i| i.title()).collect();
        assert_eq!(titles, vec!["b", "a"]);
    }
}
