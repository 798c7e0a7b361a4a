//! Catalog domain models

use crate::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub mod query;
pub mod subject;

pub use query::*;
pub use subject::*;

/// Well-known attribute names
pub mod attributes {
    pub const ID: &str = "id";
    pub const TITLE: &str = "title";
    pub const EXPIRATION: &str = "expiration";
    pub const CREATED: &str = "created";
    pub const MODIFIED: &str = "modified";
    pub const RESOURCE_URI: &str = "resource-uri";
    pub const DERIVED_RESOURCE_URI: &str = "resource.derived-uri";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const SECURITY_ACCESS: &str = "security.access";
}

/// URI scheme used for resources held by the local content store
pub const CONTENT_SCHEME: &str = "content";

/// Value kinds an attribute descriptor can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttributeKind {
    String,
    Integer,
    Double,
    Boolean,
    Date,
    Binary,
    Object,
}

/// Schema entry describing one attribute of an item type
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub name: String,
    pub kind: AttributeKind,
    pub multivalued: bool,
    pub indexed: bool,
}

impl AttributeDescriptor {
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            multivalued: false,
            indexed: true,
        }
    }

    pub fn multivalued(mut self) -> Self {
        self.multivalued = true;
        self
    }
}

/// Item type: a named schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemType {
    pub name: String,
    pub descriptors: BTreeSet<AttributeDescriptor>,
}

impl ItemType {
    pub const BASIC: &'static str = "basic";

    pub fn new(
        name: impl Into<String>,
        descriptors: impl IntoIterator<Item = AttributeDescriptor>,
    ) -> Self {
        Self {
            name: name.into(),
            descriptors: descriptors.into_iter().collect(),
        }
    }

    /// The default schema every item starts with
    pub fn basic() -> Self {
        use attributes::*;
        Self::new(
            Self::BASIC,
            [
                AttributeDescriptor::new(ID, AttributeKind::String),
                AttributeDescriptor::new(TITLE, AttributeKind::String),
                AttributeDescriptor::new(EXPIRATION, AttributeKind::Date),
                AttributeDescriptor::new(CREATED, AttributeKind::Date),
                AttributeDescriptor::new(MODIFIED, AttributeKind::Date),
                AttributeDescriptor::new(RESOURCE_URI, AttributeKind::String),
                AttributeDescriptor::new(DERIVED_RESOURCE_URI, AttributeKind::String).multivalued(),
                AttributeDescriptor::new(CONTENT_TYPE, AttributeKind::String),
                AttributeDescriptor::new(SECURITY_ACCESS, AttributeKind::String).multivalued(),
            ],
        )
    }

    pub fn descriptor(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    /// Copy of this schema extended with extra descriptors
    pub fn extended(&self, extra: impl IntoIterator<Item = AttributeDescriptor>) -> Self {
        let mut descriptors = self.descriptors.clone();
        for descriptor in extra {
            if self.descriptor(&descriptor.name).is_none() {
                descriptors.insert(descriptor);
            }
        }
        Self {
            name: self.name.clone(),
            descriptors,
        }
    }
}

impl Default for ItemType {
    fn default() -> Self {
        Self::basic()
    }
}

/// A catalog record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Empty until the framework assigns one on create
    #[serde(default)]
    pub id: String,
    /// Identifier of the source this item was read from or written to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default)]
    pub item_type: ItemType,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Item {
    pub fn new() -> Self {
        Self {
            id: String::new(),
            source_id: None,
            item_type: ItemType::basic(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        let mut item = Self::new();
        item.id = id.into();
        item
    }

    pub fn of_type(mut self, item_type: ItemType) -> Self {
        self.item_type = item_type;
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn with_title(self, title: impl Into<String>) -> Self {
        self.with_attribute(attributes::TITLE, title.into())
    }

    /// Raw attribute value; the identifier lives in `id`, not here
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        if name == attributes::ID {
            return (!self.id.is_empty()).then_some(self.id.as_str());
        }
        self.attributes.get(name).and_then(|v| v.as_str())
    }

    pub fn has(&self, name: &str) -> bool {
        match name {
            attributes::ID => !self.id.is_empty(),
            _ => self.attributes.get(name).is_some_and(|v| !v.is_null()),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) {
        let name = name.into();
        let value = value.into();
        if name == attributes::ID {
            if let Some(id) = value.as_str() {
                self.id = id.to_string();
            }
            return;
        }
        self.attributes.insert(name, value);
    }

    pub fn title(&self) -> Option<&str> {
        self.get_str(attributes::TITLE)
    }

    pub fn resource_uri(&self) -> Option<&str> {
        self.get_str(attributes::RESOURCE_URI)
    }

    /// Content identifier when the resource lives in the local content store
    pub fn content_id(&self) -> Option<&str> {
        self.resource_uri()
            .and_then(|uri| uri.strip_prefix(CONTENT_SCHEME))
            .and_then(|rest| rest.strip_prefix(':'))
            .filter(|id| !id.is_empty())
    }

    /// Values of a string or string-array attribute
    pub fn string_values(&self, name: &str) -> BTreeSet<String> {
        match self.attributes.get(name) {
            Some(serde_json::Value::String(s)) => BTreeSet::from([s.clone()]),
            Some(serde_json::Value::Array(values)) => values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => BTreeSet::new(),
        }
    }
}

impl Default for Item {
    fn default() -> Self {
        Self::new()
    }
}

/// Binary content paired with the item that describes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(default)]
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    #[serde(default)]
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
    pub item: Item,
}

impl ContentItem {
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>, item: Item) -> Self {
        Self {
            id: String::new(),
            filename: filename.into(),
            mime_type: mime_type.into(),
            data,
            qualifier: None,
            item,
        }
    }

    pub fn uri(&self) -> String {
        match &self.qualifier {
            Some(q) => format!("{}:{}#{}", CONTENT_SCHEME, self.id, q),
            None => format!("{}:{}", CONTENT_SCHEME, self.id),
        }
    }
}

/// A retrieved resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

/// Capability flags a bound source can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// The framework's own local index
    Local,
    Readable,
    Writable,
    /// Remote source queried through federation
    Federated,
    /// Binary content store paired with the local index
    Content,
}

pub type SecurityAttributes = HashMap<String, BTreeSet<String>>;
