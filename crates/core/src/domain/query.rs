//! Query model: predicate tree, paging and sort

use super::{attributes, Item};
use crate::*;
use std::cmp::Ordering;
use std::time::Duration;

/// Predicate tree evaluated against items.
///
/// There is no textual grammar here; protocol layers translate their own
/// query languages into this tree before calling the framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Any,
    Equals {
        attribute: String,
        value: serde_json::Value,
    },
    /// Case-insensitive substring match on a string attribute
    Contains { attribute: String, text: String },
    IdIn { ids: Vec<String> },
    And { filters: Vec<Filter> },
    Or { filters: Vec<Filter> },
    Not { filter: Box<Filter> },
}

impl Filter {
    pub fn equals(attribute: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Filter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn contains(attribute: impl Into<String>, text: impl Into<String>) -> Self {
        Filter::Contains {
            attribute: attribute.into(),
            text: text.into(),
        }
    }

    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::IdIn {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Structural check; an empty conjunction or disjunction is malformed
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            Filter::And { filters } | Filter::Or { filters } => {
                if filters.is_empty() {
                    return Err("empty logical filter".to_string());
                }
                filters.iter().try_for_each(Filter::validate)
            }
            Filter::Not { filter } => filter.validate(),
            Filter::Equals { attribute, .. } | Filter::Contains { attribute, .. } => {
                if attribute.is_empty() {
                    Err("filter names no attribute".to_string())
                } else {
                    Ok(())
                }
            }
            Filter::Any | Filter::IdIn { .. } => Ok(()),
        }
    }

    pub fn evaluate(&self, item: &Item) -> bool {
        match self {
            Filter::Any => true,
            Filter::Equals { attribute, value } => {
                if attribute == attributes::ID {
                    return value.as_str() == Some(item.id.as_str());
                }
                match item.get(attribute) {
                    Some(serde_json::Value::Array(values)) => values.contains(value),
                    Some(actual) => actual == value,
                    None => false,
                }
            }
            Filter::Contains { attribute, text } => {
                let needle = text.to_lowercase();
                item.get_str(attribute)
                    .map(|s| s.to_lowercase().contains(&needle))
                    .unwrap_or(false)
            }
            Filter::IdIn { ids } => ids.iter().any(|id| *id == item.id),
            Filter::And { filters } => filters.iter().all(|f| f.evaluate(item)),
            Filter::Or { filters } => filters.iter().any(|f| f.evaluate(item)),
            Filter::Not { filter } => !filter.evaluate(item),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortBy {
    pub attribute: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortBy {
    /// Sort key that orders by the per-result relevance score
    pub const RELEVANCE: &'static str = "relevance";
    /// Sort key that orders by the per-result distance
    pub const DISTANCE: &'static str = "distance";

    pub fn ascending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn descending(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            order: SortOrder::Descending,
        }
    }
}

/// Paged query against one or more sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub filter: Filter,
    /// 1-based index of the first result
    pub start_index: usize,
    pub page_size: usize,
    #[serde(default)]
    pub sort: Option<SortBy>,
    /// Falls back to the framework default when absent
    #[serde(default)]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub requires_exact_count: bool,
}

impl Query {
    pub const DEFAULT_PAGE_SIZE: usize = 10;

    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            start_index: 1,
            page_size: Self::DEFAULT_PAGE_SIZE,
            sort: None,
            timeout: None,
            requires_exact_count: false,
        }
    }

    pub fn page(mut self, start_index: usize, page_size: usize) -> Self {
        self.start_index = start_index;
        self.page_size = page_size;
        self
    }

    pub fn sorted_by(mut self, sort: SortBy) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn exact_count(mut self) -> Self {
        self.requires_exact_count = true;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.start_index == 0 {
            return Err("start index is 1-based and must be positive".to_string());
        }
        if self.page_size == 0 {
            return Err("page size must be positive".to_string());
        }
        self.filter.validate()
    }
}

/// Orders two JSON attribute values; absent values sort last
pub fn compare_values(a: Option<&serde_json::Value>, b: Option<&serde_json::Value>) -> Ordering {
    use serde_json::Value;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}
