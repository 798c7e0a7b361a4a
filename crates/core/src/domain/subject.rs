//! Caller identity attached to requests

use super::SecurityAttributes;
use crate::*;
use std::collections::BTreeSet;

/// Authenticated caller. Authentication happens outside the framework;
/// by the time a request arrives the subject's attributes are trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    #[serde(default)]
    pub attributes: SecurityAttributes,
}

impl Subject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: SecurityAttributes::new(),
        }
    }

    pub fn with_attribute<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .entry(key.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn values(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.attributes.get(key)
    }
}
