//! Hook points for attribute policy and versioning
//!
//! The framework owns *when* these run; what they do lives with the
//! collaborator that implements them.

use crate::*;

/// Adds descriptors (and optionally values) to an item's schema.
///
/// Runs on created, updated and deleted items and on query results alike.
pub trait AttributeInjector: Send + Sync {
    fn inject(&self, item: Item) -> Item;
}

/// Supplies default values for attributes an item leaves unset
pub trait DefaultAttributeValues: Send + Sync {
    /// Defaults for `item_type`, type-specific entries taking precedence over global ones
    fn defaults_for(&self, item_type: &str) -> Vec<(String, serde_json::Value)>;
}

/// Callbacks around update and delete. The framework only looks at success or failure.
#[async_trait::async_trait]
pub trait VersioningHook: Send + Sync {
    fn name(&self) -> &str;

    async fn before_update(&self, _old: &Item, _new: &Item) -> Result<()> {
        Ok(())
    }

    async fn after_update(&self, _old: &Item, _new: &Item) -> Result<()> {
        Ok(())
    }

    async fn before_delete(&self, _item: &Item) -> Result<()> {
        Ok(())
    }

    async fn after_delete(&self, _item: &Item) -> Result<()> {
        Ok(())
    }
}
