//! Event topics for the catalog

/// Standard event topics
pub struct Topics;

impl Topics {
    pub const ITEM: &'static str = "catalog.item";
    pub const ITEM_CREATED: &'static str = "catalog.item.created";
    pub const ITEM_UPDATED: &'static str = "catalog.item.updated";
    pub const ITEM_DELETED: &'static str = "catalog.item.deleted";

    pub fn all_item_topics() -> [&'static str; 3] {
        [Self::ITEM_CREATED, Self::ITEM_UPDATED, Self::ITEM_DELETED]
    }
}
