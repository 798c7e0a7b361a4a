//! Change notifications for local writes
//!
//! One event per affected item, published in response order and awaited one
//! at a time, so the last event any listener sees is for the last item in
//! the list. Only items attributed to the local index are announced.

use catalog_core::{CatalogEvent, EventBus, EventPublisher, Item, ItemEventKind, Update, Uuid};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct EventNotifier {
    bus: Arc<EventBus>,
    framework_id: String,
}

impl EventNotifier {
    pub fn new(bus: Arc<EventBus>, framework_id: impl Into<String>) -> Self {
        Self {
            bus,
            framework_id: framework_id.into(),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub async fn created(&self, local_id: &str, items: &[Item]) -> usize {
        let correlation_id = Uuid::new_v4();
        let mut published = 0;
        for item in items.iter().filter(|item| is_local(item, local_id)) {
            self.publish(ItemEventKind::Created, item.clone(), None, correlation_id).await;
            published += 1;
        }
        published
    }

    pub async fn updated(&self, local_id: &str, updates: &[Update]) -> usize {
        let correlation_id = Uuid::new_v4();
        let mut published = 0;
        for update in updates.iter().filter(|update| is_local(&update.new, local_id)) {
            self.publish(
                ItemEventKind::Updated,
                update.new.clone(),
                Some(update.old.clone()),
                correlation_id,
            )
            .await;
            published += 1;
        }
        published
    }

    pub async fn deleted(&self, local_id: &str, items: &[Item]) -> usize {
        let correlation_id = Uuid::new_v4();
        let mut published = 0;
        for item in items.iter().filter(|item| is_local(item, local_id)) {
            self.publish(ItemEventKind::Deleted, item.clone(), None, correlation_id).await;
            published += 1;
        }
        published
    }

    async fn publish(&self, kind: ItemEventKind, item: Item, previous: Option<Item>, correlation_id: Uuid) {
        let item_id = item.id.clone();
        let event = CatalogEvent {
            id: Uuid::new_v4(),
            kind,
            item,
            previous,
            timestamp: Utc::now(),
            source: self.framework_id.clone(),
            correlation_id,
        };

        match self.bus.publish(event).await {
            Ok(()) => debug!("Published {:?} for item '{}'", kind, item_id),
            Err(e) => warn!("Failed to publish {:?} for item '{}': {}", kind, item_id, e),
        }
    }
}

fn is_local(item: &Item, local_id: &str) -> bool {
    item.source_id.as_deref() == Some(local_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(id: &str) -> Item {
        let mut item = Item::with_id(id);
        item.source_id = Some("local".to_string());
        item
    }

    #[tokio::test]
    async fn test_events_follow_response_order() {
        let bus = Arc::new(EventBus::default());
        let mut stream = bus.subscribe_stream();
        let notifier = EventNotifier::new(bus, "catalog");

        let published = notifier.created("local", &[local("a"), local("b"), local("c")]).await;
        assert_eq!(published, 3);

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(stream.recv().await.unwrap().item.id);
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_remote_items_are_not_announced() {
        let bus = Arc::new(EventBus::default());
        let notifier = EventNotifier::new(bus.clone(), "catalog");

        let mut remote = Item::with_id("r");
        remote.source_id = Some("store-a".to_string());
        assert_eq!(notifier.deleted("local", &[remote, local("l")]).await, 1);
        assert_eq!(bus.get_stats().await.total_events_published, 1);
    }
}
