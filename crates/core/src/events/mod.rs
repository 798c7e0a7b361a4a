//! Catalog event bus
//!
//! Successful local writes are announced here, one event per affected item.
//! Topics: catalog.item.created, catalog.item.updated, catalog.item.deleted

use crate::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod bus;
pub mod topics;

pub use bus::*;
pub use topics::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemEventKind {
    Created,
    Updated,
    Deleted,
}

impl ItemEventKind {
    pub fn topic(self) -> &'static str {
        match self {
            ItemEventKind::Created => Topics::ITEM_CREATED,
            ItemEventKind::Updated => Topics::ITEM_UPDATED,
            ItemEventKind::Deleted => Topics::ITEM_DELETED,
        }
    }
}

/// One affected item of a completed write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEvent {
    pub id: Uuid,
    pub kind: ItemEventKind,
    pub item: Item,
    /// Previous version, for updates
    pub previous: Option<Item>,
    pub timestamp: DateTime<Utc>,
    /// Framework that emitted the event
    pub source: String,
    /// Shared by every event of one operation
    pub correlation_id: Uuid,
}

impl CatalogEvent {
    pub fn topic(&self) -> &'static str {
        self.kind.topic()
    }
}

/// Event handler trait
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: CatalogEvent) -> Result<()>;

    fn name(&self) -> String;
}

/// Event publisher trait
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Resolves once every subscribed handler has seen the event
    async fn publish(&self, event: CatalogEvent) -> Result<()>;
}

/// Event subscriber trait
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> Result<()>;

    async fn unsubscribe(&self, topic: &str, handler_name: &str) -> Result<()>;

    async fn topics(&self) -> Vec<String>;
}

/// Delivery configuration
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Capacity of the broadcast channel observed by stream subscribers
    pub channel_capacity: usize,
    /// Handlers slower than this are skipped for the event and counted as failed
    pub handler_timeout_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            handler_timeout_ms: 1000,
        }
    }
}

/// Event bus statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventBusStats {
    pub total_events_published: u64,
    pub total_events_delivered: u64,
    pub failed_deliveries: u64,
    pub active_subscriptions: usize,
    pub slow_handlers: Vec<String>,
}

pub(crate) type Subscriptions = Arc<RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>>;
