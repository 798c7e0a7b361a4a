//! EventBus implementation with ordered delivery

use super::*;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

/// Topic-routed event bus.
///
/// Handlers for a topic are awaited one event at a time, so every handler
/// observes events in publish order. Stream subscribers get the same order
/// through a broadcast channel.
pub struct EventBus {
    subscriptions: Subscriptions,

    publisher: broadcast::Sender<CatalogEvent>,

    config: DeliveryConfig,

    stats: Arc<RwLock<EventBusStats>>,
}

impl EventBus {
    pub fn new(config: DeliveryConfig) -> Self {
        let (publisher, _) = broadcast::channel(config.channel_capacity.max(1));

        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            publisher,
            config,
            stats: Arc::new(RwLock::new(EventBusStats::default())),
        }
    }

    /// Receiver for every event published from now on
    pub fn subscribe_stream(&self) -> broadcast::Receiver<CatalogEvent> {
        self.publisher.subscribe()
    }

    pub async fn get_stats(&self) -> EventBusStats {
        self.stats.read().await.clone()
    }

    pub async fn shutdown(&self) {
        info!("Shutting down EventBus");
        let mut subs = self.subscriptions.write().await;
        subs.clear();
    }

    async fn update_stats<F>(&self, update_fn: F)
    where
        F: FnOnce(&mut EventBusStats),
    {
        let mut stats = self.stats.write().await;
        update_fn(&mut stats);
    }

    /// Deliver to one handler, bounded by the handler timeout
    async fn deliver_event_safely(&self, handler: &Arc<dyn EventHandler>, event: &CatalogEvent) {
        let handler_name = handler.name();
        let topic = event.topic();
        let start_time = Instant::now();
        let delivery_timeout = Duration::from_millis(self.config.handler_timeout_ms);

        match timeout(delivery_timeout, handler.handle(event.clone())).await {
            Ok(Ok(())) => {
                debug!(
                    "Event delivered to handler '{}' on topic '{}' in {:?}",
                    handler_name,
                    topic,
                    start_time.elapsed()
                );
                self.update_stats(|stats| stats.total_events_delivered += 1)
                    .await;
            }
            Ok(Err(e)) => {
                error!(
                    "Handler '{}' failed to process event on topic '{}': {}",
                    handler_name, topic, e
                );
                self.update_stats(|stats| stats.failed_deliveries += 1).await;
            }
            Err(_timeout) => {
                warn!(
                    "Handler '{}' timed out processing event on topic '{}' (>{:?})",
                    handler_name, topic, delivery_timeout
                );
                self.update_stats(|stats| {
                    stats.failed_deliveries += 1;
                    stats.slow_handlers.push(format!("{}:{}", topic, handler_name));
                })
                .await;
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DeliveryConfig::default())
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, event: CatalogEvent) -> Result<()> {
        let topic = event.topic();

        // No receivers is not an error
        if let Ok(receivers) = self.publisher.send(event.clone()) {
            debug!("Broadcast event on '{}' to {} receivers", topic, receivers);
        }
        self.update_stats(|stats| stats.total_events_published += 1)
            .await;

        let handlers: Vec<Arc<dyn EventHandler>> = {
            let subscriptions = self.subscriptions.read().await;
            subscriptions.get(topic).cloned().unwrap_or_default()
        };

        for handler in &handlers {
            self.deliver_event_safely(handler, &event).await;
        }

        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for EventBus {
    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> Result<()> {
        let handler_name = handler.name();
        let active = {
            let mut subscriptions = self.subscriptions.write().await;
            subscriptions
                .entry(topic.to_string())
                .or_insert_with(Vec::new)
                .push(handler);
            subscriptions.values().map(Vec::len).sum()
        };

        info!("Handler '{}' subscribed to topic '{}'", handler_name, topic);
        self.update_stats(|stats| stats.active_subscriptions = active)
            .await;
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str, handler_name: &str) -> Result<()> {
        let active = {
            let mut subscriptions = self.subscriptions.write().await;
            if let Some(handlers) = subscriptions.get_mut(topic) {
                let original_len = handlers.len();
                handlers.retain(|h| h.name() != handler_name);
                if handlers.len() < original_len {
                    info!(
                        "Unsubscribed handler '{}' from topic '{}'",
                        handler_name, topic
                    );
                }
                if handlers.is_empty() {
                    subscriptions.remove(topic);
                }
            }
            subscriptions.values().map(Vec::len).sum()
        };

        self.update_stats(|stats| stats.active_subscriptions = active)
            .await;
        Ok(())
    }

    async fn topics(&self) -> Vec<String> {
        let subscriptions = self.subscriptions.read().await;
        subscriptions.keys().cloned().collect()
    }
}
