//! Registry of bound sources
//!
//! Sources are bound and unbound at runtime by whatever wires the process
//! together. The registry holds shared handles only; it never mutates a
//! source. Changes are announced on a broadcast channel so the availability
//! poller can seed and drop cache entries.

use catalog_core::{Capability, CatalogError, ContentStore, ReadableSource, Source, WritableSource};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 256;

/// A bound backend together with the capability views it offers
#[derive(Clone)]
pub struct SourceBinding {
    id: String,
    capabilities: BTreeSet<Capability>,
    source: Arc<dyn Source>,
    reader: Option<Arc<dyn ReadableSource>>,
    writer: Option<Arc<dyn WritableSource>>,
    content: Option<Arc<dyn ContentStore>>,
}

impl SourceBinding {
    /// The framework's own index: readable, writable, eventable
    pub fn local_index<S>(source: Arc<S>) -> Self
    where
        S: ReadableSource + WritableSource + 'static,
    {
        Self {
            id: source.id().to_string(),
            capabilities: BTreeSet::from([Capability::Local, Capability::Readable, Capability::Writable]),
            source: source.clone(),
            reader: Some(source.clone()),
            writer: Some(source),
            content: None,
        }
    }

    /// Read-only remote source reached through federation
    pub fn federated<S>(source: Arc<S>) -> Self
    where
        S: ReadableSource + 'static,
    {
        Self {
            id: source.id().to_string(),
            capabilities: BTreeSet::from([Capability::Readable, Capability::Federated]),
            source: source.clone(),
            reader: Some(source),
            writer: None,
            content: None,
        }
    }

    /// Remote read-write store; writable only when named as a destination
    pub fn remote_store<S>(source: Arc<S>) -> Self
    where
        S: ReadableSource + WritableSource + 'static,
    {
        Self {
            id: source.id().to_string(),
            capabilities: BTreeSet::from([Capability::Readable, Capability::Writable]),
            source: source.clone(),
            reader: Some(source.clone()),
            writer: Some(source),
            content: None,
        }
    }

    /// Binary store paired with the local index
    pub fn content_store<S>(source: Arc<S>) -> Self
    where
        S: ContentStore + 'static,
    {
        Self {
            id: source.id().to_string(),
            capabilities: BTreeSet::from([Capability::Content]),
            source: source.clone(),
            reader: None,
            writer: None,
            content: Some(source),
        }
    }

    /// Also take part in enterprise queries
    pub fn with_federation(mut self) -> Self {
        if self.reader.is_some() {
            self.capabilities.insert(Capability::Federated);
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn source(&self) -> &Arc<dyn Source> {
        &self.source
    }

    pub fn reader(&self) -> Option<&Arc<dyn ReadableSource>> {
        self.reader.as_ref()
    }

    pub fn writer(&self) -> Option<&Arc<dyn WritableSource>> {
        self.writer.as_ref()
    }

    pub fn content(&self) -> Option<&Arc<dyn ContentStore>> {
        self.content.as_ref()
    }
}

impl fmt::Debug for SourceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceBinding")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Bound { source_id: String },
    Unbound { source_id: String },
}

/// Current set of bound sources, in bind order
pub struct SourceRegistry {
    bindings: RwLock<Vec<Arc<SourceBinding>>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            bindings: RwLock::new(Vec::new()),
            events,
        }
    }

    /// Bind a source. Identifiers are unique across the registry.
    pub fn register(&self, binding: SourceBinding) -> Result<(), CatalogError> {
        let source_id = binding.id().to_string();
        {
            let mut bindings = self.bindings.write();
            if bindings.iter().any(|b| b.id() == source_id) {
                return Err(CatalogError::Configuration(format!(
                    "source '{}' is already registered",
                    source_id
                )));
            }
            bindings.push(Arc::new(binding));
        }

        info!("Source '{}' bound", source_id);
        self.notify(RegistryEvent::Bound { source_id });
        Ok(())
    }

    pub fn unregister(&self, source_id: &str) -> Option<Arc<SourceBinding>> {
        let removed = {
            let mut bindings = self.bindings.write();
            let position = bindings.iter().position(|b| b.id() == source_id)?;
            bindings.remove(position)
        };

        info!("Source '{}' unbound", source_id);
        self.notify(RegistryEvent::Unbound {
            source_id: source_id.to_string(),
        });
        Some(removed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub fn get(&self, source_id: &str) -> Option<Arc<SourceBinding>> {
        self.bindings.read().iter().find(|b| b.id() == source_id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<SourceBinding>> {
        self.bindings.read().clone()
    }

    pub fn with_capability(&self, capability: Capability) -> Vec<Arc<SourceBinding>> {
        self.bindings
            .read()
            .iter()
            .filter(|b| b.has(capability))
            .cloned()
            .collect()
    }

    pub fn local_index(&self) -> Option<Arc<SourceBinding>> {
        self.with_capability(Capability::Local).into_iter().next()
    }

    pub fn content_store(&self) -> Option<Arc<SourceBinding>> {
        self.with_capability(Capability::Content).into_iter().next()
    }

    pub fn federated(&self) -> Vec<Arc<SourceBinding>> {
        self.with_capability(Capability::Federated)
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }

    fn notify(&self, event: RegistryEvent) {
        // Nobody listening yet is fine; the poller seeds from `all()` on start
        if self.events.send(event.clone()).is_err() {
            debug!("No registry listeners for {:?}", event);
        }
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
