//! Destination resolution
//!
//! Turns a request's destination set (or the default local set) and caller
//! subject into the concrete sources to dispatch to. Reads look at cached
//! availability only.
//!
//! Queries drop destinations that are unknown, unauthorized or unavailable
//! and keep going with the rest. Writes never fail open: a named destination
//! the caller may not use aborts the operation.

use crate::availability::AvailabilityCache;
use crate::registry::{SourceBinding, SourceRegistry};
use crate::security;
use catalog_core::{Capability, CatalogError, ProcessingDetail, RequestContext};
use std::sync::Arc;
use tracing::{debug, warn};

/// Read targets plus the destinations dropped on the way
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub targets: Vec<Arc<SourceBinding>>,
    pub dropped: Vec<ProcessingDetail>,
}

impl Resolution {
    pub fn ids(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.id().to_string()).collect()
    }
}

/// Write targets, split by capability
#[derive(Debug, Clone, Default)]
pub struct WriteTargets {
    /// Item destinations, in resolution order
    pub stores: Vec<Arc<SourceBinding>>,
    /// Content store paired with the local index for content-bearing writes
    pub content: Option<Arc<SourceBinding>>,
}

impl WriteTargets {
    pub fn includes_local(&self) -> bool {
        self.stores.iter().any(|s| s.has(Capability::Local))
    }

    pub fn ids(&self) -> Vec<String> {
        self.stores.iter().map(|s| s.id().to_string()).collect()
    }
}

pub struct DestinationResolver {
    registry: Arc<SourceRegistry>,
    availability: Arc<AvailabilityCache>,
}

impl DestinationResolver {
    pub fn new(registry: Arc<SourceRegistry>, availability: Arc<AvailabilityCache>) -> Self {
        Self {
            registry,
            availability,
        }
    }

    /// Readable targets for a query or resource lookup.
    ///
    /// An empty destination set means the local index, or the local index
    /// plus every federated source when `enterprise` is set. Fails only when
    /// nothing usable remains.
    pub fn resolve_query(&self, context: &RequestContext, enterprise: bool) -> Result<Resolution, CatalogError> {
        let requested = self.requested_reads(context, enterprise);
        if requested.is_empty() {
            return Err(CatalogError::Federation(
                "no local index or federated sources are bound".to_string(),
            ));
        }

        let mut resolution = Resolution::default();
        for source_id in requested {
            match self.check_read(&source_id, context) {
                Ok(binding) => resolution.targets.push(binding),
                Err(reason) => {
                    debug!("Dropping '{}' from query: {}", source_id, reason);
                    resolution.dropped.push(ProcessingDetail::new(source_id, reason));
                }
            }
        }

        if resolution.targets.is_empty() {
            let reasons: Vec<String> = resolution
                .dropped
                .iter()
                .map(|d| format!("{}: {}", d.source_id, d.message))
                .collect();
            warn!("Query resolved to no usable sources ({})", reasons.join("; "));
            return Err(CatalogError::Federation(format!(
                "no usable sources: {}",
                reasons.join("; ")
            )));
        }
        Ok(resolution)
    }

    fn requested_reads(&self, context: &RequestContext, enterprise: bool) -> Vec<String> {
        if !context.destinations.is_empty() {
            return context.destinations.iter().cloned().collect();
        }

        let mut ids: Vec<String> = self
            .registry
            .local_index()
            .map(|local| vec![local.id().to_string()])
            .unwrap_or_default();
        if enterprise {
            for binding in self.registry.federated() {
                if !ids.iter().any(|id| id == binding.id()) {
                    ids.push(binding.id().to_string());
                }
            }
        }
        ids
    }

    fn check_read(&self, source_id: &str, context: &RequestContext) -> Result<Arc<SourceBinding>, String> {
        let binding = self
            .registry
            .get(source_id)
            .ok_or_else(|| "unknown source".to_string())?;
        if binding.reader().is_none() {
            return Err("source is not readable".to_string());
        }
        security::check(context.subject.as_ref(), &binding.source().security_attributes())
            .map_err(|denial| format!("not authorized: {}", denial))?;
        if !self.availability.is_available(source_id) {
            return Err("source is unavailable".to_string());
        }
        Ok(binding)
    }

    /// Destinations for a create, update or delete.
    ///
    /// With no explicit destinations the local index is the target, paired
    /// with the content store when `content_bearing`. Any target that is
    /// unknown, unwritable or unauthorized is fatal; any target cached
    /// unavailable fails with `SourceUnavailable`.
    pub fn resolve_write(&self, context: &RequestContext, content_bearing: bool) -> Result<WriteTargets, CatalogError> {
        let mut targets = WriteTargets::default();

        if context.destinations.is_empty() {
            let local = self
                .registry
                .local_index()
                .ok_or_else(|| CatalogError::ingest("no local index is bound"))?;
            targets.stores.push(local);
        } else {
            for source_id in &context.destinations {
                let binding = self
                    .registry
                    .get(source_id)
                    .ok_or_else(|| CatalogError::ingest(format!("unknown destination '{}'", source_id)))?;
                if binding.writer().is_none() {
                    return Err(CatalogError::ingest(format!(
                        "destination '{}' does not accept writes",
                        source_id
                    )));
                }
                targets.stores.push(binding);
            }
        }

        if content_bearing {
            if !targets.includes_local() {
                return Err(CatalogError::ingest(
                    "content can only be written alongside the local index",
                ));
            }
            let content = self
                .registry
                .content_store()
                .ok_or_else(|| CatalogError::ingest("no content store is bound"))?;
            targets.content = Some(content);
        }

        for binding in targets.stores.iter().chain(targets.content.iter()) {
            if let Err(denial) = security::check(context.subject.as_ref(), &binding.source().security_attributes()) {
                warn!("Write to '{}' refused: {}", binding.id(), denial);
                return Err(CatalogError::ingest(format!(
                    "not authorized to write to '{}': {}",
                    binding.id(),
                    denial
                )));
            }
            if !self.availability.is_available(binding.id()) {
                return Err(CatalogError::unavailable(binding.id()));
            }
        }

        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::memory::{InMemoryCatalog, InMemoryContentStore};
    use catalog_core::Subject;

    struct Fixture {
        resolver: DestinationResolver,
        cache: Arc<AvailabilityCache>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(SourceRegistry::new());
        let cache = Arc::new(AvailabilityCache::new());
        registry
            .register(SourceBinding::local_index(Arc::new(InMemoryCatalog::new("local"))))
            .unwrap();
        registry
            .register(SourceBinding::content_store(Arc::new(InMemoryContentStore::new("content"))))
            .unwrap();
        registry
            .register(SourceBinding::federated(Arc::new(InMemoryCatalog::new("fed-open"))))
            .unwrap();
        registry
            .register(SourceBinding::federated(Arc::new(
                InMemoryCatalog::new("fed-secret").with_security("clearance", ["secret"]),
            )))
            .unwrap();
        registry
            .register(SourceBinding::remote_store(Arc::new(
                InMemoryCatalog::new("store-secret").with_security("clearance", ["secret"]),
            )))
            .unwrap();
        for id in ["local", "content", "fed-open", "fed-secret", "store-secret"] {
            cache.record(id, true);
        }
        Fixture {
            resolver: DestinationResolver::new(registry, cache.clone()),
            cache,
        }
    }

    fn cleared() -> Subject {
        Subject::new("alice").with_attribute("clearance", ["secret"])
    }

    #[test]
    fn test_default_query_targets_local_index() {
        let f = fixture();
        let resolution = f.resolver.resolve_query(&RequestContext::new(), false).unwrap();
        assert_eq!(resolution.ids(), vec!["local"]);
    }

    #[test]
    fn test_enterprise_query_drops_unauthorized_sources() {
        let f = fixture();
        let resolution = f.resolver.resolve_query(&RequestContext::new(), true).unwrap();
        assert_eq!(resolution.ids(), vec!["local", "fed-open"]);
        assert_eq!(resolution.dropped.len(), 1);
        assert_eq!(resolution.dropped[0].source_id, "fed-secret");

        let context = RequestContext::new().as_subject(cleared());
        let resolution = f.resolver.resolve_query(&context, true).unwrap();
        assert_eq!(resolution.ids(), vec!["local", "fed-open", "fed-secret"]);
    }

    #[test]
    fn test_query_fails_only_when_nothing_remains() {
        let f = fixture();
        f.cache.record("fed-open", false);
        let context = RequestContext::new().to(["fed-open", "fed-secret", "missing"]);
        let err = f.resolver.resolve_query(&context, false).unwrap_err();
        assert!(matches!(err, CatalogError::Federation(_)));

        f.cache.record("fed-open", true);
        let resolution = f.resolver.resolve_query(&context, false).unwrap();
        assert_eq!(resolution.ids(), vec!["fed-open"]);
        assert_eq!(resolution.dropped.len(), 2);
    }

    #[test]
    fn test_unauthorized_explicit_write_is_fatal() {
        let f = fixture();
        let context = RequestContext::new().to(["local", "store-secret"]);
        let err = f.resolver.resolve_write(&context, false).unwrap_err();
        assert!(matches!(err, CatalogError::Ingest { .. }));

        let context = context.as_subject(cleared());
        let targets = f.resolver.resolve_write(&context, false).unwrap();
        assert_eq!(targets.ids(), vec!["local", "store-secret"]);
    }

    #[test]
    fn test_unavailable_local_index_refuses_writes() {
        let f = fixture();
        f.cache.record("local", false);
        let err = f.resolver.resolve_write(&RequestContext::new(), false).unwrap_err();
        assert!(matches!(err, CatalogError::SourceUnavailable { ref source_id } if source_id == "local"));
    }

    #[test]
    fn test_content_writes_pair_with_local_index() {
        let f = fixture();
        let targets = f.resolver.resolve_write(&RequestContext::new(), true).unwrap();
        assert_eq!(targets.ids(), vec!["local"]);
        assert_eq!(targets.content.unwrap().id(), "content");

        f.cache.record("content", false);
        assert!(matches!(
            f.resolver.resolve_write(&RequestContext::new(), true),
            Err(CatalogError::SourceUnavailable { .. })
        ));
    }

    #[test]
    fn test_federated_source_is_not_a_write_destination() {
        let f = fixture();
        let context = RequestContext::new().to(["fed-open"]);
        assert!(f.resolver.resolve_write(&context, false).is_err());
    }
}
