//! Create, update and delete through the framework facade

mod common;

use async_trait::async_trait;
use catalog_core::memory::InMemoryCatalog;
use catalog_core::{
    attributes, CatalogError, CreateRequest, DefaultAttributeValues, DeleteRequest, Item, ItemEventKind, ItemType,
    PluginResult, PreIngestPlugin, RequestContext, UpdateRequest, VersioningHook,
};
use common::*;
use federation::{CatalogFramework, DefaultValueRegistry, PluginChain, SourceBinding};
use mockall::{mock, predicate};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

mock! {
    pub Defaults {}
    impl DefaultAttributeValues for Defaults {
        fn defaults_for(&self, item_type: &str) -> Vec<(String, serde_json::Value)>;
    }
}

/// Records every versioning callback; optionally refuses updates
#[derive(Default)]
struct RecordingHook {
    calls: Mutex<Vec<String>>,
    refuse_updates: bool,
}

#[async_trait]
impl VersioningHook for RecordingHook {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn before_update(&self, old: &Item, _new: &Item) -> catalog_core::Result<()> {
        self.calls.lock().push(format!("before_update:{}", old.id));
        if self.refuse_updates {
            anyhow::bail!("history store is read-only");
        }
        Ok(())
    }

    async fn after_update(&self, _old: &Item, new: &Item) -> catalog_core::Result<()> {
        self.calls.lock().push(format!("after_update:{}", new.id));
        Ok(())
    }

    async fn before_delete(&self, item: &Item) -> catalog_core::Result<()> {
        self.calls.lock().push(format!("before_delete:{}", item.id));
        Ok(())
    }

    async fn after_delete(&self, item: &Item) -> catalog_core::Result<()> {
        self.calls.lock().push(format!("after_delete:{}", item.id));
        Ok(())
    }
}

#[derive(Default)]
struct CountingPreIngest {
    runs: AtomicUsize,
}

#[async_trait]
impl PreIngestPlugin for CountingPreIngest {
    fn name(&self) -> &str {
        "counting"
    }

    async fn process_create(&self, request: CreateRequest) -> PluginResult<CreateRequest> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(request)
    }
}

#[tokio::test]
async fn test_create_returns_one_id_per_item_and_events_end_with_last_item() {
    init_tracing();
    let (framework, local) = local_framework().await;
    let mut events = framework.events().subscribe_stream();

    let response = framework.create(CreateRequest::new(titled(5))).await.unwrap();

    assert_eq!(response.created.len(), 5);
    let ids: Vec<&str> = response.created.iter().map(|i| i.id.as_str()).collect();
    assert!(ids.iter().all(|id| !id.is_empty()));
    assert_eq!(local.len(), 5);

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.kind, ItemEventKind::Created);
        seen.push(event.item.id);
    }
    assert_eq!(seen.len(), 5);
    assert_eq!(seen.last().map(String::as_str), ids.last().copied());
}

#[tokio::test]
async fn test_create_to_named_store_without_local_index() {
    let store_a = Arc::new(InMemoryCatalog::new("storeA"));
    let framework = ready(CatalogFramework::builder(config()).source(SourceBinding::remote_store(store_a.clone()))).await;
    let mut events = framework.events().subscribe_stream();

    let request = CreateRequest::new(titled(1)).in_context(RequestContext::new().to(["storeA"]));
    let response = framework.create(request).await.unwrap();

    assert_eq!(response.created.len(), 1);
    assert_eq!(response.created[0].source_id.as_deref(), Some("storeA"));
    assert_eq!(store_a.len(), 1);
    assert!(events.try_recv().is_err(), "remote writes are not announced");
}

#[tokio::test]
async fn test_create_without_destinations_goes_to_local_index_only() {
    let local = local_index();
    let store_a = Arc::new(InMemoryCatalog::new("storeA"));
    let framework = ready(
        CatalogFramework::builder(config())
            .source(SourceBinding::local_index(local.clone()))
            .source(SourceBinding::remote_store(store_a.clone())),
    )
    .await;

    framework.create(CreateRequest::new(titled(2))).await.unwrap();

    assert_eq!(local.len(), 2);
    assert!(store_a.is_empty());
}

#[tokio::test]
async fn test_create_without_local_index_and_no_destination_fails() {
    let store_a = Arc::new(InMemoryCatalog::new("storeA"));
    let framework = ready(CatalogFramework::builder(config()).source(SourceBinding::remote_store(store_a))).await;

    let err = framework.create(CreateRequest::new(titled(1))).await.unwrap_err();
    assert!(matches!(err, CatalogError::Ingest { .. }));
}

#[tokio::test]
async fn test_defaults_fill_only_missing_attributes() {
    let local = local_index();
    let defaults = DefaultValueRegistry::new()
        .global(attributes::TITLE, "Default Title")
        .global(attributes::EXPIRATION, "2030-01-01T00:00:00Z")
        .for_type("custom", attributes::TITLE, "Custom Title")
        .for_type("custom", attributes::EXPIRATION, "2040-01-01T00:00:00Z");
    let framework = ready(
        CatalogFramework::builder(config())
            .source(SourceBinding::local_index(local))
            .defaults(Arc::new(defaults)),
    )
    .await;

    let items = vec![
        Item::new().with_title("has title"),
        Item::new().with_attribute(attributes::EXPIRATION, "2025-06-01T00:00:00Z"),
        Item::new()
            .with_title("has both")
            .with_attribute(attributes::EXPIRATION, "2026-06-01T00:00:00Z"),
        Item::new(),
        Item::new().of_type(ItemType::new("custom", ItemType::basic().descriptors)),
    ];
    let created = framework.create(CreateRequest::new(items)).await.unwrap().created;

    let summary: Vec<(Option<&str>, Option<&str>)> = created
        .iter()
        .map(|i| (i.title(), i.get_str(attributes::EXPIRATION)))
        .collect();
    assert_eq!(
        summary,
        vec![
            (Some("has title"), Some("2030-01-01T00:00:00Z")),
            (Some("Default Title"), Some("2025-06-01T00:00:00Z")),
            (Some("has both"), Some("2026-06-01T00:00:00Z")),
            (Some("Default Title"), Some("2030-01-01T00:00:00Z")),
            (Some("Custom Title"), Some("2040-01-01T00:00:00Z")),
        ]
    );
}

#[tokio::test]
async fn test_default_provider_is_consulted_per_item_type() {
    let mut defaults = MockDefaults::new();
    defaults
        .expect_defaults_for()
        .with(predicate::eq(ItemType::BASIC))
        .times(2)
        .returning(|_| vec![(attributes::TITLE.to_string(), json!("mocked"))]);

    let framework = ready(
        CatalogFramework::builder(config())
            .source(SourceBinding::local_index(local_index()))
            .defaults(Arc::new(defaults)),
    )
    .await;

    let created = framework.create(CreateRequest::new(vec![Item::new(), Item::new()])).await.unwrap().created;
    assert!(created.iter().all(|i| i.title() == Some("mocked")));
}

#[tokio::test]
async fn test_unavailable_local_index_fails_before_any_plugin_runs() {
    let local = local_index();
    let counting = Arc::new(CountingPreIngest::default());
    let framework = ready(
        CatalogFramework::builder(config())
            .source(SourceBinding::local_index(local.clone()))
            .plugins(PluginChain::new().with_pre_ingest(counting.clone())),
    )
    .await;

    local.set_available(false);
    framework.refresh_availability().await;

    let err = framework.create(CreateRequest::new(titled(1))).await.unwrap_err();
    assert!(matches!(err, CatalogError::SourceUnavailable { ref source_id } if source_id == LOCAL));
    assert_eq!(counting.runs.load(Ordering::SeqCst), 0);
    assert!(local.is_empty());
}

#[tokio::test]
async fn test_update_runs_versioning_hooks_and_announces_change() {
    let local = local_index();
    let hook = Arc::new(RecordingHook::default());
    let framework = ready(
        CatalogFramework::builder(config())
            .source(SourceBinding::local_index(local.clone()))
            .versioning_hook(hook.clone()),
    )
    .await;

    let created = framework.create(CreateRequest::new(titled(1))).await.unwrap().created;
    let id = created[0].id.clone();
    let mut events = framework.events().subscribe_stream();

    let response = framework
        .update(UpdateRequest::of_items(vec![Item::with_id(id.clone()).with_title("renamed")]))
        .await
        .unwrap();

    assert_eq!(response.updated.len(), 1);
    assert_eq!(response.updated[0].old.title(), Some("item 0"));
    assert_eq!(response.updated[0].new.title(), Some("renamed"));
    assert_eq!(local.get(&id).and_then(|i| i.title().map(str::to_string)), Some("renamed".to_string()));
    assert_eq!(
        *hook.calls.lock(),
        vec![format!("before_update:{id}"), format!("after_update:{id}")]
    );

    let event = events.try_recv().unwrap();
    assert_eq!(event.kind, ItemEventKind::Updated);
    assert_eq!(event.previous.and_then(|p| p.title().map(str::to_string)), Some("item 0".to_string()));
}

#[tokio::test]
async fn test_refusing_versioning_hook_blocks_update() {
    let local = local_index();
    let hook = Arc::new(RecordingHook {
        refuse_updates: true,
        ..RecordingHook::default()
    });
    let framework = ready(
        CatalogFramework::builder(config())
            .source(SourceBinding::local_index(local.clone()))
            .versioning_hook(hook),
    )
    .await;

    let id = framework.create(CreateRequest::new(titled(1))).await.unwrap().created[0].id.clone();
    let err = framework
        .update(UpdateRequest::of_items(vec![Item::with_id(id.clone()).with_title("renamed")]))
        .await
        .unwrap_err();

    assert!(matches!(err, CatalogError::Ingest { .. }));
    assert_eq!(local.get(&id).and_then(|i| i.title().map(str::to_string)), Some("item 0".to_string()));
}

#[tokio::test]
async fn test_delete_returns_removed_items_and_runs_hooks() {
    let local = local_index();
    let hook = Arc::new(RecordingHook::default());
    let framework = ready(
        CatalogFramework::builder(config())
            .source(SourceBinding::local_index(local.clone()))
            .versioning_hook(hook.clone()),
    )
    .await;

    let created = framework.create(CreateRequest::new(titled(3))).await.unwrap().created;
    let doomed = created[1].id.clone();
    let mut events = framework.events().subscribe_stream();

    let response = framework.delete(DeleteRequest::new([doomed.clone()])).await.unwrap();

    assert_eq!(response.deleted.len(), 1);
    assert_eq!(response.deleted[0].id, doomed);
    assert_eq!(local.len(), 2);
    assert_eq!(
        *hook.calls.lock(),
        vec![format!("before_delete:{doomed}"), format!("after_delete:{doomed}")]
    );
    assert_eq!(events.try_recv().unwrap().kind, ItemEventKind::Deleted);
}

#[tokio::test]
async fn test_partial_write_failure_is_reported_not_fatal() {
    let local = local_index();
    let store_a = Arc::new(InMemoryCatalog::new("storeA"));
    store_a.set_fail_writes(true);
    let framework = ready(
        CatalogFramework::builder(config())
            .source(SourceBinding::local_index(local.clone()))
            .source(SourceBinding::remote_store(store_a)),
    )
    .await;

    let request = CreateRequest::new(titled(2)).in_context(RequestContext::new().to([LOCAL, "storeA"]));
    let response = framework.create(request).await.unwrap();

    assert_eq!(response.created.len(), 2);
    assert_eq!(local.len(), 2);
    assert_eq!(response.processing_errors.len(), 1);
    assert_eq!(response.processing_errors[0].source_id, "storeA");
}
