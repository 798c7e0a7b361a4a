//! Shared fixtures for federation integration tests

#![allow(dead_code)]

use catalog_core::memory::{InMemoryCatalog, InMemoryContentStore};
use catalog_core::Item;
use federation::{CatalogFramework, CatalogFrameworkBuilder, FrameworkConfig, SourceBinding};
use std::sync::Arc;

pub const LOCAL: &str = "local";

pub fn config() -> FrameworkConfig {
    FrameworkConfig {
        id: "catalog-facade".to_string(),
        ..FrameworkConfig::default()
    }
}

pub fn local_index() -> Arc<InMemoryCatalog> {
    Arc::new(InMemoryCatalog::new(LOCAL))
}

pub fn content_store() -> Arc<InMemoryContentStore> {
    Arc::new(InMemoryContentStore::new("content"))
}

/// A federated source pre-seeded with `count` titled items
pub fn federated_source(id: &str, count: usize) -> Arc<InMemoryCatalog> {
    let items = (0..count).map(|i| Item::with_id(format!("{id}-{i}")).with_title(format!("{id} item {i}")));
    Arc::new(InMemoryCatalog::new(id).with_items(items))
}

pub fn titled(count: usize) -> Vec<Item> {
    (0..count).map(|i| Item::new().with_title(format!("item {i}"))).collect()
}

/// Build, then run one availability poll so bound sources are usable
pub async fn ready(builder: CatalogFrameworkBuilder) -> CatalogFramework {
    let framework = builder.build().expect("framework builds");
    framework.refresh_availability().await;
    framework
}

pub async fn local_framework() -> (CatalogFramework, Arc<InMemoryCatalog>) {
    let local = local_index();
    let framework = ready(CatalogFramework::builder(config()).source(SourceBinding::local_index(local.clone()))).await;
    (framework, local)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
