//! CLI configuration: framework settings, logging and the sources to bind
//!
//! ```toml
//! [framework]
//! id = "catalog"
//!
//! [logging]
//! level = "warn"
//!
//! [[sources]]
//! id = "local"
//! role = "local"
//! items = "local.json"
//! ```

use anyhow::{Context, Result};
use catalog_core::memory::{InMemoryCatalog, InMemoryContentStore};
use catalog_core::Item;
use common::LoggingConfig;
use federation::{CatalogFramework, FrameworkConfig, SourceBinding};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceRole {
    Local,
    Federated,
    Remote,
    Content,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    pub id: String,
    pub role: SourceRole,
    /// JSON array of items to seed, relative to the config file
    #[serde(default)]
    pub items: Option<PathBuf>,
    #[serde(default = "default_available")]
    pub available: bool,
    /// Attributes a caller must hold to reach this source
    #[serde(default)]
    pub security: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    /// Also query a local or remote store during enterprise queries
    #[serde(default)]
    pub federated: bool,
}

fn default_available() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub framework: FrameworkConfig,
    pub logging: LoggingConfig,
    pub sources: Vec<SourceSpec>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl CliConfig {
    /// Load `path`, or fall back to defaults with a single empty local index
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                let mut config: Self =
                    toml::from_str(&text).with_context(|| format!("Invalid config file {}", path.display()))?;
                config.base_dir = path.parent().map(Path::to_path_buf);
                config
            }
            None => Self {
                sources: vec![SourceSpec {
                    id: "local".to_string(),
                    role: SourceRole::Local,
                    items: None,
                    available: true,
                    security: BTreeMap::new(),
                    latency_ms: None,
                    federated: false,
                }],
                ..Self::default()
            },
        };

        config.framework.apply_overrides(|key| std::env::var(key).ok())?;
        config.framework.validate()?;
        Ok(config)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn seed_items(&self, spec: &SourceSpec) -> Result<Vec<Item>> {
        let Some(path) = &spec.items else {
            return Ok(Vec::new());
        };
        let path = self.resolve(path);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read items for '{}' from {}", spec.id, path.display()))?;
        let items: Vec<Item> = serde_json::from_str(&text)
            .with_context(|| format!("Items file {} is not a JSON array of items", path.display()))?;
        debug!("Seeding {} items into '{}'", items.len(), spec.id);
        Ok(items)
    }

    /// Build the framework with every configured source bound and polled once
    pub async fn build_framework(&self) -> Result<CatalogFramework> {
        let mut builder = CatalogFramework::builder(self.framework.clone());

        for spec in &self.sources {
            let binding = match spec.role {
                SourceRole::Content => {
                    let store = Arc::new(InMemoryContentStore::new(spec.id.clone()));
                    store.set_available(spec.available);
                    SourceBinding::content_store(store)
                }
                role => {
                    let mut catalog = InMemoryCatalog::new(spec.id.clone()).with_items(self.seed_items(spec)?);
                    for (key, values) in &spec.security {
                        catalog = catalog.with_security(key.clone(), values.clone());
                    }
                    catalog.set_available(spec.available);
                    if let Some(ms) = spec.latency_ms {
                        catalog.set_latency(Duration::from_millis(ms));
                    }
                    let catalog = Arc::new(catalog);
                    let binding = match role {
                        SourceRole::Local => SourceBinding::local_index(catalog),
                        SourceRole::Remote => SourceBinding::remote_store(catalog),
                        _ => SourceBinding::federated(catalog),
                    };
                    if spec.federated && role != SourceRole::Federated {
                        binding.with_federation()
                    } else {
                        binding
                    }
                }
            };
            builder = builder.source(binding);
        }

        let framework = builder.build()?;
        let polled = framework.refresh_availability().await;
        info!("Catalog '{}' ready with {} sources", self.framework.id, polled);
        Ok(framework)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_sources_and_sections() {
        let config: CliConfig = toml::from_str(
            r#"
            [framework]
            id = "catalog-east"
            fanout = true

            [logging]
            level = "debug"
            format = "json"

            [[sources]]
            id = "alpha"
            role = "federated"
            security = { clearance = ["secret"] }
            "#,
        )
        .unwrap();

        assert_eq!(config.framework.id, "catalog-east");
        assert!(config.framework.fanout);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.sources[0].role, SourceRole::Federated);
        assert!(config.sources[0].available);
        assert_eq!(config.sources[0].security["clearance"], vec!["secret"]);
    }

    #[tokio::test]
    async fn test_items_are_read_relative_to_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("items.json"), r#"[{"id": "a", "attributes": {"title": "A"}}]"#).unwrap();
        let config_path = dir.path().join("catalog.toml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "[[sources]]\nid = \"local\"\nrole = \"local\"\nitems = \"items.json\"").unwrap();

        let config = CliConfig::load(Some(&config_path)).unwrap();
        let framework = config.build_framework().await.unwrap();

        assert!(framework.registry().local_index().is_some());
        assert!(framework.availability().is_available("local"));
    }

    #[test]
    fn test_default_config_has_a_local_index() {
        let config = CliConfig::load(None).unwrap();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].role, SourceRole::Local);
    }
}
