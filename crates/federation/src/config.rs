//! Framework configuration
//!
//! Built once at startup and shared by `Arc`. Sources:
//! - built-in defaults
//! - a TOML file (durations as `*_ms` keys)
//! - `CATALOG_*` environment overrides

use anyhow::{Context, Result};
use catalog_core::CatalogError;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, time::Duration};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "CATALOG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameworkConfig {
    /// Identifier of this framework, reported in source info and used as the fanout identity
    pub id: String,
    pub version: String,
    pub organization: String,
    /// Mask every underlying source behind the framework's own identity
    pub fanout: bool,
    /// Per-source deadline for queries that carry no timeout of their own
    #[serde(rename = "default_query_timeout_ms", with = "millis")]
    pub default_query_timeout: Duration,
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
    #[serde(rename = "probe_timeout_ms", with = "millis")]
    pub probe_timeout: Duration,
    /// Page size used when paging through matches for bulk operations
    pub query_page_size: usize,
    pub delete_batch_size: usize,
    /// Upper bound on concurrently running source calls
    pub max_concurrent_dispatch: usize,
    #[serde(rename = "notification_timeout_ms", with = "millis")]
    pub notification_timeout: Duration,
    /// Over-fetch from every source so a merged page can be windowed correctly
    pub offset_handling: bool,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            id: "catalog".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            organization: String::new(),
            fanout: false,
            default_query_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
            query_page_size: 500,
            delete_batch_size: 500,
            max_concurrent_dispatch: 32,
            notification_timeout: Duration::from_secs(1),
            offset_handling: true,
        }
    }
}

impl FrameworkConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Failed to parse framework configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file, then apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Self =
            toml::from_str(&text).with_context(|| format!("Invalid config file {}", path.display()))?;
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CATALOG_ID`, `CATALOG_FANOUT` and `CATALOG_QUERY_TIMEOUT_MS`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup(&format!("{ENV_PREFIX}_ID")) {
            self.id = id;
        }
        if let Some(fanout) = lookup(&format!("{ENV_PREFIX}_FANOUT")) {
            self.fanout = fanout
                .parse()
                .with_context(|| format!("{ENV_PREFIX}_FANOUT must be true or false, got '{fanout}'"))?;
        }
        if let Some(timeout) = lookup(&format!("{ENV_PREFIX}_QUERY_TIMEOUT_MS")) {
            let ms: u64 = timeout.parse().with_context(|| {
                format!("{ENV_PREFIX}_QUERY_TIMEOUT_MS must be milliseconds, got '{timeout}'")
            })?;
            self.default_query_timeout = Duration::from_millis(ms);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |what: &str| Err(CatalogError::Configuration(format!("{what} must be positive")));

        if self.id.trim().is_empty() {
            return Err(CatalogError::Configuration("id must not be empty".to_string()));
        }
        if self.query_page_size == 0 {
            return invalid("query_page_size");
        }
        if self.delete_batch_size == 0 {
            return invalid("delete_batch_size");
        }
        if self.max_concurrent_dispatch == 0 {
            return invalid("max_concurrent_dispatch");
        }
        if self.poll_interval.is_zero() {
            return invalid("poll_interval_ms");
        }
        if self.probe_timeout.is_zero() {
            return invalid("probe_timeout_ms");
        }
        if self.default_query_timeout.is_zero() {
            return invalid("default_query_timeout_ms");
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
