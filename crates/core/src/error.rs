use crate::contracts::plugins::PluginStage;
use crate::operations::ProcessingDetail;
use thiserror::Error;

/// Fatal outcomes of a framework operation.
///
/// Non-fatal per-source problems never show up here; they travel on the
/// response as [`ProcessingDetail`] entries.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A required destination is cached unavailable; nothing was written
    #[error("Source unavailable: {source_id}")]
    SourceUnavailable { source_id: String },

    #[error("Unsupported query: {0}")]
    UnsupportedQuery(String),

    /// `committed` lists destinations that had already accepted the write
    #[error("Ingest failed: {message}")]
    Ingest {
        message: String,
        committed: Vec<String>,
        failures: Vec<ProcessingDetail>,
    },

    #[error("Federation failed: {0}")]
    Federation(String),

    #[error("Plugin '{plugin}' failed during {stage}: {message}")]
    Plugin {
        plugin: String,
        stage: PluginStage,
        message: String,
    },

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource not supported: {0}")]
    ResourceNotSupported(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CatalogError {
    pub fn unavailable(source_id: impl Into<String>) -> Self {
        CatalogError::SourceUnavailable {
            source_id: source_id.into(),
        }
    }

    pub fn ingest(message: impl Into<String>) -> Self {
        CatalogError::Ingest {
            message: message.into(),
            committed: Vec::new(),
            failures: Vec::new(),
        }
    }
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// Errors a plugin may raise from any stage
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PluginError {
    /// The request is rejected; the remaining pipeline and the operation stop
    #[error("processing stopped: {0}")]
    StopProcessing(String),

    /// The plugin itself is broken
    #[error("plugin execution failed: {0}")]
    ExecutionFailure(String),
}

pub type PluginResult<T> = std::result::Result<T, PluginError>;
