//! Core data model and contracts for the federated catalog
//!
//! This crate holds everything the federation engine and its collaborators agree on:
//! - Items, attribute schema, query/filter model, caller subject
//! - Typed operation requests and responses
//! - Contracts: Source, ReadableSource, WritableSource, ContentStore
//! - Plugin SPI for every pipeline stage, attribute and versioning hooks
//! - Error taxonomy and the catalog event bus
//! - In-memory reference backends used by the CLI and by tests

pub mod contracts;
pub mod domain;
pub mod error;
pub mod events;
pub mod memory;
pub mod operations;

pub use contracts::*;
pub use domain::*;
pub use error::*;
pub use events::*;
pub use operations::*;

/// Re-export common types
pub use anyhow::{Error, Result};
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use uuid::Uuid;
