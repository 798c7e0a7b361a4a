//! Catalog CLI library
//!
//! Command definitions and configuration loading for the `catalog` binary

pub mod commands;
pub mod settings;

pub use commands::{DeleteWhereCommand, IngestCommand, QueryCommand, SourceInfoCommand};
pub use settings::{CliConfig, SourceRole, SourceSpec};
