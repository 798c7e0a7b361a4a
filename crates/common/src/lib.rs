//! Ambient utilities shared by the catalog binaries and services

pub mod structured_logging;

pub use structured_logging::{
    init_structured_logging, ExecutionContext, LogContext, LogFormat, LoggingConfig,
    OperationTimer, StructuredLogEntry,
};
