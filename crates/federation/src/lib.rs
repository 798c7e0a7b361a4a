//! Federation engine and framework facade for the catalog
//!
//! Layout:
//! - `registry` / `availability`: bound sources and their cached liveness
//! - `resolver` / `security`: which sources a request may reach
//! - `pipeline` / `plugins`: ordered plugin stages around every operation
//! - `engine` / `strategy`: concurrent dispatch and result merging
//! - `batch` / `notifier` / `hooks`: bulk deletes, change events, attribute hooks
//! - `framework`: the facade tying it all together

pub mod availability;
pub mod batch;
pub mod config;
pub mod engine;
pub mod framework;
pub mod hooks;
pub mod notifier;
pub mod pipeline;
pub mod plugins;
pub mod registry;
pub mod resolver;
pub mod security;
pub mod strategy;

pub use availability::{AvailabilityCache, PollerConfig, SourcePoller, SourceStatus};
pub use batch::{BatchDeleteReport, BatchFailure, BatchOperations, BatchTransactionCoordinator};
pub use config::FrameworkConfig;
pub use engine::{FederationEngine, WriteOutcome};
pub use framework::{CatalogFramework, CatalogFrameworkBuilder};
pub use hooks::{DefaultValueRegistry, InjectedAttributes};
pub use notifier::EventNotifier;
pub use pipeline::{PluginChain, RequestPipeline};
pub use plugins::{OperationPolicyAccessPlugin, SecurityMarkingPolicyPlugin};
pub use registry::{RegistryEvent, SourceBinding, SourceRegistry};
pub use resolver::{DestinationResolver, Resolution, WriteTargets};
pub use strategy::{FederationStrategy, PartialResult, SortedFederationStrategy};
