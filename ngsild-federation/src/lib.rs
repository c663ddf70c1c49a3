//! Federated query and temporal resolution for NGSI-LD context brokers.
//!
//! Given a query, the engine decides whether the local store can answer it,
//! which registered context sources might hold relevant data, dispatches to
//! all of them concurrently under one deadline, and merges the answers into
//! one precedence-ordered, deduplicated result.
//!
//! ## Components
//!
//! - [`registry`]: registration store seam and an in-memory implementation
//! - [`matcher`]: capability matching and precedence ordering
//! - [`client`]: bounded-time remote queries (HTTP and mock)
//! - [`coordinator`]: scatter-gather under a shared deadline
//! - [`merge`]: entity and time-series merging
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ngsild_federation::{FederatedQueryEngine, FederationConfig, InMemoryRegistry, InMemoryStore};
//! use ngsild_model::QueryCriteria;
//!
//! # async fn run() -> ngsild_federation::Result<()> {
//! let engine = FederatedQueryEngine::with_http_client(
//!     FederationConfig::default(),
//!     Arc::new(InMemoryRegistry::new()),
//!     Arc::new(InMemoryStore::new()),
//! )?;
//! let resolution = engine
//!     .resolve_default(&QueryCriteria::new().with_type("https://uri.fiware.org/ns/data-models#Vehicle"))
//!     .await?;
//! println!("{} entities, complete: {}", resolution.entities.len(), resolution.report.is_complete());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod matcher;
pub mod merge;
pub mod registry;
pub mod report;
pub mod stats;
pub mod store;
pub mod telemetry;

pub use client::{
    ContextSourceClient, DispatchError, DispatchOutcome, DispatchResult, HttpContextSourceClient,
    MockContextSource, MockResponse, Payload,
};
pub use config::{Args, FederationConfig};
pub use context::{ContextResolver, PrefixContextResolver};
pub use coordinator::FederatedQueryEngine;
pub use error::{FederationError, Result};
pub use matcher::{CapabilityMatcher, ExclusiveScope, SourceMatch};
pub use registry::{InMemoryRegistry, RegistrationStore, RegistryError};
pub use report::{Resolution, ResolveReport, SourceReport, SourceWarning, WarningKind};
pub use stats::{FederationStats, StatsSnapshot};
pub use store::{InMemoryStore, LocalStore, StoreError};
pub use telemetry::init_tracing;
