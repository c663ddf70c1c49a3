//! Local entity and temporal store seam.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use ngsild_model::{AttributeObservation, Entity, QueryCriteria};

/// Error types for local store access.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Store could not be reached
    #[error("Local store unavailable: {0}")]
    Unavailable(String),

    /// Store rejected or failed the query
    #[error("Local query failed: {0}")]
    Query(String),
}

/// The broker's own entity and temporal storage.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Current state of every entity selected by `criteria`.
    async fn query_entities(&self, criteria: &QueryCriteria) -> Result<Vec<Entity>, StoreError>;

    /// Observations selected by `criteria`, which carries a temporal range.
    async fn query_temporal(
        &self,
        criteria: &QueryCriteria,
    ) -> Result<Vec<AttributeObservation>, StoreError>;
}
