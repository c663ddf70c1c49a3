//! Error types for the federation engine

use std::time::Duration;

use ngsild_model::ModelError;

use crate::store::StoreError;

/// Top-level error of a federated query.
///
/// Remote failures never surface here; they are reported as warnings on the
/// resolution. Only malformed input and a failing local store are fatal.
#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    /// Criteria rejected before dispatch
    #[error("Invalid query criteria: {0}")]
    InvalidCriteria(#[from] ModelError),

    /// The local store failed
    #[error("Local store failure: {0}")]
    LocalStore(#[from] StoreError),

    /// The local store did not answer before the deadline
    #[error("Local store did not answer within {0:?}")]
    LocalTimeout(Duration),

    /// No source holds the requested entity
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, FederationError>;
