//! Registration registry seam.
//!
//! The engine reads a fresh snapshot of every registration per query and
//! never holds one beyond that query.

mod memory;

pub use memory::InMemoryRegistry;

use async_trait::async_trait;
use ngsild_model::ContextSourceRegistration;

/// Error types for registry access.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// Backing store could not be read
    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    /// No registration with this id
    #[error("Registration not found: {0}")]
    NotFound(String),

    /// A registration with this id already exists
    #[error("Registration already exists: {0}")]
    AlreadyExists(String),

    /// Registration failed validation
    #[error("Invalid registration: {0}")]
    Invalid(#[from] ngsild_model::ModelError),
}

/// Read side of the registration store consumed by the engine.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Every known registration.
    async fn list_all(&self) -> Result<Vec<ContextSourceRegistration>, RegistryError>;
}
