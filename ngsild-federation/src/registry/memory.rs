//! In-memory registration store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ngsild_model::ContextSourceRegistration;
use tokio::sync::RwLock;
use tracing::debug;

use super::{RegistrationStore, RegistryError};

/// Registry of context source registrations held in memory.
///
/// Keeps insertion order; writes stamp `createdAt`/`modifiedAt`.
#[derive(Clone, Default)]
pub struct InMemoryRegistry {
    registrations: Arc<RwLock<Vec<ContextSourceRegistration>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with registrations as-is (timestamps untouched).
    pub fn with_registrations(registrations: Vec<ContextSourceRegistration>) -> Self {
        Self {
            registrations: Arc::new(RwLock::new(registrations)),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a new context source.
    pub async fn create(
        &self,
        mut registration: ContextSourceRegistration,
    ) -> Result<ContextSourceRegistration, RegistryError> {
        registration.validate()?;

        let mut registrations = self.registrations.write().await;
        if registrations.iter().any(|r| r.id == registration.id) {
            return Err(RegistryError::AlreadyExists(registration.id));
        }

        let now = Utc::now();
        registration.created_at = Some(now);
        registration.modified_at = Some(now);
        registrations.push(registration.clone());

        debug!(csr_id = %registration.id, endpoint = %registration.endpoint, "Registration created");
        Ok(registration)
    }

    /// Replace an existing registration, keeping its `createdAt`.
    pub async fn update(
        &self,
        mut registration: ContextSourceRegistration,
    ) -> Result<ContextSourceRegistration, RegistryError> {
        registration.validate()?;

        let mut registrations = self.registrations.write().await;
        let existing = registrations
            .iter_mut()
            .find(|r| r.id == registration.id)
            .ok_or_else(|| RegistryError::NotFound(registration.id.clone()))?;

        registration.created_at = existing.created_at;
        registration.modified_at = Some(Utc::now());
        *existing = registration.clone();

        debug!(csr_id = %registration.id, "Registration updated");
        Ok(registration)
    }

    /// Remove a registration.
    pub async fn delete(&self, id: &str) -> Result<(), RegistryError> {
        let mut registrations = self.registrations.write().await;
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        if registrations.len() == before {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        debug!(csr_id = %id, "Registration deleted");
        Ok(())
    }

    /// Get one registration by id.
    pub async fn get(&self, id: &str) -> Option<ContextSourceRegistration> {
        let registrations = self.registrations.read().await;
        registrations.iter().find(|r| r.id == id).cloned()
    }

    /// Number of registrations.
    pub async fn len(&self) -> usize {
        self.registrations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.registrations.read().await.is_empty()
    }

    /// Simulate an outage of the backing store.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }
}

#[async_trait]
impl RegistrationStore for InMemoryRegistry {
    async fn list_all(&self) -> Result<Vec<ContextSourceRegistration>, RegistryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable(
                "in-memory registry marked unavailable".to_string(),
            ));
        }
        Ok(self.registrations.read().await.clone())
    }
}
