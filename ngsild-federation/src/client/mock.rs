//! Mock context sources for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ngsild_model::{
    AttributeObservation, ContextSourceRegistration, Entity, Origin, QueryCriteria,
};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{ContextSourceClient, DispatchOutcome, DispatchResult, Payload};
use crate::store::{InMemoryStore, LocalStore};

/// Scripted behaviour of one mocked source.
#[derive(Clone, Default)]
pub struct MockResponse {
    data: InMemoryStore,
    failure: Option<DispatchOutcome>,
    delay: Option<Duration>,
}

impl MockResponse {
    /// Source holding `entities`, filtered per query like a real broker.
    pub fn entities(entities: Vec<Entity>) -> Self {
        Self {
            data: InMemoryStore::new().with_entities(entities),
            ..Default::default()
        }
    }

    /// Source holding `observations`, filtered per query like a real broker.
    pub fn observations(observations: Vec<AttributeObservation>) -> Self {
        Self {
            data: InMemoryStore::new().with_observations(observations),
            ..Default::default()
        }
    }

    /// Source that always ends with `outcome` and no data.
    pub fn failure(outcome: DispatchOutcome) -> Self {
        Self {
            failure: Some(outcome),
            ..Default::default()
        }
    }

    /// Answer only after `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Mock client answering from scripted responses keyed by registration id.
///
/// Unscripted registrations answer successfully with no data.
#[derive(Clone, Default)]
pub struct MockContextSource {
    responses: HashMap<String, MockResponse>,
    call_count: Arc<AtomicU32>,
    received: Arc<Mutex<Vec<(String, QueryCriteria)>>>,
}

impl MockContextSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the response of one registration.
    pub fn with_response(mut self, registration_id: impl Into<String>, response: MockResponse) -> Self {
        self.responses.insert(registration_id.into(), response);
        self
    }

    /// Get the number of times query was called.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Registration ids and criteria of every query received, in call order.
    pub async fn received(&self) -> Vec<(String, QueryCriteria)> {
        self.received.lock().await.clone()
    }

    async fn answer(
        response: &MockResponse,
        criteria: &QueryCriteria,
        origin: &Origin,
    ) -> (Payload, DispatchOutcome) {
        if let Some(outcome) = &response.failure {
            return (Payload::empty_for(criteria), outcome.clone());
        }

        let payload = if criteria.is_temporal() {
            response.data.query_temporal(criteria).await.map(|observations| {
                Payload::Observations(
                    observations
                        .into_iter()
                        .map(|o| o.with_origin(origin.clone()))
                        .collect(),
                )
            })
        } else {
            response.data.query_entities(criteria).await.map(Payload::Entities)
        };

        match payload {
            Ok(payload) => (payload, DispatchOutcome::Success),
            Err(e) => (
                Payload::empty_for(criteria),
                DispatchOutcome::Error(super::DispatchError::Status {
                    code: 500,
                    message: e.to_string(),
                }),
            ),
        }
    }
}

#[async_trait]
impl ContextSourceClient for MockContextSource {
    async fn query(
        &self,
        registration: &ContextSourceRegistration,
        criteria: &QueryCriteria,
        deadline: Instant,
    ) -> DispatchResult {
        let start = Instant::now();
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.received
            .lock()
            .await
            .push((registration.id.clone(), criteria.clone()));

        let origin = Origin::registration(registration.id.clone());
        let response = self.responses.get(&registration.id).cloned().unwrap_or_default();

        if let Some(delay) = response.delay {
            if tokio::time::timeout_at(deadline, tokio::time::sleep(delay))
                .await
                .is_err()
            {
                return DispatchResult::failed(origin, criteria, DispatchOutcome::Timeout, start.elapsed());
            }
        }

        let (payload, outcome) = Self::answer(&response, criteria, &origin).await;
        DispatchResult::new(origin, payload, outcome, start.elapsed())
    }
}
