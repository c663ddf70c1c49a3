//! Remote Query Client
//!
//! One bounded-time query against one registered context source. Every
//! failure is classified into a `DispatchOutcome`; nothing here returns an
//! error to the coordinator.

pub mod http;
pub mod mock;
pub mod wire;

pub use http::HttpContextSourceClient;
pub use mock::{MockContextSource, MockResponse};

use std::time::Duration;

use async_trait::async_trait;
use ngsild_model::{
    AttributeObservation, ContextSourceRegistration, Entity, Origin, QueryCriteria, SourceStatus,
};
use tokio::time::Instant;

/// Failure detail of a remote source that answered badly.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    /// Non-2xx response
    #[error("HTTP {code}: {message}")]
    Status { code: u16, message: String },

    /// 2xx with a body that is not an NGSI-LD payload
    #[error("Malformed response body: {0}")]
    MalformedBody(String),

    /// The dispatch task itself failed
    #[error("Dispatch task failed: {0}")]
    Task(String),
}

/// Terminal state of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Success,
    /// Answered, but some or all of the body was unusable
    Partial { dropped: usize },
    Timeout,
    Unreachable(String),
    Error(DispatchError),
}

impl DispatchOutcome {
    pub fn status(&self) -> SourceStatus {
        match self {
            DispatchOutcome::Success | DispatchOutcome::Partial { .. } => SourceStatus::Ok,
            DispatchOutcome::Timeout => SourceStatus::Timeout,
            DispatchOutcome::Unreachable(_) => SourceStatus::Unreachable,
            DispatchOutcome::Error(_) => SourceStatus::Error,
        }
    }

    /// Whether the payload of this dispatch may be merged.
    pub fn is_usable(&self) -> bool {
        self.status() == SourceStatus::Ok
    }
}

/// Data returned by a source.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Entities(Vec<Entity>),
    Observations(Vec<AttributeObservation>),
}

impl Payload {
    /// Empty payload of the kind `criteria` asks for.
    pub fn empty_for(criteria: &QueryCriteria) -> Self {
        if criteria.is_temporal() {
            Payload::Observations(Vec::new())
        } else {
            Payload::Entities(Vec::new())
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::Entities(e) => e.len(),
            Payload::Observations(o) => o.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of one dispatch, local or remote.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub source: Origin,
    pub payload: Payload,
    pub outcome: DispatchOutcome,
    pub latency: Duration,
}

impl DispatchResult {
    pub fn new(source: Origin, payload: Payload, outcome: DispatchOutcome, latency: Duration) -> Self {
        Self {
            source,
            payload,
            outcome,
            latency,
        }
    }

    /// A dispatch that produced no data.
    pub fn failed(
        source: Origin,
        criteria: &QueryCriteria,
        outcome: DispatchOutcome,
        latency: Duration,
    ) -> Self {
        Self::new(source, Payload::empty_for(criteria), outcome, latency)
    }
}

/// Client for querying registered context sources.
#[async_trait]
pub trait ContextSourceClient: Send + Sync {
    /// Query one source, giving up at `deadline`.
    async fn query(
        &self,
        registration: &ContextSourceRegistration,
        criteria: &QueryCriteria,
        deadline: Instant,
    ) -> DispatchResult;
}
