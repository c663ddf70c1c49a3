//! HTTP client for remote NGSI-LD brokers.

use async_trait::async_trait;
use ngsild_model::{ContextSourceRegistration, Origin, QueryCriteria};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use tokio::time::Instant;
use tracing::debug;

use super::wire::{self, LD_JSON, TENANT_HEADER, VIA_HEADER};
use super::{ContextSourceClient, DispatchError, DispatchOutcome, DispatchResult, Payload};
use crate::config::FederationConfig;
use crate::error::Result;

/// Longest error body excerpt kept in a dispatch error.
const MAX_ERROR_EXCERPT: usize = 256;

/// Queries remote brokers over the NGSI-LD HTTP API.
#[derive(Clone)]
pub struct HttpContextSourceClient {
    http_client: reqwest::Client,
    broker_id: String,
}

impl HttpContextSourceClient {
    pub fn new(config: &FederationConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            http_client,
            broker_id: config.broker_id.clone(),
        })
    }

    async fn send(
        &self,
        registration: &ContextSourceRegistration,
        criteria: &QueryCriteria,
        origin: &Origin,
        deadline: Instant,
    ) -> (Payload, DispatchOutcome) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return (Payload::empty_for(criteria), DispatchOutcome::Timeout);
        }

        let url = match wire::request_url(&registration.endpoint, criteria) {
            Ok(url) => url,
            Err(e) => return (Payload::empty_for(criteria), DispatchOutcome::Unreachable(e)),
        };

        let mut request = self
            .http_client
            .get(url)
            .query(&wire::query_params(criteria))
            .header(ACCEPT, LD_JSON)
            .header(VIA_HEADER, wire::via_header(&self.broker_id))
            .timeout(remaining);
        if let Some(tenant) = &registration.tenant {
            request = request.header(TENANT_HEADER, tenant);
        }

        let exchange = async move {
            let response = request.send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let (status, body) = match tokio::time::timeout_at(deadline, exchange).await {
            Err(_) => return (Payload::empty_for(criteria), DispatchOutcome::Timeout),
            Ok(Err(e)) => return (Payload::empty_for(criteria), classify_transport_error(&e)),
            Ok(Ok(exchange)) => exchange,
        };

        if status == StatusCode::NOT_FOUND && criteria.is_retrieval() {
            return (Payload::empty_for(criteria), DispatchOutcome::Success);
        }
        if !status.is_success() {
            let excerpt: String = String::from_utf8_lossy(&body)
                .chars()
                .take(MAX_ERROR_EXCERPT)
                .collect();
            return (
                Payload::empty_for(criteria),
                DispatchOutcome::Error(DispatchError::Status {
                    code: status.as_u16(),
                    message: excerpt,
                }),
            );
        }

        wire::parse_body(&body, criteria, origin)
    }
}

fn classify_transport_error(error: &reqwest::Error) -> DispatchOutcome {
    if error.is_timeout() {
        DispatchOutcome::Timeout
    } else if error.is_body() || error.is_decode() {
        DispatchOutcome::Error(DispatchError::MalformedBody(error.to_string()))
    } else {
        DispatchOutcome::Unreachable(error.to_string())
    }
}

#[async_trait]
impl ContextSourceClient for HttpContextSourceClient {
    async fn query(
        &self,
        registration: &ContextSourceRegistration,
        criteria: &QueryCriteria,
        deadline: Instant,
    ) -> DispatchResult {
        let start = Instant::now();
        let origin = Origin::registration(registration.id.clone());

        let (payload, outcome) = self.send(registration, criteria, &origin, deadline).await;
        let latency = start.elapsed();

        debug!(
            csr_id = %registration.id,
            endpoint = %registration.endpoint,
            latency_ms = latency.as_millis() as u64,
            results = payload.len(),
            outcome = ?outcome,
            "Remote dispatch finished"
        );

        DispatchResult::new(origin, payload, outcome, latency)
    }
}
