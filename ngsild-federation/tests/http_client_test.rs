//! HTTP context source client integration tests
//!
//! Runs the client against wiremock servers standing in for remote brokers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use ngsild_federation::{
    ContextSourceClient, DispatchError, DispatchOutcome, FederatedQueryEngine, FederationConfig,
    HttpContextSourceClient, InMemoryRegistry, InMemoryStore, Payload, WarningKind,
};
use ngsild_model::{ContextSourceRegistration, Entity, Origin, QueryCriteria, TemporalQuery};
use serde_json::json;
use tokio::time::Instant;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> HttpContextSourceClient {
    HttpContextSourceClient::new(&FederationConfig::default().with_broker_id("test-broker")).unwrap()
}

fn registration(server: &MockServer) -> ContextSourceRegistration {
    ContextSourceRegistration::new("urn:csr:remote", server.uri())
}

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(2)
}

#[tokio::test]
async fn test_query_sends_ngsi_ld_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ngsi-ld/v1/entities"))
        .and(query_param("type", "Vehicle"))
        .and(query_param("attrs", "speed"))
        .and(query_param("local", "true"))
        .and(header("accept", "application/ld+json"))
        .and(header("via", "1.1 test-broker"))
        .and(header("NGSILD-Tenant", "city"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "urn:ngsi-ld:Vehicle:1", "type": "Vehicle", "speed": {"type": "Property", "value": 12}},
            {"id": "urn:ngsi-ld:Vehicle:2", "type": "Vehicle", "speed": {"type": "Property", "value": 7}}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let result = client()
        .query(
            &registration(&server).with_tenant("city"),
            &QueryCriteria::new().with_type("Vehicle").with_attrs(["speed"]),
            deadline(),
        )
        .await;

    assert_eq!(result.outcome, DispatchOutcome::Success);
    assert_eq!(result.source, Origin::registration("urn:csr:remote"));
    match result.payload {
        Payload::Entities(entities) => {
            assert_eq!(entities.len(), 2);
            assert_eq!(entities[0].attributes["speed"]["value"], 12);
        }
        other => panic!("expected entities, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_body_is_partial() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let result = client()
        .query(&registration(&server), &QueryCriteria::new().with_type("Vehicle"), deadline())
        .await;

    assert_eq!(result.outcome, DispatchOutcome::Partial { dropped: 0 });
    assert!(result.payload.is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_remote_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let result = client()
        .query(&registration(&server), &QueryCriteria::new().with_type("Vehicle"), deadline())
        .await;

    assert!(matches!(
        result.outcome,
        DispatchOutcome::Error(DispatchError::MalformedBody(_))
    ));
}

#[tokio::test]
async fn test_error_status_is_captured() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let result = client()
        .query(&registration(&server), &QueryCriteria::new().with_type("Vehicle"), deadline())
        .await;

    match result.outcome {
        DispatchOutcome::Error(DispatchError::Status { code, message }) => {
            assert_eq!(code, 503);
            assert_eq!(message, "overloaded");
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_not_found_on_retrieval_is_empty_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ngsi-ld/v1/entities/urn:ngsi-ld:Vehicle:404"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let result = client()
        .query(
            &registration(&server),
            &QueryCriteria::for_entity("urn:ngsi-ld:Vehicle:404"),
            deadline(),
        )
        .await;

    assert_eq!(result.outcome, DispatchOutcome::Success);
    assert!(result.payload.is_empty());
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    // Nothing listens on port 1.
    let unreachable = ContextSourceRegistration::new("urn:csr:gone", "http://127.0.0.1:1");

    let result = client()
        .query(&unreachable, &QueryCriteria::new().with_type("Vehicle"), deadline())
        .await;

    assert!(matches!(result.outcome, DispatchOutcome::Unreachable(_)));
}

#[tokio::test]
async fn test_slow_source_times_out_at_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let start = Instant::now();
    let result = client()
        .query(
            &registration(&server),
            &QueryCriteria::new().with_type("Vehicle"),
            start + Duration::from_millis(100),
        )
        .await;

    assert_eq!(result.outcome, DispatchOutcome::Timeout);
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_temporal_query_parses_both_representations() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ngsi-ld/v1/temporal/entities"))
        .and(query_param("timerel", "after"))
        .and(query_param("lastN", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "urn:ngsi-ld:Sensor:1",
                "type": "Sensor",
                "temperature": [
                    {"type": "Property", "value": 20.1, "observedAt": "2024-05-01T10:00:00Z"},
                    {"type": "Property", "value": 20.4, "observedAt": "2024-05-01T10:05:00Z"}
                ]
            },
            {
                "id": "urn:ngsi-ld:Sensor:2",
                "type": "Sensor",
                "temperature": {
                    "type": "Property",
                    "values": [[18.0, "2024-05-01T10:01:00Z"]]
                }
            }
        ])))
        .mount(&server)
        .await;

    let criteria = QueryCriteria::new().with_type("Sensor").with_temporal(
        TemporalQuery::after(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()).with_last_n(5),
    );
    let result = client().query(&registration(&server), &criteria, deadline()).await;

    assert_eq!(result.outcome, DispatchOutcome::Success);
    match result.payload {
        Payload::Observations(observations) => {
            assert_eq!(observations.len(), 3);
            assert!(observations
                .iter()
                .all(|o| o.origin == Origin::registration("urn:csr:remote")));
        }
        other => panic!("expected observations, got {:?}", other),
    }
}

#[tokio::test]
async fn test_engine_reports_malformed_remote_and_keeps_local() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;

    let registry = InMemoryRegistry::new();
    registry.create(registration(&server)).await.unwrap();
    let store = InMemoryStore::new().with_entities(vec![
        Entity::new("urn:ngsi-ld:Vehicle:1", "Vehicle").with_property("speed", json!(10))
    ]);
    let engine = FederatedQueryEngine::with_http_client(
        FederationConfig::default(),
        Arc::new(registry),
        Arc::new(store),
    )
    .unwrap();

    let resolution = engine
        .resolve(&QueryCriteria::new().with_type("Vehicle"), deadline())
        .await
        .unwrap();

    assert_eq!(resolution.entities.len(), 1);
    let errors = resolution.report.warnings_of(WarningKind::RemoteError);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].source.as_deref(), Some("urn:csr:remote"));
    assert_eq!(engine.stats().dispatch_error, 1);
}
