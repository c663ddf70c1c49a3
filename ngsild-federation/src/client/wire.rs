//! NGSI-LD wire format for outbound queries.
//!
//! Builds request URLs and parameters and classifies response bodies.

use ngsild_model::{parse_temporal_entity, Entity, Origin, QueryCriteria};
use serde_json::Value;
use url::Url;

use super::{DispatchError, DispatchOutcome, Payload};

pub const ENTITIES_PATH: [&str; 3] = ["ngsi-ld", "v1", "entities"];
pub const TEMPORAL_PATH: [&str; 4] = ["ngsi-ld", "v1", "temporal", "entities"];

pub const LD_JSON: &str = "application/ld+json";
pub const TENANT_HEADER: &str = "NGSILD-Tenant";
pub const VIA_HEADER: &str = "Via";

/// `Via` hop marker for this broker.
pub fn via_header(broker_id: &str) -> String {
    format!("1.1 {}", broker_id)
}

/// Request URL for `criteria` against a source endpoint.
///
/// Single-entity retrievals address the entity resource directly.
pub fn request_url(endpoint: &str, criteria: &QueryCriteria) -> Result<Url, String> {
    let mut url = Url::parse(endpoint).map_err(|e| format!("invalid endpoint '{}': {}", endpoint, e))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| format!("endpoint cannot be a base URL: {}", endpoint))?;
        segments.pop_if_empty();
        if criteria.is_temporal() {
            segments.extend(TEMPORAL_PATH);
        } else {
            segments.extend(ENTITIES_PATH);
        }
        if criteria.is_retrieval() {
            segments.push(&criteria.ids[0]);
        }
    }
    Ok(url)
}

/// Query parameters for `criteria`.
///
/// `local=true` stops the remote from federating the query further.
pub fn query_params(criteria: &QueryCriteria) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();

    if !criteria.types.is_empty() {
        params.push(("type", criteria.types.join(",")));
    }
    if !criteria.is_retrieval() && !criteria.ids.is_empty() {
        params.push(("id", criteria.ids.join(",")));
    }
    if let Some(pattern) = &criteria.id_pattern {
        params.push(("idPattern", pattern.clone()));
    }
    if !criteria.attrs.is_empty() {
        params.push(("attrs", criteria.attrs.join(",")));
    }
    if let Some(geo) = &criteria.geo {
        params.push(("georel", geo.georel.to_string()));
        params.push(("geometry", geo.geometry.type_name().to_string()));
        params.push(("coordinates", geo.geometry.coordinates_json()));
        params.push(("geoproperty", geo.geoproperty.clone()));
    }
    if let Some(temporal) = &criteria.temporal {
        params.push(("timerel", temporal.timerel.as_str().to_string()));
        params.push(("timeAt", rfc3339(temporal.time_at)));
        if let Some(end) = temporal.end_time_at {
            params.push(("endTimeAt", rfc3339(end)));
        }
        if let Some(last_n) = temporal.last_n {
            params.push(("lastN", last_n.to_string()));
        }
    }
    if !criteria.is_retrieval() {
        if let Some(limit) = criteria.limit {
            params.push(("limit", limit.to_string()));
        }
    }
    params.push(("local", "true".to_string()));

    params
}

fn rfc3339(instant: chrono::DateTime<chrono::Utc>) -> String {
    instant.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parse a 2xx body into a payload and classify it.
///
/// An empty body is a partial answer; a body that is not an entity (or
/// array of entities) is a remote error; unparsable elements make the
/// answer partial.
pub fn parse_body(body: &[u8], criteria: &QueryCriteria, origin: &Origin) -> (Payload, DispatchOutcome) {
    if body.iter().all(u8::is_ascii_whitespace) {
        return (Payload::empty_for(criteria), DispatchOutcome::Partial { dropped: 0 });
    }

    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            return (
                Payload::empty_for(criteria),
                DispatchOutcome::Error(DispatchError::MalformedBody(e.to_string())),
            )
        }
    };

    let elements = match value {
        Value::Array(items) => items,
        object @ Value::Object(_) => vec![object],
        other => {
            return (
                Payload::empty_for(criteria),
                DispatchOutcome::Error(DispatchError::MalformedBody(format!(
                    "expected an entity or an array of entities, got {}",
                    json_kind(&other)
                ))),
            )
        }
    };

    let (payload, dropped) = if criteria.is_temporal() {
        parse_observations(&elements, criteria, origin)
    } else {
        parse_entities(&elements, criteria)
    };

    if dropped > 0 && payload.is_empty() && !elements.is_empty() {
        // Nothing in the body was an NGSI-LD entity.
        return (
            payload,
            DispatchOutcome::Error(DispatchError::MalformedBody(format!(
                "none of {} elements is an NGSI-LD entity",
                elements.len()
            ))),
        );
    }

    let outcome = if dropped > 0 {
        DispatchOutcome::Partial { dropped }
    } else {
        DispatchOutcome::Success
    };
    (payload, outcome)
}

fn parse_entities(elements: &[Value], criteria: &QueryCriteria) -> (Payload, usize) {
    let mut entities = Vec::with_capacity(elements.len());
    let mut dropped = 0;
    for element in elements {
        match Entity::from_json(element) {
            Ok(mut entity) => {
                entity.retain_attributes(|name| criteria.selects_attribute(name));
                entities.push(entity);
            }
            Err(_) => dropped += 1,
        }
    }
    (Payload::Entities(entities), dropped)
}

fn parse_observations(elements: &[Value], criteria: &QueryCriteria, origin: &Origin) -> (Payload, usize) {
    let mut observations = Vec::new();
    let mut dropped = 0;
    for element in elements {
        match parse_temporal_entity(element, origin) {
            Ok(parsed) => {
                dropped += parsed.dropped;
                observations.extend(parsed.observations.into_iter().filter(|o| {
                    criteria.selects_attribute(&o.attribute_name)
                        && criteria
                            .temporal
                            .as_ref()
                            .map_or(true, |t| t.contains(o.observed_at))
                }));
            }
            Err(_) => dropped += 1,
        }
    }
    (Payload::Observations(observations), dropped)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ngsild_model::{GeoQuery, GeoRelation, Geometry, TemporalQuery};

    #[test]
    fn test_request_url_paths() {
        let query = QueryCriteria::new().with_type("Vehicle");
        assert_eq!(
            request_url("http://remote:1026/", &query).unwrap().as_str(),
            "http://remote:1026/ngsi-ld/v1/entities"
        );

        let retrieval = QueryCriteria::for_entity("urn:ngsi-ld:Vehicle:1");
        assert_eq!(
            request_url("http://remote:1026", &retrieval).unwrap().as_str(),
            "http://remote:1026/ngsi-ld/v1/entities/urn:ngsi-ld:Vehicle:1"
        );

        let temporal = QueryCriteria::new()
            .with_type("Sensor")
            .with_temporal(TemporalQuery::after(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()));
        assert_eq!(
            request_url("http://remote:1026/broker", &temporal).unwrap().as_str(),
            "http://remote:1026/broker/ngsi-ld/v1/temporal/entities"
        );
    }

    #[test]
    fn test_query_params() {
        let criteria = QueryCriteria::new()
            .with_type("Vehicle")
            .with_attrs(["speed", "fuel"])
            .with_limit(20)
            .with_geo(GeoQuery::new(
                GeoRelation::Near {
                    max_distance: Some(500.0),
                    min_distance: None,
                },
                Geometry::point(13.4, 52.5),
            ));
        let params = query_params(&criteria);
        let get = |k: &str| params.iter().find(|(key, _)| *key == k).map(|(_, v)| v.as_str());

        assert_eq!(get("type"), Some("Vehicle"));
        assert_eq!(get("attrs"), Some("speed,fuel"));
        assert_eq!(get("georel"), Some("near;maxDistance==500"));
        assert_eq!(get("geometry"), Some("Point"));
        assert_eq!(get("limit"), Some("20"));
        assert_eq!(get("local"), Some("true"));
    }

    #[test]
    fn test_parse_body_classification() {
        let criteria = QueryCriteria::new().with_type("Vehicle");
        let origin = Origin::registration("urn:csr:a");

        let (payload, outcome) = parse_body(b"   ", &criteria, &origin);
        assert!(payload.is_empty());
        assert_eq!(outcome, DispatchOutcome::Partial { dropped: 0 });

        let (_, outcome) = parse_body(b"<html>oops</html>", &criteria, &origin);
        assert!(matches!(outcome, DispatchOutcome::Error(DispatchError::MalformedBody(_))));

        let (_, outcome) = parse_body(b"42", &criteria, &origin);
        assert!(matches!(outcome, DispatchOutcome::Error(DispatchError::MalformedBody(_))));

        let body = br#"[
            {"id": "urn:ngsi-ld:Vehicle:1", "type": "Vehicle", "speed": {"type": "Property", "value": 12}},
            {"type": "Vehicle"}
        ]"#;
        let (payload, outcome) = parse_body(body, &criteria, &origin);
        assert_eq!(payload.len(), 1);
        assert_eq!(outcome, DispatchOutcome::Partial { dropped: 1 });

        let (payload, outcome) = parse_body(b"[]", &criteria, &origin);
        assert!(payload.is_empty());
        assert_eq!(outcome, DispatchOutcome::Success);
    }
}
