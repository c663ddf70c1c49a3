//! Time-stamped attribute observations and their origin.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::entity::{entity_id, entity_types};
use crate::error::ModelError;

pub(crate) const LOCAL_ORIGIN: &str = "local";
const EXPANDED_OBSERVED_AT: &str = "https://uri.etsi.org/ngsi-ld/observedAt";

/// Where a piece of data came from: the local store or a registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Origin {
    Local,
    Registration(String),
}

impl Origin {
    pub fn registration(id: impl Into<String>) -> Self {
        Origin::Registration(id.into())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local)
    }

    /// Registration id, if remote.
    pub fn registration_id(&self) -> Option<&str> {
        match self {
            Origin::Local => None,
            Origin::Registration(id) => Some(id),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local => write!(f, "{}", LOCAL_ORIGIN),
            Origin::Registration(id) => write!(f, "{}", id),
        }
    }
}

impl From<String> for Origin {
    fn from(value: String) -> Self {
        if value == LOCAL_ORIGIN {
            Origin::Local
        } else {
            Origin::Registration(value)
        }
    }
}

impl From<Origin> for String {
    fn from(origin: Origin) -> Self {
        origin.to_string()
    }
}

/// One time-stamped value of one attribute of one entity.
///
/// `value` is the attribute instance object (type, value/object and
/// sub-attributes), so it can be rendered back without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeObservation {
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    pub attribute_name: String,
    pub observed_at: DateTime<Utc>,
    pub value: Value,
    pub origin: Origin,
}

impl AttributeObservation {
    /// A local `Property` observation.
    pub fn new(
        entity_id: impl Into<String>,
        attribute_name: impl Into<String>,
        observed_at: DateTime<Utc>,
        value: Value,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type: None,
            attribute_name: attribute_name.into(),
            observed_at,
            value: json!({
                "type": "Property",
                "value": value,
                "observedAt": observed_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            }),
            origin: Origin::Local,
        }
    }

    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// The payload inside the instance (`value`, `object` or the instance itself).
    pub fn payload(&self) -> &Value {
        self.value
            .get("value")
            .or_else(|| self.value.get("object"))
            .unwrap_or(&self.value)
    }
}

/// Observations extracted from one temporal entity.
#[derive(Debug, Default)]
pub struct TemporalParse {
    pub observations: Vec<AttributeObservation>,
    /// Instances skipped because they lacked a usable `observedAt`
    pub dropped: usize,
}

/// Extract observations from an NGSI-LD temporal entity.
///
/// Accepts the normalized temporal representation (attribute = array of
/// instances carrying `observedAt`) and the simplified one
/// (`{"type": "Property", "values": [[value, observedAt], ...]}`).
pub fn parse_temporal_entity(value: &Value, origin: &Origin) -> Result<TemporalParse, ModelError> {
    let object = value
        .as_object()
        .ok_or_else(|| ModelError::InvalidEntity("temporal entity must be a JSON object".into()))?;

    let id = entity_id(object)?;
    let entity_type = entity_types(object)?.into_iter().next();

    let mut parsed = TemporalParse::default();
    for (name, attribute) in object {
        if matches!(name.as_str(), "@context" | "id" | "@id" | "type" | "@type") {
            continue;
        }

        let instances: Vec<Value> = match attribute {
            Value::Array(items) => items.clone(),
            Value::Object(map) if map.contains_key("values") || map.contains_key("objects") => {
                simplified_instances(map)
            }
            Value::Object(_) => vec![attribute.clone()],
            _ => {
                return Err(ModelError::InvalidEntity(format!(
                    "temporal attribute '{}' of {} is not an NGSI-LD attribute",
                    name, id
                )))
            }
        };

        for instance in instances {
            match observed_at(&instance) {
                Some(observed_at) => parsed.observations.push(AttributeObservation {
                    entity_id: id.clone(),
                    entity_type: entity_type.clone(),
                    attribute_name: name.clone(),
                    observed_at,
                    value: instance,
                    origin: origin.clone(),
                }),
                None => parsed.dropped += 1,
            }
        }
    }

    Ok(parsed)
}

fn simplified_instances(attribute: &Map<String, Value>) -> Vec<Value> {
    let (pairs, member, default_type) = match attribute.get("values") {
        Some(values) => (values, "value", "Property"),
        None => match attribute.get("objects") {
            Some(objects) => (objects, "object", "Relationship"),
            None => return Vec::new(),
        },
    };
    let attribute_type = attribute
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or(default_type);

    pairs
        .as_array()
        .map(|pairs| {
            pairs
                .iter()
                .map(|pair| match pair.as_array().map(Vec::as_slice) {
                    Some([payload, observed_at, ..]) => json!({
                        "type": attribute_type,
                        member: payload,
                        "observedAt": observed_at,
                    }),
                    // Left without observedAt so the caller counts it as dropped.
                    _ => json!({ "type": attribute_type }),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn observed_at(instance: &Value) -> Option<DateTime<Utc>> {
    let raw = match instance.get("observedAt") {
        Some(Value::String(s)) => Some(s.as_str()),
        _ => instance
            .get(EXPANDED_OBSERVED_AT)
            .and_then(|v| v.get(0))
            .and_then(|v| v.get("@value"))
            .and_then(Value::as_str),
    }?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
