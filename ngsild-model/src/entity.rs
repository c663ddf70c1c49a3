//! NGSI-LD entities in normalized, expanded form.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ModelError;

/// Members that are not attributes.
const RESERVED_KEYS: [&str; 5] = ["@context", "id", "@id", "type", "@type"];

/// An entity as returned by one source.
///
/// Attribute values are kept as the raw NGSI-LD attribute object
/// (`{"type": "Property", "value": ...}`) so they survive merging unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Entity {
    pub id: String,
    pub types: Vec<String>,
    pub attributes: BTreeMap<String, Value>,
}

impl Entity {
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            types: vec![entity_type.into()],
            attributes: BTreeMap::new(),
        }
    }

    /// Add an attribute object as-is.
    pub fn with_attribute(mut self, name: impl Into<String>, attribute: Value) -> Self {
        self.attributes.insert(name.into(), attribute);
        self
    }

    /// Add a `Property` attribute holding `value`.
    pub fn with_property(self, name: impl Into<String>, value: Value) -> Self {
        self.with_attribute(
            name,
            serde_json::json!({ "type": "Property", "value": value }),
        )
    }

    /// Add a `Relationship` attribute pointing at `object`.
    pub fn with_relationship(self, name: impl Into<String>, object: impl Into<String>) -> Self {
        self.with_attribute(
            name,
            serde_json::json!({ "type": "Relationship", "object": object.into() }),
        )
    }

    /// Parse an entity from its NGSI-LD JSON representation.
    pub fn from_json(value: &Value) -> Result<Self, ModelError> {
        let object = value
            .as_object()
            .ok_or_else(|| ModelError::InvalidEntity("entity must be a JSON object".into()))?;

        let id = entity_id(object)?;
        let types = entity_types(object)?;

        let mut attributes = BTreeMap::new();
        for (name, attribute) in object {
            if RESERVED_KEYS.contains(&name.as_str()) {
                continue;
            }
            if !attribute.is_object() && !attribute.is_array() {
                return Err(ModelError::InvalidEntity(format!(
                    "attribute '{}' of {} is not an NGSI-LD attribute",
                    name, id
                )));
            }
            attributes.insert(name.clone(), attribute.clone());
        }

        Ok(Self {
            id,
            types,
            attributes,
        })
    }

    /// Render as NGSI-LD JSON.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("id".into(), Value::String(self.id.clone()));
        object.insert("type".into(), types_json(&self.types));
        for (name, attribute) in &self.attributes {
            object.insert(name.clone(), attribute.clone());
        }
        Value::Object(object)
    }

    /// Drop attributes not selected by `keep`.
    pub fn retain_attributes(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.attributes.retain(|name, _| keep(name.as_str()));
    }
}

impl TryFrom<Value> for Entity {
    type Error = ModelError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Entity::from_json(&value)
    }
}

impl From<Entity> for Value {
    fn from(entity: Entity) -> Self {
        entity.to_json()
    }
}

/// NGSI-LD attribute type (`Property`, `Relationship`, ...) of an attribute object.
pub fn attribute_type(attribute: &Value) -> Option<&str> {
    attribute
        .get("type")
        .or_else(|| attribute.get("@type"))
        .and_then(|t| match t {
            Value::String(s) => Some(s.as_str()),
            Value::Array(items) => items.first().and_then(Value::as_str),
            _ => None,
        })
}

pub(crate) fn entity_id(object: &Map<String, Value>) -> Result<String, ModelError> {
    object
        .get("id")
        .or_else(|| object.get("@id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ModelError::InvalidEntity("missing entity id".into()))
}

pub(crate) fn entity_types(object: &Map<String, Value>) -> Result<Vec<String>, ModelError> {
    match object.get("type").or_else(|| object.get("@type")) {
        Some(Value::String(t)) => Ok(vec![t.clone()]),
        Some(Value::Array(items)) => {
            let types: Vec<String> = items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect();
            if types.is_empty() || types.len() != items.len() {
                return Err(ModelError::InvalidEntity("invalid entity type list".into()));
            }
            Ok(types)
        }
        Some(_) => Err(ModelError::InvalidEntity("invalid entity type".into())),
        None => Err(ModelError::InvalidEntity("missing entity type".into())),
    }
}

pub(crate) fn types_json(types: &[String]) -> Value {
    match types {
        [single] => Value::String(single.clone()),
        many => Value::Array(many.iter().cloned().map(Value::String).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_normalized_entity() {
        let entity = Entity::from_json(&json!({
            "id": "urn:ngsi-ld:Vehicle:A4567",
            "type": "Vehicle",
            "speed": {"type": "Property", "value": 55},
            "isParked": {"type": "Relationship", "object": "urn:ngsi-ld:OffStreetParking:1"}
        }))
        .unwrap();

        assert_eq!(entity.id, "urn:ngsi-ld:Vehicle:A4567");
        assert_eq!(entity.types, vec!["Vehicle"]);
        assert_eq!(entity.attributes.len(), 2);
        assert_eq!(attribute_type(&entity.attributes["isParked"]), Some("Relationship"));
    }

    #[test]
    fn test_parse_expanded_keys() {
        let entity = Entity::from_json(&json!({
            "@id": "urn:ngsi-ld:Vehicle:1",
            "@type": ["https://uri.fiware.org/ns/data-models#Vehicle"],
            "https://uri.fiware.org/ns/data-models#speed": [{
                "@type": ["https://uri.etsi.org/ngsi-ld/Property"],
                "https://uri.etsi.org/ngsi-ld/hasValue": [{"@value": 12}]
            }]
        }))
        .unwrap();
        assert_eq!(entity.types.len(), 1);
        assert!(entity
            .attributes
            .contains_key("https://uri.fiware.org/ns/data-models#speed"));
    }

    #[test]
    fn test_reject_key_values_attributes() {
        let err = Entity::from_json(&json!({
            "id": "urn:ngsi-ld:Vehicle:1",
            "type": "Vehicle",
            "speed": 12
        }))
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidEntity(_)));
    }

    #[test]
    fn test_missing_type_rejected() {
        assert!(Entity::from_json(&json!({"id": "urn:x"})).is_err());
        assert!(Entity::from_json(&json!(["not", "an", "object"])).is_err());
    }

    #[test]
    fn test_json_shape() {
        let entity = Entity::new("urn:ngsi-ld:Vehicle:1", "Vehicle").with_property("speed", json!(10));
        let rendered = entity.to_json();
        assert_eq!(rendered["type"], "Vehicle");
        assert_eq!(rendered["speed"]["value"], 10);
    }
}
