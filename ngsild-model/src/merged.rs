//! Merged, provenance-tagged results.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::entity::types_json;
use crate::observation::{AttributeObservation, Origin};

/// Winning content of one attribute after merging.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum MergedAttribute {
    /// Point-in-time value from the highest-precedence source
    Value { value: Value, origin: Origin },
    /// Full observation sequence, ordered by `observedAt`
    Series { observations: Vec<AttributeObservation> },
}

impl MergedAttribute {
    /// Origins contributing to this attribute, in first-seen order.
    pub fn origins(&self) -> Vec<&Origin> {
        match self {
            MergedAttribute::Value { origin, .. } => vec![origin],
            MergedAttribute::Series { observations } => {
                let mut origins: Vec<&Origin> = Vec::new();
                for observation in observations {
                    if !origins.contains(&&observation.origin) {
                        origins.push(&observation.origin);
                    }
                }
                origins
            }
        }
    }

    fn to_json(&self) -> Value {
        match self {
            MergedAttribute::Value { value, .. } => value.clone(),
            MergedAttribute::Series { observations } => {
                Value::Array(observations.iter().map(|o| o.value.clone()).collect())
            }
        }
    }
}

/// One entity after merging every source's contribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedEntity {
    pub id: String,
    pub types: Vec<String>,
    pub attributes: BTreeMap<String, MergedAttribute>,
}

impl MergedEntity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            types: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Origin of a point-in-time attribute.
    pub fn origin_of(&self, attribute: &str) -> Option<&Origin> {
        match self.attributes.get(attribute)? {
            MergedAttribute::Value { origin, .. } => Some(origin),
            MergedAttribute::Series { .. } => None,
        }
    }

    /// Point-in-time attribute object.
    pub fn value_of(&self, attribute: &str) -> Option<&Value> {
        match self.attributes.get(attribute)? {
            MergedAttribute::Value { value, .. } => Some(value),
            MergedAttribute::Series { .. } => None,
        }
    }

    /// Observation sequence of a temporal attribute.
    pub fn series_of(&self, attribute: &str) -> Option<&[AttributeObservation]> {
        match self.attributes.get(attribute)? {
            MergedAttribute::Series { observations } => Some(observations),
            MergedAttribute::Value { .. } => None,
        }
    }

    /// Attribute name to contributing origins.
    pub fn provenance(&self) -> BTreeMap<&str, Vec<&Origin>> {
        self.attributes
            .iter()
            .map(|(name, attribute)| (name.as_str(), attribute.origins()))
            .collect()
    }

    /// Render as NGSI-LD JSON (temporal attributes as instance arrays).
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert("id".into(), Value::String(self.id.clone()));
        object.insert("type".into(), types_json(&self.types));
        for (name, attribute) in &self.attributes {
            object.insert(name.clone(), attribute.to_json());
        }
        Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn test_series_provenance_and_rendering() {
        let t1 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap();
        let mut entity = MergedEntity::new("urn:ngsi-ld:Sensor:1");
        entity.types.push("Sensor".into());
        entity.attributes.insert(
            "temperature".into(),
            MergedAttribute::Series {
                observations: vec![
                    AttributeObservation::new("urn:ngsi-ld:Sensor:1", "temperature", t1, json!(20)),
                    AttributeObservation::new("urn:ngsi-ld:Sensor:1", "temperature", t2, json!(21))
                        .with_origin(Origin::registration("urn:csr:a")),
                ],
            },
        );

        let provenance = entity.provenance();
        assert_eq!(provenance["temperature"].len(), 2);

        let rendered = entity.to_json();
        assert_eq!(rendered["type"], "Sensor");
        assert_eq!(rendered["temperature"].as_array().unwrap().len(), 2);
        assert_eq!(rendered["temperature"][1]["value"], 21);
    }
}
