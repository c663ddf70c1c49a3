//! JSON-LD term expansion and compaction.
//!
//! The engine works on expanded IRIs only. A full JSON-LD processor is an
//! external collaborator; `PrefixContextResolver` covers the NGSI-LD core
//! context plus user supplied terms and prefixes.

use std::collections::HashMap;

use ngsild_model::{MergedAttribute, MergedEntity, QueryCriteria};

pub const NGSI_LD_CORE: &str = "https://uri.etsi.org/ngsi-ld/";
pub const DEFAULT_VOCAB: &str = "https://uri.etsi.org/ngsi-ld/default-context/";

const CORE_TERMS: [&str; 10] = [
    "location",
    "observationSpace",
    "operationSpace",
    "observedAt",
    "createdAt",
    "modifiedAt",
    "unitCode",
    "datasetId",
    "name",
    "description",
];

/// Expands short terms to IRIs and back.
pub trait ContextResolver: Send + Sync {
    fn expand(&self, term: &str) -> String;

    fn compact(&self, iri: &str) -> String;
}

/// Term/prefix map resolver.
#[derive(Debug, Clone)]
pub struct PrefixContextResolver {
    terms: HashMap<String, String>,
    prefixes: HashMap<String, String>,
    vocab: String,
}

impl Default for PrefixContextResolver {
    fn default() -> Self {
        let terms = CORE_TERMS
            .iter()
            .map(|t| (t.to_string(), format!("{}{}", NGSI_LD_CORE, t)))
            .collect();
        Self {
            terms,
            prefixes: HashMap::from([("ngsi-ld".to_string(), NGSI_LD_CORE.to_string())]),
            vocab: DEFAULT_VOCAB.to_string(),
        }
    }
}

impl PrefixContextResolver {
    /// Resolver with the NGSI-LD core context.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_term(mut self, term: impl Into<String>, iri: impl Into<String>) -> Self {
        self.terms.insert(term.into(), iri.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>, namespace: impl Into<String>) -> Self {
        self.prefixes.insert(prefix.into(), namespace.into());
        self
    }

    pub fn with_vocab(mut self, vocab: impl Into<String>) -> Self {
        self.vocab = vocab.into();
        self
    }
}

fn is_absolute(term: &str) -> bool {
    term.contains("://") || term.starts_with("urn:")
}

impl ContextResolver for PrefixContextResolver {
    fn expand(&self, term: &str) -> String {
        if let Some(iri) = self.terms.get(term) {
            return iri.clone();
        }
        if is_absolute(term) {
            return term.to_string();
        }
        if let Some((prefix, suffix)) = term.split_once(':') {
            if let Some(namespace) = self.prefixes.get(prefix) {
                return format!("{}{}", namespace, suffix);
            }
        }
        format!("{}{}", self.vocab, term)
    }

    fn compact(&self, iri: &str) -> String {
        if let Some((term, _)) = self.terms.iter().find(|(_, v)| v.as_str() == iri) {
            return term.clone();
        }
        if let Some(term) = iri.strip_prefix(&self.vocab) {
            return term.to_string();
        }
        // Longest namespace first so nested prefixes compact correctly.
        let mut prefixes: Vec<_> = self.prefixes.iter().collect();
        prefixes.sort_by_key(|(_, namespace)| std::cmp::Reverse(namespace.len()));
        for (prefix, namespace) in prefixes {
            if let Some(suffix) = iri.strip_prefix(namespace.as_str()) {
                return format!("{}:{}", prefix, suffix);
            }
        }
        iri.to_string()
    }
}

/// Expand every type and attribute name of `criteria`.
pub fn expand_criteria(resolver: &dyn ContextResolver, criteria: &QueryCriteria) -> QueryCriteria {
    let mut expanded = criteria.clone();
    expanded.types = criteria.types.iter().map(|t| resolver.expand(t)).collect();
    expanded.attrs = criteria.attrs.iter().map(|a| resolver.expand(a)).collect();
    if let Some(geo) = expanded.geo.as_mut() {
        geo.geoproperty = resolver.expand(&geo.geoproperty);
    }
    expanded
}

/// Compact types and attribute names of a merged entity for the response,
/// including the names carried by each observation of a series.
pub fn compact_entity(resolver: &dyn ContextResolver, entity: MergedEntity) -> MergedEntity {
    MergedEntity {
        id: entity.id,
        types: entity.types.iter().map(|t| resolver.compact(t)).collect(),
        attributes: entity
            .attributes
            .into_iter()
            .map(|(name, attribute)| (resolver.compact(&name), compact_attribute(resolver, attribute)))
            .collect(),
    }
}

fn compact_attribute(resolver: &dyn ContextResolver, attribute: MergedAttribute) -> MergedAttribute {
    match attribute {
        MergedAttribute::Series { observations } => MergedAttribute::Series {
            observations: observations
                .into_iter()
                .map(|mut observation| {
                    observation.attribute_name = resolver.compact(&observation.attribute_name);
                    observation.entity_type =
                        observation.entity_type.map(|t| resolver.compact(&t));
                    observation
                })
                .collect(),
        },
        value => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ngsild_model::AttributeObservation;

    #[test]
    fn test_expand_and_compact_round() {
        let resolver = PrefixContextResolver::new()
            .with_prefix("fiware", "https://uri.fiware.org/ns/data-models#")
            .with_term("Vehicle", "https://uri.fiware.org/ns/data-models#Vehicle");

        assert_eq!(
            resolver.expand("Vehicle"),
            "https://uri.fiware.org/ns/data-models#Vehicle"
        );
        assert_eq!(
            resolver.expand("fiware:speed"),
            "https://uri.fiware.org/ns/data-models#speed"
        );
        assert_eq!(resolver.expand("location"), "https://uri.etsi.org/ngsi-ld/location");
        assert_eq!(
            resolver.expand("temperature"),
            "https://uri.etsi.org/ngsi-ld/default-context/temperature"
        );
        assert_eq!(resolver.expand("urn:x:y"), "urn:x:y");

        assert_eq!(
            resolver.compact("https://uri.fiware.org/ns/data-models#speed"),
            "fiware:speed"
        );
        assert_eq!(
            resolver.compact("https://uri.etsi.org/ngsi-ld/default-context/temperature"),
            "temperature"
        );
        assert_eq!(resolver.compact("https://uri.etsi.org/ngsi-ld/location"), "location");
    }

    #[test]
    fn test_expand_criteria() {
        let resolver = PrefixContextResolver::new();
        let criteria = QueryCriteria::new().with_type("Sensor").with_attrs(["temperature"]);
        let expanded = expand_criteria(&resolver, &criteria);
        assert_eq!(expanded.types[0], format!("{}Sensor", DEFAULT_VOCAB));
        assert_eq!(expanded.attrs[0], format!("{}temperature", DEFAULT_VOCAB));
    }

    #[test]
    fn test_compact_series_observations() {
        let resolver = PrefixContextResolver::new();
        let temperature = format!("{}temperature", DEFAULT_VOCAB);
        let observation = AttributeObservation::new(
            "urn:ngsi-ld:Sensor:1",
            temperature.clone(),
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            serde_json::json!(20.5),
        )
        .with_entity_type(format!("{}Sensor", DEFAULT_VOCAB));
        let mut entity = MergedEntity::new("urn:ngsi-ld:Sensor:1");
        entity.attributes.insert(
            temperature,
            MergedAttribute::Series {
                observations: vec![observation],
            },
        );

        let compacted = compact_entity(&resolver, entity);
        let series = compacted.series_of("temperature").unwrap();
        assert_eq!(series[0].attribute_name, "temperature");
        assert_eq!(series[0].entity_type.as_deref(), Some("Sensor"));
    }
}
