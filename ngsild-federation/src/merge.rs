//! Result Merger
//!
//! Pure functions combining per-source results. Callers pass sources in
//! precedence order: exclusive registrations, the local store, inclusive
//! specific registrations, inclusive wildcards, auxiliary registrations.

use std::collections::{BTreeMap, HashMap};

use ngsild_model::{AttributeObservation, Entity, MergedAttribute, MergedEntity, Origin};

/// Point-in-time merge output.
#[derive(Debug, Default)]
pub struct EntityMerge {
    /// Merged entities ordered by id
    pub entities: Vec<MergedEntity>,
    /// Entities whose sources disagreed on type
    pub type_conflicts: usize,
}

/// Merge entities from sources given in precedence order.
///
/// For each attribute the first source carrying it wins; types are the
/// union in precedence order. A source that reports an entity with no type
/// in common with higher-precedence sources counts as a type conflict; its
/// attributes still fill gaps.
pub fn merge_entities(sources: Vec<(Origin, Vec<Entity>)>) -> EntityMerge {
    let mut merged: BTreeMap<String, MergedEntity> = BTreeMap::new();
    let mut conflicted: Vec<String> = Vec::new();

    for (origin, entities) in sources {
        for entity in entities {
            let target = merged
                .entry(entity.id.clone())
                .or_insert_with(|| MergedEntity::new(entity.id.clone()));

            if !target.types.is_empty()
                && !entity.types.iter().any(|t| target.types.contains(t))
                && !conflicted.contains(&entity.id)
            {
                conflicted.push(entity.id.clone());
            }
            for entity_type in entity.types {
                if !target.types.contains(&entity_type) {
                    target.types.push(entity_type);
                }
            }

            for (name, value) in entity.attributes {
                target
                    .attributes
                    .entry(name)
                    .or_insert_with(|| MergedAttribute::Value {
                        value,
                        origin: origin.clone(),
                    });
            }
        }
    }

    EntityMerge {
        entities: merged.into_values().collect(),
        type_conflicts: conflicted.len(),
    }
}

/// Merge observations into one ordered series per (entity, attribute).
///
/// `priority` maps each origin to its tie-break rank (lower first); unknown
/// origins sort last. Exact duplicates (same instant, same origin) are
/// dropped. `last_n` keeps the newest observations of each merged series.
/// `fallback_types` names entities whose observations carry no type.
pub fn merge_temporal(
    observations: Vec<AttributeObservation>,
    priority: &HashMap<Origin, usize>,
    last_n: Option<usize>,
    fallback_types: &[String],
) -> Vec<MergedEntity> {
    let rank = |origin: &Origin| priority.get(origin).copied().unwrap_or(usize::MAX);

    let mut series: BTreeMap<(String, String), Vec<AttributeObservation>> = BTreeMap::new();
    for observation in observations {
        series
            .entry((observation.entity_id.clone(), observation.attribute_name.clone()))
            .or_default()
            .push(observation);
    }

    let mut merged: BTreeMap<String, MergedEntity> = BTreeMap::new();
    for ((entity_id, attribute), mut observations) in series {
        observations.sort_by(|a, b| {
            a.observed_at
                .cmp(&b.observed_at)
                .then_with(|| rank(&a.origin).cmp(&rank(&b.origin)))
                .then_with(|| a.origin.cmp(&b.origin))
        });
        observations.dedup_by(|later, earlier| {
            later.observed_at == earlier.observed_at && later.origin == earlier.origin
        });
        if let Some(n) = last_n {
            let excess = observations.len().saturating_sub(n);
            observations.drain(..excess);
        }

        let entity = merged
            .entry(entity_id.clone())
            .or_insert_with(|| MergedEntity::new(entity_id));
        for observation in &observations {
            if let Some(t) = &observation.entity_type {
                if !entity.types.contains(t) {
                    entity.types.push(t.clone());
                }
            }
        }
        entity
            .attributes
            .insert(attribute, MergedAttribute::Series { observations });
    }

    merged
        .into_values()
        .map(|mut entity| {
            if entity.types.is_empty() {
                entity.types = fallback_types.to_vec();
            }
            entity
        })
        .collect()
}

/// Apply `offset`/`limit` to entities already ordered by id.
pub fn paginate(entities: Vec<MergedEntity>, offset: usize, limit: Option<usize>) -> Vec<MergedEntity> {
    let page = entities.into_iter().skip(offset);
    match limit {
        Some(limit) => page.take(limit).collect(),
        None => page.collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::json;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap()
    }

    fn obs(minute: u32, value: i64, origin: &Origin) -> AttributeObservation {
        AttributeObservation::new("urn:ngsi-ld:Sensor:1", "temperature", at(minute), json!(value))
            .with_origin(origin.clone())
    }

    #[test]
    fn test_precedence_and_disjoint_union() {
        let a = Origin::registration("urn:csr:a");
        let merged = merge_entities(vec![
            (
                Origin::Local,
                vec![Entity::new("urn:ngsi-ld:Vehicle:1", "Vehicle").with_property("speed", json!(10))],
            ),
            (
                a.clone(),
                vec![Entity::new("urn:ngsi-ld:Vehicle:1", "Vehicle")
                    .with_property("speed", json!(12))
                    .with_property("fuel", json!(0.3))],
            ),
        ]);

        let vehicle = &merged.entities[0];
        assert_eq!(vehicle.origin_of("speed"), Some(&Origin::Local));
        assert_eq!(vehicle.value_of("speed").unwrap()["value"], 10);
        assert_eq!(vehicle.origin_of("fuel"), Some(&a));
        assert_eq!(merged.type_conflicts, 0);
    }

    #[test]
    fn test_type_conflict_counted_not_fatal() {
        let merged = merge_entities(vec![
            (Origin::Local, vec![Entity::new("urn:x:1", "Vehicle")]),
            (
                Origin::registration("urn:csr:a"),
                vec![Entity::new("urn:x:1", "Bus").with_property("seats", json!(40))],
            ),
        ]);
        assert_eq!(merged.type_conflicts, 1);
        assert_eq!(merged.entities[0].types, vec!["Vehicle", "Bus"]);
        assert!(merged.entities[0].attributes.contains_key("seats"));
    }

    #[test]
    fn test_entities_sorted_by_id_and_paginated() {
        let merged = merge_entities(vec![(
            Origin::Local,
            vec![
                Entity::new("urn:x:3", "T"),
                Entity::new("urn:x:1", "T"),
                Entity::new("urn:x:2", "T"),
            ],
        )]);
        let page = paginate(merged.entities, 1, Some(1));
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "urn:x:2");
    }

    #[test]
    fn test_temporal_sort_ties_and_dedup() {
        let a = Origin::registration("urn:csr:a");
        let priority = HashMap::from([(Origin::Local, 0), (a.clone(), 1)]);

        let merged = merge_temporal(
            vec![
                obs(5, 2, &a),
                obs(1, 1, &a),
                obs(5, 3, &Origin::Local),
                obs(5, 2, &a),
            ],
            &priority,
            None,
            &["Sensor".to_string()],
        );

        let series = merged[0].series_of("temperature").unwrap();
        let order: Vec<(DateTime<Utc>, &Origin)> =
            series.iter().map(|o| (o.observed_at, &o.origin)).collect();
        assert_eq!(order, vec![(at(1), &a), (at(5), &Origin::Local), (at(5), &a)]);
        assert_eq!(merged[0].types, vec!["Sensor"]);
    }

    #[test]
    fn test_last_n_applied_after_merge() {
        let a = Origin::registration("urn:csr:a");
        let priority = HashMap::from([(Origin::Local, 0), (a.clone(), 1)]);
        let merged = merge_temporal(
            vec![obs(1, 1, &Origin::Local), obs(4, 4, &a), obs(2, 2, &a), obs(3, 3, &Origin::Local)],
            &priority,
            Some(2),
            &[],
        );
        let minutes: Vec<_> = merged[0]
            .series_of("temperature")
            .unwrap()
            .iter()
            .map(|o| o.observed_at)
            .collect();
        assert_eq!(minutes, vec![at(3), at(4)]);
    }
}
