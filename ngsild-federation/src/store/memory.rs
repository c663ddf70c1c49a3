//! In-memory local store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ngsild_model::{AttributeObservation, Entity, Geometry, QueryCriteria};
use tokio::sync::RwLock;

use super::{LocalStore, StoreError};

/// Entities and observations held in memory, filtered per query.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    entities: Arc<RwLock<Vec<Entity>>>,
    observations: Arc<RwLock<Vec<AttributeObservation>>>,
    failure: Option<StoreError>,
    delay: Option<Duration>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entities(self, entities: Vec<Entity>) -> Self {
        Self {
            entities: Arc::new(RwLock::new(entities)),
            ..self
        }
    }

    pub fn with_observations(self, observations: Vec<AttributeObservation>) -> Self {
        Self {
            observations: Arc::new(RwLock::new(observations)),
            ..self
        }
    }

    /// Fail every query with `error`.
    pub fn with_failure(mut self, error: StoreError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Answer every query after `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Insert or replace an entity.
    pub async fn upsert(&self, entity: Entity) {
        let mut entities = self.entities.write().await;
        match entities.iter_mut().find(|e| e.id == entity.id) {
            Some(existing) => *existing = entity,
            None => entities.push(entity),
        }
    }

    /// Append an observation.
    pub async fn record(&self, observation: AttributeObservation) {
        self.observations.write().await.push(observation);
    }

    async fn before_query(&self) -> Result<(), StoreError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

fn within_geo_filter(entity: &Entity, criteria: &QueryCriteria) -> bool {
    let Some(geo) = &criteria.geo else {
        return true;
    };
    entity
        .attributes
        .get(&geo.geoproperty)
        .and_then(|attribute| attribute.get("value"))
        .and_then(|value| serde_json::from_value::<Geometry>(value.clone()).ok())
        .is_some_and(|geometry| geo.may_match_region(&geometry))
}

#[async_trait]
impl LocalStore for InMemoryStore {
    async fn query_entities(&self, criteria: &QueryCriteria) -> Result<Vec<Entity>, StoreError> {
        self.before_query().await?;

        let entities = self.entities.read().await;
        let mut selected: Vec<Entity> = entities
            .iter()
            .filter(|e| criteria.selects_type(&e.types) && criteria.selects_id(&e.id))
            .filter(|e| within_geo_filter(e, criteria))
            .filter_map(|e| {
                let mut entity = e.clone();
                entity.retain_attributes(|name| criteria.selects_attribute(name));
                // A projection that leaves nothing means the entity lacks every requested attribute.
                (criteria.attrs.is_empty() || !entity.attributes.is_empty()).then_some(entity)
            })
            .collect();

        selected.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(limit) = criteria.limit {
            selected.truncate(limit);
        }
        Ok(selected)
    }

    async fn query_temporal(
        &self,
        criteria: &QueryCriteria,
    ) -> Result<Vec<AttributeObservation>, StoreError> {
        self.before_query().await?;

        let temporal = criteria
            .temporal
            .as_ref()
            .ok_or_else(|| StoreError::Query("temporal query without a time range".to_string()))?;

        let observations = self.observations.read().await;
        let mut selected: Vec<AttributeObservation> = observations
            .iter()
            .filter(|o| criteria.selects_id(&o.entity_id))
            .filter(|o| match &o.entity_type {
                Some(t) => criteria.selects_type(std::slice::from_ref(t)),
                None => true,
            })
            .filter(|o| criteria.selects_attribute(&o.attribute_name))
            .filter(|o| temporal.contains(o.observed_at))
            .cloned()
            .collect();

        selected.sort_by(|a, b| a.observed_at.cmp(&b.observed_at));

        if let Some(last_n) = temporal.last_n {
            let mut per_attribute: HashMap<(String, String), usize> = HashMap::new();
            for o in &selected {
                *per_attribute
                    .entry((o.entity_id.clone(), o.attribute_name.clone()))
                    .or_default() += 1;
            }
            // Keep the newest `last_n` of each series.
            let mut seen: HashMap<(String, String), usize> = HashMap::new();
            selected.retain(|o| {
                let key = (o.entity_id.clone(), o.attribute_name.clone());
                let total = per_attribute.get(&key).copied().unwrap_or(0);
                let index = seen.entry(key).or_default();
                *index += 1;
                *index + last_n > total
            });
        }

        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ngsild_model::TemporalQuery;
    use serde_json::json;

    fn store() -> InMemoryStore {
        InMemoryStore::new().with_entities(vec![
            Entity::new("urn:ngsi-ld:Vehicle:2", "Vehicle").with_property("speed", json!(30)),
            Entity::new("urn:ngsi-ld:Vehicle:1", "Vehicle")
                .with_property("speed", json!(10))
                .with_property("fuel", json!(0.5)),
            Entity::new("urn:ngsi-ld:Sensor:1", "Sensor").with_property("temperature", json!(21)),
        ])
    }

    #[tokio::test]
    async fn test_query_by_type_sorted_by_id() {
        let result = store()
            .query_entities(&QueryCriteria::new().with_type("Vehicle"))
            .await
            .unwrap();
        let ids: Vec<&str> = result.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["urn:ngsi-ld:Vehicle:1", "urn:ngsi-ld:Vehicle:2"]);
    }

    #[tokio::test]
    async fn test_attribute_projection() {
        let result = store()
            .query_entities(&QueryCriteria::new().with_attrs(["fuel"]))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].attributes.len(), 1);
        assert!(result[0].attributes.contains_key("fuel"));
    }

    #[tokio::test]
    async fn test_failure_is_reported() {
        let store = store().with_failure(StoreError::Unavailable("disk".into()));
        assert!(store.query_entities(&QueryCriteria::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_temporal_last_n_per_series() {
        let at = |h| Utc.with_ymd_and_hms(2024, 5, 1, h, 0, 0).unwrap();
        let store = InMemoryStore::new().with_observations(
            (1..=5)
                .map(|h| AttributeObservation::new("urn:ngsi-ld:Sensor:1", "temperature", at(h), json!(h)))
                .collect(),
        );

        let criteria = QueryCriteria::new()
            .with_id("urn:ngsi-ld:Sensor:1")
            .with_temporal(TemporalQuery::after(at(2)).with_last_n(2));
        let result = store.query_temporal(&criteria).await.unwrap();

        let hours: Vec<_> = result.iter().map(|o| o.observed_at).collect();
        assert_eq!(hours, vec![at(4), at(5)]);
    }
}
