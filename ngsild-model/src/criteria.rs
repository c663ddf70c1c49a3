//! Normalized query criteria.
//!
//! All names held here are in JSON-LD expanded form; expansion against the
//! requester's `@context` happens before criteria reach the engine.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::geo::GeoQuery;
use crate::registration::Operation;

/// NGSI-LD `timerel` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRelation {
    Before,
    After,
    Between,
}

impl TimeRelation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRelation::Before => "before",
            TimeRelation::After => "after",
            TimeRelation::Between => "between",
        }
    }
}

/// Temporal range of a temporal query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalQuery {
    pub timerel: TimeRelation,
    pub time_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_n: Option<usize>,
}

impl TemporalQuery {
    pub fn before(time_at: DateTime<Utc>) -> Self {
        Self {
            timerel: TimeRelation::Before,
            time_at,
            end_time_at: None,
            last_n: None,
        }
    }

    pub fn after(time_at: DateTime<Utc>) -> Self {
        Self {
            timerel: TimeRelation::After,
            time_at,
            end_time_at: None,
            last_n: None,
        }
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            timerel: TimeRelation::Between,
            time_at: start,
            end_time_at: Some(end),
            last_n: None,
        }
    }

    pub fn with_last_n(mut self, last_n: usize) -> Self {
        self.last_n = Some(last_n);
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        match (self.timerel, self.end_time_at) {
            (TimeRelation::Between, None) => {
                return Err(ModelError::InvalidTemporalRange(
                    "timerel=between requires endTimeAt".into(),
                ));
            }
            (TimeRelation::Between, Some(end)) if end <= self.time_at => {
                return Err(ModelError::InvalidTemporalRange(
                    "endTimeAt must be after timeAt".into(),
                ));
            }
            (TimeRelation::Before | TimeRelation::After, Some(_)) => {
                return Err(ModelError::InvalidTemporalRange(format!(
                    "endTimeAt is only valid with timerel=between, got {}",
                    self.timerel.as_str()
                )));
            }
            _ => {}
        }
        if self.last_n == Some(0) {
            return Err(ModelError::InvalidTemporalRange(
                "lastN must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// `(start, end)` bounds; `None` is unbounded.
    pub fn bounds(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        match self.timerel {
            TimeRelation::Before => (None, Some(self.time_at)),
            TimeRelation::After => (Some(self.time_at), None),
            TimeRelation::Between => (Some(self.time_at), self.end_time_at),
        }
    }

    /// Whether an instant falls within the range (`before` is exclusive,
    /// `after` and the start of `between` inclusive).
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        match self.bounds() {
            (None, Some(end)) => instant < end,
            (Some(start), None) => instant >= start,
            (Some(start), Some(end)) => instant >= start && instant < end,
            (None, None) => true,
        }
    }
}

/// Anchored regular expression for NGSI-LD `idPattern`.
pub fn compile_id_pattern(pattern: &str) -> Result<Regex, ModelError> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| ModelError::InvalidIdPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Normalized, expanded form of an entity or temporal query.
///
/// Empty lists mean "unset" for that dimension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCriteria {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attrs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal: Option<TemporalQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    /// Set by `for_entity`; plain queries never become retrievals.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retrieval: bool,
}

impl QueryCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Criteria for retrieving a single entity by id.
    pub fn for_entity(id: impl Into<String>) -> Self {
        Self {
            ids: vec![id.into()],
            retrieval: true,
            ..Default::default()
        }
    }

    pub fn with_type(mut self, entity_type: impl Into<String>) -> Self {
        self.types.push(entity_type.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.ids.push(id.into());
        self
    }

    pub fn with_id_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.id_pattern = Some(pattern.into());
        self
    }

    pub fn with_attrs<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attrs.extend(attrs.into_iter().map(Into::into));
        self
    }

    pub fn with_geo(mut self, geo: GeoQuery) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn with_temporal(mut self, temporal: TemporalQuery) -> Self {
        self.temporal = Some(temporal);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn is_temporal(&self) -> bool {
        self.temporal.is_some()
    }

    /// Whether this is a single-entity retrieval rather than a query.
    ///
    /// Only criteria built with `for_entity` are retrievals, so narrowing the
    /// ids of a query never changes the operation it needs.
    pub fn is_retrieval(&self) -> bool {
        self.retrieval
    }

    /// Operation a context source must declare to receive this query.
    pub fn operation(&self) -> Operation {
        match (self.is_temporal(), self.is_retrieval()) {
            (false, true) => Operation::RetrieveEntity,
            (false, false) => Operation::QueryEntity,
            (true, true) => Operation::RetrieveTemporal,
            (true, false) => Operation::QueryTemporal,
        }
    }

    /// Reject criteria that cannot be dispatched.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.ids.iter().any(|id| id.trim().is_empty()) {
            return Err(ModelError::InvalidQuery("empty entity id".into()));
        }
        if self.types.iter().any(|t| t.trim().is_empty()) {
            return Err(ModelError::InvalidQuery("empty entity type".into()));
        }
        if self.attrs.iter().any(|a| a.trim().is_empty()) {
            return Err(ModelError::InvalidQuery("empty attribute name".into()));
        }
        if self.retrieval
            && (self.ids.len() != 1 || self.id_pattern.is_some() || self.geo.is_some())
        {
            return Err(ModelError::InvalidQuery(
                "retrieval needs exactly one entity id and no idPattern or geo filter".into(),
            ));
        }
        if let Some(pattern) = &self.id_pattern {
            compile_id_pattern(pattern)?;
        }
        if let Some(geo) = &self.geo {
            geo.validate()?;
        }
        if let Some(temporal) = &self.temporal {
            temporal.validate()?;
        }
        if self.limit == Some(0) {
            return Err(ModelError::InvalidQuery("limit must be greater than zero".into()));
        }
        Ok(())
    }

    /// Whether an attribute is selected by the `attrs` projection.
    pub fn selects_attribute(&self, name: &str) -> bool {
        self.attrs.is_empty() || self.attrs.iter().any(|a| a == name)
    }

    /// Whether an entity type is selected.
    pub fn selects_type(&self, types: &[String]) -> bool {
        self.types.is_empty() || self.types.iter().any(|t| types.contains(t))
    }

    /// Whether an entity id is selected by `ids` and `idPattern`.
    ///
    /// An unparsable pattern selects nothing; `validate()` rejects it earlier.
    pub fn selects_id(&self, id: &str) -> bool {
        if !self.ids.is_empty() && !self.ids.iter().any(|i| i == id) {
            return false;
        }
        match &self.id_pattern {
            Some(pattern) => compile_id_pattern(pattern)
                .map(|re| re.is_match(id))
                .unwrap_or(false),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_operation_kind() {
        assert_eq!(
            QueryCriteria::for_entity("urn:ngsi-ld:Vehicle:1").operation(),
            Operation::RetrieveEntity
        );
        assert_eq!(
            QueryCriteria::new().with_type("Vehicle").operation(),
            Operation::QueryEntity
        );
        assert_eq!(
            QueryCriteria::for_entity("urn:ngsi-ld:Vehicle:1")
                .with_temporal(TemporalQuery::after(at(1)))
                .operation(),
            Operation::RetrieveTemporal
        );
        assert_eq!(
            QueryCriteria::new()
                .with_type("Vehicle")
                .with_temporal(TemporalQuery::after(at(1)))
                .operation(),
            Operation::QueryTemporal
        );
        assert_eq!(
            QueryCriteria::new().with_id("urn:ngsi-ld:Vehicle:1").operation(),
            Operation::QueryEntity
        );
    }

    #[test]
    fn test_retrieval_shape_validated() {
        assert!(QueryCriteria::for_entity("urn:ngsi-ld:Vehicle:1").validate().is_ok());
        assert!(QueryCriteria::for_entity("urn:ngsi-ld:Vehicle:1")
            .with_id("urn:ngsi-ld:Vehicle:2")
            .validate()
            .is_err());
        assert!(QueryCriteria::for_entity("urn:ngsi-ld:Vehicle:1")
            .with_id_pattern("urn:.*")
            .validate()
            .is_err());
    }

    #[test]
    fn test_between_requires_ordered_bounds() {
        assert!(TemporalQuery::between(at(2), at(1)).validate().is_err());
        assert!(TemporalQuery::between(at(1), at(2)).validate().is_ok());

        let mut missing_end = TemporalQuery::between(at(1), at(2));
        missing_end.end_time_at = None;
        assert!(missing_end.validate().is_err());

        assert!(TemporalQuery::after(at(1)).with_last_n(0).validate().is_err());
    }

    #[test]
    fn test_temporal_contains() {
        let range = TemporalQuery::between(at(1), at(3));
        assert!(range.contains(at(1)));
        assert!(range.contains(at(2)));
        assert!(!range.contains(at(3)));
        assert!(TemporalQuery::before(at(2)).contains(at(1)));
        assert!(!TemporalQuery::after(at(2)).contains(at(1)));
    }

    #[test]
    fn test_invalid_id_pattern_rejected() {
        let criteria = QueryCriteria::new().with_id_pattern("urn:ngsi-ld:Vehicle:(");
        assert!(matches!(
            criteria.validate(),
            Err(ModelError::InvalidIdPattern { .. })
        ));
    }

    #[test]
    fn test_id_selection() {
        let criteria = QueryCriteria::new().with_id_pattern("urn:ngsi-ld:Vehicle:.*");
        assert!(criteria.selects_id("urn:ngsi-ld:Vehicle:7"));
        assert!(!criteria.selects_id("urn:ngsi-ld:Sensor:7"));
        // anchored: a prefix match is not enough
        let exact = QueryCriteria::new().with_id_pattern("urn:ngsi-ld:Vehicle:7");
        assert!(!exact.selects_id("urn:ngsi-ld:Vehicle:77"));
    }

    #[test]
    fn test_zero_limit_rejected() {
        assert!(QueryCriteria::new().with_limit(0).validate().is_err());
    }
}
