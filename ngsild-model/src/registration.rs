//! Context Source Registrations (CSRs).
//!
//! Serialized in the NGSI-LD registration shape so registrations received
//! from the registration API can be deserialized directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::criteria::compile_id_pattern;
use crate::error::ModelError;
use crate::geo::Geometry;
use crate::observation::LOCAL_ORIGIN;

const REGISTRATION_TYPE: &str = "ContextSourceRegistration";

/// Operations a context source can declare.
///
/// `RetrieveOps` and `FederationOps` are NGSI-LD operation groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    RetrieveEntity,
    QueryEntity,
    RetrieveTemporal,
    QueryTemporal,
    RetrieveOps,
    FederationOps,
}

impl Operation {
    /// Whether declaring `self` allows dispatching `requested`.
    pub fn covers(&self, requested: Operation) -> bool {
        match self {
            Operation::FederationOps => true,
            Operation::RetrieveOps => matches!(
                requested,
                Operation::RetrieveEntity | Operation::QueryEntity
            ),
            declared => *declared == requested,
        }
    }
}

/// Registration mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationMode {
    /// Supplements local data
    #[default]
    Inclusive,
    /// Sole authority for the registered scope
    Exclusive,
    /// Consulted with the lowest precedence
    Auxiliary,
}

impl RegistrationMode {
    /// Precedence band, lower wins.
    pub fn rank(&self) -> u8 {
        match self {
            RegistrationMode::Exclusive => 0,
            RegistrationMode::Inclusive => 1,
            RegistrationMode::Auxiliary => 2,
        }
    }
}

/// Transient per-dispatch status of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Ok,
    Unreachable,
    Timeout,
    Error,
}

/// Entity selector inside a registration info entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityInfo {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_pattern: Option<String>,
}

impl EntityInfo {
    pub fn of_type(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type.into()),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_id_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.id_pattern = Some(pattern.into());
        self
    }
}

/// One capability declaration of a registration.
///
/// Empty lists leave that dimension unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationInfo {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<EntityInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub property_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationship_names: Vec<String>,
}

impl RegistrationInfo {
    /// Entry scoped to one entity type.
    pub fn for_type(entity_type: impl Into<String>) -> Self {
        Self {
            entities: vec![EntityInfo::of_type(entity_type)],
            ..Default::default()
        }
    }

    pub fn with_entity(mut self, entity: EntityInfo) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn with_properties<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.property_names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_relationships<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relationship_names
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Declared attribute names (properties and relationships).
    pub fn attribute_names(&self) -> impl Iterator<Item = &String> {
        self.property_names.iter().chain(self.relationship_names.iter())
    }

    /// Whether no attribute restriction is declared.
    pub fn all_attributes(&self) -> bool {
        self.property_names.is_empty() && self.relationship_names.is_empty()
    }
}

/// Interval over which a source holds observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeInterval {
    pub start_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,
}

impl TimeInterval {
    /// Whether this interval overlaps `[start, end)`; `None` bounds are open.
    pub fn overlaps(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> bool {
        let starts_before_end = end.map_or(true, |end| self.start_at < end);
        let ends_after_start = match (self.end_at, start) {
            (Some(own_end), Some(start)) => own_end >= start,
            _ => true,
        };
        starts_before_end && ends_after_start
    }
}

/// A remote broker registered as a partial source of context data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSourceRegistration {
    pub id: String,
    #[serde(rename = "type", default = "registration_type")]
    pub registration_type: String,
    pub endpoint: String,
    #[serde(default)]
    pub information: Vec<RegistrationInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub mode: RegistrationMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Geometry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation_interval: Option<TimeInterval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

fn registration_type() -> String {
    REGISTRATION_TYPE.to_string()
}

impl ContextSourceRegistration {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            registration_type: registration_type(),
            endpoint: endpoint.into(),
            information: Vec::new(),
            operations: Vec::new(),
            mode: RegistrationMode::Inclusive,
            location: None,
            observation_interval: None,
            expires_at: None,
            tenant: None,
            created_at: None,
            modified_at: None,
        }
    }

    pub fn with_information(mut self, info: RegistrationInfo) -> Self {
        self.information.push(info);
        self
    }

    pub fn with_operations<I>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = Operation>,
    {
        self.operations.extend(operations);
        self
    }

    pub fn with_mode(mut self, mode: RegistrationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_location(mut self, location: Geometry) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_observation_interval(mut self, interval: TimeInterval) -> Self {
        self.observation_interval = Some(interval);
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self.modified_at = Some(created_at);
        self
    }

    /// A registration without information entries covers everything.
    pub fn is_wildcard(&self) -> bool {
        self.information.is_empty()
    }

    pub fn is_exclusive(&self) -> bool {
        self.mode == RegistrationMode::Exclusive
    }

    /// Whether the registration accepts `operation`; no declared operations
    /// means `federationOps`.
    pub fn supports(&self, operation: Operation) -> bool {
        self.operations.is_empty() || self.operations.iter().any(|op| op.covers(operation))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Creation instant used for recency ordering.
    pub fn registered_at(&self) -> DateTime<Utc> {
        self.created_at.unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.id.trim().is_empty() {
            return Err(ModelError::InvalidRegistration("id is required".into()));
        }
        if self.id == LOCAL_ORIGIN {
            return Err(ModelError::InvalidRegistration(format!(
                "id '{}' is reserved for the local store",
                LOCAL_ORIGIN
            )));
        }

        let endpoint = url::Url::parse(&self.endpoint).map_err(|e| {
            ModelError::InvalidRegistration(format!("endpoint '{}': {}", self.endpoint, e))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ModelError::InvalidRegistration(format!(
                "endpoint scheme must be http or https: {}",
                self.endpoint
            )));
        }

        for info in &self.information {
            for entity in &info.entities {
                if entity.id.is_some() && entity.id_pattern.is_some() {
                    return Err(ModelError::InvalidRegistration(
                        "entity selector cannot have both id and idPattern".into(),
                    ));
                }
                if let Some(pattern) = &entity.id_pattern {
                    compile_id_pattern(pattern)?;
                }
            }
        }

        if self.mode == RegistrationMode::Exclusive
            && self.information.iter().any(RegistrationInfo::all_attributes)
        {
            return Err(ModelError::InvalidRegistration(
                "exclusive registrations must name their attributes".into(),
            ));
        }

        if let Some(location) = &self.location {
            location.validate()?;
        }

        if let Some(TimeInterval {
            start_at,
            end_at: Some(end_at),
        }) = &self.observation_interval
        {
            if end_at < start_at {
                return Err(ModelError::InvalidRegistration(
                    "observationInterval ends before it starts".into(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_deserialize_ngsi_ld_registration() {
        let csr: ContextSourceRegistration = serde_json::from_value(serde_json::json!({
            "id": "urn:ngsi-ld:ContextSourceRegistration:fleet",
            "type": "ContextSourceRegistration",
            "endpoint": "http://fleet-broker:1026",
            "information": [{
                "entities": [{"type": "https://uri.fiware.org/ns/data-models#Vehicle"}],
                "propertyNames": ["https://uri.fiware.org/ns/data-models#speed"]
            }],
            "operations": ["queryEntity", "retrieveOps"],
            "mode": "exclusive",
            "expiresAt": "2030-01-01T00:00:00Z"
        }))
        .unwrap();

        assert_eq!(csr.mode, RegistrationMode::Exclusive);
        assert!(csr.supports(Operation::RetrieveEntity));
        assert!(!csr.supports(Operation::QueryTemporal));
        assert_eq!(csr.information[0].property_names.len(), 1);
        assert!(csr.validate().is_ok());
    }

    #[test]
    fn test_default_operations_are_federation_ops() {
        let csr = ContextSourceRegistration::new("urn:csr:1", "http://remote:1026");
        assert!(csr.supports(Operation::QueryTemporal));
        assert!(csr.supports(Operation::RetrieveEntity));
        assert!(csr.is_wildcard());
    }

    #[test]
    fn test_exclusive_requires_attributes() {
        let csr = ContextSourceRegistration::new("urn:csr:1", "http://remote:1026")
            .with_mode(RegistrationMode::Exclusive)
            .with_information(RegistrationInfo::for_type("Sensor"));
        assert!(csr.validate().is_err());
    }

    #[test]
    fn test_endpoint_must_be_http() {
        let csr = ContextSourceRegistration::new("urn:csr:1", "ftp://remote");
        assert!(csr.validate().is_err());
        let csr = ContextSourceRegistration::new("urn:csr:1", "not a url");
        assert!(csr.validate().is_err());
    }

    #[test]
    fn test_local_id_reserved() {
        let csr = ContextSourceRegistration::new("local", "http://remote:1026");
        assert!(matches!(csr.validate(), Err(ModelError::InvalidRegistration(_))));
        assert!(ContextSourceRegistration::new("urn:csr:local", "http://remote:1026")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_interval_overlap() {
        let interval = TimeInterval {
            start_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end_at: Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()),
        };
        let march = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mid_jan = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        assert!(!interval.overlaps(Some(march), None));
        assert!(interval.overlaps(Some(mid_jan), Some(march)));
        assert!(interval.overlaps(None, Some(mid_jan)));
    }

    #[test]
    fn test_expiry() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let csr = ContextSourceRegistration::new("urn:csr:1", "http://remote:1026")
            .with_expires_at(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());
        assert!(csr.is_expired(now));
    }
}
