//! Validation errors for the NGSI-LD model.

/// Error raised when a query, registration or payload does not satisfy the
/// NGSI-LD constraints the engine relies on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    /// Geometry is not a valid GeoJSON shape
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Geo relation could not be parsed
    #[error("Invalid georel: {0}")]
    InvalidGeoRelation(String),

    /// Temporal range is inconsistent or unsupported
    #[error("Invalid temporal query: {0}")]
    InvalidTemporalRange(String),

    /// Entity id pattern is not a valid regular expression
    #[error("Invalid idPattern '{pattern}': {reason}")]
    InvalidIdPattern { pattern: String, reason: String },

    /// Query criteria are inconsistent
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Registration is missing required fields or malformed
    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    /// Payload is not a valid NGSI-LD entity
    #[error("Invalid entity: {0}")]
    InvalidEntity(String),
}
