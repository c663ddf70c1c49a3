//! NGSI-LD data model for federated context queries.
//!
//! Context source registrations, normalized query criteria, entities,
//! temporal observations and merged results. Everything here is pure: no
//! async, no I/O.

pub mod criteria;
pub mod entity;
pub mod error;
pub mod geo;
pub mod merged;
pub mod observation;
pub mod registration;

pub use criteria::{compile_id_pattern, QueryCriteria, TemporalQuery, TimeRelation};
pub use entity::{attribute_type, Entity};
pub use error::ModelError;
pub use geo::{BoundingBox, GeoQuery, GeoRelation, Geometry, DEFAULT_GEOPROPERTY};
pub use merged::{MergedAttribute, MergedEntity};
pub use observation::{parse_temporal_entity, AttributeObservation, Origin, TemporalParse};
pub use registration::{
    ContextSourceRegistration, EntityInfo, Operation, RegistrationInfo, RegistrationMode,
    SourceStatus, TimeInterval,
};
