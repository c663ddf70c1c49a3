//! GeoJSON geometries and NGSI-LD geo-queries.
//!
//! Registrations declare their geographic scope as a GeoJSON geometry and
//! queries carry a `georel` + geometry pair. The federation engine only needs
//! to decide whether a source *might* hold entities satisfying the relation,
//! so comparisons are done on bounding boxes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Metres per degree of latitude (mean).
const METRES_PER_DEGREE: f64 = 111_320.0;

/// Property queried when a geo-query names none.
pub const DEFAULT_GEOPROPERTY: &str = "location";

/// A GeoJSON position: `[longitude, latitude]` or `[longitude, latitude, altitude]`.
pub type Position = Vec<f64>;

/// GeoJSON geometry as accepted by NGSI-LD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Position },
    MultiPoint { coordinates: Vec<Position> },
    LineString { coordinates: Vec<Position> },
    MultiLineString { coordinates: Vec<Vec<Position>> },
    Polygon { coordinates: Vec<Vec<Position>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Position>>> },
}

impl Geometry {
    /// Build a point geometry.
    pub fn point(lon: f64, lat: f64) -> Self {
        Geometry::Point {
            coordinates: vec![lon, lat],
        }
    }

    /// Build an axis-aligned rectangular polygon.
    pub fn rectangle(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Geometry::Polygon {
            coordinates: vec![vec![
                vec![min_lon, min_lat],
                vec![max_lon, min_lat],
                vec![max_lon, max_lat],
                vec![min_lon, max_lat],
                vec![min_lon, min_lat],
            ]],
        }
    }

    /// GeoJSON type name, as used in the `geometry` query parameter.
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point { .. } => "Point",
            Geometry::MultiPoint { .. } => "MultiPoint",
            Geometry::LineString { .. } => "LineString",
            Geometry::MultiLineString { .. } => "MultiLineString",
            Geometry::Polygon { .. } => "Polygon",
            Geometry::MultiPolygon { .. } => "MultiPolygon",
        }
    }

    /// Coordinates rendered as JSON, as used in the `coordinates` query parameter.
    pub fn coordinates_json(&self) -> String {
        let rendered = match self {
            Geometry::Point { coordinates } => serde_json::to_string(coordinates),
            Geometry::MultiPoint { coordinates } | Geometry::LineString { coordinates } => {
                serde_json::to_string(coordinates)
            }
            Geometry::MultiLineString { coordinates } | Geometry::Polygon { coordinates } => {
                serde_json::to_string(coordinates)
            }
            Geometry::MultiPolygon { coordinates } => serde_json::to_string(coordinates),
        };
        // Vec<f64> serialization only fails on non-finite floats, which validate() rejects.
        rendered.unwrap_or_default()
    }

    /// Parse from the `geometry` + `coordinates` query parameter pair.
    pub fn from_query_params(geometry: &str, coordinates: &str) -> Result<Self, ModelError> {
        let value = serde_json::json!({
            "type": geometry,
            "coordinates": serde_json::from_str::<serde_json::Value>(coordinates)
                .map_err(|e| ModelError::InvalidGeometry(format!("coordinates: {}", e)))?,
        });
        let geometry: Geometry = serde_json::from_value(value)
            .map_err(|e| ModelError::InvalidGeometry(e.to_string()))?;
        geometry.validate()?;
        Ok(geometry)
    }

    fn positions(&self) -> Vec<&Position> {
        match self {
            Geometry::Point { coordinates } => vec![coordinates],
            Geometry::MultiPoint { coordinates } | Geometry::LineString { coordinates } => {
                coordinates.iter().collect()
            }
            Geometry::MultiLineString { coordinates } | Geometry::Polygon { coordinates } => {
                coordinates.iter().flatten().collect()
            }
            Geometry::MultiPolygon { coordinates } => {
                coordinates.iter().flatten().flatten().collect()
            }
        }
    }

    /// Check GeoJSON structural constraints.
    pub fn validate(&self) -> Result<(), ModelError> {
        for position in self.positions() {
            validate_position(position)?;
        }

        match self {
            Geometry::Point { .. } => Ok(()),
            Geometry::MultiPoint { coordinates } => {
                if coordinates.is_empty() {
                    return Err(ModelError::InvalidGeometry("MultiPoint has no points".into()));
                }
                Ok(())
            }
            Geometry::LineString { coordinates } => validate_line(coordinates),
            Geometry::MultiLineString { coordinates } => {
                if coordinates.is_empty() {
                    return Err(ModelError::InvalidGeometry(
                        "MultiLineString has no lines".into(),
                    ));
                }
                coordinates.iter().try_for_each(|line| validate_line(line))
            }
            Geometry::Polygon { coordinates } => validate_polygon(coordinates),
            Geometry::MultiPolygon { coordinates } => {
                if coordinates.is_empty() {
                    return Err(ModelError::InvalidGeometry(
                        "MultiPolygon has no polygons".into(),
                    ));
                }
                coordinates.iter().try_for_each(|polygon| validate_polygon(polygon))
            }
        }
    }

    /// Bounding box of all positions.
    pub fn bbox(&self) -> BoundingBox {
        let mut bbox = BoundingBox {
            min_lon: f64::INFINITY,
            min_lat: f64::INFINITY,
            max_lon: f64::NEG_INFINITY,
            max_lat: f64::NEG_INFINITY,
        };
        for position in self.positions() {
            if let [lon, lat, ..] = position.as_slice() {
                bbox.min_lon = bbox.min_lon.min(*lon);
                bbox.min_lat = bbox.min_lat.min(*lat);
                bbox.max_lon = bbox.max_lon.max(*lon);
                bbox.max_lat = bbox.max_lat.max(*lat);
            }
        }
        bbox
    }
}

fn validate_position(position: &Position) -> Result<(), ModelError> {
    if position.len() < 2 || position.len() > 3 {
        return Err(ModelError::InvalidGeometry(format!(
            "position must have 2 or 3 values, got {}",
            position.len()
        )));
    }
    if position.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::InvalidGeometry("non-finite coordinate".into()));
    }
    let (lon, lat) = (position[0], position[1]);
    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        return Err(ModelError::InvalidGeometry(format!(
            "position [{}, {}] out of range",
            lon, lat
        )));
    }
    Ok(())
}

fn validate_line(line: &[Position]) -> Result<(), ModelError> {
    if line.len() < 2 {
        return Err(ModelError::InvalidGeometry(
            "LineString needs at least 2 positions".into(),
        ));
    }
    Ok(())
}

fn validate_polygon(rings: &[Vec<Position>]) -> Result<(), ModelError> {
    if rings.is_empty() {
        return Err(ModelError::InvalidGeometry("Polygon has no rings".into()));
    }
    for ring in rings {
        if ring.len() < 4 {
            return Err(ModelError::InvalidGeometry(
                "Polygon ring needs at least 4 positions".into(),
            ));
        }
        if ring.first() != ring.last() {
            return Err(ModelError::InvalidGeometry("Polygon ring is not closed".into()));
        }
    }
    Ok(())
}

/// Axis-aligned bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Whether the two boxes share at least one point (edges included).
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }

    /// Grow the box by a distance in metres on every side.
    pub fn expand_by_metres(&self, metres: f64) -> BoundingBox {
        let lat_delta = metres / METRES_PER_DEGREE;
        let mid_lat = ((self.min_lat + self.max_lat) / 2.0).to_radians();
        // Longitude degrees shrink towards the poles; clamp to avoid division blow-up.
        let lon_delta = metres / (METRES_PER_DEGREE * mid_lat.cos().max(0.01));
        BoundingBox {
            min_lon: (self.min_lon - lon_delta).max(-180.0),
            min_lat: (self.min_lat - lat_delta).max(-90.0),
            max_lon: (self.max_lon + lon_delta).min(180.0),
            max_lat: (self.max_lat + lat_delta).min(90.0),
        }
    }
}

/// NGSI-LD `georel` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GeoRelation {
    /// `near;maxDistance==d` and/or `near;minDistance==d`, distances in metres
    Near {
        max_distance: Option<f64>,
        min_distance: Option<f64>,
    },
    Within,
    Contains,
    Intersects,
    Equals,
    Disjoint,
    Overlaps,
}

impl FromStr for GeoRelation {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(';');
        let name = parts.next().unwrap_or_default().trim();

        let relation = match name {
            "near" => {
                let mut max_distance = None;
                let mut min_distance = None;
                for modifier in parts {
                    let (key, value) = modifier
                        .split_once("==")
                        .ok_or_else(|| ModelError::InvalidGeoRelation(s.to_string()))?;
                    let distance: f64 = value
                        .trim()
                        .parse()
                        .map_err(|_| ModelError::InvalidGeoRelation(s.to_string()))?;
                    if !distance.is_finite() || distance < 0.0 {
                        return Err(ModelError::InvalidGeoRelation(format!(
                            "distance must be a non-negative number: {}",
                            s
                        )));
                    }
                    match key.trim() {
                        "maxDistance" => max_distance = Some(distance),
                        "minDistance" => min_distance = Some(distance),
                        _ => return Err(ModelError::InvalidGeoRelation(s.to_string())),
                    }
                }
                if max_distance.is_none() && min_distance.is_none() {
                    return Err(ModelError::InvalidGeoRelation(
                        "near requires maxDistance or minDistance".into(),
                    ));
                }
                return Ok(GeoRelation::Near {
                    max_distance,
                    min_distance,
                });
            }
            "within" => GeoRelation::Within,
            "contains" => GeoRelation::Contains,
            "intersects" => GeoRelation::Intersects,
            "equals" => GeoRelation::Equals,
            "disjoint" => GeoRelation::Disjoint,
            "overlaps" => GeoRelation::Overlaps,
            _ => return Err(ModelError::InvalidGeoRelation(s.to_string())),
        };

        if parts.next().is_some() {
            return Err(ModelError::InvalidGeoRelation(s.to_string()));
        }
        Ok(relation)
    }
}

impl fmt::Display for GeoRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeoRelation::Near {
                max_distance,
                min_distance,
            } => {
                write!(f, "near")?;
                if let Some(d) = max_distance {
                    write!(f, ";maxDistance=={}", d)?;
                }
                if let Some(d) = min_distance {
                    write!(f, ";minDistance=={}", d)?;
                }
                Ok(())
            }
            GeoRelation::Within => write!(f, "within"),
            GeoRelation::Contains => write!(f, "contains"),
            GeoRelation::Intersects => write!(f, "intersects"),
            GeoRelation::Equals => write!(f, "equals"),
            GeoRelation::Disjoint => write!(f, "disjoint"),
            GeoRelation::Overlaps => write!(f, "overlaps"),
        }
    }
}

impl TryFrom<String> for GeoRelation {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GeoRelation> for String {
    fn from(value: GeoRelation) -> Self {
        value.to_string()
    }
}

/// Geo-filter of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoQuery {
    pub georel: GeoRelation,
    pub geometry: Geometry,
    #[serde(default = "default_geoproperty")]
    pub geoproperty: String,
}

fn default_geoproperty() -> String {
    DEFAULT_GEOPROPERTY.to_string()
}

impl GeoQuery {
    pub fn new(georel: GeoRelation, geometry: Geometry) -> Self {
        Self {
            georel,
            geometry,
            geoproperty: default_geoproperty(),
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        self.geometry.validate()
    }

    /// Whether a source whose data lies within `region` could satisfy this filter.
    pub fn may_match_region(&self, region: &Geometry) -> bool {
        let query_box = self.geometry.bbox();
        let region_box = region.bbox();

        match &self.georel {
            GeoRelation::Disjoint => true,
            GeoRelation::Near {
                max_distance: None, ..
            } => true,
            GeoRelation::Near {
                max_distance: Some(max),
                ..
            } => query_box.expand_by_metres(*max).intersects(&region_box),
            GeoRelation::Within
            | GeoRelation::Contains
            | GeoRelation::Intersects
            | GeoRelation::Equals
            | GeoRelation::Overlaps => query_box.intersects(&region_box),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_near_relation() {
        let rel: GeoRelation = "near;maxDistance==2000".parse().unwrap();
        assert_eq!(
            rel,
            GeoRelation::Near {
                max_distance: Some(2000.0),
                min_distance: None
            }
        );
        assert_eq!(rel.to_string(), "near;maxDistance==2000");
    }

    #[test]
    fn test_reject_bad_relations() {
        assert!("near".parse::<GeoRelation>().is_err());
        assert!("near;maxDistance==-5".parse::<GeoRelation>().is_err());
        assert!("touches".parse::<GeoRelation>().is_err());
        assert!("within;extra".parse::<GeoRelation>().is_err());
    }

    #[test]
    fn test_polygon_must_be_closed() {
        let open = Geometry::Polygon {
            coordinates: vec![vec![
                vec![0.0, 0.0],
                vec![1.0, 0.0],
                vec![1.0, 1.0],
                vec![0.0, 1.0],
            ]],
        };
        assert!(open.validate().is_err());
        assert!(Geometry::rectangle(0.0, 0.0, 1.0, 1.0).validate().is_ok());
    }

    #[test]
    fn test_out_of_range_point() {
        assert!(Geometry::point(200.0, 10.0).validate().is_err());
        assert!(Geometry::point(-3.7, 40.4).validate().is_ok());
    }

    #[test]
    fn test_geometry_from_query_params() {
        let geometry = Geometry::from_query_params("Point", "[-3.7,40.4]").unwrap();
        assert_eq!(geometry, Geometry::point(-3.7, 40.4));
        assert_eq!(geometry.coordinates_json(), "[-3.7,40.4]");
        assert!(Geometry::from_query_params("Point", "not json").is_err());
    }

    #[test]
    fn test_region_matching() {
        let madrid = Geometry::rectangle(-3.9, 40.3, -3.5, 40.6);
        let within_madrid = GeoQuery::new(
            GeoRelation::Within,
            Geometry::rectangle(-3.8, 40.4, -3.6, 40.5),
        );
        let within_paris = GeoQuery::new(
            GeoRelation::Within,
            Geometry::rectangle(2.2, 48.8, 2.5, 48.9),
        );
        assert!(within_madrid.may_match_region(&madrid));
        assert!(!within_paris.may_match_region(&madrid));

        // 1 km from the box edge is reachable with a 5 km radius
        let near = GeoQuery::new(
            GeoRelation::Near {
                max_distance: Some(5_000.0),
                min_distance: None,
            },
            Geometry::point(-3.49, 40.45),
        );
        assert!(near.may_match_region(&madrid));

        let disjoint = GeoQuery::new(GeoRelation::Disjoint, Geometry::point(2.3, 48.85));
        assert!(disjoint.may_match_region(&madrid));
    }
}
