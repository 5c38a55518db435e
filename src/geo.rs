//! Geographic primitives: points, neighborhood boundaries and distances.
//!
//! Coordinates are WGS84 degrees. Points and polygon vertices are kept in
//! `(lng, lat)` order, the same order PostGIS and GeoJSON use.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GeoPoint {
    pub lng: f64,
    pub lat: f64,
}

impl GeoPoint {
    /// Builds a point, rejecting non-finite or out-of-range coordinates.
    pub fn new(lng: f64, lat: f64) -> Option<Self> {
        if !lng.is_finite() || !lat.is_finite() {
            return None;
        }
        if !(-180.0..=180.0).contains(&lng) || !(-90.0..=90.0).contains(&lat) {
            return None;
        }
        Some(Self { lng, lat })
    }

    /// Great-circle distance in meters.
    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        let dlat = (other.lat - self.lat).to_radians();
        let dlng = (other.lng - self.lng).to_radians();
        let a = (dlat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (dlng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_METERS * a.sqrt().asin()
    }
}

/// A coordinate as clients send it: forms post strings, API clients numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Coordinate {
    Number(f64),
    Text(String),
}

impl Coordinate {
    pub fn value(&self) -> Option<f64> {
        let v = match self {
            Coordinate::Number(n) => *n,
            Coordinate::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        v.is_finite().then_some(v)
    }
}

impl From<f64> for Coordinate {
    fn from(v: f64) -> Self {
        Coordinate::Number(v)
    }
}

impl From<String> for Coordinate {
    fn from(v: String) -> Self {
        Coordinate::Text(v)
    }
}

/// Unvalidated location input attached to create / edit payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LocationInput {
    #[schema(value_type = f64)]
    pub lat: Option<Coordinate>,
    #[schema(value_type = f64)]
    pub lng: Option<Coordinate>,
}

impl LocationInput {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat: Some(lat.into()), lng: Some(lng.into()) }
    }

    /// `None` unless both coordinates parse as finite numbers.
    pub fn to_point(&self) -> Option<GeoPoint> {
        let lat = self.lat.as_ref()?.value()?;
        let lng = self.lng.as_ref()?.value()?;
        GeoPoint::new(lng, lat)
    }
}

/// GeoJSON-shaped polygon: `coordinates[0]` is the outer ring, any further
/// rings are holes. Vertices are `[lng, lat]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Polygon")]
pub struct Polygon {
    pub coordinates: Vec<Vec<[f64; 2]>>,
}

impl Polygon {
    pub fn from_ring(ring: Vec<[f64; 2]>) -> Self {
        Self { coordinates: vec![ring] }
    }

    /// Even-odd ray casting over every ring, so holes are excluded.
    /// Points exactly on an edge may land on either side.
    pub fn contains(&self, p: &GeoPoint) -> bool {
        let mut inside = false;
        for ring in &self.coordinates {
            if ring.len() < 3 {
                continue;
            }
            let mut j = ring.len() - 1;
            for i in 0..ring.len() {
                let [xi, yi] = ring[i];
                let [xj, yj] = ring[j];
                if (yi > p.lat) != (yj > p.lat) && p.lng < (xj - xi) * (p.lat - yi) / (yj - yi) + xi {
                    inside = !inside;
                }
                j = i;
            }
        }
        inside
    }
}
