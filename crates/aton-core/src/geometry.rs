//! Station coverage geometry.
//!
//! A station only broadcasts the aids that fall inside its coverage area.
//! The router asks the question through the [`CoverageArea`] trait, so new
//! shapes can be added without touching the routing logic.
//!
//! All coordinates are WGS-84 degrees. Shapes are small enough (a VHF
//! coverage footprint) that planar tests on lat/lon are adequate, except for
//! [`Circle`] which uses the haversine distance.

use serde::{Deserialize, Serialize};

/// Mean earth radius in metres.
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Tolerance used when comparing point coverage.
const POINT_EPSILON: f64 = 1e-9;

/// A WGS-84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance in metres.
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.lon - self.lon).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

/// Predicate deciding whether a position is inside a station's coverage.
pub trait CoverageArea: Send + Sync {
    /// Check whether the point lies inside (or on the edge of) the area.
    fn contains(&self, point: &Coordinate) -> bool;

    /// An empty area never contains anything.
    fn is_empty(&self) -> bool {
        false
    }
}

/// A simple (non self-intersecting) polygon ring.
///
/// The ring may be given open or closed; the closing edge is implied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub points: Vec<Coordinate>,
}

impl Polygon {
    pub fn new(points: Vec<Coordinate>) -> Self {
        Self { points }
    }

    fn on_edge(point: &Coordinate, a: &Coordinate, b: &Coordinate) -> bool {
        let cross = (b.lon - a.lon) * (point.lat - a.lat) - (b.lat - a.lat) * (point.lon - a.lon);
        if cross.abs() > POINT_EPSILON {
            return false;
        }
        point.lon >= a.lon.min(b.lon) - POINT_EPSILON
            && point.lon <= a.lon.max(b.lon) + POINT_EPSILON
            && point.lat >= a.lat.min(b.lat) - POINT_EPSILON
            && point.lat <= a.lat.max(b.lat) + POINT_EPSILON
    }
}

impl CoverageArea for Polygon {
    fn contains(&self, point: &Coordinate) -> bool {
        if self.is_empty() {
            return false;
        }

        // Ray casting along increasing longitude
        let n = self.points.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (a, b) = (&self.points[i], &self.points[j]);
            if Self::on_edge(point, a, b) {
                return true;
            }
            if (a.lat > point.lat) != (b.lat > point.lat) {
                let lon_cross = (b.lon - a.lon) * (point.lat - a.lat) / (b.lat - a.lat) + a.lon;
                if point.lon < lon_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    fn is_empty(&self) -> bool {
        let distinct = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) if first == last => self.points.len() - 1,
            _ => self.points.len(),
        };
        distinct < 3
    }
}

/// An axis-aligned lat/lon rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl CoverageArea for BoundingBox {
    fn contains(&self, point: &Coordinate) -> bool {
        !self.is_empty()
            && point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lon >= self.min_lon
            && point.lon <= self.max_lon
    }

    fn is_empty(&self) -> bool {
        self.min_lat > self.max_lat || self.min_lon > self.max_lon
    }
}

/// A radius around a centre point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: Coordinate,
    pub radius_m: f64,
}

impl CoverageArea for Circle {
    fn contains(&self, point: &Coordinate) -> bool {
        !self.is_empty() && self.center.distance_to(point) <= self.radius_m
    }

    fn is_empty(&self) -> bool {
        !(self.radius_m > 0.0)
    }
}

/// Coverage geometry as configured on a station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    /// A single position. Only an aid at exactly this position matches.
    Point(Coordinate),
    Polygon(Polygon),
    BoundingBox(BoundingBox),
    Circle(Circle),
}

impl Geometry {
    fn as_area(&self) -> Option<&dyn CoverageArea> {
        match self {
            Geometry::Point(_) => None,
            Geometry::Polygon(p) => Some(p),
            Geometry::BoundingBox(b) => Some(b),
            Geometry::Circle(c) => Some(c),
        }
    }
}

impl CoverageArea for Geometry {
    fn contains(&self, point: &Coordinate) -> bool {
        match self {
            Geometry::Point(p) => {
                (p.lat - point.lat).abs() <= POINT_EPSILON && (p.lon - point.lon).abs() <= POINT_EPSILON
            }
            other => other.as_area().map(|a| a.contains(point)).unwrap_or(false),
        }
    }

    fn is_empty(&self) -> bool {
        self.as_area().map(|a| a.is_empty()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn north_sea() -> Polygon {
        Polygon::new(vec![
            Coordinate::new(51.0, -1.0),
            Coordinate::new(51.0, 4.0),
            Coordinate::new(56.0, 4.0),
            Coordinate::new(56.0, -1.0),
        ])
    }

    #[test]
    fn test_polygon_contains() {
        let poly = north_sea();
        assert!(poly.contains(&Coordinate::new(53.61, 1.594)));
        assert!(!poly.contains(&Coordinate::new(1.594, 53.61)));
    }

    #[test]
    fn test_polygon_edge_is_inside() {
        let poly = north_sea();
        assert!(poly.contains(&Coordinate::new(51.0, 2.0)));
        assert!(poly.contains(&Coordinate::new(56.0, -1.0)));
    }

    #[test]
    fn test_closed_ring_equivalent() {
        let mut closed = north_sea();
        closed.points.push(Coordinate::new(51.0, -1.0));
        assert!(closed.contains(&Coordinate::new(53.61, 1.594)));
        assert!(!closed.is_empty());
    }

    #[test]
    fn test_degenerate_polygon_is_empty() {
        let poly = Polygon::new(vec![Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 1.0)]);
        assert!(poly.is_empty());
        assert!(!poly.contains(&Coordinate::new(0.0, 0.0)));
        assert!(Polygon::new(vec![]).is_empty());
    }

    #[test]
    fn test_concave_polygon() {
        // U shape opening north
        let poly = Polygon::new(vec![
            Coordinate::new(0.0, 0.0),
            Coordinate::new(0.0, 3.0),
            Coordinate::new(3.0, 3.0),
            Coordinate::new(3.0, 2.0),
            Coordinate::new(1.0, 2.0),
            Coordinate::new(1.0, 1.0),
            Coordinate::new(3.0, 1.0),
            Coordinate::new(3.0, 0.0),
        ]);
        assert!(poly.contains(&Coordinate::new(2.0, 0.5)));
        assert!(!poly.contains(&Coordinate::new(2.0, 1.5)));
    }

    #[test]
    fn test_bounding_box() {
        let bbox = BoundingBox { min_lat: 50.0, min_lon: 0.0, max_lat: 55.0, max_lon: 2.0 };
        assert!(bbox.contains(&Coordinate::new(53.61, 1.594)));
        assert!(!bbox.contains(&Coordinate::new(53.61, 2.5)));

        let inverted = BoundingBox { min_lat: 55.0, min_lon: 0.0, max_lat: 50.0, max_lon: 2.0 };
        assert!(inverted.is_empty());
        assert!(!inverted.contains(&Coordinate::new(53.61, 1.594)));
    }

    #[test]
    fn test_circle() {
        let circle = Circle { center: Coordinate::new(53.61, 1.594), radius_m: 10_000.0 };
        assert!(circle.contains(&Coordinate::new(53.65, 1.6)));
        assert!(!circle.contains(&Coordinate::new(54.0, 1.6)));

        let zero = Circle { center: Coordinate::new(53.61, 1.594), radius_m: 0.0 };
        assert!(zero.is_empty());
    }

    #[test]
    fn test_point_geometry() {
        let geom = Geometry::Point(Coordinate::new(53.61, 1.594));
        assert!(geom.contains(&Coordinate::new(53.61, 1.594)));
        assert!(!geom.contains(&Coordinate::new(53.62, 1.594)));
        assert!(!geom.is_empty());
    }

    #[test]
    fn test_distance() {
        // One degree of latitude is about 111 km
        let d = Coordinate::new(0.0, 0.0).distance_to(&Coordinate::new(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 100.0);
    }

    #[test]
    fn test_geometry_deserialize() {
        let json = r#"{"type":"circle","center":{"lat":53.0,"lon":1.0},"radius_m":500.0}"#;
        let geom: Geometry = serde_json::from_str(json).unwrap();
        match geom {
            Geometry::Circle(c) => assert_eq!(c.radius_m, 500.0),
            _ => panic!("Expected Circle"),
        }
    }
}
