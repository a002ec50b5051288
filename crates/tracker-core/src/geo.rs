//! Planar/spherical helpers for positions, viewport rectangles and AO rings.
//!
//! Positions use the `[lng, lat]` ordering on the wire (GeoJSON). Distances
//! to polygon edges use a local equirectangular projection around the tested
//! point, which is accurate to well under a meter at the tens-of-meters
//! scales the geofence thresholds work at.

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

const EARTH_RADIUS_M: f64 = 6_371_008.8;
const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// A WGS84 position, serialized as `[lng, lat]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub lng: f64,
    pub lat: f64,
}

impl Point {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }

    /// Validate a raw `[lng, lat]` pair: both finite and within range.
    pub fn parse(lng: f64, lat: f64) -> Result<Self, ValidationError> {
        if !lng.is_finite() || !lat.is_finite() {
            return Err(ValidationError::InvalidCoordinates(
                "coordinates must be finite numbers".into(),
            ));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(ValidationError::InvalidCoordinates(format!(
                "longitude {lng} out of range [-180, 180]"
            )));
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(ValidationError::InvalidCoordinates(format!(
                "latitude {lat} out of range [-90, 90]"
            )));
        }
        Ok(Self { lng, lat })
    }

    /// GeoJSON-like representation stored on the entity record.
    pub fn to_geojson(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "Point",
            "coordinates": [self.lng, self.lat],
        })
    }
}

impl From<[f64; 2]> for Point {
    fn from(v: [f64; 2]) -> Self {
        Self { lng: v[0], lat: v[1] }
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.lng, p.lat]
    }
}

/// A lat/lng rectangle. Only trusted after [`normalize_bounds`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl Bounds {
    pub fn new(min_lat: f64, min_lng: f64, max_lat: f64, max_lng: f64) -> Self {
        Self {
            min_lat,
            min_lng,
            max_lat,
            max_lng,
        }
    }

    /// Reject bounds containing non-finite values.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let fields = [
            ("minLat", self.min_lat),
            ("minLng", self.min_lng),
            ("maxLat", self.max_lat),
            ("maxLng", self.max_lng),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(ValidationError::InvalidBounds(format!(
                    "{name} must be a finite number"
                )));
            }
        }
        Ok(())
    }
}

/// Clamp to the valid lat/lng domain and swap inverted min/max pairs.
pub fn normalize_bounds(b: &Bounds) -> Bounds {
    let clamp_lat = |v: f64| v.clamp(-90.0, 90.0);
    let clamp_lng = |v: f64| v.clamp(-180.0, 180.0);
    let (a_lat, b_lat) = (clamp_lat(b.min_lat), clamp_lat(b.max_lat));
    let (a_lng, b_lng) = (clamp_lng(b.min_lng), clamp_lng(b.max_lng));
    Bounds {
        min_lat: a_lat.min(b_lat),
        max_lat: a_lat.max(b_lat),
        min_lng: a_lng.min(b_lng),
        max_lng: a_lng.max(b_lng),
    }
}

/// Inclusive containment test; inverted input bounds are normalized first.
pub fn is_point_in_bounds(lat: f64, lng: f64, bounds: &Bounds) -> bool {
    let b = normalize_bounds(bounds);
    lat >= b.min_lat && lat <= b.max_lat && lng >= b.min_lng && lng <= b.max_lng
}

/// Great-circle distance in meters.
pub fn haversine_meters(a: Point, b: Point) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = lat2 - lat1;
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Degree-space box enclosing a circle of `radius_m` around `center`.
pub fn bounding_box(center: Point, radius_m: f64) -> Bounds {
    let d_lat = radius_m / METERS_PER_DEGREE_LAT;
    let cos = center.lat.to_radians().cos().abs().max(1e-6);
    let d_lng = radius_m / (METERS_PER_DEGREE_LAT * cos);
    normalize_bounds(&Bounds::new(
        center.lat - d_lat,
        center.lng - d_lng,
        center.lat + d_lat,
        center.lng + d_lng,
    ))
}

/// Even-odd ray cast against a `[lng, lat]` ring. Closing point optional.
pub fn point_in_ring(p: Point, ring: &[Point]) -> bool {
    if ring.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (pi, pj) = (ring[i], ring[j]);
        if (pi.lat > p.lat) != (pj.lat > p.lat) {
            let x = (pj.lng - pi.lng) * (p.lat - pi.lat) / (pj.lat - pi.lat) + pi.lng;
            if p.lng < x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Shortest distance in meters from `p` to any edge of `ring`.
pub fn distance_to_ring_meters(p: Point, ring: &[Point]) -> f64 {
    if ring.is_empty() {
        return f64::INFINITY;
    }
    if ring.len() == 1 {
        return haversine_meters(p, ring[0]);
    }
    let kx = METERS_PER_DEGREE_LAT * p.lat.to_radians().cos();
    let ky = METERS_PER_DEGREE_LAT;
    let project = |q: Point| ((q.lng - p.lng) * kx, (q.lat - p.lat) * ky);

    let mut best = f64::INFINITY;
    for i in 0..ring.len() {
        let a = project(ring[i]);
        let b = project(ring[(i + 1) % ring.len()]);
        best = best.min(origin_to_segment(a, b));
    }
    best
}

fn origin_to_segment(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        (-(a.0 * dx + a.1 * dy) / len_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.0 + t * dx, a.1 + t * dy);
    (cx * cx + cy * cy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(0.01, 0.0),
            Point::new(0.01, 0.01),
            Point::new(0.0, 0.01),
            Point::new(0.0, 0.0),
        ]
    }

    #[test]
    fn point_serializes_lng_lat() {
        let p = Point::new(12.5, 41.9);
        assert_eq!(serde_json::to_value(p).unwrap(), serde_json::json!([12.5, 41.9]));
        let parsed: Point = serde_json::from_str("[12.5,41.9]").unwrap();
        assert_eq!(parsed, p);
    }

    #[test]
    fn parse_rejects_out_of_range() {
        assert!(Point::parse(181.0, 0.0).is_err());
        assert!(Point::parse(0.0, -90.5).is_err());
        assert!(Point::parse(f64::NAN, 0.0).is_err());
        assert!(Point::parse(f64::INFINITY, 0.0).is_err());
        assert!(Point::parse(-180.0, 90.0).is_ok());
    }

    #[test]
    fn normalize_swaps_and_clamps() {
        let b = normalize_bounds(&Bounds::new(95.0, 200.0, -100.0, -200.0));
        assert_eq!(b, Bounds::new(-90.0, -180.0, 90.0, 180.0));

        let b = normalize_bounds(&Bounds::new(10.0, 20.0, 5.0, 15.0));
        assert_eq!(b, Bounds::new(5.0, 15.0, 10.0, 20.0));
    }

    #[test]
    fn point_in_inverted_bounds() {
        let inverted = Bounds::new(10.0, 20.0, 5.0, 15.0);
        assert!(is_point_in_bounds(7.0, 17.0, &inverted));
        assert!(is_point_in_bounds(10.0, 20.0, &inverted));
        assert!(!is_point_in_bounds(11.0, 17.0, &inverted));
    }

    #[test]
    fn bounds_validate_rejects_nan() {
        assert!(Bounds::new(f64::NAN, 0.0, 1.0, 1.0).validate().is_err());
        assert!(Bounds::new(0.0, 0.0, 1.0, f64::NEG_INFINITY).validate().is_err());
        assert!(Bounds::new(0.0, 0.0, 1.0, 1.0).validate().is_ok());
    }

    #[test]
    fn haversine_one_degree_latitude() {
        let d = haversine_meters(Point::new(0.0, 0.0), Point::new(0.0, 1.0));
        assert!((d - 111_195.0).abs() < 100.0, "got {d}");
    }

    #[test]
    fn ring_containment() {
        let ring = square();
        assert!(point_in_ring(Point::new(0.005, 0.005), &ring));
        assert!(!point_in_ring(Point::new(0.02, 0.005), &ring));
        assert!(!point_in_ring(Point::new(0.005, -0.001), &ring));
    }

    #[test]
    fn degenerate_ring_contains_nothing() {
        let ring = vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)];
        assert!(!point_in_ring(Point::new(0.5, 0.5), &ring));
    }

    #[test]
    fn distance_to_edge_inside_and_outside() {
        let ring = square();
        // 0.0005 deg of latitude above the southern edge, about 55.7m
        let d = distance_to_ring_meters(Point::new(0.005, 0.0005), &ring);
        assert!((d - 55.66).abs() < 0.5, "got {d}");

        // Outside the eastern edge by 0.0001 deg lng at the equator, about 11.1m
        let d = distance_to_ring_meters(Point::new(0.0101, 0.005), &ring);
        assert!((d - 11.13).abs() < 0.5, "got {d}");
    }

    #[test]
    fn bounding_box_encloses_radius() {
        let c = Point::new(10.0, 45.0);
        let b = bounding_box(c, 1_000.0);
        let north = Point::new(10.0, b.max_lat);
        let east = Point::new(b.max_lng, 45.0);
        assert!(haversine_meters(c, north) >= 995.0);
        assert!(haversine_meters(c, east) >= 995.0);
    }

    #[test]
    fn geojson_shape() {
        let v = Point::new(1.0, 2.0).to_geojson();
        assert_eq!(v["type"], "Point");
        assert_eq!(v["coordinates"], serde_json::json!([1.0, 2.0]));
    }
}
