//! Local planar frame and great-circle helpers
//!
//! Buffering and nearest-point search run in meters on an equirectangular
//! frame anchored near the geometry; at walking-route scale the distortion is
//! far below GPS noise. Reported distances and bearings use haversine.

use crate::domain::types::LatLng;
use geo::{Bearing, Distance, Haversine};

/// Mean earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Planar point in meters
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Xy {
    pub x: f64,
    pub y: f64,
}

impl Xy {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn sub(self, other: Xy) -> Xy {
        Xy::new(self.x - other.x, self.y - other.y)
    }

    #[inline]
    pub fn add(self, other: Xy) -> Xy {
        Xy::new(self.x + other.x, self.y + other.y)
    }

    #[inline]
    pub fn scale(self, k: f64) -> Xy {
        Xy::new(self.x * k, self.y * k)
    }

    #[inline]
    pub fn dot(self, other: Xy) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// z component of the 2D cross product
    #[inline]
    pub fn cross(self, other: Xy) -> f64 {
        self.x * other.y - self.y * other.x
    }

    #[inline]
    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// Equirectangular projection around an origin
#[derive(Debug, Clone, Copy)]
pub struct LocalFrame {
    origin: LatLng,
    meters_per_deg_lat: f64,
    meters_per_deg_lng: f64,
}

impl LocalFrame {
    pub fn new(origin: LatLng) -> Self {
        let meters_per_deg_lat = EARTH_RADIUS_M.to_radians();
        let meters_per_deg_lng = meters_per_deg_lat * origin.latitude.to_radians().cos();
        Self { origin, meters_per_deg_lat, meters_per_deg_lng }
    }

    /// Frame anchored at the bounding-box center of `points`
    pub fn around(points: &[LatLng]) -> Self {
        let mut min = LatLng::new(f64::INFINITY, f64::INFINITY);
        let mut max = LatLng::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in points {
            min.latitude = min.latitude.min(p.latitude);
            min.longitude = min.longitude.min(p.longitude);
            max.latitude = max.latitude.max(p.latitude);
            max.longitude = max.longitude.max(p.longitude);
        }
        if points.is_empty() {
            return Self::new(LatLng::new(0.0, 0.0));
        }
        Self::new(LatLng::new(
            (min.latitude + max.latitude) / 2.0,
            (min.longitude + max.longitude) / 2.0,
        ))
    }

    pub fn to_xy(&self, p: LatLng) -> Xy {
        Xy::new(
            (p.longitude - self.origin.longitude) * self.meters_per_deg_lng,
            (p.latitude - self.origin.latitude) * self.meters_per_deg_lat,
        )
    }

    pub fn to_latlng(&self, p: Xy) -> LatLng {
        LatLng::new(
            self.origin.latitude + p.y / self.meters_per_deg_lat,
            self.origin.longitude + p.x / self.meters_per_deg_lng,
        )
    }
}

/// Great-circle distance in meters
pub fn haversine_distance(a: LatLng, b: LatLng) -> f64 {
    Haversine::distance(a.to_geo(), b.to_geo())
}

/// Initial bearing from `from` to `to`, degrees in [0, 360)
pub fn bearing_degrees(from: LatLng, to: LatLng) -> f64 {
    Haversine::bearing(from.to_geo(), to.to_geo()).rem_euclid(360.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_round_trip_is_close() {
        let frame = LocalFrame::new(LatLng::new(37.5665, 126.978));
        let p = LatLng::new(37.5670, 126.9791);
        let back = frame.to_latlng(frame.to_xy(p));
        assert!((back.latitude - p.latitude).abs() < 1e-12);
        assert!((back.longitude - p.longitude).abs() < 1e-12);
    }

    #[test]
    fn test_frame_scale_matches_haversine() {
        let a = LatLng::new(0.0, 0.0);
        let b = LatLng::new(0.0, 0.001);
        let frame = LocalFrame::new(a);
        let planar = frame.to_xy(b).length();
        let great_circle = haversine_distance(a, b);
        assert!((planar - great_circle).abs() < 0.01, "{planar} vs {great_circle}");
        assert!((great_circle - 111.19).abs() < 0.1);
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = LatLng::new(0.0, 0.0);
        assert!(bearing_degrees(origin, LatLng::new(0.001, 0.0)).abs() < 1e-6);
        assert!((bearing_degrees(origin, LatLng::new(0.0, 0.001)) - 90.0).abs() < 1e-6);
        assert!((bearing_degrees(origin, LatLng::new(-0.001, 0.0)) - 180.0).abs() < 1e-6);
        assert!((bearing_degrees(origin, LatLng::new(0.0, -0.001)) - 270.0).abs() < 1e-6);
    }

    #[test]
    fn test_around_uses_bbox_center() {
        let frame = LocalFrame::around(&[LatLng::new(1.0, 2.0), LatLng::new(3.0, 4.0)]);
        let center = frame.to_xy(LatLng::new(2.0, 3.0));
        assert!(center.length() < 1e-9);
    }
}
