//! Nearest point on a set of polylines

use super::projection::{haversine_distance, LocalFrame, Xy};
use crate::domain::types::LatLng;

/// Closest point found on a reference polyline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestPoint {
    pub point: LatLng,
    pub distance_meters: f64,
}

/// Foot of the perpendicular from `p` onto segment `a`-`b`, clamped to the segment
pub fn closest_on_segment(p: Xy, a: Xy, b: Xy) -> Xy {
    let ab = b.sub(a);
    let len_sq = ab.dot(ab);
    if len_sq == 0.0 {
        return a;
    }
    let t = (p.sub(a).dot(ab) / len_sq).clamp(0.0, 1.0);
    a.add(ab.scale(t))
}

/// Closest point to `from` over every segment of every path
///
/// Paths with fewer than two points contribute nothing. On an exact tie the
/// first segment encountered wins. Returns `None` when no segment exists.
pub fn nearest_on_paths<'a, I>(from: LatLng, paths: I) -> Option<NearestPoint>
where
    I: IntoIterator<Item = &'a [LatLng]>,
{
    let frame = LocalFrame::new(from);
    let origin = Xy::default();

    let mut best: Option<(f64, Xy)> = None;
    for path in paths {
        if path.len() < 2 {
            continue;
        }
        let mut prev = frame.to_xy(path[0]);
        for vertex in &path[1..] {
            let next = frame.to_xy(*vertex);
            let foot = closest_on_segment(origin, prev, next);
            let dist_sq = foot.dot(foot);
            if best.map_or(true, |(d, _)| dist_sq < d) {
                best = Some((dist_sq, foot));
            }
            prev = next;
        }
    }

    best.map(|(_, foot)| {
        let point = frame.to_latlng(foot);
        NearestPoint { point, distance_meters: haversine_distance(from, point) }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perpendicular_foot_inside_segment() {
        let path = [LatLng::new(0.0, 0.0), LatLng::new(0.0, 0.002)];
        let from = LatLng::new(0.0002, 0.001);
        let nearest = nearest_on_paths(from, [&path[..]]).unwrap();

        assert!((nearest.point.latitude).abs() < 1e-9);
        assert!((nearest.point.longitude - 0.001).abs() < 1e-9);
        assert!((nearest.distance_meters - 22.24).abs() < 0.05, "{}", nearest.distance_meters);
    }

    #[test]
    fn test_foot_clamps_to_endpoint() {
        let path = [LatLng::new(0.0, 0.0), LatLng::new(0.0, 0.001)];
        let from = LatLng::new(0.0, -0.001);
        let nearest = nearest_on_paths(from, [&path[..]]).unwrap();

        assert!(nearest.point.longitude.abs() < 1e-12);
        assert!((nearest.distance_meters - 111.19).abs() < 0.1);
    }

    #[test]
    fn test_picks_closest_path() {
        let far = [LatLng::new(0.01, 0.0), LatLng::new(0.01, 0.01)];
        let near = [LatLng::new(0.001, 0.0), LatLng::new(0.001, 0.01)];
        let from = LatLng::new(0.0, 0.005);
        let nearest = nearest_on_paths(from, [&far[..], &near[..]]).unwrap();
        assert!((nearest.point.latitude - 0.001).abs() < 1e-9);
    }

    #[test]
    fn test_exact_tie_keeps_first_found() {
        // Point midway between two parallel paths.
        let south = [LatLng::new(-0.001, 0.0), LatLng::new(-0.001, 0.002)];
        let north = [LatLng::new(0.001, 0.0), LatLng::new(0.001, 0.002)];
        let from = LatLng::new(0.0, 0.001);

        let a = nearest_on_paths(from, [&south[..], &north[..]]).unwrap();
        assert!(a.point.latitude < 0.0);
        let b = nearest_on_paths(from, [&north[..], &south[..]]).unwrap();
        assert!(b.point.latitude > 0.0);
    }

    #[test]
    fn test_no_qualifying_path() {
        let single = [LatLng::new(0.0, 0.0)];
        assert!(nearest_on_paths(LatLng::new(1.0, 1.0), [&single[..]]).is_none());
        assert!(nearest_on_paths(LatLng::new(1.0, 1.0), std::iter::empty::<&[LatLng]>()).is_none());
    }

    #[test]
    fn test_point_on_path_has_zero_distance() {
        let path = [LatLng::new(0.0, 0.0), LatLng::new(0.001, 0.001)];
        let from = LatLng::new(0.0005, 0.0005);
        let nearest = nearest_on_paths(from, [&path[..]]).unwrap();
        assert!(nearest.distance_meters < 0.01);
    }
}
