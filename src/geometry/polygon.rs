//! Point-in-polygon by winding number
//!
//! Rings are tested as planar (x = longitude, y = latitude). The buffer ring
//! was produced by an affine projection of a planar outline, so winding in
//! degree space matches winding in meters.

use crate::domain::types::LatLng;

/// Points closer than this (degrees, ~0.1 mm) to an edge count as on the boundary
const BOUNDARY_EPS_DEG: f64 = 1e-9;

#[inline]
fn is_left(a: (f64, f64), b: (f64, f64), p: (f64, f64)) -> f64 {
    (b.0 - a.0) * (p.1 - a.1) - (p.0 - a.0) * (b.1 - a.1)
}

/// Winding number of `ring` around `p`
///
/// The ring may be open or closed; the closing edge is implied either way.
pub fn winding_number<I>(ring: I, p: (f64, f64)) -> i32
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut iter = ring.into_iter();
    let Some(first) = iter.next() else {
        return 0;
    };

    let mut wn = 0;
    let mut prev = first;
    let mut step = |a: (f64, f64), b: (f64, f64)| {
        if a.1 <= p.1 {
            if b.1 > p.1 && is_left(a, b, p) > 0.0 {
                wn += 1;
            }
        } else if b.1 <= p.1 && is_left(a, b, p) < 0.0 {
            wn -= 1;
        }
    };
    for next in iter {
        step(prev, next);
        prev = next;
    }
    step(prev, first);
    wn
}

fn on_segment(a: (f64, f64), b: (f64, f64), p: (f64, f64)) -> bool {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.0 + t * dx - p.0, a.1 + t * dy - p.1);
    cx.hypot(cy) <= BOUNDARY_EPS_DEG
}

/// True if `p` lies on any edge of `ring`
pub fn on_boundary(ring: &[LatLng], p: LatLng) -> bool {
    let pt = (p.longitude, p.latitude);
    let n = ring.len();
    (0..n).any(|i| {
        let a = ring[i];
        let b = ring[(i + 1) % n];
        on_segment((a.longitude, a.latitude), (b.longitude, b.latitude), pt)
    })
}

/// Nonzero-rule containment with the boundary counted as inside
pub fn ring_contains(ring: &[LatLng], p: LatLng) -> bool {
    if ring.len() < 3 {
        return false;
    }
    let coords = ring.iter().map(|v| (v.longitude, v.latitude));
    winding_number(coords, (p.longitude, p.latitude)) != 0 || on_boundary(ring, p)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<LatLng> {
        vec![
            LatLng::new(0.0, 0.0),
            LatLng::new(0.0, 1.0),
            LatLng::new(1.0, 1.0),
            LatLng::new(1.0, 0.0),
            LatLng::new(0.0, 0.0),
        ]
    }

    #[test]
    fn test_square_interior_and_exterior() {
        let ring = square();
        assert!(ring_contains(&ring, LatLng::new(0.5, 0.5)));
        assert!(!ring_contains(&ring, LatLng::new(1.5, 0.5)));
        assert!(!ring_contains(&ring, LatLng::new(0.5, -0.1)));
    }

    #[test]
    fn test_boundary_counts_inside() {
        let ring = square();
        assert!(ring_contains(&ring, LatLng::new(0.0, 0.5)));
        assert!(ring_contains(&ring, LatLng::new(1.0, 1.0)));
    }

    #[test]
    fn test_open_and_closed_rings_agree() {
        let closed = square();
        let open = &closed[..4];
        for p in [LatLng::new(0.5, 0.5), LatLng::new(2.0, 2.0), LatLng::new(0.9, 0.1)] {
            assert_eq!(ring_contains(&closed, p), ring_contains(open, p));
        }
    }

    #[test]
    fn test_orientation_does_not_matter() {
        let mut ring = square();
        ring.reverse();
        assert!(ring_contains(&ring, LatLng::new(0.5, 0.5)));
        assert!(!ring_contains(&ring, LatLng::new(-0.5, 0.5)));
    }

    #[test]
    fn test_double_wound_region_is_inside() {
        // Same square traversed twice: winding 2, still inside under nonzero.
        let mut ring = square();
        ring.extend(square().into_iter().skip(1));
        let wn = winding_number(ring.iter().map(|v| (v.longitude, v.latitude)), (0.5, 0.5));
        assert_eq!(wn.abs(), 2);
        assert!(ring_contains(&ring, LatLng::new(0.5, 0.5)));
    }

    #[test]
    fn test_degenerate_ring_contains_nothing() {
        let ring = vec![LatLng::new(0.0, 0.0), LatLng::new(1.0, 1.0)];
        assert!(!ring_contains(&ring, LatLng::new(0.5, 0.5)));
    }
}
