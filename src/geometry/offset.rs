//! Planar buffer (Minkowski sum with a disk) of a polyline
//!
//! Every segment becomes a capsule (a rectangle with a half disk on each end)
//! and the capsules are unioned with `geo`'s boolean operations. Round joins
//! fall out of the overlapping caps. The union yields simple polygons, so
//! nonzero and even-odd containment agree on every ring returned here.

use super::projection::Xy;
use geo::{BooleanOps, Coord, LineString, MultiPolygon, Polygon};
use std::f64::consts::PI;

/// Arc resolution: segments per quarter circle
pub const DEFAULT_QUADRANT_SEGMENTS: usize = 8;

const EPS: f64 = 1e-9;

/// One connected part of a buffer
#[derive(Debug, Clone, PartialEq)]
pub struct BufferPart {
    /// Closed exterior ring (first vertex repeated last)
    pub exterior: Vec<Xy>,
    /// Holes enclosed by the part, e.g. the courtyard of a loop walk
    pub holes: usize,
}

/// Buffer a polyline by `radius` meters
///
/// Returns the connected parts of the buffer, or nothing when the input is
/// empty or the radius is not positive. Consecutive duplicate points must
/// already be removed; a single point buffers to a circle.
pub fn buffer_polyline(points: &[Xy], radius: f64, quadrant_segments: usize) -> Vec<BufferPart> {
    if points.is_empty() || !(radius > 0.0) || !radius.is_finite() {
        return Vec::new();
    }
    let q = quadrant_segments.max(1);

    let pieces: Vec<MultiPolygon<f64>> = if points.len() == 1 {
        vec![MultiPolygon::new(vec![circle(points[0], radius, q)])]
    } else {
        points
            .windows(2)
            .map(|w| MultiPolygon::new(vec![capsule(w[0], w[1], radius, q)]))
            .collect()
    };

    union_all(pieces)
        .0
        .into_iter()
        .map(|polygon| {
            let (exterior, interiors) = polygon.into_inner();
            BufferPart {
                exterior: exterior.0.into_iter().map(|c| Xy::new(c.x, c.y)).collect(),
                holes: interiors.len(),
            }
        })
        .collect()
}

/// Pairwise union so no intermediate result grows much faster than its inputs
fn union_all(mut pieces: Vec<MultiPolygon<f64>>) -> MultiPolygon<f64> {
    while pieces.len() > 1 {
        let mut merged = Vec::with_capacity(pieces.len() / 2 + 1);
        let mut iter = pieces.into_iter();
        while let Some(a) = iter.next() {
            match iter.next() {
                Some(b) => merged.push(a.union(&b)),
                None => merged.push(a),
            }
        }
        pieces = merged;
    }
    pieces.pop().unwrap_or_else(|| MultiPolygon::new(Vec::new()))
}

/// Half circle of `steps` segments from `start`, both ends included
fn half_arc(out: &mut Vec<Coord<f64>>, center: Xy, radius: f64, start: f64, steps: usize) {
    let step = PI / steps as f64;
    for k in 0..=steps {
        let angle = start + step * k as f64;
        out.push(Coord { x: center.x + radius * angle.cos(), y: center.y + radius * angle.sin() });
    }
}

fn circle(center: Xy, radius: f64, q: usize) -> Polygon<f64> {
    let n = 4 * q;
    let coords = (0..n)
        .map(|k| {
            let angle = 2.0 * PI * k as f64 / n as f64;
            Coord { x: center.x + radius * angle.cos(), y: center.y + radius * angle.sin() }
        })
        .collect::<Vec<_>>();
    Polygon::new(LineString::new(coords), Vec::new())
}

/// Counter-clockwise capsule around `a`-`b`
///
/// Rounds `b` from the right side to the left, runs back along the left side
/// and rounds `a`; closing the ring runs the right side. Every vertex lies
/// exactly `radius` from the segment.
fn capsule(a: Xy, b: Xy, radius: f64, q: usize) -> Polygon<f64> {
    let d = b.sub(a);
    let len = d.length();
    if len < EPS {
        return circle(a, radius, q);
    }
    let theta = d.y.atan2(d.x) + PI / 2.0;
    let half = 2 * q;

    let mut coords = Vec::with_capacity(2 * half + 3);
    half_arc(&mut coords, b, radius, theta - PI, half);
    half_arc(&mut coords, a, radius, theta, half);
    Polygon::new(LineString::new(coords), Vec::new())
}
