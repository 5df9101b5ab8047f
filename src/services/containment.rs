//! Union containment test against a person's buffer polygons

use crate::domain::route::BufferPolygon;
use crate::domain::types::LatLng;
use crate::geometry::ring_contains;

/// True if `point` lies inside (or on the edge of) any usable polygon
///
/// Polygons that are not complete or have fewer than four vertices are
/// skipped, never treated as a miss. Stops at the first match.
pub fn is_inside_any<'a, I>(point: LatLng, polygons: I) -> bool
where
    I: IntoIterator<Item = &'a BufferPolygon>,
{
    polygons
        .into_iter()
        .filter(|polygon| polygon.is_usable())
        .any(|polygon| ring_contains(&polygon.ring, point))
}
