//! Planar and spherical geometry used by the engine
//!
//! - `projection` - local metric frame, haversine distance and bearing
//! - `simplify` - Ramer-Douglas-Peucker
//! - `offset` - polyline buffering as a union of segment capsules
//! - `polygon` - nonzero winding point-in-polygon
//! - `segment` - nearest point on a set of polylines

pub mod offset;
pub mod polygon;
pub mod projection;
pub mod segment;
pub mod simplify;

pub use offset::{buffer_polyline, BufferPart, DEFAULT_QUADRANT_SEGMENTS};
pub use polygon::ring_contains;
pub use projection::{bearing_degrees, haversine_distance, LocalFrame, Xy};
pub use segment::{nearest_on_paths, NearestPoint};
pub use simplify::simplify_indices;
