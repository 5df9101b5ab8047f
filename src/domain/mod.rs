//! Domain models - core types of the deviation engine
//!
//! This module contains the canonical data types used throughout the system:
//! - `types` - coordinates, location samples, status/guidance/cue events
//! - `route` - recorded route paths, buffer polygons, per-person route sets
//! - `event` - parsed engine inputs
//! - `error` - the engine's error taxonomy

pub mod error;
pub mod event;
pub mod route;
pub mod types;

// Re-export commonly used types at module level
pub use error::GeofenceError;
pub use event::EngineEvent;
pub use route::{BufferPolygon, BufferStatus, RegisteredRoute, RoutePath, RoutePoint, RouteSet};
pub use types::{
    epoch_ms, Cue, CueKind, DeviationStatus, DeviationStatusChanged, GuidanceTarget,
    GuidanceUpdate, LatLng, LocationSample, PersonId, RouteId, TurnDirection,
};
