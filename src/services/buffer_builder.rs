//! Containment polygon construction for finished route registrations
//!
//! The recorded path is projected to a local metric frame, deduplicated,
//! simplified and buffered by the route radius. The simplification tolerance
//! stays under half the radius, so every recorded point keeps a margin of
//! roughly half the radius inside its own buffer. A buffer splits into
//! several parts only on degenerate geometry; the part around the start of
//! the route is kept and its holes are filled.

use crate::domain::error::{GeofenceError, Result};
use crate::domain::route::{
    BufferErrorReason, BufferPolygon, BufferStatus, RoutePath, MIN_RING_VERTICES,
};
use crate::domain::types::{epoch_ms, LatLng, RouteId};
use crate::geometry::polygon::winding_number;
use crate::geometry::{
    buffer_polyline, simplify_indices, BufferPart, LocalFrame, Xy, DEFAULT_QUADRANT_SEGMENTS,
};
use crate::infra::config::EngineSettings;
use crate::io::buffer_store::BufferStore;
use tracing::{debug, info, warn};

/// Upper bound of the simplification tolerance in meters
const MAX_SIMPLIFY_TOLERANCE_M: f64 = 1.0;

/// Points closer than this (meters) are treated as one
const DUPLICATE_EPS_M: f64 = 1e-6;

/// Builds and persists buffer polygons
#[derive(Debug, Clone)]
pub struct BufferPolygonBuilder {
    default_radius_m: f64,
    quadrant_segments: usize,
}

impl BufferPolygonBuilder {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            default_radius_m: settings.default_radius_m,
            quadrant_segments: DEFAULT_QUADRANT_SEGMENTS,
        }
    }

    /// Radius for `path`: its own if valid, else the default
    pub fn radius_for(&self, path: &RoutePath) -> f64 {
        match path.radius_meters {
            Some(r) if r > 0.0 && r.is_finite() => r,
            _ => self.default_radius_m,
        }
    }

    /// Compute the buffer without persisting it
    ///
    /// Fails only with `InsufficientGeometryData`. A geometry step that yields
    /// no usable ring still returns a polygon, with `error` status.
    pub fn build(&self, route_id: &RouteId, path: &RoutePath) -> Result<BufferPolygon> {
        let points = path.sanitized();
        if points.len() < 2 {
            return Err(GeofenceError::InsufficientGeometryData {
                route_id: route_id.clone(),
                valid_points: points.len(),
            });
        }

        let radius = self.radius_for(path);
        let frame = LocalFrame::around(&points);
        let projected: Vec<Xy> = points.iter().map(|p| frame.to_xy(*p)).collect();

        let ring = self.outline(route_id, &projected, &frame, radius);

        let status = if ring.is_empty() {
            BufferStatus::Error { reason: BufferErrorReason::Calculation }
        } else if ring.len() < MIN_RING_VERTICES {
            BufferStatus::Error { reason: BufferErrorReason::Coordinates }
        } else {
            BufferStatus::Complete { completed_at: epoch_ms() }
        };

        debug!(
            route_id = %route_id,
            input_points = %path.points.len(),
            valid_points = %points.len(),
            ring_vertices = %ring.len(),
            radius_m = %radius,
            status = %status.as_str(),
            "buffer_computed"
        );

        Ok(BufferPolygon {
            route_id: route_id.clone(),
            ring,
            radius_meters: radius,
            status,
            source: points,
        })
    }

    /// Build and persist; nothing is written when the path is unusable
    pub async fn build_and_store(
        &self,
        route_id: &RouteId,
        path: &RoutePath,
        store: &dyn BufferStore,
    ) -> Result<BufferPolygon> {
        let buffer = self.build(route_id, path)?;

        store
            .save(&buffer)
            .await
            .map_err(|source| GeofenceError::Store { route_id: route_id.clone(), source })?;

        match buffer.status {
            BufferStatus::Error { reason } => {
                let err = GeofenceError::BufferComputationFailure {
                    route_id: route_id.clone(),
                    reason,
                };
                warn!(route_id = %route_id, error = %err, "buffer_persisted_as_error");
            }
            _ => {
                info!(
                    route_id = %route_id,
                    vertices = %buffer.ring.len(),
                    radius_m = %buffer.radius_meters,
                    "buffer_persisted"
                );
            }
        }
        Ok(buffer)
    }

    fn outline(
        &self,
        route_id: &RouteId,
        projected: &[Xy],
        frame: &LocalFrame,
        radius: f64,
    ) -> Vec<LatLng> {
        let mut distinct: Vec<Xy> = Vec::with_capacity(projected.len());
        for p in projected {
            if distinct.last().map_or(true, |last| p.sub(*last).length() > DUPLICATE_EPS_M) {
                distinct.push(*p);
            }
        }

        let tolerance = MAX_SIMPLIFY_TOLERANCE_M.min(radius / 2.0);
        let kept: Vec<Xy> =
            simplify_indices(&distinct, tolerance).into_iter().map(|i| distinct[i]).collect();

        let mut parts = buffer_polyline(&kept, radius, self.quadrant_segments);
        if parts.len() > 1 {
            warn!(route_id = %route_id, parts = %parts.len(), "buffer_multi_part_first_kept");
        }
        let Some(part) = take_part_around(&mut parts, kept.first().copied()) else {
            return Vec::new();
        };
        if part.holes > 0 {
            debug!(route_id = %route_id, holes = %part.holes, "buffer_holes_dropped");
        }

        part.exterior.into_iter().map(|xy| frame.to_latlng(xy)).collect()
    }
}

/// The part whose exterior covers `start`, else the first one
fn take_part_around(parts: &mut Vec<BufferPart>, start: Option<Xy>) -> Option<BufferPart> {
    if parts.is_empty() {
        return None;
    }
    let index = start
        .and_then(|s| {
            parts.iter().position(|part| {
                winding_number(part.exterior.iter().map(|v| (v.x, v.y)), (s.x, s.y)) != 0
            })
        })
        .unwrap_or(0);
    Some(parts.swap_remove(index))
}
