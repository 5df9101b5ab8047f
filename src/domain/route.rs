//! Route model: recorded paths, their buffer polygons, and per-person route sets

use crate::domain::types::{LatLng, RouteId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Radius used when a registration does not specify one
pub const DEFAULT_BUFFER_RADIUS_M: f64 = 9.0;

/// Minimum vertices of a usable closed ring
pub const MIN_RING_VERTICES: usize = 4;

/// A single recorded point of a route
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub timestamp: u64,
}

impl RoutePoint {
    pub fn new(latitude: f64, longitude: f64, timestamp: u64) -> Self {
        Self { latitude, longitude, timestamp }
    }

    pub fn position(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }
}

/// A finished route registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePath {
    pub points: Vec<RoutePoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_meters: Option<f64>,
}

impl RoutePath {
    pub fn new(points: Vec<RoutePoint>) -> Self {
        Self { points, radius_meters: None }
    }

    /// Rebuild a path from already sanitized positions, keeping their order
    pub fn from_positions(positions: &[LatLng], radius_meters: f64) -> Self {
        let points = positions
            .iter()
            .enumerate()
            .map(|(i, p)| RoutePoint::new(p.latitude, p.longitude, i as u64))
            .collect();
        Self { points, radius_meters: Some(radius_meters) }
    }

    pub fn with_radius(mut self, radius_meters: f64) -> Self {
        self.radius_meters = Some(radius_meters);
        self
    }

    /// Valid points in timestamp order
    ///
    /// Registration stores may deliver records unordered or with junk
    /// coordinates; both are repaired here rather than rejected.
    pub fn sanitized(&self) -> Vec<LatLng> {
        let mut points: Vec<&RoutePoint> =
            self.points.iter().filter(|p| p.position().is_valid()).collect();
        points.sort_by_key(|p| p.timestamp);
        points.iter().map(|p| p.position()).collect()
    }
}

/// Why a buffer could not be computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferErrorReason {
    /// The offset step produced no geometry
    Calculation,
    /// The selected ring had too few vertices
    Coordinates,
}

impl BufferErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BufferErrorReason::Calculation => "calculation",
            BufferErrorReason::Coordinates => "coordinates",
        }
    }
}

/// Lifecycle of a buffer artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum BufferStatus {
    Pending,
    Complete { completed_at: u64 },
    Error { reason: BufferErrorReason },
}

impl BufferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BufferStatus::Pending => "pending",
            BufferStatus::Complete { .. } => "complete",
            BufferStatus::Error { .. } => "error",
        }
    }
}

/// Containment polygon built around a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferPolygon {
    pub route_id: RouteId,
    pub ring: Vec<LatLng>,
    pub radius_meters: f64,
    pub status: BufferStatus,
    /// Sanitized recorded path the ring was built from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source: Vec<LatLng>,
}

impl BufferPolygon {
    pub fn pending(route_id: RouteId, radius_meters: f64) -> Self {
        Self {
            route_id,
            ring: Vec::new(),
            radius_meters,
            status: BufferStatus::Pending,
            source: Vec::new(),
        }
    }

    /// Complete with a ring of at least four vertices
    pub fn is_usable(&self) -> bool {
        matches!(self.status, BufferStatus::Complete { .. }) && self.ring.len() >= MIN_RING_VERTICES
    }
}

/// A registered route as held in the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredRoute {
    pub id: RouteId,
    pub path: RoutePath,
    pub buffer: BufferPolygon,
    /// Sanitized raw path, the reference for return guidance
    reference: Vec<LatLng>,
}

impl RegisteredRoute {
    pub fn new(id: RouteId, path: RoutePath, buffer: BufferPolygon) -> Self {
        let reference = path.sanitized();
        Self { id, path, buffer, reference }
    }

    /// Restore a route from its persisted buffer alone
    pub fn from_stored(id: RouteId, buffer: BufferPolygon) -> Self {
        let path = RoutePath::from_positions(&buffer.source, buffer.radius_meters);
        Self::new(id, path, buffer)
    }

    pub fn reference(&self) -> &[LatLng] {
        &self.reference
    }
}

/// Immutable snapshot of every route assigned to one person
#[derive(Debug, Clone, Default)]
pub struct RouteSet {
    routes: Vec<Arc<RegisteredRoute>>,
}

impl RouteSet {
    pub fn new(routes: Vec<Arc<RegisteredRoute>>) -> Self {
        Self { routes }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Buffers usable for containment
    pub fn usable_buffers(&self) -> impl Iterator<Item = &BufferPolygon> {
        self.routes.iter().map(|r| &r.buffer).filter(|b| b.is_usable())
    }

    /// True if at least one buffer can be evaluated
    pub fn has_reference_geometry(&self) -> bool {
        self.usable_buffers().next().is_some()
    }

    /// Raw recorded paths with at least two points, for guidance
    pub fn guidance_paths(&self) -> impl Iterator<Item = &[LatLng]> {
        self.routes.iter().map(|r| r.reference()).filter(|p| p.len() >= 2)
    }
}
