//! Error taxonomy of the deviation engine
//!
//! None of these are process-fatal: each one is handled where it occurs and
//! the affected session recovers on its next valid input.

use crate::domain::route::BufferErrorReason;
use crate::domain::types::{PersonId, RouteId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeofenceError {
    /// Fewer than two usable points; nothing is written
    #[error("route {route_id} has {valid_points} valid points, at least 2 required")]
    InsufficientGeometryData { route_id: RouteId, valid_points: usize },

    /// The offset step yielded no usable ring; persisted with `error` status
    #[error("buffer computation failed for route {route_id}: {}", reason.as_str())]
    BufferComputationFailure { route_id: RouteId, reason: BufferErrorReason },

    /// A session has no usable polygon to test against
    #[error("no reference geometry for {person}")]
    NoReferenceGeometry { person: PersonId },

    /// The caregiver collaborator did not accept a status change
    #[error("status notification for {person} not delivered: {message}")]
    NotificationDeliveryFailure { person: PersonId, message: String },

    /// The buffer store could not persist or load an artifact
    #[error("buffer store error for route {route_id}")]
    Store {
        route_id: RouteId,
        #[source]
        source: anyhow::Error,
    },
}

pub type Result<T> = std::result::Result<T, GeofenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_subject() {
        let err = GeofenceError::InsufficientGeometryData {
            route_id: RouteId::from("r7"),
            valid_points: 1,
        };
        assert_eq!(err.to_string(), "route r7 has 1 valid points, at least 2 required");

        let err = GeofenceError::BufferComputationFailure {
            route_id: RouteId::from("r7"),
            reason: BufferErrorReason::Coordinates,
        };
        assert!(err.to_string().ends_with("coordinates"));
    }
}
