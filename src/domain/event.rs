//! Inputs accepted by the engine, already parsed from the transport

use crate::domain::route::RoutePath;
use crate::domain::types::{LocationSample, PersonId, RouteId};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Periodic position fix from the walker's device
    Location { person: PersonId, sample: LocationSample },
    /// A finished route registration; buffered, stored and assigned to the person
    RouteRegistered { person: PersonId, route_id: RouteId, path: RoutePath },
    /// Replaces the set of routes the person is checked against
    RoutesAssigned { person: PersonId, route_ids: Vec<RouteId> },
    /// Route recording started or stopped
    Registration { person: PersonId, active: bool },
    DismissAlarm { person: PersonId },
}

impl EngineEvent {
    pub fn person(&self) -> &PersonId {
        match self {
            EngineEvent::Location { person, .. }
            | EngineEvent::RouteRegistered { person, .. }
            | EngineEvent::RoutesAssigned { person, .. }
            | EngineEvent::Registration { person, .. }
            | EngineEvent::DismissAlarm { person } => person,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::Location { .. } => "location",
            EngineEvent::RouteRegistered { .. } => "route_registered",
            EngineEvent::RoutesAssigned { .. } => "routes_assigned",
            EngineEvent::Registration { .. } => "registration",
            EngineEvent::DismissAlarm { .. } => "dismiss_alarm",
        }
    }
}
