//! Event handlers for the Tracker
//!
//! Each handler processes one event type, updating the catalog or
//! assignments and forwarding inputs to the person's session.

use super::Tracker;
use crate::domain::route::{BufferStatus, RegisteredRoute, RoutePath};
use crate::domain::types::{LocationSample, PersonId, RouteId};
use crate::services::deviation::SessionInput;
use std::sync::Arc;
use tracing::{debug, info, warn};

impl Tracker {
    pub(crate) fn handle_location(&mut self, person: PersonId, sample: LocationSample) {
        self.session_for(&person).send(SessionInput::Sample(sample));
    }

    /// Build, persist and assign the buffer of a finished registration
    ///
    /// Registration ends with this event, so the session resumes evaluation.
    pub(crate) async fn handle_route_registered(
        &mut self,
        person: PersonId,
        route_id: RouteId,
        path: RoutePath,
    ) {
        let result = self.builder.build_and_store(&route_id, &path, self.store.as_ref()).await;
        match result {
            Ok(buffer) => {
                if let BufferStatus::Error { .. } = buffer.status {
                    self.metrics.record_buffer_failed();
                } else {
                    self.metrics.record_buffer_built();
                }
                info!(
                    person = %person,
                    route_id = %route_id,
                    points = %path.points.len(),
                    status = %buffer.status.as_str(),
                    "route_registered"
                );
                let route = Arc::new(RegisteredRoute::new(route_id.clone(), path, buffer));
                self.catalog.insert(route_id.clone(), route);

                let assigned = self.assignments.entry(person.clone()).or_default();
                if !assigned.contains(&route_id) {
                    assigned.push(route_id);
                }
                self.push_routes(&person);
            }
            Err(e) => {
                self.metrics.record_buffer_failed();
                warn!(person = %person, route_id = %route_id, error = %e, "route_registration_failed");
            }
        }
        self.session_for(&person).send(SessionInput::RegistrationActive(false));
    }

    /// Replace the person's assigned routes
    ///
    /// Ids missing from the catalog are restored from the buffer store, which
    /// keeps the recorded path next to the ring. Ids found nowhere are skipped.
    pub(crate) async fn handle_routes_assigned(&mut self, person: PersonId, route_ids: Vec<RouteId>) {
        let mut assigned = Vec::with_capacity(route_ids.len());
        for id in route_ids {
            if assigned.contains(&id) {
                continue;
            }
            if !self.catalog.contains_key(&id) && !self.load_from_store(&id).await {
                continue;
            }
            assigned.push(id);
        }

        info!(person = %person, routes = %assigned.len(), "routes_assigned");
        self.assignments.insert(person.clone(), assigned);
        self.push_routes(&person);
    }

    pub(crate) fn handle_registration(&mut self, person: PersonId, active: bool) {
        self.session_for(&person).send(SessionInput::RegistrationActive(active));
    }

    pub(crate) fn handle_dismiss(&mut self, person: PersonId) {
        match self.sessions.get(&person) {
            Some(session) => {
                session.send(SessionInput::DismissAlarm);
            }
            None => debug!(person = %person, "dismiss_without_session"),
        }
    }

    async fn load_from_store(&mut self, id: &RouteId) -> bool {
        match self.store.load(id).await {
            Ok(Some(buffer)) => {
                debug!(
                    route_id = %id,
                    status = %buffer.status.as_str(),
                    path_points = %buffer.source.len(),
                    "route_loaded_from_store"
                );
                let route = RegisteredRoute::from_stored(id.clone(), buffer);
                self.catalog.insert(id.clone(), Arc::new(route));
                true
            }
            Ok(None) => {
                warn!(route_id = %id, "route_unknown");
                false
            }
            Err(e) => {
                warn!(route_id = %id, error = %e, "route_load_failed");
                false
            }
        }
    }

    /// Hand the person's running session a fresh route snapshot
    ///
    /// A session started later picks up the snapshot on creation.
    fn push_routes(&self, person: &PersonId) {
        if let Some(session) = self.sessions.get(person) {
            session.send(SessionInput::RoutesChanged(self.route_set_for(person)));
        }
    }
}
