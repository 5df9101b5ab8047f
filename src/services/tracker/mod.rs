//! Session orchestration and the route catalog
//!
//! The Tracker is the central event processor that coordinates:
//! - Session lifecycle (one actor per person, started on first contact)
//! - Route catalog (buffers built from finished registrations or loaded from the store)
//! - Route assignment (which routes each person is checked against)
//! - Idle eviction (settled sessions without recent events are stopped)

mod handlers;
#[cfg(test)]
mod tests;

use crate::domain::event::EngineEvent;
use crate::domain::route::{RegisteredRoute, RouteSet};
use crate::domain::types::{PersonId, RouteId};
use crate::infra::config::EngineSettings;
use crate::infra::metrics::Metrics;
use crate::io::buffer_store::BufferStore;
use crate::services::buffer_builder::BufferPolygonBuilder;
use crate::services::notifier::{Presenter, StatusNotifier};
use crate::services::session::{spawn_session, SessionHandle};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Sweep period when idle eviction is enabled
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Central event processor for deviation sessions
pub struct Tracker {
    /// Running sessions by person
    pub(crate) sessions: FxHashMap<PersonId, SessionHandle>,
    /// Last event routed to each running session
    pub(crate) last_seen: FxHashMap<PersonId, Instant>,
    /// Every route known to this process
    pub(crate) catalog: FxHashMap<RouteId, Arc<RegisteredRoute>>,
    /// Route ids each person is checked against
    pub(crate) assignments: FxHashMap<PersonId, Vec<RouteId>>,
    pub(crate) builder: BufferPolygonBuilder,
    pub(crate) store: Arc<dyn BufferStore>,
    pub(crate) settings: EngineSettings,
    /// Caregiver side of every session
    pub(crate) notifier: Arc<dyn StatusNotifier>,
    /// Walker's device side of every session
    pub(crate) presenter: Arc<dyn Presenter>,
    pub(crate) metrics: Arc<Metrics>,
}

impl Tracker {
    pub fn new(
        settings: EngineSettings,
        store: Arc<dyn BufferStore>,
        notifier: Arc<dyn StatusNotifier>,
        presenter: Arc<dyn Presenter>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            sessions: FxHashMap::default(),
            last_seen: FxHashMap::default(),
            catalog: FxHashMap::default(),
            assignments: FxHashMap::default(),
            builder: BufferPolygonBuilder::new(&settings),
            store,
            settings,
            notifier,
            presenter,
            metrics,
        }
    }

    /// Consume events until every sender is dropped, sweeping idle sessions meanwhile
    pub async fn run(&mut self, mut event_rx: mpsc::Receiver<EngineEvent>) {
        let idle = self.settings.session_idle;
        let period = idle.map_or(MAX_SWEEP_INTERVAL, |d| d.min(MAX_SWEEP_INTERVAL));
        let mut sweep = tokio::time::interval(period.max(Duration::from_millis(10)));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = event_rx.recv() => match event {
                    Some(event) => self.process_event(event).await,
                    None => break,
                },
                _ = sweep.tick(), if idle.is_some() => {
                    self.evict_idle_sessions(Instant::now());
                }
            }
        }
        debug!(sessions = %self.sessions.len(), "tracker_stopped");
    }

    /// Stop settled sessions that have seen no event for the idle period
    ///
    /// Sessions off route, confirming an excursion or recording a route are
    /// kept however long they are quiet. Returns how many were stopped.
    pub fn evict_idle_sessions(&mut self, now: Instant) -> usize {
        let Some(idle) = self.settings.session_idle else {
            return 0;
        };
        let expired: Vec<PersonId> = self
            .sessions
            .iter()
            .filter(|(person, handle)| {
                handle.snapshot().is_settled()
                    && self
                        .last_seen
                        .get(*person)
                        .map_or(true, |seen| now.saturating_duration_since(*seen) >= idle)
            })
            .map(|(person, _)| person.clone())
            .collect();

        for person in &expired {
            self.sessions.remove(person);
            self.last_seen.remove(person);
            info!(person = %person, idle_secs = %idle.as_secs(), "session_evicted_idle");
        }
        if !expired.is_empty() {
            self.metrics.set_active_sessions(self.sessions.len() as u64);
        }
        expired.len()
    }

    /// Process a single event, dispatching to the appropriate handler
    pub async fn process_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Location { person, sample } => {
                self.handle_location(person, sample);
            }
            EngineEvent::RouteRegistered { person, route_id, path } => {
                self.handle_route_registered(person, route_id, path).await;
            }
            EngineEvent::RoutesAssigned { person, route_ids } => {
                self.handle_routes_assigned(person, route_ids).await;
            }
            EngineEvent::Registration { person, active } => {
                self.handle_registration(person, active);
            }
            EngineEvent::DismissAlarm { person } => {
                self.handle_dismiss(person);
            }
        }
    }

    /// Current route snapshot for `person`
    pub fn route_set_for(&self, person: &PersonId) -> Arc<RouteSet> {
        let routes = self
            .assignments
            .get(person)
            .map(|ids| ids.iter().filter_map(|id| self.catalog.get(id).cloned()).collect())
            .unwrap_or_default();
        Arc::new(RouteSet::new(routes))
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Session for `person`, started with their current routes if not yet running
    ///
    /// Marks the session as seen now.
    pub(crate) fn session_for(&mut self, person: &PersonId) -> &SessionHandle {
        self.last_seen.insert(person.clone(), Instant::now());
        if !self.sessions.contains_key(person) {
            let handle = spawn_session(
                person.clone(),
                &self.settings,
                self.route_set_for(person),
                self.notifier.clone(),
                self.presenter.clone(),
                self.metrics.clone(),
            );
            self.sessions.insert(person.clone(), handle);
            self.metrics.set_active_sessions(self.sessions.len() as u64);
        }
        &self.sessions[person]
    }
}
