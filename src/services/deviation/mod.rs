//! Deviation state machine for one tracked person
//!
//! Pure and synchronous: every input goes through [`DeviationSession::handle`],
//! which mutates the session and returns the side effects for the owning actor
//! to carry out (timers, notifications, presentation updates). The actor
//! guarantees inputs for one person are handled one at a time.
//!
//! Confirmation uses two clocks. A sample whose own timestamp is at least the
//! delay past the start of the excursion confirms it. When the wall-clock
//! timer is enabled, the actor also delivers `ConfirmationElapsed` after the
//! delay of wall time. Whichever comes first wins; the other becomes stale.
//! Either way the confirmation is dated on the sample clock.


use crate::domain::error::GeofenceError;
use crate::domain::route::RouteSet;
use crate::domain::types::{
    epoch_ms, Cue, CueKind, DeviationStatus, DeviationStatusChanged, GuidanceTarget,
    GuidanceUpdate, LatLng, LocationSample, PersonId,
};
use crate::infra::config::EngineSettings;
use crate::infra::metrics::Metrics;
use crate::services::containment::is_inside_any;
use crate::services::feedback::{FeedbackScheduler, StreamStart};
use crate::services::guidance::GuidanceCalculator;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where a person stands relative to their routes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviationState {
    OnRoute,
    /// Outside every buffer since `since`, not yet confirmed
    PendingOffRoute { since: u64 },
    /// Confirmed excursion that began at `since`
    ConfirmedOffRoute { since: u64 },
}

impl DeviationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviationState::OnRoute => "on_route",
            DeviationState::PendingOffRoute { .. } => "pending_off_route",
            DeviationState::ConfirmedOffRoute { .. } => "confirmed_off_route",
        }
    }
}

/// Everything a session reacts to
#[derive(Debug, Clone)]
pub enum SessionInput {
    Sample(LocationSample),
    /// New snapshot of the person's assigned routes
    RoutesChanged(Arc<RouteSet>),
    /// The person started (true) or finished (false) recording a route
    RegistrationActive(bool),
    /// Confirmation timer fired
    ConfirmationElapsed { generation: u64 },
    /// Cue stream tick
    CueDue { generation: u64, at_ms: u64 },
    /// Walker acknowledged the alarm
    DismissAlarm,
}

impl SessionInput {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionInput::Sample(_) => "sample",
            SessionInput::RoutesChanged(_) => "routes_changed",
            SessionInput::RegistrationActive(_) => "registration",
            SessionInput::ConfirmationElapsed { .. } => "confirmation_elapsed",
            SessionInput::CueDue { .. } => "cue_due",
            SessionInput::DismissAlarm => "dismiss_alarm",
        }
    }
}

/// Side effects requested by the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Arm the confirmation timer, replacing any armed one
    ScheduleConfirmation { generation: u64, delay: Duration },
    /// Disarm the confirmation timer (no-op if none)
    CancelConfirmation,
    /// Start the cue interval, replacing any running one
    StartCueStream(StreamStart),
    /// Stop the cue interval (no-op if none)
    StopCues,
    /// Hand a status change to the caregiver notifier
    Notify(DeviationStatusChanged),
    Guidance(GuidanceUpdate),
    Cue(Cue),
}

/// Why a session was forced back on route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailOpenCause {
    NoReferenceGeometry,
    RegistrationActive,
}

pub struct DeviationSession {
    person: PersonId,
    confirmation_delay: Duration,
    wall_clock_confirmation: bool,
    guidance_calc: GuidanceCalculator,
    feedback: FeedbackScheduler,
    routes: Arc<RouteSet>,
    state: DeviationState,
    off_route_path: Vec<LatLng>,
    last_sample: Option<LocationSample>,
    last_inside: Option<bool>,
    guidance: Option<GuidanceTarget>,
    confirmation_generation: u64,
    registering: bool,
    metrics: Arc<Metrics>,
}

impl DeviationSession {
    pub fn new(
        person: PersonId,
        settings: &EngineSettings,
        routes: Arc<RouteSet>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            person,
            confirmation_delay: settings.confirmation_delay,
            wall_clock_confirmation: settings.wall_clock_confirmation,
            guidance_calc: GuidanceCalculator::new(settings),
            feedback: FeedbackScheduler::new(settings),
            routes,
            state: DeviationState::OnRoute,
            off_route_path: Vec::new(),
            last_sample: None,
            last_inside: None,
            guidance: None,
            confirmation_generation: 0,
            registering: false,
            metrics,
        }
    }

    pub fn person(&self) -> &PersonId {
        &self.person
    }

    pub fn state(&self) -> DeviationState {
        self.state
    }

    pub fn off_route_path(&self) -> &[LatLng] {
        &self.off_route_path
    }

    pub fn guidance(&self) -> Option<&GuidanceTarget> {
        self.guidance.as_ref()
    }

    pub fn feedback(&self) -> &FeedbackScheduler {
        &self.feedback
    }

    pub fn is_registering(&self) -> bool {
        self.registering
    }

    /// Process one input
    pub fn handle(&mut self, input: SessionInput) -> Vec<Effect> {
        let mut effects = Vec::new();
        match input {
            SessionInput::Sample(sample) => self.on_sample(sample, &mut effects),
            SessionInput::RoutesChanged(routes) => {
                debug!(person = %self.person, routes = %routes.len(), "routes_updated");
                self.routes = routes;
                if !self.routes.has_reference_geometry() {
                    self.fail_open(FailOpenCause::NoReferenceGeometry, epoch_ms(), &mut effects);
                }
            }
            SessionInput::RegistrationActive(active) => {
                self.registering = active;
                info!(person = %self.person, active = %active, "registration_pause");
                if active {
                    self.fail_open(FailOpenCause::RegistrationActive, epoch_ms(), &mut effects);
                }
            }
            SessionInput::ConfirmationElapsed { generation } => {
                self.on_confirmation_elapsed(generation, &mut effects)
            }
            SessionInput::CueDue { generation, at_ms } => {
                if let DeviationState::ConfirmedOffRoute { .. } = self.state {
                    if let Some(kind) = self.feedback.on_due(generation, self.guidance.as_ref()) {
                        effects.push(Effect::Cue(self.cue(kind, at_ms)));
                    }
                }
            }
            SessionInput::DismissAlarm => {
                if let DeviationState::ConfirmedOffRoute { .. } = self.state {
                    if let Some(start) = self.feedback.dismiss_alarm() {
                        info!(person = %self.person, "alarm_dismissed");
                        effects.push(Effect::StartCueStream(start));
                    }
                }
            }
        }
        effects
    }

    fn on_sample(&mut self, sample: LocationSample, effects: &mut Vec<Effect>) {
        if let Some(last) = self.last_sample {
            if sample.timestamp <= last.timestamp {
                self.metrics.record_stale_sample();
                debug!(
                    person = %self.person,
                    ts = %sample.timestamp,
                    last_ts = %last.timestamp,
                    "stale_sample_dropped"
                );
                return;
            }
        }
        let position = sample.position();
        if !position.is_valid() {
            debug!(person = %self.person, lat = %sample.latitude, lng = %sample.longitude, "invalid_sample_dropped");
            return;
        }
        self.last_sample = Some(sample);

        if self.registering {
            return;
        }
        if !self.routes.has_reference_geometry() {
            self.fail_open(FailOpenCause::NoReferenceGeometry, sample.timestamp, effects);
            return;
        }

        let inside = is_inside_any(position, self.routes.usable_buffers());
        self.last_inside = Some(inside);

        match (self.state, inside) {
            (DeviationState::OnRoute, true) => {}
            (DeviationState::OnRoute, false) => {
                self.off_route_path.clear();
                self.off_route_path.push(position);
                self.confirmation_generation += 1;
                self.enter(DeviationState::PendingOffRoute { since: sample.timestamp });
                self.metrics.record_excursion_started();
                info!(person = %self.person, ts = %sample.timestamp, "excursion_pending");
                if self.wall_clock_confirmation {
                    effects.push(Effect::ScheduleConfirmation {
                        generation: self.confirmation_generation,
                        delay: self.confirmation_delay,
                    });
                }
                self.confirm_if_due(sample.timestamp, effects);
            }
            (DeviationState::PendingOffRoute { since }, true) => {
                self.confirmation_generation += 1;
                self.off_route_path.clear();
                self.enter(DeviationState::OnRoute);
                self.metrics.record_excursion_cancelled();
                info!(
                    person = %self.person,
                    outside_ms = %sample.timestamp.saturating_sub(since),
                    "excursion_cancelled"
                );
                effects.push(Effect::CancelConfirmation);
            }
            (DeviationState::PendingOffRoute { .. }, false) => {
                self.off_route_path.push(position);
                self.confirm_if_due(sample.timestamp, effects);
            }
            (DeviationState::ConfirmedOffRoute { since }, true) => {
                info!(
                    person = %self.person,
                    off_route_ms = %sample.timestamp.saturating_sub(since),
                    off_route_points = %self.off_route_path.len(),
                    "returned_to_route"
                );
                self.leave_confirmed(sample.timestamp, effects);
            }
            (DeviationState::ConfirmedOffRoute { .. }, false) => {
                self.off_route_path.push(position);
                self.refresh_guidance(effects);
            }
        }
    }

    /// Sample-clock confirmation: the excursion has lasted the full delay
    fn confirm_if_due(&mut self, now_ms: u64, effects: &mut Vec<Effect>) {
        if let DeviationState::PendingOffRoute { since } = self.state {
            let delay_ms = self.confirmation_delay.as_millis() as u64;
            if now_ms.saturating_sub(since) >= delay_ms {
                self.confirm(now_ms, effects);
            }
        }
    }

    /// Wall-clock confirmation, dated where the delay ends on the sample clock
    fn on_confirmation_elapsed(&mut self, generation: u64, effects: &mut Vec<Effect>) {
        let DeviationState::PendingOffRoute { since } = self.state else {
            debug!(person = %self.person, generation = %generation, "confirmation_timer_ignored");
            return;
        };
        if generation != self.confirmation_generation {
            debug!(
                person = %self.person,
                generation = %generation,
                current = %self.confirmation_generation,
                "confirmation_timer_stale"
            );
            return;
        }
        // The latest containment result decides, not the one at arm time.
        match self.last_inside {
            Some(false) => {
                let due = since.saturating_add(self.confirmation_delay.as_millis() as u64);
                let at_ms = self.last_sample.map_or(due, |s| s.timestamp.max(due));
                self.confirm(at_ms, effects)
            }
            _ => {
                self.confirmation_generation += 1;
                self.off_route_path.clear();
                self.enter(DeviationState::OnRoute);
                self.metrics.record_excursion_cancelled();
            }
        }
    }

    fn confirm(&mut self, at_ms: u64, effects: &mut Vec<Effect>) {
        let DeviationState::PendingOffRoute { since } = self.state else {
            return;
        };
        // Disarms the timer when the sample clock got here first.
        self.confirmation_generation += 1;
        effects.push(Effect::CancelConfirmation);

        self.enter(DeviationState::ConfirmedOffRoute { since });
        self.metrics.record_excursion_confirmed();
        warn!(
            person = %self.person,
            outside_ms = %at_ms.saturating_sub(since),
            off_route_points = %self.off_route_path.len(),
            "excursion_confirmed"
        );

        effects.push(Effect::Notify(self.status_event(DeviationStatus::OffRoute, at_ms)));
        self.refresh_guidance(effects);

        let start = self.feedback.start_alarm();
        effects.push(Effect::StartCueStream(start));
        effects.push(Effect::Cue(self.cue(CueKind::Alarm, at_ms)));
    }

    /// Confirmed -> OnRoute, by return or fail-open
    fn leave_confirmed(&mut self, at_ms: u64, effects: &mut Vec<Effect>) {
        if self.feedback.cancel() {
            effects.push(Effect::StopCues);
        }
        self.off_route_path.clear();
        self.guidance = None;
        self.enter(DeviationState::OnRoute);
        self.metrics.record_return();

        effects.push(Effect::Notify(self.status_event(DeviationStatus::OnRoute, at_ms)));
        effects.push(Effect::Guidance(GuidanceUpdate::cleared(self.person.clone())));
    }

    fn fail_open(&mut self, cause: FailOpenCause, at_ms: u64, effects: &mut Vec<Effect>) {
        let from = self.state;
        match from {
            DeviationState::OnRoute => return,
            DeviationState::PendingOffRoute { .. } => {
                self.confirmation_generation += 1;
                self.off_route_path.clear();
                self.enter(DeviationState::OnRoute);
                effects.push(Effect::CancelConfirmation);
            }
            DeviationState::ConfirmedOffRoute { .. } => self.leave_confirmed(at_ms, effects),
        }
        self.last_inside = None;
        self.metrics.record_fail_open();

        match cause {
            FailOpenCause::NoReferenceGeometry => {
                let err = GeofenceError::NoReferenceGeometry { person: self.person.clone() };
                warn!(person = %self.person, from = %from.as_str(), error = %err, "fail_open_reset");
            }
            FailOpenCause::RegistrationActive => {
                info!(person = %self.person, from = %from.as_str(), "fail_open_reset_registration");
            }
        }
    }

    fn refresh_guidance(&mut self, effects: &mut Vec<Effect>) {
        self.guidance = self.last_sample.and_then(|sample| {
            self.guidance_calc.compute(
                sample.position(),
                sample.heading,
                self.routes.guidance_paths(),
            )
        });
        effects.push(Effect::Guidance(GuidanceUpdate::from_target(
            self.person.clone(),
            self.guidance.as_ref(),
            &self.off_route_path,
        )));
    }

    /// Single point of state mutation
    fn enter(&mut self, to: DeviationState) {
        debug!(person = %self.person, from = %self.state.as_str(), to = %to.as_str(), "state_transition");
        self.state = to;
    }

    fn status_event(&self, status: DeviationStatus, at_ms: u64) -> DeviationStatusChanged {
        DeviationStatusChanged {
            person: self.person.clone(),
            status,
            timestamp: at_ms,
            last_location: self.last_sample.map(|s| s.position()),
        }
    }

    fn cue(&self, kind: CueKind, at_ms: u64) -> Cue {
        let steps = match kind {
            CueKind::Alarm => None,
            CueKind::Left | CueKind::Right => self.guidance.map(|g| g.steps_to_target),
        };
        Cue::new(self.person.clone(), kind, steps, at_ms)
    }
}
