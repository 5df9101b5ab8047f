//! Per-person session actor
//!
//! Owns one [`DeviationSession`] and handles its inputs one at a time, each to
//! completion before the next. Samples arrive on a bounded channel and are
//! shed when the session falls behind. Route changes, registration, dismissal
//! and the actor's own timer and cue ticks use an unbounded control channel
//! that is always drained first, so they are never lost. Timer and cue tasks
//! hold only a weak sender back to the actor: once the tracker drops the
//! handle the actor drains, aborts its tasks and exits.

use crate::domain::route::RouteSet;
use crate::domain::types::{epoch_ms, CueKind, DeviationStatusChanged, PersonId};
use crate::infra::config::EngineSettings;
use crate::infra::metrics::Metrics;
use crate::services::deviation::{DeviationSession, DeviationState, Effect, SessionInput};
use crate::services::feedback::StreamStart;
use crate::services::notifier::{Presenter, StatusNotifier};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What the tracker can see of a session without asking it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: DeviationState,
    pub registering: bool,
}

impl SessionSnapshot {
    /// On route and not recording, so nothing is lost by stopping the session
    pub fn is_settled(&self) -> bool {
        self.state == DeviationState::OnRoute && !self.registering
    }
}

/// Tracker-side handle to a running session
pub struct SessionHandle {
    person: PersonId,
    samples: mpsc::Sender<SessionInput>,
    control: mpsc::UnboundedSender<SessionInput>,
    snapshot: watch::Receiver<SessionSnapshot>,
    metrics: Arc<Metrics>,
}

impl SessionHandle {
    pub fn person(&self) -> &PersonId {
        &self.person
    }

    /// State after the last input the actor finished
    pub fn snapshot(&self) -> SessionSnapshot {
        *self.snapshot.borrow()
    }

    /// Queue an input without blocking
    ///
    /// Samples are dropped (and counted) when the session is backlogged;
    /// every other input is always queued.
    pub fn send(&self, input: SessionInput) -> bool {
        if !matches!(input, SessionInput::Sample(_)) {
            if self.control.send(input).is_err() {
                warn!(person = %self.person, "session_closed");
                return false;
            }
            return true;
        }
        match self.samples.try_send(input) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(input)) => {
                self.metrics.record_session_input_dropped();
                warn!(person = %self.person, input = %input.kind(), "session_queue_full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(person = %self.person, "session_closed");
                false
            }
        }
    }
}

/// Start the actor for `person` with its initial route snapshot
pub fn spawn_session(
    person: PersonId,
    settings: &EngineSettings,
    routes: Arc<RouteSet>,
    notifier: Arc<dyn StatusNotifier>,
    presenter: Arc<dyn Presenter>,
    metrics: Arc<Metrics>,
) -> SessionHandle {
    let (samples, samples_rx) = mpsc::channel(settings.session_queue.max(1));
    let (control, control_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot) =
        watch::channel(SessionSnapshot { state: DeviationState::OnRoute, registering: false });
    let notify_tx = spawn_notify_worker(person.clone(), notifier, metrics.clone());

    let actor = SessionActor {
        machine: DeviationSession::new(person.clone(), settings, routes, metrics.clone()),
        samples_rx,
        control_rx,
        weak_control: control.downgrade(),
        snapshot_tx,
        notify_tx,
        presenter,
        metrics: metrics.clone(),
        confirmation_timer: None,
        cue_task: None,
    };
    tokio::spawn(actor.run());

    info!(person = %person, "session_started");
    SessionHandle { person, samples, control, snapshot, metrics }
}

/// Delivers status changes one at a time, in the order the session produced them
fn spawn_notify_worker(
    person: PersonId,
    notifier: Arc<dyn StatusNotifier>,
    metrics: Arc<Metrics>,
) -> mpsc::UnboundedSender<DeviationStatusChanged> {
    let (tx, mut rx) = mpsc::unbounded_channel::<DeviationStatusChanged>();
    tokio::spawn(async move {
        while let Some(change) = rx.recv().await {
            match notifier.notify(&change).await {
                Ok(()) => {
                    metrics.record_notification(true);
                    info!(
                        person = %person,
                        status = %change.status.as_str(),
                        ts = %change.timestamp,
                        "caregiver_notified"
                    );
                }
                Err(e) => {
                    metrics.record_notification(false);
                    error!(person = %person, status = %change.status.as_str(), error = %e, "caregiver_notify_failed");
                }
            }
        }
    });
    tx
}

struct SessionActor {
    machine: DeviationSession,
    samples_rx: mpsc::Receiver<SessionInput>,
    control_rx: mpsc::UnboundedReceiver<SessionInput>,
    weak_control: mpsc::WeakUnboundedSender<SessionInput>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    notify_tx: mpsc::UnboundedSender<DeviationStatusChanged>,
    presenter: Arc<dyn Presenter>,
    metrics: Arc<Metrics>,
    confirmation_timer: Option<JoinHandle<()>>,
    cue_task: Option<JoinHandle<()>>,
}

impl SessionActor {
    async fn run(mut self) {
        loop {
            let input = tokio::select! {
                biased;
                Some(input) = self.control_rx.recv() => input,
                Some(input) = self.samples_rx.recv() => input,
                else => break,
            };
            let started = Instant::now();
            let is_sample = matches!(input, SessionInput::Sample(_));

            let effects = self.machine.handle(input);
            for effect in effects {
                self.apply(effect);
            }
            let snapshot = SessionSnapshot {
                state: self.machine.state(),
                registering: self.machine.is_registering(),
            };
            self.snapshot_tx.send_if_modified(|current| {
                let changed = *current != snapshot;
                *current = snapshot;
                changed
            });

            if is_sample {
                self.metrics.record_sample_processed(started.elapsed().as_micros() as u64);
            }
        }

        self.abort_confirmation();
        self.abort_cues();
        debug!(person = %self.machine.person(), "session_stopped");
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::ScheduleConfirmation { generation, delay } => {
                self.abort_confirmation();
                self.confirmation_timer = Some(self.spawn_confirmation_timer(generation, delay));
            }
            Effect::CancelConfirmation => self.abort_confirmation(),
            Effect::StartCueStream(start) => {
                self.abort_cues();
                self.cue_task = Some(self.spawn_cue_stream(start));
            }
            Effect::StopCues => self.abort_cues(),
            Effect::Notify(change) => {
                if self.notify_tx.send(change).is_err() {
                    self.metrics.record_notification(false);
                    error!(person = %self.machine.person(), "notify_worker_gone");
                }
            }
            Effect::Guidance(update) => self.presenter.show_guidance(&update),
            Effect::Cue(cue) => {
                self.metrics.record_cue(cue.kind == CueKind::Alarm);
                debug!(person = %cue.person, kind = %cue.kind.as_str(), "cue");
                self.presenter.play_cue(&cue);
            }
        }
    }

    fn spawn_confirmation_timer(&self, generation: u64, delay: Duration) -> JoinHandle<()> {
        let weak = self.weak_control.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(SessionInput::ConfirmationElapsed { generation });
            }
        })
    }

    /// First tick one interval after start; the alarm's immediate cue comes from the machine
    fn spawn_cue_stream(&self, start: StreamStart) -> JoinHandle<()> {
        let weak = self.weak_control.clone();
        tokio::spawn(async move {
            let period = start.interval.max(Duration::from_millis(1));
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(tx) = weak.upgrade() else { break };
                let input = SessionInput::CueDue { generation: start.generation, at_ms: epoch_ms() };
                if tx.send(input).is_err() {
                    break;
                }
            }
        })
    }

    fn abort_confirmation(&mut self) {
        if let Some(handle) = self.confirmation_timer.take() {
            handle.abort();
        }
    }

    fn abort_cues(&mut self) {
        if let Some(handle) = self.cue_task.take() {
            handle.abort();
        }
    }
}
