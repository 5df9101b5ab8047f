//! Tests for the Tracker module

use super::*;
use crate::domain::error::GeofenceError;
use crate::domain::route::{BufferPolygon, BufferStatus, RoutePath, RoutePoint};
use crate::domain::types::{
    Cue, DeviationStatus, DeviationStatusChanged, GuidanceUpdate, LocationSample,
};
use crate::infra::config::Config;
use crate::io::buffer_store::MemoryBufferStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Duration;

#[derive(Default)]
struct Recorder {
    changes: Mutex<Vec<DeviationStatusChanged>>,
    guidance: Mutex<Vec<GuidanceUpdate>>,
}

#[async_trait]
impl StatusNotifier for Recorder {
    async fn notify(&self, change: &DeviationStatusChanged) -> Result<(), GeofenceError> {
        self.changes.lock().push(change.clone());
        Ok(())
    }
}

impl Presenter for Recorder {
    fn show_guidance(&self, update: &GuidanceUpdate) {
        self.guidance.lock().push(update.clone());
    }

    fn play_cue(&self, _cue: &Cue) {}
}

struct TestTracker {
    tracker: Tracker,
    recorder: Arc<Recorder>,
    store: Arc<MemoryBufferStore>,
}

impl std::ops::Deref for TestTracker {
    type Target = Tracker;
    fn deref(&self) -> &Self::Target {
        &self.tracker
    }
}

impl std::ops::DerefMut for TestTracker {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.tracker
    }
}

impl TestTracker {
    fn statuses(&self) -> Vec<DeviationStatus> {
        self.recorder.changes.lock().iter().map(|c| c.status).collect()
    }
}

fn create_test_tracker() -> TestTracker {
    let settings = Config::default()
        .with_confirmation_delay_ms(60)
        .with_cue_intervals_ms(1000, 1000)
        .engine_settings();
    let recorder = Arc::new(Recorder::default());
    let store = Arc::new(MemoryBufferStore::new());
    let tracker = Tracker::new(
        settings,
        store.clone(),
        recorder.clone(),
        recorder.clone(),
        Arc::new(Metrics::new()),
    );
    TestTracker { tracker, recorder, store }
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

fn person() -> PersonId {
    PersonId::from("walker-1")
}

fn corridor_path() -> RoutePath {
    RoutePath::new(vec![RoutePoint::new(0.0, 0.0, 0), RoutePoint::new(0.0, 0.001, 1000)])
}

fn location(lat: f64, ts: u64) -> EngineEvent {
    EngineEvent::Location {
        person: person(),
        sample: LocationSample { latitude: lat, longitude: 0.0005, heading: 0.0, timestamp: ts },
    }
}

fn registered(route_id: &str) -> EngineEvent {
    EngineEvent::RouteRegistered {
        person: person(),
        route_id: RouteId::from(route_id),
        path: corridor_path(),
    }
}

#[tokio::test]
async fn test_registration_builds_stores_and_assigns() {
    let mut t = create_test_tracker();
    t.process_event(registered("r1")).await;

    let id = RouteId::from("r1");
    assert!(t.catalog.contains_key(&id));
    assert_eq!(t.assignments[&person()], vec![id.clone()]);
    assert!(t.store.load(&id).await.unwrap().is_some());
    assert_eq!(t.metrics.buffers_built(), 1);
    assert!(t.route_set_for(&person()).has_reference_geometry());

    // Re-registering the same id does not duplicate the assignment.
    t.process_event(registered("r1")).await;
    assert_eq!(t.assignments[&person()].len(), 1);
}

#[tokio::test]
async fn test_short_registration_is_not_assigned() {
    let mut t = create_test_tracker();
    t.process_event(EngineEvent::RouteRegistered {
        person: person(),
        route_id: RouteId::from("tiny"),
        path: RoutePath::new(vec![RoutePoint::new(0.0, 0.0, 0)]),
    })
    .await;

    assert!(t.catalog.is_empty());
    assert!(t.store.is_empty());
    assert_eq!(t.metrics.buffers_failed(), 1);
    assert!(!t.route_set_for(&person()).has_reference_geometry());
}

#[tokio::test]
async fn test_end_to_end_excursion_and_return() {
    let mut t = create_test_tracker();
    t.process_event(registered("r1")).await;

    t.process_event(location(0.0, 1000)).await;
    t.process_event(location(0.0003, 2000)).await;
    tokio::time::sleep(millis(150)).await;
    assert_eq!(t.statuses(), vec![DeviationStatus::OffRoute]);

    t.process_event(location(0.0, 3000)).await;
    tokio::time::sleep(millis(50)).await;
    assert_eq!(t.statuses(), vec![DeviationStatus::OffRoute, DeviationStatus::OnRoute]);
    assert_eq!(t.active_sessions(), 1);

    let last = t.recorder.guidance.lock().last().cloned().unwrap();
    assert_eq!(last.steps_to_target, None);
}

#[tokio::test]
async fn test_unassigned_person_fails_open() {
    let mut t = create_test_tracker();
    for ts in [1000, 2000, 3000] {
        t.process_event(location(0.0003, ts)).await;
    }
    tokio::time::sleep(millis(120)).await;
    assert!(t.statuses().is_empty());
}

#[tokio::test]
async fn test_assignment_loads_stored_buffer() {
    let mut t = create_test_tracker();
    let id = RouteId::from("stored");
    let builder = BufferPolygonBuilder::new(&t.settings);
    let buffer: BufferPolygon = builder.build(&id, &corridor_path()).unwrap();
    t.store.save(&buffer).await.unwrap();

    t.process_event(EngineEvent::RoutesAssigned {
        person: person(),
        route_ids: vec![id.clone(), RouteId::from("missing"), id.clone()],
    })
    .await;

    assert_eq!(t.assignments[&person()], vec![id.clone()]);
    let set = t.route_set_for(&person());
    assert!(set.has_reference_geometry());
    let paths: Vec<_> = set.guidance_paths().collect();
    assert_eq!(paths.len(), 1, "stored routes keep their recorded path");
    assert_eq!(paths[0], &corridor_path().sanitized()[..]);
    assert!(matches!(t.catalog[&id].buffer.status, BufferStatus::Complete { .. }));
}

#[tokio::test]
async fn test_clearing_assignment_ends_confirmed_excursion() {
    let mut t = create_test_tracker();
    t.process_event(registered("r1")).await;
    t.process_event(location(0.0003, 1000)).await;
    tokio::time::sleep(millis(150)).await;
    assert_eq!(t.statuses(), vec![DeviationStatus::OffRoute]);

    t.process_event(EngineEvent::RoutesAssigned { person: person(), route_ids: vec![] }).await;
    tokio::time::sleep(millis(50)).await;
    assert_eq!(t.statuses(), vec![DeviationStatus::OffRoute, DeviationStatus::OnRoute]);
}

#[tokio::test]
async fn test_registration_pause_suppresses_alerts() {
    let mut t = create_test_tracker();
    t.process_event(registered("r1")).await;
    t.process_event(EngineEvent::Registration { person: person(), active: true }).await;

    for ts in [1000, 2000, 9000] {
        t.process_event(location(0.0003, ts)).await;
    }
    tokio::time::sleep(millis(150)).await;
    assert!(t.statuses().is_empty());
}

#[tokio::test]
async fn test_dismiss_without_session_is_ignored() {
    let mut t = create_test_tracker();
    t.process_event(EngineEvent::DismissAlarm { person: person() }).await;
    assert_eq!(t.active_sessions(), 0);
}

#[tokio::test]
async fn test_idle_settled_sessions_are_evicted() {
    let mut t = create_test_tracker();
    t.settings.session_idle = Some(Duration::from_secs(60));
    t.process_event(registered("r1")).await;
    t.process_event(location(0.0, 1000)).await;
    tokio::time::sleep(millis(20)).await;
    assert_eq!(t.active_sessions(), 1);

    let now = std::time::Instant::now();
    assert_eq!(t.evict_idle_sessions(now), 0, "recently seen");
    assert_eq!(t.evict_idle_sessions(now + Duration::from_secs(61)), 1);
    assert_eq!(t.active_sessions(), 0);
    assert_eq!(t.metrics.active_sessions(), 0);

    // The next event starts a fresh session with the same routes.
    t.process_event(location(0.0003, 2000)).await;
    tokio::time::sleep(millis(150)).await;
    assert_eq!(t.statuses(), vec![DeviationStatus::OffRoute]);
}

#[tokio::test]
async fn test_off_route_session_outlives_idle_period() {
    let mut t = create_test_tracker();
    t.settings.session_idle = Some(Duration::from_secs(60));
    t.process_event(registered("r1")).await;
    t.process_event(location(0.0003, 1000)).await;
    tokio::time::sleep(millis(150)).await;
    assert_eq!(t.statuses(), vec![DeviationStatus::OffRoute]);

    let later = std::time::Instant::now() + Duration::from_secs(3600);
    assert_eq!(t.evict_idle_sessions(later), 0);
    assert_eq!(t.active_sessions(), 1);

    t.settings.session_idle = None;
    t.process_event(location(0.0, 2000)).await;
    tokio::time::sleep(millis(20)).await;
    assert_eq!(t.evict_idle_sessions(later), 0, "eviction disabled");
}
