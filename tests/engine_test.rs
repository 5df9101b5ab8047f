//! End-to-end engine tests: MQTT payloads in, egress messages out

use route_guard::domain::route::{BufferStatus, RoutePath, RoutePoint};
use route_guard::domain::types::RouteId;
use route_guard::infra::{Config, EngineSettings, Metrics};
use route_guard::io::mqtt::parse_message;
use route_guard::io::{create_egress_channel, BufferStore, EgressMessage, FileBufferStore};
use route_guard::services::{BufferPolygonBuilder, Tracker};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, NamedTempFile};
use tokio::sync::mpsc;

fn fast_settings() -> EngineSettings {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(
        b"[deviation]\nconfirmation_delay_ms = 80\n[feedback]\nalarm_interval_ms = 50\ndirection_interval_ms = 50\n",
    )
    .unwrap();
    file.flush().unwrap();
    Config::from_file(file.path()).unwrap().engine_settings()
}

struct Harness {
    tracker: Tracker,
    rx: mpsc::Receiver<EgressMessage>,
    metrics: Arc<Metrics>,
    store: Arc<FileBufferStore>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempdir().unwrap();
    let store = Arc::new(FileBufferStore::new(dir.path()));
    let metrics = Arc::new(Metrics::new());
    let (sender, rx) = create_egress_channel(1000, "test-site".to_string());
    let tracker = Tracker::new(
        fast_settings(),
        store.clone(),
        Arc::new(sender.clone()),
        Arc::new(sender),
        metrics.clone(),
    );
    Harness { tracker, rx, metrics, store, _dir: dir }
}

impl Harness {
    async fn feed(&mut self, topic: &str, payload: &str) {
        let event = parse_message("walkers", topic, payload.as_bytes()).unwrap();
        self.tracker.process_event(event).await;
    }

    async fn location(&mut self, lat: f64, lng: f64, heading: f64, ts: u64) {
        let payload = format!(
            r#"{{"latitude": {lat}, "longitude": {lng}, "heading": {heading}, "timestamp": {ts}}}"#
        );
        self.feed("walkers/p1/location", &payload).await;
    }

    fn drain(&mut self) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            out.push(serde_json::to_value(&msg).unwrap());
        }
        out
    }
}

fn of_type<'a>(msgs: &'a [serde_json::Value], t: &str) -> Vec<&'a serde_json::Value> {
    msgs.iter().filter(|m| m["t"] == t).collect()
}

const CORRIDOR: &str = r#"{"route_id": "home-park", "points": [
    {"latitude": 0.0, "longitude": 0.0, "timestamp": 0},
    {"latitude": 0.0, "longitude": 0.0005, "timestamp": 1000},
    {"latitude": 0.0, "longitude": 0.001, "timestamp": 2000}
]}"#;

#[tokio::test]
async fn test_registered_route_is_persisted() {
    let mut h = harness();
    h.feed("walkers/p1/route", CORRIDOR).await;

    let stored = h.store.load(&RouteId::from("home-park")).await.unwrap().unwrap();
    assert!(matches!(stored.status, BufferStatus::Complete { .. }));
    assert!(stored.ring.len() >= 4);
    assert_eq!(h.metrics.buffers_built(), 1);
}

#[tokio::test]
async fn test_excursion_alerts_guides_and_clears() {
    let mut h = harness();
    h.feed("walkers/p1/route", CORRIDOR).await;

    h.location(0.0, 0.0002, 90.0, 1_000).await;
    // ~33 m north of the corridor, facing north
    h.location(0.0003, 0.0005, 0.0, 2_000).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let msgs = h.drain();
    let status = of_type(&msgs, "status");
    assert_eq!(status.len(), 1);
    assert_eq!(status[0]["status"], "off-route");
    assert_eq!(status[0]["site"], "test-site");
    assert_eq!(status[0]["pid"], "p1");

    let guidance = of_type(&msgs, "guidance");
    assert_eq!(guidance[0]["steps"], 56);
    assert_eq!(guidance[0]["turn"], "right");

    let cues = of_type(&msgs, "cue");
    assert!(cues.len() >= 2, "immediate alarm plus repeats");
    assert!(cues.iter().all(|c| c["kind"] == "alarm"));

    h.feed("walkers/p1/dismiss", "").await;
    tokio::time::sleep(Duration::from_millis(130)).await;
    let msgs = h.drain();
    let directional: Vec<_> = of_type(&msgs, "cue")
        .into_iter()
        .filter(|c| c["kind"] != "alarm")
        .collect();
    assert!(!directional.is_empty());
    assert!(directional.iter().all(|c| c["kind"] == "right" && c["steps"] == 56));

    h.location(0.0, 0.0005, 180.0, 3_000).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let msgs = h.drain();
    let status = of_type(&msgs, "status");
    assert_eq!(status.len(), 1);
    assert_eq!(status[0]["status"], "on-route");
    let guidance = of_type(&msgs, "guidance");
    assert!(guidance.last().unwrap()["steps"].is_null());

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(of_type(&h.drain(), "cue").is_empty(), "cues stop on return");
    assert_eq!(h.metrics.off_route_sessions(), 0);
}

#[tokio::test]
async fn test_brief_excursion_is_silent() {
    let mut h = harness();
    h.feed("walkers/p1/route", CORRIDOR).await;

    h.location(0.0003, 0.0005, 0.0, 1_000).await;
    h.location(0.0, 0.0005, 0.0, 1_020).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(of_type(&h.drain(), "status").is_empty());
}

#[tokio::test]
async fn test_sample_clock_confirms_recorded_excursion() {
    let mut h = harness();
    h.feed("walkers/p1/route", CORRIDOR).await;

    // Sample timestamps span the delay even though no wall time passes between them.
    h.location(0.0003, 0.0005, 0.0, 10_000).await;
    h.location(0.0003, 0.0005, 0.0, 10_080).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let msgs = h.drain();
    let status = of_type(&msgs, "status");
    assert_eq!(status.len(), 1);
    assert_eq!(status[0]["ts"], 10_080);
}

#[tokio::test]
async fn test_stored_route_survives_restart() {
    let dir = tempdir().unwrap();
    let settings = fast_settings();
    let store = FileBufferStore::new(dir.path());
    let path = RoutePath::new(vec![RoutePoint::new(0.0, 0.0, 0), RoutePoint::new(0.0, 0.001, 1)]);
    BufferPolygonBuilder::new(&settings)
        .build_and_store(&RouteId::from("kept"), &path, &store)
        .await
        .unwrap();

    let metrics = Arc::new(Metrics::new());
    let (sender, mut rx) = create_egress_channel(100, "s".to_string());
    let mut tracker = Tracker::new(
        settings,
        Arc::new(FileBufferStore::new(dir.path())),
        Arc::new(sender.clone()),
        Arc::new(sender),
        metrics,
    );

    let assign = parse_message("walkers", "walkers/p1/routes", br#"{"route_ids": ["kept"]}"#)
        .unwrap();
    tracker.process_event(assign).await;
    let outside = parse_message(
        "walkers",
        "walkers/p1/location",
        br#"{"latitude": 0.0003, "longitude": 0.0005, "timestamp": 1000}"#,
    )
    .unwrap();
    tracker.process_event(outside).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut statuses = Vec::new();
    let mut guidance = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        match msg {
            EgressMessage::Status(s) => statuses.push(s.status),
            EgressMessage::Guidance(g) => guidance.push(g),
            _ => {}
        }
    }
    assert_eq!(statuses, vec!["off-route".to_string()]);
    // The recorded path comes back from the store with the ring.
    assert_eq!(guidance.len(), 1);
    assert_eq!(guidance[0].steps, Some(56));
    let nearest = guidance[0].nearest.expect("nearest point on the stored path");
    assert!(nearest.latitude.abs() < 1e-9);
    assert!((nearest.longitude - 0.0005).abs() < 1e-6);
}
