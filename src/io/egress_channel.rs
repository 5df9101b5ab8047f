//! Typed channel for egress messages
//!
//! Provides a non-blocking way to hand events to the MQTT publisher or the
//! JSONL event log. Uses a bounded mpsc channel to prevent unbounded memory
//! growth; a full channel drops the message.

use crate::domain::error::GeofenceError;
use crate::domain::types::{epoch_ms, Cue, DeviationStatusChanged, GuidanceUpdate, LatLng};
use crate::infra::metrics::{MetricsSummary, METRICS_NUM_BUCKETS};
use crate::services::notifier::{Presenter, StatusNotifier};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

/// Messages that can be sent to the egress consumers
#[derive(Debug, Serialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum EgressMessage {
    /// On-route / off-route change for the caregiver
    Status(StatusPayload),
    /// Return guidance for the walker's device
    Guidance(GuidancePayload),
    /// Haptic cue for the walker's device
    Cue(CuePayload),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

impl EgressMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            EgressMessage::Status(_) => "status",
            EgressMessage::Guidance(_) => "guidance",
            EgressMessage::Cue(_) => "cue",
            EgressMessage::Metrics(_) => "metrics",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub site: String,
    /// Person identifier
    pub pid: String,
    /// on-route | off-route
    pub status: String,
    /// Timestamp of the sample or timer that caused the change (epoch ms)
    pub ts: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
}

impl StatusPayload {
    pub fn new(change: &DeviationStatusChanged, site: String) -> Self {
        Self {
            site,
            pid: change.person.to_string(),
            status: change.status.as_str().to_string(),
            ts: change.timestamp,
            lat: change.last_location.map(|l| l.latitude),
            lng: change.last_location.map(|l| l.longitude),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GuidancePayload {
    pub site: String,
    pub pid: String,
    pub ts: u64,
    /// Null when guidance is cleared or unavailable
    pub steps: Option<u32>,
    pub turn: Option<String>,
    /// Closest point on the assigned routes
    pub nearest: Option<LatLng>,
    /// Off-route positions so far, oldest first
    pub trail: Vec<LatLng>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CuePayload {
    pub site: String,
    pub pid: String,
    pub ts: u64,
    /// alarm | left | right
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    /// Vibration pattern in ms (wait, on, off, on, ...)
    pub pattern: Vec<u64>,
}

/// Payload for metrics snapshot
#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    pub site: String,
    pub ts: u64,
    pub samples_total: u64,
    pub samples_per_sec: f64,
    /// Average sample processing latency (microseconds)
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    /// Sample latency histogram buckets (Prometheus-style exponential)
    pub lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub active_sessions: u64,
    pub off_route_sessions: u64,
    pub excursions_confirmed: u64,
    pub excursions_cancelled: u64,
    pub returns: u64,
    pub fail_open_resets: u64,
    pub notifications_failed: u64,
    pub stale_samples_dropped: u64,
    pub buffers_built: u64,
    pub buffers_failed: u64,
}

impl MetricsPayload {
    pub fn from_summary(summary: MetricsSummary, site: String) -> Self {
        Self {
            site,
            ts: epoch_ms(),
            samples_total: summary.samples_total,
            samples_per_sec: summary.samples_per_sec,
            avg_latency_us: summary.avg_process_latency_us,
            max_latency_us: summary.max_process_latency_us,
            lat_buckets: summary.lat_buckets,
            lat_p50_us: summary.lat_p50_us,
            lat_p95_us: summary.lat_p95_us,
            lat_p99_us: summary.lat_p99_us,
            active_sessions: summary.active_sessions,
            off_route_sessions: summary.off_route_sessions,
            excursions_confirmed: summary.excursions_confirmed,
            excursions_cancelled: summary.excursions_cancelled,
            returns: summary.returns_total,
            fail_open_resets: summary.fail_open_resets,
            notifications_failed: summary.notifications_failed,
            stale_samples_dropped: summary.stale_samples_dropped,
            buffers_built: summary.buffers_built,
            buffers_failed: summary.buffers_failed,
        }
    }
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
}

impl EgressSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String) -> Self {
        Self { tx, site_id }
    }

    /// Queue a status change; false if the channel is full or closed
    pub fn send_status(&self, change: &DeviationStatusChanged) -> bool {
        let payload = StatusPayload::new(change, self.site_id.clone());
        self.tx.try_send(EgressMessage::Status(payload)).is_ok()
    }

    pub fn send_guidance(&self, update: &GuidanceUpdate) {
        let payload = GuidancePayload {
            site: self.site_id.clone(),
            pid: update.person.to_string(),
            ts: epoch_ms(),
            steps: update.steps_to_target,
            turn: update.turn_direction.map(|t| t.as_str().to_string()),
            nearest: update.nearest_point,
            trail: update.off_route_path.clone(),
        };
        let _ = self.tx.try_send(EgressMessage::Guidance(payload));
    }

    pub fn send_cue(&self, cue: &Cue) {
        let payload = CuePayload {
            site: self.site_id.clone(),
            pid: cue.person.to_string(),
            ts: cue.ts,
            kind: cue.kind.as_str().to_string(),
            steps: cue.steps_to_target,
            pattern: cue.pattern.clone(),
        };
        let _ = self.tx.try_send(EgressMessage::Cue(payload));
    }

    pub fn send_metrics(&self, summary: MetricsSummary) {
        let payload = MetricsPayload::from_summary(summary, self.site_id.clone());
        let _ = self.tx.try_send(EgressMessage::Metrics(payload));
    }
}

#[async_trait]
impl StatusNotifier for EgressSender {
    async fn notify(&self, change: &DeviationStatusChanged) -> Result<(), GeofenceError> {
        if self.send_status(change) {
            Ok(())
        } else {
            Err(GeofenceError::NotificationDeliveryFailure {
                person: change.person.clone(),
                message: "egress channel full or closed".to_string(),
            })
        }
    }
}

impl Presenter for EgressSender {
    fn show_guidance(&self, update: &GuidanceUpdate) {
        self.send_guidance(update);
    }

    fn play_cue(&self, cue: &Cue) {
        self.send_cue(cue);
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
/// site_id is included in every payload for downstream consumers.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id), rx)
}
