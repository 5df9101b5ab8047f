//! Shared types for the route guard engine

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Newtype wrapper for tracked person IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(pub String);

impl std::fmt::Display for PersonId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PersonId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Newtype wrapper for registered route IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(pub String);

impl RouteId {
    /// Generate a new time-sortable route ID (UUIDv7)
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl std::fmt::Display for RouteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RouteId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A geographic coordinate in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLng {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// True if both components are finite and within WGS84 bounds
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    pub(crate) fn to_geo(self) -> geo::Point<f64> {
        geo::Point::new(self.longitude, self.latitude)
    }
}

/// A live position reported by the positioning collaborator (~1 Hz)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Facing direction in degrees, 0-360 clockwise from north
    #[serde(default)]
    pub heading: f64,
    /// Epoch milliseconds
    pub timestamp: u64,
}

impl LocationSample {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }
}

/// Caregiver-facing deviation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviationStatus {
    #[serde(rename = "on-route")]
    OnRoute,
    #[serde(rename = "off-route")]
    OffRoute,
}

impl DeviationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviationStatus::OnRoute => "on-route",
            DeviationStatus::OffRoute => "off-route",
        }
    }
}

/// Emitted to the caregiver collaborator on confirmed excursion and on return
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviationStatusChanged {
    pub person: PersonId,
    pub status: DeviationStatus,
    pub timestamp: u64,
    pub last_location: Option<LatLng>,
}

/// Which way to turn to face the return target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnDirection {
    Left,
    Right,
    Straight,
}

impl TurnDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnDirection::Left => "left",
            TurnDirection::Right => "right",
            TurnDirection::Straight => "straight",
        }
    }
}

/// Return guidance computed while confirmed off-route
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuidanceTarget {
    pub nearest_point: LatLng,
    pub distance_meters: f64,
    pub steps_to_target: u32,
    pub turn_direction: TurnDirection,
}

/// Presentation-facing guidance; null steps and turn mean "calculating" or cleared
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidanceUpdate {
    pub person: PersonId,
    pub steps_to_target: Option<u32>,
    pub turn_direction: Option<TurnDirection>,
    /// Closest point on the assigned routes, for a map marker
    pub nearest_point: Option<LatLng>,
    /// Positions recorded since the excursion began
    #[serde(default)]
    pub off_route_path: Vec<LatLng>,
}

impl GuidanceUpdate {
    pub fn from_target(
        person: PersonId,
        target: Option<&GuidanceTarget>,
        off_route_path: &[LatLng],
    ) -> Self {
        Self {
            person,
            steps_to_target: target.map(|t| t.steps_to_target),
            turn_direction: target.map(|t| t.turn_direction),
            nearest_point: target.map(|t| t.nearest_point),
            off_route_path: off_route_path.to_vec(),
        }
    }

    pub fn cleared(person: PersonId) -> Self {
        Self {
            person,
            steps_to_target: None,
            turn_direction: None,
            nearest_point: None,
            off_route_path: Vec::new(),
        }
    }
}

/// Kind of feedback cue played to the walker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CueKind {
    Alarm,
    Left,
    Right,
}

/// Rapid triple pulse
pub const ALARM_VIBRATION_PATTERN: &[u64] = &[0, 100, 50, 100, 50, 100];
/// Two short pulses
pub const LEFT_VIBRATION_PATTERN: &[u64] = &[0, 100, 100, 100];
/// One long pulse
pub const RIGHT_VIBRATION_PATTERN: &[u64] = &[0, 400];

impl CueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CueKind::Alarm => "alarm",
            CueKind::Left => "left",
            CueKind::Right => "right",
        }
    }

    /// Haptic pattern in milliseconds (wait, vibrate, wait, ...)
    pub fn vibration_pattern(&self) -> &'static [u64] {
        match self {
            CueKind::Alarm => ALARM_VIBRATION_PATTERN,
            CueKind::Left => LEFT_VIBRATION_PATTERN,
            CueKind::Right => RIGHT_VIBRATION_PATTERN,
        }
    }
}

/// A single audible/haptic cue for the presentation collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    pub person: PersonId,
    pub kind: CueKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps_to_target: Option<u32>,
    pub pattern: Vec<u64>,
    pub ts: u64,
}

impl Cue {
    pub fn new(person: PersonId, kind: CueKind, steps_to_target: Option<u32>, ts: u64) -> Self {
        Self { person, kind, steps_to_target, pattern: kind.vibration_pattern().to_vec(), ts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latlng_validity() {
        assert!(LatLng::new(37.5, 127.0).is_valid());
        assert!(!LatLng::new(91.0, 0.0).is_valid());
        assert!(!LatLng::new(0.0, f64::NAN).is_valid());
        assert!(!LatLng::new(0.0, -180.5).is_valid());
    }

    #[test]
    fn test_status_serializes_hyphenated() {
        let event = DeviationStatusChanged {
            person: PersonId::from("p1"),
            status: DeviationStatus::OffRoute,
            timestamp: 1000,
            last_location: Some(LatLng::new(1.0, 2.0)),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"status\":\"off-route\""));
        assert!(json.contains("\"person\":\"p1\""));
    }

    #[test]
    fn test_location_sample_heading_defaults_to_zero() {
        let sample: LocationSample =
            serde_json::from_str(r#"{"latitude":1.0,"longitude":2.0,"timestamp":5}"#).unwrap();
        assert_eq!(sample.heading, 0.0);
        assert_eq!(sample.position(), LatLng::new(1.0, 2.0));
    }

    #[test]
    fn test_cleared_guidance_has_no_values() {
        let update = GuidanceUpdate::cleared(PersonId::from("p1"));
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains("\"steps_to_target\":null"));
        assert!(json.contains("\"turn_direction\":null"));
        assert!(json.contains("\"nearest_point\":null"));
        assert!(json.contains("\"off_route_path\":[]"));
    }

    #[test]
    fn test_guidance_from_target_copies_marker_and_trail() {
        let target = GuidanceTarget {
            nearest_point: LatLng::new(0.0, 0.0005),
            distance_meters: 33.0,
            steps_to_target: 56,
            turn_direction: TurnDirection::Right,
        };
        let trail = [LatLng::new(0.0003, 0.0005), LatLng::new(0.0004, 0.0005)];
        let update = GuidanceUpdate::from_target(PersonId::from("p1"), Some(&target), &trail);

        assert_eq!(update.steps_to_target, Some(56));
        assert_eq!(update.nearest_point, Some(LatLng::new(0.0, 0.0005)));
        assert_eq!(update.off_route_path, trail.to_vec());
    }

    #[test]
    fn test_cue_carries_pattern() {
        let cue = Cue::new(PersonId::from("p1"), CueKind::Right, Some(12), 0);
        assert_eq!(cue.pattern, vec![0, 400]);
    }
}
