//! Return guidance: nearest route point, steps to it, and which way to turn

use crate::domain::types::{GuidanceTarget, LatLng, TurnDirection};
use crate::geometry::{bearing_degrees, nearest_on_paths};
use crate::infra::config::EngineSettings;

/// Computes guidance targets from raw route paths
#[derive(Debug, Clone, Copy)]
pub struct GuidanceCalculator {
    stride_length_m: f64,
    turn_tolerance_deg: f64,
}

impl GuidanceCalculator {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            stride_length_m: settings.stride_length_m,
            turn_tolerance_deg: settings.turn_tolerance_deg,
        }
    }

    /// Guidance from `position` facing `heading` back to the closest route
    ///
    /// `None` when no path has two points; callers must clear any previous
    /// target rather than keep showing it.
    pub fn compute<'a, I>(&self, position: LatLng, heading: f64, paths: I) -> Option<GuidanceTarget>
    where
        I: IntoIterator<Item = &'a [LatLng]>,
    {
        let nearest = nearest_on_paths(position, paths)?;
        let bearing = bearing_degrees(position, nearest.point);
        Some(GuidanceTarget {
            nearest_point: nearest.point,
            distance_meters: nearest.distance_meters,
            steps_to_target: self.steps_for(nearest.distance_meters),
            turn_direction: self.classify_turn(bearing, heading),
        })
    }

    /// Whole strides to cover `distance_m`, never negative
    pub fn steps_for(&self, distance_m: f64) -> u32 {
        let steps = (distance_m / self.stride_length_m).round();
        if steps.is_finite() && steps > 0.0 {
            steps.min(u32::MAX as f64) as u32
        } else {
            0
        }
    }

    pub fn classify_turn(&self, bearing: f64, heading: f64) -> TurnDirection {
        let diff = normalize_diff(bearing - heading);
        if diff.abs() <= self.turn_tolerance_deg {
            TurnDirection::Straight
        } else if diff > 0.0 {
            TurnDirection::Right
        } else {
            TurnDirection::Left
        }
    }
}

/// Map an angle difference into (-180, 180]
pub fn normalize_diff(deg: f64) -> f64 {
    let d = deg.rem_euclid(360.0);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}
