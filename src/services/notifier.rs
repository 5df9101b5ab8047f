//! Outbound collaborators of a session
//!
//! The caregiver notifier receives status changes; the presenter receives
//! guidance updates and haptic cues for the walker's device. The engine
//! never waits on either for its own state.

use crate::domain::error::GeofenceError;
use crate::domain::types::{Cue, DeviationStatusChanged, GuidanceUpdate};
use async_trait::async_trait;

/// Delivers status changes to the caregiver side
#[async_trait]
pub trait StatusNotifier: Send + Sync {
    async fn notify(&self, change: &DeviationStatusChanged) -> Result<(), GeofenceError>;
}

/// Shows guidance and plays cues on the walker's device
pub trait Presenter: Send + Sync {
    fn show_guidance(&self, update: &GuidanceUpdate);
    fn play_cue(&self, cue: &Cue);
}

/// Discards everything; for sessions without a presentation channel
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn show_guidance(&self, _update: &GuidanceUpdate) {}
    fn play_cue(&self, _cue: &Cue) {}
}
