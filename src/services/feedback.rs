//! Cue stream bookkeeping for one session
//!
//! At most one stream exists: an alarm stream on confirmation, replaced by a
//! directional stream once the walker dismisses the alarm. The scheduler only
//! decides; the session actor owns the interval task. Every start or cancel
//! bumps the generation, and ticks carrying an older generation are ignored,
//! so nothing fires after a cancel even if a tick was already queued.

use crate::domain::types::{CueKind, GuidanceTarget, TurnDirection};
use crate::infra::config::EngineSettings;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CueStream {
    Idle,
    Alarm,
    Directional,
}

impl CueStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            CueStream::Idle => "idle",
            CueStream::Alarm => "alarm",
            CueStream::Directional => "directional",
        }
    }
}

/// Instruction to (re)start the interval task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStart {
    pub generation: u64,
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct FeedbackScheduler {
    stream: CueStream,
    generation: u64,
    alarm_interval: Duration,
    direction_interval: Duration,
}

impl FeedbackScheduler {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            stream: CueStream::Idle,
            generation: 0,
            alarm_interval: settings.alarm_interval,
            direction_interval: settings.direction_interval,
        }
    }

    pub fn stream(&self) -> CueStream {
        self.stream
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Begin the alarm stream; the caller plays one alarm cue right away
    pub fn start_alarm(&mut self) -> StreamStart {
        self.generation += 1;
        self.stream = CueStream::Alarm;
        StreamStart { generation: self.generation, interval: self.alarm_interval }
    }

    /// Swap the alarm for directional cues; `None` if no alarm is running
    pub fn dismiss_alarm(&mut self) -> Option<StreamStart> {
        if self.stream != CueStream::Alarm {
            return None;
        }
        self.generation += 1;
        self.stream = CueStream::Directional;
        Some(StreamStart { generation: self.generation, interval: self.direction_interval })
    }

    /// Stop whatever is running. Returns false if already idle.
    pub fn cancel(&mut self) -> bool {
        if self.stream == CueStream::Idle {
            return false;
        }
        self.generation += 1;
        self.stream = CueStream::Idle;
        true
    }

    /// Cue to play for a tick of `generation`, if any
    ///
    /// Directional ticks stay silent without guidance or when the target is
    /// straight ahead.
    pub fn on_due(&self, generation: u64, guidance: Option<&GuidanceTarget>) -> Option<CueKind> {
        if generation != self.generation {
            return None;
        }
        match self.stream {
            CueStream::Idle => None,
            CueStream::Alarm => Some(CueKind::Alarm),
            CueStream::Directional => match guidance?.turn_direction {
                TurnDirection::Left => Some(CueKind::Left),
                TurnDirection::Right => Some(CueKind::Right),
                TurnDirection::Straight => None,
            },
        }
    }
}
