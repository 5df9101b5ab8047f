//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `tracker` - Central event orchestrator, route catalog and assignments
//! - `session` - Per-person actor running the deviation state machine
//! - `deviation` - Pure deviation state machine
//! - `buffer_builder` - Buffer polygon construction from recorded routes
//! - `containment` - Union point-in-polygon test
//! - `guidance` - Return guidance (steps and turn direction)
//! - `feedback` - Alarm and directional cue streams
//! - `notifier` - Caregiver notifier and presenter interfaces

pub mod buffer_builder;
pub mod containment;
pub mod deviation;
pub mod feedback;
pub mod guidance;
pub mod notifier;
pub mod session;
pub mod tracker;

// Re-export commonly used types
pub use buffer_builder::BufferPolygonBuilder;
pub use deviation::{DeviationSession, DeviationState, Effect, SessionInput};
pub use notifier::{NullPresenter, Presenter, StatusNotifier};
pub use session::{spawn_session, SessionHandle};
pub use tracker::Tracker;
