//! Coaching session orchestration
//!
//! `SessionController` owns the lifecycle. Everything it acquires is
//! released exactly once on every exit path, and the `SessionGate` it shares
//! with the workers is the one authority on whether the session may still
//! act.

mod controller;
mod gate;
mod state_machine;

pub use controller::{SessionController, SessionDeps};
pub use gate::SessionGate;
pub use state_machine::{reduce, Effect, Event, Phase};

use thiserror::Error;

use crate::capture::DeviceAccessError;
use crate::overlay::VisionError;

/// Why `start()` did not reach `Live`
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("session already started")]
    AlreadyStarted,
    #[error(transparent)]
    Device(#[from] DeviceAccessError),
    #[error(transparent)]
    Vision(#[from] VisionError),
    #[error("session was stopped before it went live")]
    Cancelled,
}

/// Caller-facing notifications
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// Phase status text
    Status(String),
    /// A cue was dispatched for speech
    CueText(String),
    /// A non-fatal problem, reported once per category
    Notice(String),
    /// `finish()` completed with this many frames
    Finished { frames: usize },
}
