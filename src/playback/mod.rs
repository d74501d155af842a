//! Cue audio playback
//!
//! `AudioPlaybackScheduler` lays decoded buffers end to end on the output
//! device's clock. `AudioOutput` is the device seam: a monotonic clock plus
//! "start this buffer at time t" and "stop that voice".

mod cpal_output;
mod scheduler;

pub use cpal_output::CpalOutput;
pub use scheduler::{AudioPlaybackScheduler, PlaybackHandle};

use thiserror::Error;

use crate::speech::DecodedAudio;

/// Identifies one scheduled buffer on an output
pub type VoiceId = u64;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlaybackError {
    #[error("No audio output device found")]
    NoOutputDevice,
    #[error("Failed to create output stream: {0}")]
    StreamCreationFailed(String),
    #[error("Audio output is closed")]
    Closed,
}

/// An output device with its own clock.
///
/// Times are seconds on the output clock. Implementations must keep `now()`
/// monotonic and must tolerate `stop` on a voice that already finished.
pub trait AudioOutput: Send + Sync {
    fn now(&self) -> f64;
    fn start_at(&self, audio: &DecodedAudio, at: f64) -> Result<VoiceId, PlaybackError>;
    fn stop(&self, voice: VoiceId);
    /// Release the device. Idempotent.
    fn close(&self);
}
