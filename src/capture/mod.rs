//! Media capture for a coaching session
//!
//! Device acquisition happens once, up front, through `MediaDevices`. The
//! acquired tracks then feed two independent workers:
//!
//! ```text
//! CameraSource ──▶ FrameSampler (timer) ──▶ FrameRingBuffer
//!                                      └──▶ OutboundLink
//! MicrophoneSource ──▶ AudioInputStreamer (callback) ──▶ OutboundLink
//! ```

mod audio_input;
mod camera;
mod frame_buffer;
mod frame_sampler;
mod microphone;
mod pcm;

pub use audio_input::AudioInputStreamer;
pub use camera::{ImageSequenceCamera, LocalDevices};
pub use frame_buffer::{FrameRecord, FrameRingBuffer, FRAME_BUFFER_CAPACITY};
pub use frame_sampler::{encode_frame, FrameSampler, JPEG_MIME};
pub use microphone::CpalMicrophone;
pub use pcm::{
    downmix_to_mono, f32_to_i16, i16_to_f32, pcm16_le_bytes, resample, resample_f32,
    sample_to_f32,
};

use async_trait::async_trait;
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;

use crate::playback::AudioOutput;

/// Fatal errors while acquiring camera, microphone or audio output
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeviceAccessError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("No camera available: {0}")]
    NoCamera(String),
    #[error("No audio input device found")]
    NoMicrophone,
    #[error("No audio output available: {0}")]
    NoOutput(String),
    #[error("Failed to open device stream: {0}")]
    Stream(String),
}

/// The most recent camera image
pub type VideoFrame = Arc<RgbImage>;

pub trait CameraSource: Send + Sync {
    /// The live frame, or `None` if nothing is available (or released)
    fn current_frame(&self) -> Option<VideoFrame>;
    /// Stop the track. Idempotent.
    fn release(&self);
}

/// Called with fixed-size blocks of mono samples at `sample_rate()`
pub type BlockCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

pub trait MicrophoneSource: Send + Sync {
    fn sample_rate(&self) -> u32;
    fn start(&self, on_block: BlockCallback) -> Result<(), DeviceAccessError>;
    /// Stop capture. Idempotent; the callback is not invoked after it returns.
    fn stop(&self);
}

/// Everything a session acquires before going live
pub struct MediaTracks {
    pub camera: Arc<dyn CameraSource>,
    pub microphone: Arc<dyn MicrophoneSource>,
    /// Output for cue playback
    pub output: Arc<dyn AudioOutput>,
}

#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self) -> Result<MediaTracks, DeviceAccessError>;
}
