//! Periodic frame sampling
//!
//! On every tick: take the live camera frame, downscale it, JPEG-encode it,
//! append it to the ring buffer and forward it to the coaching channel.

use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ImageError, RgbImage};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use super::{CameraSource, FrameRingBuffer};
use crate::coaching::{OutboundLink, OutboundMessage};
use crate::metrics::{Counter, SessionMetrics};
use crate::session::SessionGate;

pub const JPEG_MIME: &str = "image/jpeg";

/// Downscale so the longer side is at most `max_dimension`, then encode.
pub fn encode_frame(frame: &RgbImage, max_dimension: u32, quality: u8) -> Result<Vec<u8>, ImageError> {
    let (width, height) = frame.dimensions();
    let longest = width.max(height);

    let mut encoded = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut encoded, quality.clamp(1, 100));

    if max_dimension > 0 && longest > max_dimension {
        let scale = max_dimension as f64 / longest as f64;
        let new_width = ((width as f64 * scale).round() as u32).max(1);
        let new_height = ((height as f64 * scale).round() as u32).max(1);
        let resized = image::imageops::resize(frame, new_width, new_height, FilterType::Triangle);
        encoder.encode_image(&resized)?;
    } else {
        encoder.encode_image(frame)?;
    }

    Ok(encoded)
}

pub struct FrameSampler {
    camera: Arc<dyn CameraSource>,
    buffer: Arc<Mutex<FrameRingBuffer>>,
    link: OutboundLink,
    metrics: Arc<SessionMetrics>,
    max_dimension: u32,
    jpeg_quality: u8,
}

impl FrameSampler {
    pub fn new(
        camera: Arc<dyn CameraSource>,
        buffer: Arc<Mutex<FrameRingBuffer>>,
        link: OutboundLink,
        metrics: Arc<SessionMetrics>,
        max_dimension: u32,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            camera,
            buffer,
            link,
            metrics,
            max_dimension,
            jpeg_quality,
        }
    }

    /// Capture one frame. Returns the buffer sequence number, or `None` if
    /// no frame was captured.
    pub fn tick(&self) -> Option<u64> {
        let Some(frame) = self.camera.current_frame() else {
            log::debug!("FrameSampler: no frame available");
            return None;
        };

        let encoded = match encode_frame(&frame, self.max_dimension, self.jpeg_quality) {
            Ok(encoded) => encoded,
            Err(e) => {
                log::warn!("FrameSampler: failed to encode frame: {}", e);
                self.metrics.record_error("frame_encode", e.to_string());
                return None;
            }
        };

        let sequence = self
            .buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(encoded.clone(), JPEG_MIME, Utc::now());
        self.metrics.incr(Counter::FramesCaptured);

        self.link.forward(OutboundMessage::Frame {
            data: encoded,
            mime_type: JPEG_MIME.to_string(),
        });

        Some(sequence)
    }

    /// Tick on `interval` until the gate closes. The first tick is immediate.
    pub async fn run(self, interval: Duration, gate: Arc<SessionGate>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!("FrameSampler: sampling every {:?}", interval);

        loop {
            tokio::select! {
                _ = gate.cancelled() => break,
                _ = ticker.tick() => {
                    if !gate.is_open() {
                        break;
                    }
                    self.tick();
                }
            }
        }

        log::info!("FrameSampler: stopped");
    }
}
