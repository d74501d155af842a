//! Gapless sequential scheduling on the output clock
//!
//! Each buffer starts where the previous one ends, or immediately if the
//! timeline has drained:
//!
//! ```text
//! start = max(next_start, now)
//! next_start = start + duration
//! ```
//!
//! `flush()` stops everything and resets `next_start`, deliberately breaking
//! continuity with whatever was queued before.

use std::sync::Arc;

use super::{AudioOutput, PlaybackError, VoiceId};
use crate::metrics::{Counter, SessionMetrics};
use crate::session::SessionGate;
use crate::speech::DecodedAudio;

/// A buffer placed on the timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackHandle {
    pub voice: VoiceId,
    /// Seconds
    pub buffer_duration: f64,
    /// Output clock time at which playback begins
    pub scheduled_start: f64,
}

impl PlaybackHandle {
    pub fn scheduled_end(&self) -> f64 {
        self.scheduled_start + self.buffer_duration
    }
}

/// Owns the output timeline. Only the cue dispatcher (and teardown) touch it.
///
/// Finished handles are reaped on every `enqueue` and whenever the owner
/// calls `reap_finished()`; the cue dispatcher does so on a short period.
pub struct AudioPlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    gate: Arc<SessionGate>,
    metrics: Arc<SessionMetrics>,
    next_start: f64,
    active: Vec<PlaybackHandle>,
}

impl AudioPlaybackScheduler {
    pub fn new(
        output: Arc<dyn AudioOutput>,
        gate: Arc<SessionGate>,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            output,
            gate,
            metrics,
            next_start: 0.0,
            active: Vec::new(),
        }
    }

    /// Schedule a buffer after everything already queued.
    ///
    /// Returns `Ok(None)` without touching the output once the session gate
    /// is closed.
    pub fn enqueue(&mut self, audio: &DecodedAudio) -> Result<Option<PlaybackHandle>, PlaybackError> {
        if !self.gate.is_open() {
            log::debug!("AudioPlaybackScheduler: session closed, dropping buffer");
            return Ok(None);
        }

        let now = self.output.now();
        self.reap_finished_at(now);

        let start = self.next_start.max(now);
        let duration = audio.duration_secs();
        let voice = self.output.start_at(audio, start)?;

        let handle = PlaybackHandle {
            voice,
            buffer_duration: duration,
            scheduled_start: start,
        };
        self.next_start = start + duration;
        self.active.push(handle);
        self.metrics.incr(Counter::BuffersScheduled);

        log::debug!(
            "AudioPlaybackScheduler: voice {} at {:.3}s for {:.3}s ({} active)",
            voice,
            start,
            duration,
            self.active.len()
        );

        Ok(Some(handle))
    }

    /// Stop every active buffer and reset the timeline.
    pub fn flush(&mut self) {
        let stopped = self.active.len();
        for handle in self.active.drain(..) {
            self.output.stop(handle.voice);
        }
        self.next_start = 0.0;
        self.metrics.incr(Counter::Flushes);

        if stopped > 0 {
            log::info!("AudioPlaybackScheduler: flushed {} buffers", stopped);
        }
    }

    /// Drop handles whose playback has completed.
    pub fn reap_finished(&mut self) {
        let now = self.output.now();
        self.reap_finished_at(now);
    }

    fn reap_finished_at(&mut self, now: f64) {
        self.active.retain(|h| h.scheduled_end() > now);
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    pub fn active(&self) -> &[PlaybackHandle] {
        &self.active
    }
}
