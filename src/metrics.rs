//! Metrics collection for a coaching session
//!
//! Counters are bumped from every worker (frame timer, audio callback,
//! render loop, cue dispatcher), so they are plain atomics. Errors keep a
//! short newest-first history for diagnostics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Maximum number of errors to retain in history
const MAX_ERROR_HISTORY: usize = 20;

/// Record of a non-fatal error observed during a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    /// Category of error (e.g., "channel", "tts", "decode", "vision")
    pub error_type: String,
    pub message: String,
}

/// Point-in-time copy of the session counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub frames_captured: u64,
    pub frames_sent: u64,
    pub audio_blocks_sent: u64,
    pub outbound_dropped: u64,
    pub cues_received: u64,
    pub cues_dispatched: u64,
    pub cues_suppressed: u64,
    pub synthesis_failures: u64,
    pub fallbacks_played: u64,
    pub buffers_scheduled: u64,
    pub flushes: u64,
    pub estimation_failures: u64,
    pub decode_failures: u64,
    pub last_error: Option<ErrorRecord>,
}

/// Which counter to bump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    FramesCaptured,
    FramesSent,
    AudioBlocksSent,
    OutboundDropped,
    CuesReceived,
    CuesDispatched,
    CuesSuppressed,
    SynthesisFailures,
    FallbacksPlayed,
    BuffersScheduled,
    Flushes,
    EstimationFailures,
    DecodeFailures,
}

#[derive(Debug, Default)]
pub struct SessionMetrics {
    frames_captured: AtomicU64,
    frames_sent: AtomicU64,
    audio_blocks_sent: AtomicU64,
    outbound_dropped: AtomicU64,
    cues_received: AtomicU64,
    cues_dispatched: AtomicU64,
    cues_suppressed: AtomicU64,
    synthesis_failures: AtomicU64,
    fallbacks_played: AtomicU64,
    buffers_scheduled: AtomicU64,
    flushes: AtomicU64,
    estimation_failures: AtomicU64,
    decode_failures: AtomicU64,
    errors: Mutex<VecDeque<ErrorRecord>>,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::FramesCaptured => &self.frames_captured,
            Counter::FramesSent => &self.frames_sent,
            Counter::AudioBlocksSent => &self.audio_blocks_sent,
            Counter::OutboundDropped => &self.outbound_dropped,
            Counter::CuesReceived => &self.cues_received,
            Counter::CuesDispatched => &self.cues_dispatched,
            Counter::CuesSuppressed => &self.cues_suppressed,
            Counter::SynthesisFailures => &self.synthesis_failures,
            Counter::FallbacksPlayed => &self.fallbacks_played,
            Counter::BuffersScheduled => &self.buffers_scheduled,
            Counter::Flushes => &self.flushes,
            Counter::EstimationFailures => &self.estimation_failures,
            Counter::DecodeFailures => &self.decode_failures,
        }
    }

    pub fn incr(&self, counter: Counter) {
        self.counter(counter).fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counter(counter).load(Ordering::Relaxed)
    }

    /// Record a non-fatal error (newest first, bounded)
    pub fn record_error(&self, error_type: &str, message: impl Into<String>) {
        let record = ErrorRecord {
            timestamp: Utc::now(),
            error_type: error_type.to_string(),
            message: message.into(),
        };

        log::debug!("Metrics: recording error - {:?}", record);

        let mut errors = self.errors.lock().unwrap_or_else(|e| e.into_inner());
        errors.push_front(record);
        while errors.len() > MAX_ERROR_HISTORY {
            errors.pop_back();
        }
    }

    /// Get the error history (newest first)
    pub fn errors(&self) -> Vec<ErrorRecord> {
        let errors = self.errors.lock().unwrap_or_else(|e| e.into_inner());
        errors.iter().cloned().collect()
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            frames_captured: self.get(Counter::FramesCaptured),
            frames_sent: self.get(Counter::FramesSent),
            audio_blocks_sent: self.get(Counter::AudioBlocksSent),
            outbound_dropped: self.get(Counter::OutboundDropped),
            cues_received: self.get(Counter::CuesReceived),
            cues_dispatched: self.get(Counter::CuesDispatched),
            cues_suppressed: self.get(Counter::CuesSuppressed),
            synthesis_failures: self.get(Counter::SynthesisFailures),
            fallbacks_played: self.get(Counter::FallbacksPlayed),
            buffers_scheduled: self.get(Counter::BuffersScheduled),
            flushes: self.get(Counter::Flushes),
            estimation_failures: self.get(Counter::EstimationFailures),
            decode_failures: self.get(Counter::DecodeFailures),
            last_error: self
                .errors
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .front()
                .cloned(),
        }
    }
}
