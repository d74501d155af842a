//! Duplex coaching channel
//!
//! The session streams sampled frames and microphone PCM to a remote coaching
//! service and receives spoken-cue transcripts, inline audio and interruption
//! signals back.
//!
//! # Architecture
//!
//! ```text
//! FrameSampler ──┐                         ┌──▶ ChannelEvent::Cue ──▶ CueDispatcher
//!                ├─▶ OutboundLink ─▶ WS ───┤
//! AudioInput ────┘   (gate check)          └──▶ ChannelEvent::Interrupted / Closed
//! ```
//!
//! Channel failures are never fatal: a session whose channel cannot be opened
//! still runs its local capture and render loops.

mod client;
mod cue_assembler;
mod outbound;
mod protocol;

pub use client::{get_channel_api_key, WsConnector};
pub use cue_assembler::CueAssembler;
pub use outbound::OutboundLink;
pub use protocol::{ClientMessage, ServerMessage};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::speech::AudioChunk;

/// Errors that can occur on the coaching channel
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChannelError {
    #[error("failed to connect to coaching service: {0}")]
    ConnectionFailed(String),
    #[error("coaching service rejected the session: {0}")]
    Rejected(String),
    #[error("coaching channel protocol error: {0}")]
    ProtocolError(String),
    #[error("coaching channel closed: {0}")]
    Disconnected(String),
    #[error("outbound queue full, message dropped")]
    Backpressure,
}

/// Outbound commands issued by the capture workers
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Frame { data: Vec<u8>, mime_type: String },
    AudioBlock { pcm: Vec<i16>, sample_rate: u32 },
}

/// A complete cue from the coaching service
#[derive(Debug, Clone, PartialEq)]
pub struct CueEvent {
    pub text: String,
    pub received_at: DateTime<Utc>,
    /// Inline audio bundled with this cue, used when synthesis fails
    pub fallback_audio: Option<AudioChunk>,
}

impl CueEvent {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            received_at: Utc::now(),
            fallback_audio: None,
        }
    }

    pub fn with_fallback(mut self, audio: AudioChunk) -> Self {
        self.fallback_audio = Some(audio);
        self
    }
}

/// Inbound events, processed sequentially by the cue dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Cue(CueEvent),
    /// Upstream asked for all queued speech to be discarded
    Interrupted,
    /// Non-fatal error reported by the service or the transport
    Error(ChannelError),
    Closed { reason: Option<String> },
}

/// Outbound half of an open channel. `send` must not block; `close` must be
/// idempotent.
pub trait CoachingChannel: Send + Sync {
    fn send(&self, message: OutboundMessage) -> Result<(), ChannelError>;
    fn close(&self);
}

/// An open channel plus its inbound event stream
pub struct ChannelConnection {
    pub channel: Arc<dyn CoachingChannel>,
    pub events: mpsc::Receiver<ChannelEvent>,
}

impl std::fmt::Debug for ChannelConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConnection").finish_non_exhaustive()
    }
}

/// Opens coaching channels. Injected into the session controller so tests can
/// substitute an in-memory channel.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, exercise_label: &str) -> Result<ChannelConnection, ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_error_display() {
        let err = ChannelError::ConnectionFailed("timeout".to_string());
        assert!(err.to_string().contains("timeout"));

        let err = ChannelError::Rejected("bad exercise".to_string());
        assert!(err.to_string().contains("bad exercise"));
    }

    #[test]
    fn test_cue_event_builder() {
        let cue = CueEvent::new("Go deeper")
            .with_fallback(AudioChunk::fallback(vec![0, 0], "audio/pcm;rate=24000"));
        assert_eq!(cue.text, "Go deeper");
        assert!(cue.fallback_audio.is_some());
    }
}
