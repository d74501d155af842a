//! Spoken cue delivery
//!
//! Cues from the coaching channel are synthesized by a streaming TTS provider
//! and handed to the playback scheduler. When synthesis fails the cue's
//! bundled inline audio is played instead.

mod decode;
mod dispatcher;
mod http_provider;

pub use decode::{decode, AudioChunk, AudioDecodeError, DecodedAudio, Provenance};
pub use dispatcher::{CueDispatcher, TtsProviderState};
pub use http_provider::{get_api_key, HttpSpeechProvider};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

/// Errors from a TTS provider
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TtsError {
    #[error("TTS API key not configured. Set OPENAI_API_KEY environment variable.")]
    MissingCredential,
    #[error("Nothing to synthesize")]
    EmptyInput,
    #[error("TTS network error: {0}")]
    Transport(String),
    #[error("TTS response was malformed: {0}")]
    MalformedResponse(String),
    #[error("TTS provider error ({}): {message}", status.map(|s| s.to_string()).unwrap_or_else(|| "no status".to_string()))]
    Provider { status: Option<u16>, message: String },
}

/// Failure class used for user notification and dedupe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtsErrorKind {
    MissingCredential,
    EmptyInput,
    TransportFailure,
    MalformedResponse,
    ProviderError,
}

impl TtsError {
    pub fn kind(&self) -> TtsErrorKind {
        match self {
            TtsError::MissingCredential => TtsErrorKind::MissingCredential,
            TtsError::EmptyInput => TtsErrorKind::EmptyInput,
            TtsError::Transport(_) => TtsErrorKind::TransportFailure,
            TtsError::MalformedResponse(_) => TtsErrorKind::MalformedResponse,
            TtsError::Provider { .. } => TtsErrorKind::ProviderError,
        }
    }
}

impl TtsErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TtsErrorKind::MissingCredential => "missing_credential",
            TtsErrorKind::EmptyInput => "empty_input",
            TtsErrorKind::TransportFailure => "transport_failure",
            TtsErrorKind::MalformedResponse => "malformed_response",
            TtsErrorKind::ProviderError => "provider_error",
        }
    }

    /// Text shown to the user the first time this class occurs in a session
    pub fn notice(&self) -> &'static str {
        match self {
            TtsErrorKind::MissingCredential => {
                "Voice synthesis is not configured; using the coach's built-in audio"
            }
            TtsErrorKind::EmptyInput => "A coaching cue had no text to speak",
            TtsErrorKind::TransportFailure => {
                "Voice synthesis is unreachable; using the coach's built-in audio"
            }
            TtsErrorKind::MalformedResponse => {
                "Voice synthesis returned unusable audio; using the coach's built-in audio"
            }
            TtsErrorKind::ProviderError => {
                "Voice synthesis reported an error; using the coach's built-in audio"
            }
        }
    }
}

/// Streaming text-to-speech.
///
/// `synthesize` resolves once the provider has accepted the request; the
/// returned stream yields raw audio chunks in `audio_mime()` format.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn audio_mime(&self) -> String;

    async fn synthesize(
        &self,
        text: &str,
    ) -> Result<BoxStream<'static, Result<Vec<u8>, TtsError>>, TtsError>;
}
