//! Coaching service protocol types
//!
//! JSON messages exchanged over the coaching websocket. Every message carries
//! a `type` tag; binary payloads (frames, PCM, inline speech) are base64.
//!
//! # Protocol Overview
//!
//! 1. Connect to the coaching endpoint
//! 2. Send `setup` with the exercise label and input audio format
//! 3. Receive `setup_complete`
//! 4. Stream `frame` and `audio` messages
//! 5. Receive `transcript` deltas and inline `audio`, closed by `turn_complete`
//! 6. `interrupted` tells the client to drop any queued speech

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use super::OutboundMessage;
use crate::capture::pcm16_le_bytes;

/// Input audio format advertised in `setup`
pub const INPUT_AUDIO_FORMAT: &str = "pcm16";

/// Error information from the service
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInfo {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

// ============================================================================
// Client Messages (sent TO the coaching service)
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open the session for an exercise
    Setup {
        exercise: String,
        input_audio_format: String,
        input_sample_rate: u32,
    },

    /// A sampled video frame
    Frame {
        mime_type: String,
        /// Base64-encoded image
        data: String,
    },

    /// A block of microphone audio
    Audio {
        mime_type: String,
        /// Base64-encoded PCM16 little-endian
        data: String,
    },
}

impl ClientMessage {
    pub fn setup(exercise: &str, input_sample_rate: u32) -> Self {
        Self::Setup {
            exercise: exercise.to_string(),
            input_audio_format: INPUT_AUDIO_FORMAT.to_string(),
            input_sample_rate,
        }
    }

    pub fn frame(data: &[u8], mime_type: &str) -> Self {
        Self::Frame {
            mime_type: mime_type.to_string(),
            data: STANDARD.encode(data),
        }
    }

    pub fn audio(samples: &[i16], sample_rate: u32) -> Self {
        Self::Audio {
            mime_type: format!("audio/pcm;rate={}", sample_rate),
            data: STANDARD.encode(pcm16_le_bytes(samples)),
        }
    }
}

impl From<OutboundMessage> for ClientMessage {
    fn from(message: OutboundMessage) -> Self {
        match message {
            OutboundMessage::Frame { data, mime_type } => ClientMessage::frame(&data, &mime_type),
            OutboundMessage::AudioBlock { pcm, sample_rate } => {
                ClientMessage::audio(&pcm, sample_rate)
            }
        }
    }
}

// ============================================================================
// Server Messages (received FROM the coaching service)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Session accepted
    SetupComplete {
        #[serde(default)]
        session_id: Option<String>,
    },

    /// Incremental cue transcript text
    Transcript { delta: String },

    /// Inline speech audio for the current turn
    Audio { mime_type: String, data: String },

    /// The current cue is complete
    TurnComplete,

    /// Discard queued speech and cue state
    Interrupted,

    Error { error: ErrorInfo },

    /// Catch-all for message types we don't handle
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn is_error(&self) -> bool {
        matches!(self, ServerMessage::Error { .. })
    }

    /// Decode the payload of an `audio` message
    pub fn audio_bytes(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        match self {
            ServerMessage::Audio { data, .. } => Some(STANDARD.decode(data)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_serialization() {
        let msg = ClientMessage::setup("Squat", 16000);
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"type\":\"setup\""));
        assert!(json.contains("\"exercise\":\"Squat\""));
        assert!(json.contains("\"input_sample_rate\":16000"));
    }

    #[test]
    fn test_audio_encoding() {
        let msg = ClientMessage::audio(&[0x1234i16, 0x5678], 16000);

        if let ClientMessage::Audio { mime_type, data } = msg {
            assert_eq!(mime_type, "audio/pcm;rate=16000");
            // Little-endian: 0x1234 -> [0x34, 0x12], 0x5678 -> [0x78, 0x56]
            assert_eq!(STANDARD.decode(&data).unwrap(), vec![0x34, 0x12, 0x78, 0x56]);
        } else {
            panic!("Expected Audio");
        }
    }

    #[test]
    fn test_frame_from_outbound() {
        let msg: ClientMessage = OutboundMessage::Frame {
            data: vec![0xFF, 0xD8],
            mime_type: "image/jpeg".to_string(),
        }
        .into();
        let json = serde_json::to_string(&msg).unwrap();

        assert!(json.contains("\"type\":\"frame\""));
        assert!(json.contains("\"mime_type\":\"image/jpeg\""));
        assert!(json.contains(&format!("\"data\":\"{}\"", STANDARD.encode([0xFF, 0xD8]))));
    }

    #[test]
    fn test_transcript_deserialization() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"transcript","delta":"Brace your"}"#).unwrap();
        match msg {
            ServerMessage::Transcript { delta } => assert_eq!(delta, "Brace your"),
            _ => panic!("Expected Transcript"),
        }
    }

    #[test]
    fn test_unit_messages_deserialize() {
        let msg: ServerMessage = serde_json::from_str(r#"{"type":"interrupted"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Interrupted));

        let msg: ServerMessage = serde_json::from_str(r#"{"type":"turn_complete"}"#).unwrap();
        assert!(matches!(msg, ServerMessage::TurnComplete));
    }

    #[test]
    fn test_audio_message_decodes_payload() {
        let json = format!(
            r#"{{"type":"audio","mime_type":"audio/pcm;rate=24000","data":"{}"}}"#,
            STANDARD.encode([1u8, 2, 3, 4])
        );
        let msg: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg.audio_bytes().unwrap().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_error_deserialization() {
        let json = r#"{"type":"error","error":{"code":"unknown_exercise","message":"No such exercise"}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(msg.is_error());
        match msg {
            ServerMessage::Error { error } => {
                assert_eq!(error.message, "No such exercise");
                assert_eq!(error.code.as_deref(), Some("unknown_exercise"));
            }
            _ => panic!("Expected Error"),
        }
    }

    #[test]
    fn test_unknown_type() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"some.future.type","data":1}"#).unwrap();
        assert!(matches!(msg, ServerMessage::Unknown));
    }
}
