//! Decoding of synthesized and inline cue audio
//!
//! Supported payloads:
//! - `audio/pcm;rate=N` - raw PCM16 little-endian mono (rate defaults to 24000)
//! - `audio/wav` / `audio/x-wav` - RIFF WAV, 16-bit integer or 32-bit float

use std::io::Cursor;
use thiserror::Error;

use crate::capture::{downmix_to_mono, i16_to_f32};

/// Rate assumed when a PCM mime type carries no `rate` parameter
pub const DEFAULT_PCM_RATE: u32 = 24000;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum AudioDecodeError {
    #[error("audio payload is empty")]
    Empty,
    #[error("PCM16 payload has odd length {0}")]
    OddLength(usize),
    #[error("unsupported audio type: {0}")]
    UnsupportedMime(String),
    #[error("invalid WAV data: {0}")]
    Wav(String),
    #[error("audio sample rate must be non-zero")]
    ZeroRate,
}

/// Where a chunk of cue audio came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Synthesized by the TTS provider
    Primary,
    /// Bundled with the cue by the coaching service
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub provenance: Provenance,
}

impl AudioChunk {
    pub fn primary(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            provenance: Provenance::Primary,
        }
    }

    pub fn fallback(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            provenance: Provenance::Fallback,
        }
    }
}

/// Mono float samples ready for scheduling
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Playback length in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

pub fn decode(chunk: &AudioChunk) -> Result<DecodedAudio, AudioDecodeError> {
    if chunk.bytes.is_empty() {
        return Err(AudioDecodeError::Empty);
    }

    let mime = chunk.mime_type.trim().to_ascii_lowercase();
    let mut parts = mime.split(';').map(str::trim);
    let essence = parts.next().unwrap_or_default();

    match essence {
        "audio/pcm" | "audio/l16" => {
            let rate = parts
                .filter_map(|p| p.strip_prefix("rate="))
                .find_map(|r| r.parse::<u32>().ok())
                .unwrap_or(DEFAULT_PCM_RATE);
            decode_pcm16(&chunk.bytes, rate)
        }
        "audio/wav" | "audio/x-wav" | "audio/wave" => decode_wav(&chunk.bytes),
        _ => Err(AudioDecodeError::UnsupportedMime(chunk.mime_type.clone())),
    }
}

fn decode_pcm16(bytes: &[u8], sample_rate: u32) -> Result<DecodedAudio, AudioDecodeError> {
    if sample_rate == 0 {
        return Err(AudioDecodeError::ZeroRate);
    }
    if bytes.len() % 2 != 0 {
        return Err(AudioDecodeError::OddLength(bytes.len()));
    }
    let samples = bytes
        .chunks_exact(2)
        .map(|b| i16_to_f32(i16::from_le_bytes([b[0], b[1]])))
        .collect();
    Ok(DecodedAudio::new(samples, sample_rate))
}

fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio, AudioDecodeError> {
    let reader =
        hound::WavReader::new(Cursor::new(bytes)).map_err(|e| AudioDecodeError::Wav(e.to_string()))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(AudioDecodeError::ZeroRate);
    }

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .into_samples::<i16>()
            .map(|s| s.map(i16_to_f32))
            .collect::<Result<_, _>>()
            .map_err(|e| AudioDecodeError::Wav(e.to_string()))?,
        (hound::SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| AudioDecodeError::Wav(e.to_string()))?,
        (format, bits) => {
            return Err(AudioDecodeError::Wav(format!(
                "unsupported sample format {:?}/{} bits",
                format, bits
            )))
        }
    };

    if interleaved.is_empty() {
        return Err(AudioDecodeError::Empty);
    }

    Ok(DecodedAudio::new(
        downmix_to_mono(&interleaved, spec.channels as usize),
        spec.sample_rate,
    ))
}
