//! Cue assembly for the inbound coaching stream
//!
//! The coaching service sends a cue as a series of `transcript` deltas and
//! optional inline `audio` parts, terminated by `turn_complete`. The assembler
//! accumulates one turn at a time and yields a `CueEvent` when it completes.
//!
//! - **Deltas**: Appended as they arrive
//! - **Audio**: Concatenated; kept as the cue's fallback speech
//! - **Interrupted**: Discards the partial turn

use super::CueEvent;
use crate::speech::AudioChunk;

#[derive(Debug, Clone, Default)]
pub struct CueAssembler {
    text: String,
    audio: Vec<u8>,
    audio_mime: Option<String>,
    delta_count: u64,
}

impl CueAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transcript fragment. Returns the text accumulated so far.
    pub fn process_delta(&mut self, delta: &str) -> &str {
        if !delta.is_empty() {
            self.text.push_str(delta);
            self.delta_count += 1;
        }
        &self.text
    }

    /// Append inline audio for the current turn.
    ///
    /// A part whose MIME type differs from the first one seen in the turn
    /// cannot be concatenated and is dropped.
    pub fn process_audio(&mut self, bytes: &[u8], mime_type: &str) {
        match self.audio_mime.as_deref() {
            None => {
                self.audio_mime = Some(mime_type.to_string());
                self.audio.extend_from_slice(bytes);
            }
            Some(existing) if existing == mime_type => self.audio.extend_from_slice(bytes),
            Some(existing) => {
                log::warn!(
                    "CueAssembler: dropping audio part with mime {} (turn uses {})",
                    mime_type,
                    existing
                );
            }
        }
    }

    /// Finish the current turn.
    ///
    /// Returns `None` when the turn carried no usable text; inline audio
    /// without text is discarded along with it.
    pub fn complete_turn(&mut self) -> Option<CueEvent> {
        let text = self.text.trim().to_string();
        let audio = std::mem::take(&mut self.audio);
        let mime = self.audio_mime.take();
        let deltas = self.delta_count;
        self.reset();

        if text.is_empty() {
            log::debug!("CueAssembler: turn completed without text, ignoring");
            return None;
        }

        log::info!(
            "CueAssembler: cue complete ({} chars from {} deltas, {} audio bytes)",
            text.len(),
            deltas,
            audio.len()
        );

        let cue = CueEvent::new(text);
        match mime {
            Some(mime) if !audio.is_empty() => {
                Some(cue.with_fallback(AudioChunk::fallback(audio, mime)))
            }
            _ => Some(cue),
        }
    }

    pub fn has_text(&self) -> bool {
        !self.text.is_empty()
    }

    pub fn current_text(&self) -> &str {
        &self.text
    }

    /// Discard any partial turn
    pub fn reset(&mut self) {
        self.text.clear();
        self.audio.clear();
        self.audio_mime = None;
        self.delta_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::Provenance;

    #[test]
    fn test_deltas_accumulate_into_cue() {
        let mut asm = CueAssembler::new();
        asm.process_delta("Brace ");
        asm.process_delta("");
        asm.process_delta("your core");
        assert_eq!(asm.current_text(), "Brace your core");

        let cue = asm.complete_turn().unwrap();
        assert_eq!(cue.text, "Brace your core");
        assert!(cue.fallback_audio.is_none());
        assert!(!asm.has_text());
    }

    #[test]
    fn test_blank_turn_yields_nothing() {
        let mut asm = CueAssembler::new();
        assert!(asm.complete_turn().is_none());

        asm.process_delta("   ");
        asm.process_audio(&[0, 0], "audio/pcm;rate=24000");
        assert!(asm.complete_turn().is_none());
    }

    #[test]
    fn test_inline_audio_becomes_fallback() {
        let mut asm = CueAssembler::new();
        asm.process_delta("Keep your knees out");
        asm.process_audio(&[1, 2], "audio/pcm;rate=24000");
        asm.process_audio(&[3, 4], "audio/pcm;rate=24000");

        let cue = asm.complete_turn().unwrap();
        let audio = cue.fallback_audio.unwrap();
        assert_eq!(audio.bytes, vec![1, 2, 3, 4]);
        assert_eq!(audio.mime_type, "audio/pcm;rate=24000");
        assert_eq!(audio.provenance, Provenance::Fallback);
    }

    #[test]
    fn test_mismatched_audio_part_dropped() {
        let mut asm = CueAssembler::new();
        asm.process_delta("Slow down");
        asm.process_audio(&[1, 2], "audio/pcm;rate=24000");
        asm.process_audio(&[9, 9, 9], "audio/wav");

        let cue = asm.complete_turn().unwrap();
        assert_eq!(cue.fallback_audio.unwrap().bytes, vec![1, 2]);
    }

    #[test]
    fn test_reset_discards_partial_turn() {
        let mut asm = CueAssembler::new();
        asm.process_delta("Go dee");
        asm.process_audio(&[1, 2], "audio/pcm;rate=24000");
        asm.reset();

        asm.process_delta("Stand tall");
        let cue = asm.complete_turn().unwrap();
        assert_eq!(cue.text, "Stand tall");
        assert!(cue.fallback_audio.is_none());
    }
}
