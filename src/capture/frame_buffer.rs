//! Ring buffer for sampled video frames with bounded memory
//!
//! Holds the most recent encoded frames of a set in capture order. When the
//! buffer is full the oldest frame is evicted (sliding window), so at most
//! `FRAME_BUFFER_CAPACITY` frames are ever handed back at `finish()`.
//!
//! # Memory Budget
//!
//! At 640px JPEG quality 70 a frame is roughly 30-60 KB:
//! - 15 frames: ~0.5-1 MB

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Frames retained per session
pub const FRAME_BUFFER_CAPACITY: usize = 15;

/// An encoded frame captured during the set. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    /// Encoded image bytes (JPEG)
    pub encoded_image: Vec<u8>,
    /// MIME type of `encoded_image`
    pub mime_type: String,
    /// Wall-clock capture time
    pub captured_at: DateTime<Utc>,
    /// Capture sequence number (monotonically increasing per session)
    pub sequence: u64,
}

/// Sliding window of the most recent frames.
///
/// Thread-safety: This struct is NOT internally synchronized.
/// The frame sampler is the only writer; wrap in a mutex to share it with
/// the controller, which reads it once at `finish()`.
#[derive(Debug)]
pub struct FrameRingBuffer {
    frames: VecDeque<FrameRecord>,
    next_sequence: u64,
}

impl Default for FrameRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameRingBuffer {
    pub fn new() -> Self {
        Self {
            frames: VecDeque::with_capacity(FRAME_BUFFER_CAPACITY),
            next_sequence: 0,
        }
    }

    /// Append a frame, evicting the oldest one if at capacity.
    /// Returns the sequence number assigned to this frame.
    pub fn push(
        &mut self,
        encoded_image: Vec<u8>,
        mime_type: &str,
        captured_at: DateTime<Utc>,
    ) -> u64 {
        if self.frames.len() >= FRAME_BUFFER_CAPACITY {
            self.frames.pop_front();
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.frames.push_back(FrameRecord {
            encoded_image,
            mime_type: mime_type.to_string(),
            captured_at,
            sequence,
        });
        sequence
    }

    /// Drain all frames, oldest first. The buffer is empty afterwards.
    pub fn drain_all(&mut self) -> Vec<FrameRecord> {
        self.frames.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_n(buffer: &mut FrameRingBuffer, n: u8) {
        for i in 0..n {
            buffer.push(vec![i], "image/jpeg", Utc::now());
        }
    }

    #[test]
    fn test_push_and_len() {
        let mut buffer = FrameRingBuffer::new();
        assert!(buffer.is_empty());

        push_n(&mut buffer, 2);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_eviction_keeps_latest_fifteen_in_order() {
        let mut buffer = FrameRingBuffer::new();
        push_n(&mut buffer, 20);

        assert_eq!(buffer.len(), FRAME_BUFFER_CAPACITY);

        let frames = buffer.drain_all();
        // Frames 5..=19 (0-based) survive, i.e. captures 6-20.
        assert_eq!(frames[0].sequence, 5);
        assert_eq!(frames[14].sequence, 19);
        assert!(frames.windows(2).all(|w| w[0].sequence < w[1].sequence));
        assert!(frames
            .windows(2)
            .all(|w| w[0].captured_at <= w[1].captured_at));
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut buffer = FrameRingBuffer::new();
        for i in 0..100u8 {
            buffer.push(vec![i], "image/jpeg", Utc::now());
            assert!(buffer.len() <= FRAME_BUFFER_CAPACITY);
        }
    }

    #[test]
    fn test_drain_empties_buffer() {
        let mut buffer = FrameRingBuffer::new();
        push_n(&mut buffer, 3);

        let frames = buffer.drain_all();
        assert_eq!(frames.len(), 3);
        assert!(buffer.is_empty());
        assert_eq!(frames[0].encoded_image, vec![0]);
        assert_eq!(frames[2].encoded_image, vec![2]);

        // Sequence numbers keep counting after a drain
        assert_eq!(buffer.push(vec![3], "image/jpeg", Utc::now()), 3);
    }
}
