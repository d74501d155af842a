//! Microphone blocks to transport PCM
//!
//! Runs inside the microphone callback, so it never awaits and never blocks:
//! conversion is synchronous and the outbound send is a `try_send`.

use super::{f32_to_i16, resample, BlockCallback};
use crate::coaching::{OutboundLink, OutboundMessage};

pub struct AudioInputStreamer {
    link: OutboundLink,
    source_rate: u32,
    target_rate: u32,
    blocks_seen: u64,
}

impl AudioInputStreamer {
    pub fn new(link: OutboundLink, source_rate: u32, target_rate: u32) -> Self {
        log::info!(
            "AudioInputStreamer: {}Hz → {}Hz PCM16",
            source_rate,
            target_rate
        );
        Self {
            link,
            source_rate,
            target_rate,
            blocks_seen: 0,
        }
    }

    /// Convert one block and send it. Returns true if it was sent.
    pub fn on_block(&mut self, block: &[f32]) -> bool {
        // Teardown may start between two callbacks
        if !self.link.is_open() || block.is_empty() {
            return false;
        }

        self.blocks_seen += 1;
        if self.blocks_seen % 100 == 0 {
            log::debug!("AudioInputStreamer: {} blocks", self.blocks_seen);
        }

        let pcm: Vec<i16> = block.iter().map(|&s| f32_to_i16(s)).collect();
        let pcm = resample(&pcm, self.source_rate, self.target_rate);

        self.link.forward(OutboundMessage::AudioBlock {
            pcm,
            sample_rate: self.target_rate,
        })
    }

    pub fn into_callback(mut self) -> BlockCallback {
        Box::new(move |block: &[f32]| {
            self.on_block(block);
        })
    }
}
