//! Gate-checked outbound path shared by the frame sampler and audio streamer

use std::sync::Arc;

use super::{ChannelError, CoachingChannel, OutboundMessage};
use crate::metrics::{Counter, SessionMetrics};
use crate::session::SessionGate;

/// Forwards capture output to the channel while the session is open.
///
/// Cloned into each capture worker. The gate is checked immediately before
/// every send, so once teardown has closed the gate nothing further leaves
/// the process even if a timer tick or audio callback is already running.
#[derive(Clone)]
pub struct OutboundLink {
    gate: Arc<SessionGate>,
    channel: Option<Arc<dyn CoachingChannel>>,
    metrics: Arc<SessionMetrics>,
}

impl OutboundLink {
    pub fn new(
        gate: Arc<SessionGate>,
        channel: Option<Arc<dyn CoachingChannel>>,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            gate,
            channel,
            metrics,
        }
    }

    pub fn is_open(&self) -> bool {
        self.gate.is_open()
    }

    /// Returns true if the message was handed to the channel.
    pub fn forward(&self, message: OutboundMessage) -> bool {
        if !self.gate.is_open() {
            return false;
        }
        let Some(channel) = self.channel.as_ref() else {
            return false;
        };

        let counter = match message {
            OutboundMessage::Frame { .. } => Counter::FramesSent,
            OutboundMessage::AudioBlock { .. } => Counter::AudioBlocksSent,
        };

        match channel.send(message) {
            Ok(()) => {
                self.metrics.incr(counter);
                true
            }
            Err(ChannelError::Backpressure) => {
                log::debug!("OutboundLink: queue full, dropping message");
                self.metrics.incr(Counter::OutboundDropped);
                false
            }
            Err(e) => {
                log::debug!("OutboundLink: send failed: {}", e);
                self.metrics.incr(Counter::OutboundDropped);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<OutboundMessage>>,
        full: bool,
    }

    impl CoachingChannel for RecordingChannel {
        fn send(&self, message: OutboundMessage) -> Result<(), ChannelError> {
            if self.full {
                return Err(ChannelError::Backpressure);
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        fn close(&self) {}
    }

    fn frame() -> OutboundMessage {
        OutboundMessage::Frame {
            data: vec![1, 2, 3],
            mime_type: "image/jpeg".to_string(),
        }
    }

    #[test]
    fn forwards_while_open() {
        let channel = Arc::new(RecordingChannel::default());
        let metrics = Arc::new(SessionMetrics::new());
        let link = OutboundLink::new(SessionGate::new(), Some(channel.clone()), metrics.clone());

        assert!(link.forward(frame()));
        assert_eq!(channel.sent.lock().unwrap().len(), 1);
        assert_eq!(metrics.get(Counter::FramesSent), 1);
    }

    #[test]
    fn drops_everything_after_gate_closes() {
        let channel = Arc::new(RecordingChannel::default());
        let gate = SessionGate::new();
        let link = OutboundLink::new(
            gate.clone(),
            Some(channel.clone()),
            Arc::new(SessionMetrics::new()),
        );

        gate.close();
        assert!(!link.forward(frame()));
        assert!(!link.forward(OutboundMessage::AudioBlock {
            pcm: vec![0; 4],
            sample_rate: 16000
        }));
        assert!(channel.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn offline_link_sends_nothing() {
        let link = OutboundLink::new(SessionGate::new(), None, Arc::new(SessionMetrics::new()));
        assert!(!link.forward(frame()));
    }

    #[test]
    fn backpressure_counts_drop() {
        let channel = Arc::new(RecordingChannel {
            full: true,
            ..Default::default()
        });
        let metrics = Arc::new(SessionMetrics::new());
        let link = OutboundLink::new(SessionGate::new(), Some(channel), metrics.clone());

        assert!(!link.forward(frame()));
        assert_eq!(metrics.get(Counter::OutboundDropped), 1);
    }
}
