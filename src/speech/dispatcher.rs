//! Cue dispatch: dedupe, synthesis, fallback, interruption
//!
//! Inbound channel events are handled one at a time. Each admitted cue
//! starts a synthesis future; results are delivered to the scheduler strictly
//! in the order the cues arrived, regardless of which synthesis finishes
//! first. An interruption drops any synthesis still in flight, flushes the
//! scheduler and clears the dedupe state.

use futures_util::future::BoxFuture;
use futures_util::stream::FuturesOrdered;
use futures_util::StreamExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::{decode, AudioChunk, DecodedAudio, SpeechSynthesizer, TtsError, TtsErrorKind};
use crate::coaching::{ChannelEvent, CueEvent};
use crate::metrics::{Counter, SessionMetrics};
use crate::playback::AudioPlaybackScheduler;
use crate::session::{SessionGate, SessionUpdate};

/// Which TTS failure classes the user has already been told about
#[derive(Debug, Default)]
pub struct TtsProviderState {
    notified: HashSet<TtsErrorKind>,
}

impl TtsProviderState {
    /// Returns true the first time `kind` is seen this session.
    pub fn should_notify(&mut self, kind: TtsErrorKind) -> bool {
        self.notified.insert(kind)
    }

    pub fn missing_credential_notified(&self) -> bool {
        self.notified.contains(&TtsErrorKind::MissingCredential)
    }
}

struct SynthesisOutcome {
    cue: CueEvent,
    result: Result<DecodedAudio, TtsError>,
}

type PendingSynthesis = FuturesOrdered<BoxFuture<'static, SynthesisOutcome>>;

/// How often completed playback handles are dropped from the scheduler
const REAP_INTERVAL: Duration = Duration::from_millis(250);

/// Collect the provider's stream into one decoded buffer.
async fn synthesize_cue(synthesizer: Arc<dyn SpeechSynthesizer>, cue: CueEvent) -> SynthesisOutcome {
    let result = async {
        let mut stream = synthesizer.synthesize(&cue.text).await?;
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            bytes.extend(chunk?);
        }
        if bytes.is_empty() {
            return Err(TtsError::MalformedResponse("empty audio stream".to_string()));
        }
        decode(&AudioChunk::primary(bytes, synthesizer.audio_mime()))
            .map_err(|e| TtsError::MalformedResponse(e.to_string()))
    }
    .await;

    SynthesisOutcome { cue, result }
}

pub struct CueDispatcher {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    scheduler: Arc<Mutex<AudioPlaybackScheduler>>,
    gate: Arc<SessionGate>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    metrics: Arc<SessionMetrics>,
    last_dispatched_cue: Option<String>,
    tts_state: TtsProviderState,
    channel_error_notified: bool,
}

impl CueDispatcher {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        scheduler: Arc<Mutex<AudioPlaybackScheduler>>,
        gate: Arc<SessionGate>,
        updates: mpsc::UnboundedSender<SessionUpdate>,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            synthesizer,
            scheduler,
            gate,
            updates,
            metrics,
            last_dispatched_cue: None,
            tts_state: TtsProviderState::default(),
            channel_error_notified: false,
        }
    }

    /// Process inbound events until the session closes or the channel's
    /// event stream ends and all pending synthesis has been delivered.
    pub async fn run(mut self, mut events: mpsc::Receiver<ChannelEvent>) {
        let gate = self.gate.clone();
        let mut pending = PendingSynthesis::new();
        let mut inbound_open = true;
        let mut reaper = tokio::time::interval(REAP_INTERVAL);
        reaper.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if !inbound_open && pending.is_empty() {
                break;
            }

            // Biased: a freshly admitted cue's synthesis is polled (and so
            // started) before the next inbound event is taken.
            tokio::select! {
                biased;
                _ = gate.cancelled() => break,
                Some(outcome) = pending.next(), if !pending.is_empty() => {
                    self.deliver(outcome);
                }
                event = events.recv(), if inbound_open => match event {
                    Some(event) => self.handle_event(event, &mut pending),
                    None => {
                        log::debug!("CueDispatcher: inbound stream ended");
                        inbound_open = false;
                    }
                },
                _ = reaper.tick() => {
                    self.scheduler
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .reap_finished();
                }
            }
        }

        if !pending.is_empty() {
            log::debug!("CueDispatcher: dropping {} pending syntheses", pending.len());
        }
        log::info!("CueDispatcher: stopped");
    }

    fn handle_event(&mut self, event: ChannelEvent, pending: &mut PendingSynthesis) {
        match event {
            ChannelEvent::Cue(cue) => {
                self.metrics.incr(Counter::CuesReceived);
                if self.admit(&cue) {
                    self.emit(SessionUpdate::CueText(cue.text.clone()));
                    pending.push_back(Box::pin(synthesize_cue(self.synthesizer.clone(), cue)));
                }
            }
            ChannelEvent::Interrupted => {
                if !pending.is_empty() {
                    log::info!("CueDispatcher: interrupted, cancelling {} syntheses", pending.len());
                }
                *pending = PendingSynthesis::new();
                self.interrupt();
            }
            ChannelEvent::Error(e) => {
                log::warn!("CueDispatcher: channel error: {}", e);
                self.metrics.record_error("channel", e.to_string());
                if !self.channel_error_notified {
                    self.channel_error_notified = true;
                    self.emit(SessionUpdate::Notice(format!("Coaching service error: {}", e)));
                }
            }
            ChannelEvent::Closed { reason } => {
                log::info!(
                    "CueDispatcher: channel closed ({})",
                    reason.as_deref().unwrap_or("no reason")
                );
                self.emit(SessionUpdate::Status("Coach disconnected".to_string()));
            }
        }
    }

    /// Dedupe check. Records the cue as dispatched before synthesis starts.
    pub fn admit(&mut self, cue: &CueEvent) -> bool {
        let text = cue.text.trim();
        if text.is_empty() {
            return false;
        }
        if self.last_dispatched_cue.as_deref() == Some(text) {
            log::debug!("CueDispatcher: suppressing repeated cue {:?}", text);
            self.metrics.incr(Counter::CuesSuppressed);
            return false;
        }

        self.last_dispatched_cue = Some(text.to_string());
        self.metrics.incr(Counter::CuesDispatched);
        true
    }

    /// Flush playback and forget the last cue.
    pub fn interrupt(&mut self) {
        self.scheduler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .flush();
        self.last_dispatched_cue = None;
    }

    fn deliver(&mut self, outcome: SynthesisOutcome) {
        if !self.gate.is_open() {
            return;
        }

        let error = match outcome.result {
            Ok(audio) => {
                self.schedule(&audio);
                return;
            }
            Err(e) => e,
        };

        let kind = error.kind();
        log::warn!("CueDispatcher: synthesis failed ({}): {}", kind.as_str(), error);
        self.metrics.incr(Counter::SynthesisFailures);
        self.metrics.record_error(kind.as_str(), error.to_string());

        if self.tts_state.should_notify(kind) {
            self.emit(SessionUpdate::Notice(kind.notice().to_string()));
        }

        let Some(chunk) = outcome.cue.fallback_audio else {
            log::info!("CueDispatcher: no fallback audio for {:?}", outcome.cue.text);
            self.emit(SessionUpdate::Status("Cue audio unavailable".to_string()));
            return;
        };

        match decode(&chunk) {
            Ok(audio) => {
                if self.schedule(&audio) {
                    self.metrics.incr(Counter::FallbacksPlayed);
                }
            }
            Err(e) => {
                log::warn!("CueDispatcher: skipping undecodable fallback audio: {}", e);
                self.metrics.incr(Counter::DecodeFailures);
                self.metrics.record_error("audio_decode", e.to_string());
            }
        }
    }

    fn schedule(&self, audio: &DecodedAudio) -> bool {
        let mut scheduler = self.scheduler.lock().unwrap_or_else(|e| e.into_inner());
        match scheduler.enqueue(audio) {
            Ok(handle) => handle.is_some(),
            Err(e) => {
                log::warn!("CueDispatcher: playback failed: {}", e);
                self.metrics.record_error("playback", e.to_string());
                false
            }
        }
    }

    fn emit(&self, update: SessionUpdate) {
        if self.gate.is_open() {
            let _ = self.updates.send(update);
        }
    }

    pub fn last_dispatched_cue(&self) -> Option<&str> {
        self.last_dispatched_cue.as_deref()
    }
}
