//! Session controller
//!
//! Drives the lifecycle reducer with a local effect queue, executes effects
//! against the injected collaborators, and owns every acquired resource.
//!
//! # Resource ownership
//!
//! Acquired handles live in `Resources` as `Option`s and are `take()`n on
//! release, so each one is released at most once no matter how many exit
//! paths race. Workers are spawned tasks that exit when the gate's token is
//! cancelled; teardown waits for them for a grace period, then aborts.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::state_machine::{reduce, Effect, Event, Phase};
use super::{SessionError, SessionGate, SessionUpdate};
use crate::capture::{
    AudioInputStreamer, CameraSource, FrameRecord, FrameRingBuffer, FrameSampler, MediaDevices,
    MicrophoneSource,
};
use crate::coaching::{ChannelConnector, ChannelEvent, CoachingChannel, OutboundLink};
use crate::metrics::SessionMetrics;
use crate::overlay::{GuideCanvas, PoseEstimator, PoseOverlayRenderer, VisionLoader};
use crate::playback::{AudioOutput, AudioPlaybackScheduler};
use crate::settings::CoachSettings;
use crate::speech::{CueDispatcher, SpeechSynthesizer};

/// Collaborators injected into a session
pub struct SessionDeps {
    pub devices: Arc<dyn MediaDevices>,
    pub vision: Arc<dyn VisionLoader>,
    pub channel: Arc<dyn ChannelConnector>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub canvas: Box<dyn GuideCanvas>,
}

#[derive(Default)]
struct Resources {
    camera: Option<Arc<dyn CameraSource>>,
    microphone: Option<Arc<dyn MicrophoneSource>>,
    output: Option<Arc<dyn AudioOutput>>,
    estimator: Option<Arc<dyn PoseEstimator>>,
    channel: Option<Arc<dyn CoachingChannel>>,
    inbound: Option<mpsc::Receiver<ChannelEvent>>,
    scheduler: Option<Arc<Mutex<AudioPlaybackScheduler>>>,
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// One coaching session. Single use: `start` once, then `finish` or `cancel`.
///
/// Methods take `&self` so a caller holding an `Arc` can cancel while
/// `start` is still acquiring devices.
pub struct SessionController {
    devices: Arc<dyn MediaDevices>,
    vision: Arc<dyn VisionLoader>,
    connector: Arc<dyn ChannelConnector>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    canvas: Mutex<Option<Box<dyn GuideCanvas>>>,
    settings: CoachSettings,
    gate: Arc<SessionGate>,
    metrics: Arc<SessionMetrics>,
    phase: Mutex<Phase>,
    resources: Mutex<Resources>,
    frames: Arc<Mutex<FrameRingBuffer>>,
    handoff: Mutex<Option<Vec<FrameRecord>>>,
    fatal: Mutex<Option<SessionError>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    updates_tx: mpsc::UnboundedSender<SessionUpdate>,
    updates_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionUpdate>>>,
}

impl SessionController {
    pub fn new(deps: SessionDeps, settings: CoachSettings) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            devices: deps.devices,
            vision: deps.vision,
            connector: deps.channel,
            synthesizer: deps.synthesizer,
            canvas: Mutex::new(Some(deps.canvas)),
            settings,
            gate: SessionGate::new(),
            metrics: Arc::new(SessionMetrics::new()),
            phase: Mutex::new(Phase::Idle),
            resources: Mutex::new(Resources::default()),
            frames: Arc::new(Mutex::new(FrameRingBuffer::new())),
            handoff: Mutex::new(None),
            fatal: Mutex::new(None),
            started_at: Mutex::new(None),
            updates_tx,
            updates_rx: Mutex::new(Some(updates_rx)),
        }
    }

    /// Status, cue text and notices. Can be taken once.
    pub fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<SessionUpdate>> {
        lock(&self.updates_rx).take()
    }

    pub fn phase(&self) -> Phase {
        lock(&self.phase).clone()
    }

    pub fn metrics(&self) -> Arc<SessionMetrics> {
        self.metrics.clone()
    }

    /// True while the session may still send and play
    pub fn is_active(&self) -> bool {
        self.gate.is_open() && matches!(*lock(&self.phase), Phase::Live { .. })
    }

    /// Acquire devices, load the pose model, open the channel and go live.
    ///
    /// Device and model failures are fatal and leave the session `Failed`;
    /// a channel failure is reported as a notice and the session goes live
    /// without a coach.
    pub async fn start(&self, exercise_label: &str) -> Result<(), SessionError> {
        let effects = {
            let mut phase = lock(&self.phase);
            if *phase != Phase::Idle {
                return Err(SessionError::AlreadyStarted);
            }
            let (next, effects) = reduce(
                &phase,
                Event::Start {
                    exercise: exercise_label.to_string(),
                },
            );
            log::info!("Session: {} → {} ({})", phase.name(), next.name(), exercise_label);
            *phase = next;
            effects
        };
        *lock(&self.started_at) = Some(Utc::now());

        self.run_effects(effects).await;

        match self.phase() {
            Phase::Live { .. } => Ok(()),
            Phase::Failed { message } => Err(lock(&self.fatal)
                .take()
                .unwrap_or(SessionError::Device(
                    crate::capture::DeviceAccessError::Stream(message),
                ))),
            _ => Err(SessionError::Cancelled),
        }
    }

    /// Tear down and return the captured frames, oldest first.
    ///
    /// Returns an empty list if the session was never live, already failed,
    /// or was already finished or cancelled.
    pub async fn finish(&self) -> Vec<FrameRecord> {
        let effects = self.apply(Event::Finish);
        self.run_effects(effects).await;
        lock(&self.handoff).take().unwrap_or_default()
    }

    /// Tear down and discard everything. No `Finished` update is sent.
    pub async fn cancel(&self) {
        let effects = self.apply(Event::Cancel);
        self.run_effects(effects).await;
    }

    fn apply(&self, event: Event) -> Vec<Effect> {
        let mut phase = lock(&self.phase);
        let (next, effects) = reduce(&phase, event);
        if next != *phase {
            log::info!("Session: {} → {}", phase.name(), next.name());
        }
        *phase = next;
        effects
    }

    async fn run_effects(&self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            if let Some(event) = self.run_effect(effect).await {
                queue.extend(self.apply(event));
            }
        }
    }

    async fn run_effect(&self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::AcquireDevices => match self.devices.acquire().await {
                Ok(tracks) => {
                    {
                        let mut resources = lock(&self.resources);
                        resources.camera = Some(tracks.camera);
                        resources.microphone = Some(tracks.microphone);
                        resources.output = Some(tracks.output);
                    }
                    if !self.gate.is_open() {
                        // Stopped while waiting; teardown has already run
                        self.release_resources();
                        return None;
                    }
                    Some(Event::DevicesReady)
                }
                Err(e) => {
                    log::error!("Session: device acquisition failed: {}", e);
                    self.metrics.record_error("device", e.to_string());
                    let message = e.to_string();
                    *lock(&self.fatal) = Some(e.into());
                    Some(Event::DevicesDenied { message })
                }
            },

            Effect::LoadVision => match self.vision.load().await {
                Ok(estimator) => {
                    lock(&self.resources).estimator = Some(estimator);
                    if !self.gate.is_open() {
                        self.release_resources();
                        return None;
                    }
                    Some(Event::VisionReady)
                }
                Err(e) => {
                    log::error!("Session: pose model load failed: {}", e);
                    self.metrics.record_error("vision", e.to_string());
                    let message = e.to_string();
                    *lock(&self.fatal) = Some(e.into());
                    Some(Event::VisionFailed { message })
                }
            },

            Effect::OpenChannel { exercise } => match self.connector.connect(&exercise).await {
                Ok(connection) => {
                    {
                        let mut resources = lock(&self.resources);
                        resources.channel = Some(connection.channel);
                        resources.inbound = Some(connection.events);
                    }
                    if !self.gate.is_open() {
                        self.release_resources();
                        return None;
                    }
                    Some(Event::ChannelOpened)
                }
                Err(e) => {
                    log::warn!("Session: coaching channel unavailable: {}", e);
                    self.metrics.record_error("channel", e.to_string());
                    Some(Event::ChannelUnavailable {
                        message: e.to_string(),
                    })
                }
            },

            Effect::StartWorkers { exercise, .. } => {
                self.start_workers(&exercise);
                None
            }

            Effect::ReleaseResources => {
                self.gate.close();
                self.release_resources();
                None
            }

            Effect::Teardown { keep_frames } => {
                self.teardown(keep_frames).await;
                Some(Event::TeardownComplete)
            }

            Effect::EmitStatus(text) => {
                log::info!("Session: {}", text);
                let _ = self.updates_tx.send(SessionUpdate::Status(text));
                None
            }

            Effect::Notify(text) => {
                let _ = self.updates_tx.send(SessionUpdate::Notice(text));
                None
            }
        }
    }

    /// Spawn the live workers. Holds the resource lock throughout so a
    /// concurrent teardown either sees them all or none of them.
    fn start_workers(&self, exercise: &str) {
        let mut resources = lock(&self.resources);
        if !self.gate.is_open() {
            return;
        }

        let (Some(camera), Some(microphone), Some(output), Some(estimator)) = (
            resources.camera.clone(),
            resources.microphone.clone(),
            resources.output.clone(),
            resources.estimator.clone(),
        ) else {
            log::error!("Session: cannot start workers, resources missing");
            return;
        };

        let settings = &self.settings;
        let link = OutboundLink::new(
            self.gate.clone(),
            resources.channel.clone(),
            self.metrics.clone(),
        );

        let sampler = FrameSampler::new(
            camera.clone(),
            self.frames.clone(),
            link.clone(),
            self.metrics.clone(),
            settings.frame_max_dimension,
            settings.jpeg_quality,
        );
        resources.workers.push((
            "frame_sampler",
            tokio::spawn(sampler.run(
                Duration::from_millis(settings.frame_interval_ms),
                self.gate.clone(),
            )),
        ));

        let streamer =
            AudioInputStreamer::new(link, microphone.sample_rate(), settings.input_sample_rate);
        if let Err(e) = microphone.start(streamer.into_callback()) {
            log::warn!("Session: microphone capture failed: {}", e);
            self.metrics.record_error("microphone", e.to_string());
            let _ = self
                .updates_tx
                .send(SessionUpdate::Notice(format!("Microphone unavailable: {}", e)));
        }

        if let Some(canvas) = lock(&self.canvas).take() {
            let renderer = PoseOverlayRenderer::new(
                estimator,
                camera,
                canvas,
                exercise,
                settings.overlay_padding,
                self.metrics.clone(),
            );
            resources.workers.push((
                "pose_overlay",
                tokio::spawn(renderer.run(
                    Duration::from_millis(settings.render_interval_ms),
                    self.gate.clone(),
                )),
            ));
        }

        let scheduler = Arc::new(Mutex::new(AudioPlaybackScheduler::new(
            output,
            self.gate.clone(),
            self.metrics.clone(),
        )));
        if let Some(inbound) = resources.inbound.take() {
            let dispatcher = CueDispatcher::new(
                self.synthesizer.clone(),
                scheduler.clone(),
                self.gate.clone(),
                self.updates_tx.clone(),
                self.metrics.clone(),
            );
            resources
                .workers
                .push(("cue_dispatcher", tokio::spawn(dispatcher.run(inbound))));
        }
        resources.scheduler = Some(scheduler);

        log::info!(
            "Session: {} workers running for {}",
            resources.workers.len(),
            exercise
        );
    }

    /// Release every acquired handle that has not been released yet.
    fn release_resources(&self) {
        let (microphone, channel, inbound, scheduler, output, camera, estimator) = {
            let mut resources = lock(&self.resources);
            (
                resources.microphone.take(),
                resources.channel.take(),
                resources.inbound.take(),
                resources.scheduler.take(),
                resources.output.take(),
                resources.camera.take(),
                resources.estimator.take(),
            )
        };

        if let Some(microphone) = microphone {
            microphone.stop();
        }
        if let Some(channel) = channel {
            channel.close();
        }
        drop(inbound);
        if let Some(scheduler) = scheduler {
            lock(&scheduler).flush();
        }
        if let Some(output) = output {
            output.close();
        }
        if let Some(camera) = camera {
            camera.release();
        }
        if let Some(estimator) = estimator {
            estimator.close();
        }
    }

    async fn teardown(&self, keep_frames: bool) {
        self.gate.close();
        log::info!(
            "Session: tearing down ({})",
            if keep_frames { "finish" } else { "cancel" }
        );

        let workers = std::mem::take(&mut lock(&self.resources).workers);
        let grace = Duration::from_millis(self.settings.teardown_grace_ms);
        for (name, mut handle) in workers {
            match timeout(grace, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("Session: {} worker failed: {}", name, e),
                Err(_) => {
                    log::warn!(
                        "Session: {} did not stop within {:?}, aborting",
                        name,
                        grace
                    );
                    handle.abort();
                }
            }
        }

        self.release_resources();

        let frames = lock(&self.frames).drain_all();
        if keep_frames {
            let count = frames.len();
            *lock(&self.handoff) = Some(frames);
            let _ = self.updates_tx.send(SessionUpdate::Finished { frames: count });
        } else {
            log::debug!("Session: discarding {} frames", frames.len());
        }

        let started_at = *lock(&self.started_at);
        let elapsed = started_at
            .map(|t| (Utc::now() - t).num_milliseconds())
            .unwrap_or(0);
        match serde_json::to_string(&self.metrics.summary()) {
            Ok(summary) => log::info!("Session: closed after {}ms, metrics {}", elapsed, summary),
            Err(e) => log::warn!("Session: failed to serialize metrics: {}", e),
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        // Best effort when dropped without finish()/cancel()
        if self.gate.close() {
            log::warn!("Session: dropped while active, releasing resources");
            let workers = std::mem::take(&mut lock(&self.resources).workers);
            for (_, handle) in workers {
                handle.abort();
            }
            self.release_resources();
        }
    }
}
