//! cpal output device with a sample-accurate timeline
//!
//! The output callback counts rendered frames; that count is the clock.
//! Scheduled voices are resampled to the device rate up front and mixed in
//! by absolute frame position, so back-to-back buffers join without a gap.
//!
//! cpal streams are not `Send`, so a dedicated thread owns the stream and
//! parks until `close()`.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};

use super::{AudioOutput, PlaybackError, VoiceId};
use crate::capture::resample_f32;
use crate::speech::DecodedAudio;

struct Voice {
    id: VoiceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

struct Timeline {
    frames_rendered: u64,
    voices: Vec<Voice>,
    next_id: VoiceId,
}

impl Timeline {
    /// Mix one callback's worth of mono frames starting at the current clock.
    fn render(&mut self, out: &mut [f32]) {
        let base = self.frames_rendered;
        out.fill(0.0);

        for voice in &self.voices {
            for (i, slot) in out.iter_mut().enumerate() {
                let frame = base + i as u64;
                if frame < voice.start_frame {
                    continue;
                }
                let offset = (frame - voice.start_frame) as usize;
                match voice.samples.get(offset) {
                    Some(s) => *slot += s,
                    None => break,
                }
            }
        }

        self.frames_rendered += out.len() as u64;
        let now = self.frames_rendered;
        self.voices.retain(|v| v.end_frame() > now);
    }
}

/// Default output device driven by a shared timeline
pub struct CpalOutput {
    timeline: Arc<Mutex<Timeline>>,
    device_rate: u32,
    shutdown: Mutex<Option<mpsc::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CpalOutput {
    /// Open the default output device and start the stream, at
    /// `preferred_rate` if the device supports it.
    pub fn open(preferred_rate: u32) -> Result<Self, PlaybackError> {
        let timeline = Arc::new(Mutex::new(Timeline {
            frames_rendered: 0,
            voices: Vec::new(),
            next_id: 0,
        }));

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<u32, PlaybackError>>(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let thread_timeline = timeline.clone();

        let thread = std::thread::Builder::new()
            .name("cue-playback".to_string())
            .spawn(move || {
                let stream = match build_stream(thread_timeline, preferred_rate) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Blocks until close() drops or signals the sender
                let _ = shutdown_rx.recv();
                drop(stream);
                log::debug!("CpalOutput: stream thread exiting");
            })
            .map_err(|e| PlaybackError::StreamCreationFailed(e.to_string()))?;

        let device_rate = ready_rx
            .recv()
            .map_err(|_| PlaybackError::StreamCreationFailed("stream thread died".to_string()))??;

        log::info!("CpalOutput: playing at {} Hz", device_rate);

        Ok(Self {
            timeline,
            device_rate,
            shutdown: Mutex::new(Some(shutdown_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    fn lock_timeline(&self) -> std::sync::MutexGuard<'_, Timeline> {
        self.timeline.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn build_stream(
    timeline: Arc<Mutex<Timeline>>,
    preferred_rate: u32,
) -> Result<(cpal::Stream, u32), PlaybackError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(PlaybackError::NoOutputDevice)?;

    log::info!("Using audio output device: {:?}", device.name());

    let preferred = device.supported_output_configs().ok().and_then(|mut configs| {
        configs.find(|c| {
            c.min_sample_rate().0 <= preferred_rate && c.max_sample_rate().0 >= preferred_rate
        })
    });
    let supported = match preferred {
        Some(range) => range.with_sample_rate(cpal::SampleRate(preferred_rate)),
        None => device
            .default_output_config()
            .map_err(|e| PlaybackError::StreamCreationFailed(e.to_string()))?,
    };
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let rate = config.sample_rate.0;

    let stream = match sample_format {
        SampleFormat::F32 => build_stream_typed::<f32>(&device, &config, timeline)?,
        SampleFormat::I16 => build_stream_typed::<i16>(&device, &config, timeline)?,
        SampleFormat::U16 => build_stream_typed::<u16>(&device, &config, timeline)?,
        other => {
            return Err(PlaybackError::StreamCreationFailed(format!(
                "unsupported sample format {:?}",
                other
            )))
        }
    };

    stream
        .play()
        .map_err(|e| PlaybackError::StreamCreationFailed(format!("Failed to start stream: {}", e)))?;

    Ok((stream, rate))
}

fn build_stream_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    timeline: Arc<Mutex<Timeline>>,
) -> Result<cpal::Stream, PlaybackError>
where
    T: cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let channels = config.channels as usize;
    let mut mono = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels.max(1);
                mono.resize(frames, 0.0);

                // Never block the audio thread on the scheduler
                match timeline.try_lock() {
                    Ok(mut timeline) => timeline.render(&mut mono),
                    Err(_) => mono.fill(0.0),
                }

                for (frame, &sample) in data.chunks_mut(channels.max(1)).zip(mono.iter()) {
                    let value = T::from_sample(sample.clamp(-1.0, 1.0));
                    for slot in frame.iter_mut() {
                        *slot = value;
                    }
                }
            },
            |err| log::error!("Audio output stream error: {}", err),
            None,
        )
        .map_err(|e| PlaybackError::StreamCreationFailed(e.to_string()))
}

impl AudioOutput for CpalOutput {
    fn now(&self) -> f64 {
        self.lock_timeline().frames_rendered as f64 / self.device_rate as f64
    }

    fn start_at(&self, audio: &DecodedAudio, at: f64) -> Result<VoiceId, PlaybackError> {
        if self
            .shutdown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
        {
            return Err(PlaybackError::Closed);
        }

        let samples = resample_f32(&audio.samples, audio.sample_rate, self.device_rate);
        let start_frame = (at.max(0.0) * self.device_rate as f64).round() as u64;

        let mut timeline = self.lock_timeline();
        let id = timeline.next_id;
        timeline.next_id += 1;
        timeline.voices.push(Voice {
            id,
            start_frame,
            samples,
        });
        Ok(id)
    }

    fn stop(&self, voice: VoiceId) {
        self.lock_timeline().voices.retain(|v| v.id != voice);
    }

    fn close(&self) {
        let Some(shutdown) = self
            .shutdown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return;
        };
        let _ = shutdown.send(());
        self.lock_timeline().voices.clear();

        if let Some(thread) = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take() {
            if thread.join().is_err() {
                log::warn!("CpalOutput: stream thread panicked");
            }
        }
        log::info!("CpalOutput: closed");
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}
