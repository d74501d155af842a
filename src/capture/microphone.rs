//! Default input device via cpal
//!
//! The stream lives on its own thread (cpal streams are not `Send`). The
//! data callback downmixes to mono and re-chunks into fixed-size blocks
//! before handing them to the session's block callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};

use super::{
    downmix_to_mono, sample_to_f32, BlockCallback, DeviceAccessError, MicrophoneSource,
};

struct Running {
    shutdown: mpsc::Sender<()>,
    thread: JoinHandle<()>,
    active: Arc<AtomicBool>,
}

pub struct CpalMicrophone {
    sample_rate: u32,
    block_samples: usize,
    running: Mutex<Option<Running>>,
}

impl CpalMicrophone {
    /// Probe the default input device. The stream itself is opened by `start`.
    pub fn open(block_samples: usize) -> Result<Self, DeviceAccessError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(DeviceAccessError::NoMicrophone)?;

        log::info!("Using audio input device: {:?}", device.name());

        let config = device
            .default_input_config()
            .map_err(|e| DeviceAccessError::Stream(e.to_string()))?;

        log::info!(
            "Audio config: {} Hz, {} channels, {:?}",
            config.sample_rate().0,
            config.channels(),
            config.sample_format()
        );

        Ok(Self {
            sample_rate: config.sample_rate().0,
            block_samples: block_samples.max(1),
            running: Mutex::new(None),
        })
    }
}

/// Re-chunks mono audio into fixed-size blocks
struct Blocker {
    pending: Vec<f32>,
    block_samples: usize,
    on_block: BlockCallback,
}

impl Blocker {
    fn push(&mut self, mono: &[f32]) {
        self.pending.extend_from_slice(mono);
        while self.pending.len() >= self.block_samples {
            let rest = self.pending.split_off(self.block_samples);
            (self.on_block)(&self.pending);
            self.pending = rest;
        }
    }
}

fn build_stream(
    blocker: Blocker,
    active: Arc<AtomicBool>,
) -> Result<cpal::Stream, DeviceAccessError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(DeviceAccessError::NoMicrophone)?;
    let supported = device
        .default_input_config()
        .map_err(|e| DeviceAccessError::Stream(e.to_string()))?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();

    let stream = match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(&device, &config, blocker, active)?,
        SampleFormat::U16 => build_stream_typed::<u16>(&device, &config, blocker, active)?,
        SampleFormat::F32 => build_stream_typed::<f32>(&device, &config, blocker, active)?,
        other => {
            return Err(DeviceAccessError::Stream(format!(
                "unsupported sample format {:?}",
                other
            )))
        }
    };

    stream
        .play()
        .map_err(|e| DeviceAccessError::Stream(format!("Failed to start stream: {}", e)))?;
    Ok(stream)
}

fn build_stream_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut blocker: Blocker,
    active: Arc<AtomicBool>,
) -> Result<cpal::Stream, DeviceAccessError>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let channels = config.channels as usize;

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !active.load(Ordering::Acquire) {
                    return;
                }
                let interleaved: Vec<f32> = data.iter().map(|&s| sample_to_f32(s)).collect();
                blocker.push(&downmix_to_mono(&interleaved, channels));
            },
            |err| log::error!("Audio stream error: {}", err),
            None,
        )
        .map_err(|e| DeviceAccessError::Stream(e.to_string()))
}

impl MicrophoneSource for CpalMicrophone {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&self, on_block: BlockCallback) -> Result<(), DeviceAccessError> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            return Err(DeviceAccessError::Stream("microphone already started".to_string()));
        }

        let blocker = Blocker {
            pending: Vec::with_capacity(self.block_samples * 2),
            block_samples: self.block_samples,
            on_block,
        };
        let active = Arc::new(AtomicBool::new(true));
        let thread_active = active.clone();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), DeviceAccessError>>(1);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let stream = match build_stream(blocker, thread_active) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = shutdown_rx.recv();
                drop(stream);
                log::debug!("CpalMicrophone: capture thread exiting");
            })
            .map_err(|e| DeviceAccessError::Stream(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| DeviceAccessError::Stream("capture thread died".to_string()))??;

        log::info!("CpalMicrophone: capture started");
        *running = Some(Running {
            shutdown: shutdown_tx,
            thread,
            active,
        });
        Ok(())
    }

    fn stop(&self) {
        let Some(running) = self
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return;
        };

        running.active.store(false, Ordering::Release);
        let _ = running.shutdown.send(());
        if running.thread.join().is_err() {
            log::warn!("CpalMicrophone: capture thread panicked");
        }
        log::info!("CpalMicrophone: capture stopped");
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocker_emits_fixed_size_blocks() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let sink = sizes.clone();
        let mut blocker = Blocker {
            pending: Vec::new(),
            block_samples: 4096,
            on_block: Box::new(move |block: &[f32]| sink.lock().unwrap().push(block.len())),
        };

        blocker.push(&[0.0; 3000]);
        assert!(sizes.lock().unwrap().is_empty());

        blocker.push(&[0.0; 6000]);
        assert_eq!(*sizes.lock().unwrap(), vec![4096, 4096]);
        assert_eq!(blocker.pending.len(), 808);
    }
}
