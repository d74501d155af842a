//! Local media devices
//!
//! `ImageSequenceCamera` replays a directory of still images as a live feed,
//! one image per `current_frame()` call, looping at the end. `LocalDevices`
//! pairs it with the default cpal microphone and output.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::{
    CameraSource, CpalMicrophone, DeviceAccessError, MediaDevices, MediaTracks, VideoFrame,
};
use crate::playback::{CpalOutput, PlaybackError};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct ImageSequenceCamera {
    frames: Vec<VideoFrame>,
    cursor: AtomicUsize,
    released: AtomicBool,
}

impl ImageSequenceCamera {
    /// Load every JPEG/PNG in `dir`, sorted by file name.
    pub fn load(dir: &Path) -> Result<Self, DeviceAccessError> {
        let entries = std::fs::read_dir(dir).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                DeviceAccessError::PermissionDenied(format!("{}: {}", dir.display(), e))
            }
            _ => DeviceAccessError::NoCamera(format!("{}: {}", dir.display(), e)),
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for path in &paths {
            match image::open(path) {
                Ok(img) => frames.push(Arc::new(img.to_rgb8())),
                Err(e) => log::warn!("ImageSequenceCamera: skipping {:?}: {}", path, e),
            }
        }

        if frames.is_empty() {
            return Err(DeviceAccessError::NoCamera(format!(
                "no readable images in {}",
                dir.display()
            )));
        }

        log::info!(
            "ImageSequenceCamera: loaded {} frames from {}",
            frames.len(),
            dir.display()
        );
        Ok(Self::from_frames(frames))
    }

    pub fn from_frames(frames: Vec<VideoFrame>) -> Self {
        Self {
            frames,
            cursor: AtomicUsize::new(0),
            released: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl CameraSource for ImageSequenceCamera {
    fn current_frame(&self) -> Option<VideoFrame> {
        if self.released.load(Ordering::Acquire) || self.frames.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.frames.len();
        Some(self.frames[index].clone())
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            log::info!("ImageSequenceCamera: released");
        }
    }
}

/// Camera from an image directory plus the default cpal microphone and output
#[derive(Debug, Clone)]
pub struct LocalDevices {
    frames_dir: PathBuf,
    block_samples: usize,
    output_rate: u32,
}

impl LocalDevices {
    pub fn new(frames_dir: impl Into<PathBuf>, block_samples: usize, output_rate: u32) -> Self {
        Self {
            frames_dir: frames_dir.into(),
            block_samples,
            output_rate,
        }
    }
}

#[async_trait]
impl MediaDevices for LocalDevices {
    async fn acquire(&self) -> Result<MediaTracks, DeviceAccessError> {
        let frames_dir = self.frames_dir.clone();
        let block_samples = self.block_samples;
        let output_rate = self.output_rate;

        // Image decoding and device probing are blocking
        tokio::task::spawn_blocking(move || -> Result<MediaTracks, DeviceAccessError> {
            let camera = ImageSequenceCamera::load(&frames_dir)?;
            let microphone = CpalMicrophone::open(block_samples)?;
            let output = CpalOutput::open(output_rate).map_err(|e| match e {
                PlaybackError::NoOutputDevice => DeviceAccessError::NoOutput(e.to_string()),
                other => DeviceAccessError::Stream(other.to_string()),
            })?;

            Ok(MediaTracks {
                camera: Arc::new(camera),
                microphone: Arc::new(microphone),
                output: Arc::new(output),
            })
        })
        .await
        .map_err(|e| DeviceAccessError::Stream(e.to_string()))?
    }
}
