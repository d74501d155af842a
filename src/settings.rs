use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SETTINGS_FILE_NAME: &str = "settings.json";
const APP_DIR_NAME: &str = "live-coach";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("failed to create config directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write settings {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CoachSettings {
    /// Period of the frame sampler.
    pub frame_interval_ms: u64,

    /// Longest side of a sampled frame after downscaling.
    pub frame_max_dimension: u32,

    /// JPEG quality (1-100) for sampled frames.
    pub jpeg_quality: u8,

    /// Microphone samples per callback block.
    pub audio_block_samples: usize,

    /// PCM16 rate sent to the coaching service.
    pub input_sample_rate: u32,

    /// Rate the playback output runs at.
    pub output_sample_rate: u32,

    /// Pose overlay render period (~30fps).
    pub render_interval_ms: u64,

    /// Fraction of the landmark box size added on each side of the guide.
    pub overlay_padding: f32,

    /// How long teardown waits for a worker before aborting it.
    pub teardown_grace_ms: u64,

    pub channel_url: String,
    pub channel_connect_timeout_ms: u64,

    pub tts_endpoint: String,
    pub tts_model: String,
    pub tts_voice: String,

    pub pose_endpoint: String,
}

impl Default for CoachSettings {
    fn default() -> Self {
        Self {
            frame_interval_ms: 1200,
            frame_max_dimension: 640,
            jpeg_quality: 70,
            audio_block_samples: 4096,
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            render_interval_ms: 33,
            overlay_padding: 0.1,
            teardown_grace_ms: 2000,
            channel_url: "ws://127.0.0.1:8765/coach".to_string(),
            channel_connect_timeout_ms: 10_000,
            tts_endpoint: "https://api.openai.com/v1/audio/speech".to_string(),
            tts_model: "gpt-4o-mini-tts".to_string(),
            tts_voice: "alloy".to_string(),
            pose_endpoint: "http://127.0.0.1:8766".to_string(),
        }
    }
}

/// `<config dir>/live-coach/settings.json`
pub fn default_settings_path() -> Result<PathBuf, SettingsError> {
    let dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
    Ok(dir.join(APP_DIR_NAME).join(SETTINGS_FILE_NAME))
}

pub fn load_settings(path: &Path) -> CoachSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<CoachSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                CoachSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => CoachSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            CoachSettings::default()
        }
    }
}

pub fn save_settings(path: &Path, settings: &CoachSettings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| SettingsError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let contents = serde_json::to_string_pretty(settings)?;

    // Write to a sibling temp file, then rename over the destination.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents).map_err(|source| SettingsError::Write {
        path: tmp_path.clone(),
        source,
    })?;

    // Windows rename fails if the destination exists.
    if cfg!(windows) && path.exists() {
        if let Err(source) = std::fs::remove_file(path) {
            if source.kind() != std::io::ErrorKind::NotFound {
                return Err(SettingsError::Write {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }

    std::fs::rename(&tmp_path, path).map_err(|source| SettingsError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
