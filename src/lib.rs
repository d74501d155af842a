pub mod capture;
pub mod coaching;
pub mod metrics;
pub mod overlay;
pub mod playback;
pub mod session;
pub mod settings;
pub mod speech;

use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use capture::{FrameRecord, LocalDevices};
use coaching::WsConnector;
use overlay::{HttpPoseService, RgbaGuideCanvas};
use session::{SessionController, SessionDeps, SessionUpdate};
use settings::{default_settings_path, load_settings, CoachSettings};
use speech::HttpSpeechProvider;

pub use session::{Phase, SessionError};

/// Canvas size for the pose guide overlay
const OVERLAY_WIDTH: u32 = 640;
const OVERLAY_HEIGHT: u32 = 480;

#[derive(Debug, Parser, Clone)]
#[command(about = "Live exercise coaching session", author, version)]
pub struct CoachArgs {
    /// Exercise label, e.g. "Squat"
    pub exercise: String,

    /// Directory of JPEG/PNG frames used as the camera
    #[arg(long = "frames-dir")]
    pub frames_dir: PathBuf,

    /// Settings file (defaults to the user config directory)
    #[arg(long = "settings")]
    pub settings: Option<PathBuf>,

    /// Finish automatically after this many seconds
    #[arg(long = "duration-secs")]
    pub duration_secs: Option<u64>,

    /// Where to write the frames returned by finish
    #[arg(long = "out", default_value = "captured-frames")]
    pub out: PathBuf,
}

fn resolve_settings(args: &CoachArgs) -> CoachSettings {
    let path = match &args.settings {
        Some(path) => Some(path.clone()),
        None => match default_settings_path() {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("Using default settings: {}", e);
                None
            }
        },
    };
    path.map(|p| load_settings(&p)).unwrap_or_default()
}

/// Write each frame as `frame-<sequence>.jpg`. Returns the number written.
pub fn write_frames(dir: &Path, frames: &[FrameRecord]) -> std::io::Result<usize> {
    std::fs::create_dir_all(dir)?;
    for frame in frames {
        let path = dir.join(format!("frame-{:05}.jpg", frame.sequence));
        std::fs::write(&path, &frame.encoded_image)?;
    }
    Ok(frames.len())
}

fn print_updates(mut updates: mpsc::UnboundedReceiver<SessionUpdate>) {
    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            match update {
                SessionUpdate::Status(text) => println!("[status] {}", text),
                SessionUpdate::CueText(text) => println!("[coach] {}", text),
                SessionUpdate::Notice(text) => println!("[notice] {}", text),
                SessionUpdate::Finished { frames } => println!("[done] {} frames", frames),
            }
        }
    });
}

async fn run_session(args: CoachArgs) -> Result<(), String> {
    let settings = resolve_settings(&args);

    let synthesizer =
        HttpSpeechProvider::from_settings(&settings).map_err(|e| e.to_string())?;
    let deps = SessionDeps {
        devices: Arc::new(LocalDevices::new(
            &args.frames_dir,
            settings.audio_block_samples,
            settings.output_sample_rate,
        )),
        vision: Arc::new(HttpPoseService::new(&settings.pose_endpoint)),
        channel: Arc::new(WsConnector::from_settings(&settings)),
        synthesizer: Arc::new(synthesizer),
        canvas: Box::new(RgbaGuideCanvas::new(OVERLAY_WIDTH, OVERLAY_HEIGHT)),
    };

    let controller = Arc::new(SessionController::new(deps, settings));
    if let Some(updates) = controller.subscribe() {
        print_updates(updates);
    }

    // Ctrl-C during startup cancels; once live it finishes the set
    let starting = controller.clone();
    let exercise = args.exercise.clone();
    let start = tokio::spawn(async move { starting.start(&exercise).await });
    tokio::pin!(start);

    let started = tokio::select! {
        result = &mut start => result.map_err(|e| e.to_string())?,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupted during startup, cancelling");
            controller.cancel().await;
            return Ok(());
        }
    };
    started.map_err(|e| e.to_string())?;

    match args.duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }

    let frames = controller.finish().await;
    let written = write_frames(&args.out, &frames).map_err(|e| e.to_string())?;
    log::info!("Wrote {} frames to {}", written, args.out.display());
    Ok(())
}

// ============================================================================
// Application entry point
// ============================================================================

pub fn run() -> ExitCode {
    let args = CoachArgs::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        log::debug!("rustls crypto provider already installed");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run_session(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Session failed: {}", e);
            eprintln!("live-coach: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_parse_args() {
        let args = CoachArgs::parse_from([
            "live-coach",
            "Squat",
            "--frames-dir",
            "/tmp/frames",
            "--duration-secs",
            "30",
        ]);
        assert_eq!(args.exercise, "Squat");
        assert_eq!(args.frames_dir, PathBuf::from("/tmp/frames"));
        assert_eq!(args.duration_secs, Some(30));
        assert_eq!(args.out, PathBuf::from("captured-frames"));
        assert!(args.settings.is_none());
    }

    #[test]
    fn test_write_frames_names_by_sequence() {
        let dir = TempDir::new().unwrap();
        let frames = vec![
            FrameRecord {
                encoded_image: vec![0xFF, 0xD8],
                mime_type: "image/jpeg".to_string(),
                captured_at: Utc::now(),
                sequence: 6,
            },
            FrameRecord {
                encoded_image: vec![0xFF, 0xD9],
                mime_type: "image/jpeg".to_string(),
                captured_at: Utc::now(),
                sequence: 7,
            },
        ];

        let out = dir.path().join("out");
        assert_eq!(write_frames(&out, &frames).unwrap(), 2);
        assert_eq!(std::fs::read(out.join("frame-00006.jpg")).unwrap(), vec![0xFF, 0xD8]);
        assert!(out.join("frame-00007.jpg").exists());
    }
}
