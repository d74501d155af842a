//! Pose-tracking guide overlay
//!
//! A render loop, independent of the coaching channel, asks the pose
//! estimator for landmarks on the live frame and draws a corner-bracket
//! guide around them. Estimation failures skip the frame; they never stop
//! the loop.

mod canvas;
mod geometry;
mod http_service;
mod renderer;

pub use canvas::{GuideCanvas, RgbaGuideCanvas};
pub use geometry::{guide_box, GuideBox};
pub use http_service::HttpPoseService;
pub use renderer::{PoseOverlayRenderer, RenderOutcome};

use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum VisionError {
    /// The model could not be loaded; fatal for session start
    #[error("Failed to load pose model: {0}")]
    LoadFailed(String),
    /// A single estimation failed; the frame is skipped
    #[error("Pose estimation failed: {0}")]
    Estimation(String),
    #[error("Pose estimator is closed")]
    Closed,
}

/// A named body joint in normalized image coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub name: String,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub visibility: Option<f32>,
}

impl Landmark {
    pub fn new(name: impl Into<String>, x: f32, y: f32) -> Self {
        Self {
            name: name.into(),
            x,
            y,
            visibility: None,
        }
    }
}

#[async_trait]
pub trait PoseEstimator: Send + Sync {
    /// Zero or one landmark set for `frame`
    async fn estimate(
        &self,
        frame: &RgbImage,
        timestamp_ms: u64,
    ) -> Result<Option<Vec<Landmark>>, VisionError>;

    /// Release the model. Idempotent.
    fn close(&self);
}

/// Loads the pose model. Injected so tests can substitute a fake.
#[async_trait]
pub trait VisionLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn PoseEstimator>, VisionError>;
}
