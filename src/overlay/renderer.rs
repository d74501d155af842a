//! Continuous pose overlay loop

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;

use super::{guide_box, GuideCanvas, PoseEstimator};
use crate::capture::CameraSource;
use crate::metrics::{Counter, SessionMetrics};
use crate::session::SessionGate;

/// Result of a single render iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Drawn,
    NoPose,
    NoFrame,
    /// Estimation failed; the canvas was left untouched
    Skipped,
}

pub struct PoseOverlayRenderer {
    estimator: Arc<dyn PoseEstimator>,
    camera: Arc<dyn CameraSource>,
    canvas: Box<dyn GuideCanvas>,
    label: String,
    padding: f32,
    metrics: Arc<SessionMetrics>,
    started: Instant,
    consecutive_failures: u32,
}

impl PoseOverlayRenderer {
    pub fn new(
        estimator: Arc<dyn PoseEstimator>,
        camera: Arc<dyn CameraSource>,
        canvas: Box<dyn GuideCanvas>,
        label: impl Into<String>,
        padding: f32,
        metrics: Arc<SessionMetrics>,
    ) -> Self {
        Self {
            estimator,
            camera,
            canvas,
            label: label.into(),
            padding,
            metrics,
            started: Instant::now(),
            consecutive_failures: 0,
        }
    }

    pub async fn render_once(&mut self) -> RenderOutcome {
        let Some(frame) = self.camera.current_frame() else {
            return RenderOutcome::NoFrame;
        };
        let timestamp_ms = self.started.elapsed().as_millis() as u64;

        let landmarks = match self.estimator.estimate(&frame, timestamp_ms).await {
            Ok(landmarks) => landmarks,
            Err(e) => {
                self.metrics.incr(Counter::EstimationFailures);
                self.consecutive_failures += 1;
                // Log the first failure of a run loudly, the rest quietly
                if self.consecutive_failures == 1 {
                    log::warn!("PoseOverlayRenderer: estimation failed, skipping frame: {}", e);
                    self.metrics.record_error("vision", e.to_string());
                } else {
                    log::debug!("PoseOverlayRenderer: estimation failed: {}", e);
                }
                return RenderOutcome::Skipped;
            }
        };
        self.consecutive_failures = 0;

        self.canvas.clear();
        match landmarks.and_then(|l| guide_box(&l, self.padding)) {
            Some(guide) => {
                self.canvas.draw_guide(&guide, &self.label);
                RenderOutcome::Drawn
            }
            None => RenderOutcome::NoPose,
        }
    }

    /// Render every `interval` until the gate closes, then clear the canvas.
    pub async fn run(mut self, interval: Duration, gate: Arc<SessionGate>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        log::info!("PoseOverlayRenderer: rendering every {:?}", interval);

        loop {
            tokio::select! {
                _ = gate.cancelled() => break,
                _ = ticker.tick() => {
                    self.render_once().await;
                }
            }
        }

        self.canvas.clear();
        log::info!("PoseOverlayRenderer: stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::VideoFrame;
    use crate::overlay::{GuideBox, Landmark, VisionError};
    use async_trait::async_trait;
    use image::RgbImage;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct StillCamera;

    impl CameraSource for StillCamera {
        fn current_frame(&self) -> Option<VideoFrame> {
            Some(Arc::new(RgbImage::new(4, 4)))
        }
        fn release(&self) {}
    }

    /// Returns scripted results, then "no pose"
    struct ScriptedEstimator(Mutex<VecDeque<Result<Option<Vec<Landmark>>, VisionError>>>);

    #[async_trait]
    impl PoseEstimator for ScriptedEstimator {
        async fn estimate(
            &self,
            _frame: &RgbImage,
            _timestamp_ms: u64,
        ) -> Result<Option<Vec<Landmark>>, VisionError> {
            self.0.lock().unwrap().pop_front().unwrap_or(Ok(None))
        }
        fn close(&self) {}
    }

    #[derive(Clone, Default)]
    struct RecordingCanvas(Arc<Mutex<Vec<String>>>);

    impl GuideCanvas for RecordingCanvas {
        fn clear(&mut self) {
            self.0.lock().unwrap().push("clear".to_string());
        }
        fn draw_guide(&mut self, _guide: &GuideBox, label: &str) {
            self.0.lock().unwrap().push(format!("draw {}", label));
        }
    }

    fn pose() -> Vec<Landmark> {
        vec![Landmark::new("hip", 0.4, 0.5), Landmark::new("knee", 0.5, 0.7)]
    }

    #[tokio::test]
    async fn test_failure_skips_frame_and_loop_continues() {
        let estimator = Arc::new(ScriptedEstimator(Mutex::new(VecDeque::from(vec![
            Ok(Some(pose())),
            Err(VisionError::Estimation("blurry".into())),
            Ok(Some(pose())),
        ]))));
        let canvas = RecordingCanvas::default();
        let metrics = Arc::new(SessionMetrics::new());
        let mut renderer = PoseOverlayRenderer::new(
            estimator,
            Arc::new(StillCamera),
            Box::new(canvas.clone()),
            "Squat",
            0.1,
            metrics.clone(),
        );

        assert_eq!(renderer.render_once().await, RenderOutcome::Drawn);
        assert_eq!(renderer.render_once().await, RenderOutcome::Skipped);
        assert_eq!(renderer.render_once().await, RenderOutcome::Drawn);
        assert_eq!(renderer.render_once().await, RenderOutcome::NoPose);

        assert_eq!(metrics.get(Counter::EstimationFailures), 1);
        assert_eq!(
            *canvas.0.lock().unwrap(),
            vec!["clear", "draw Squat", "clear", "draw Squat", "clear"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_clears_canvas_on_teardown() {
        let estimator = Arc::new(ScriptedEstimator(Mutex::new(VecDeque::new())));
        let canvas = RecordingCanvas::default();
        let renderer = PoseOverlayRenderer::new(
            estimator,
            Arc::new(StillCamera),
            Box::new(canvas.clone()),
            "Plank",
            0.1,
            Arc::new(SessionMetrics::new()),
        );
        let gate = SessionGate::new();

        let task = tokio::spawn(renderer.run(Duration::from_millis(33), gate.clone()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        gate.close();
        task.await.unwrap();

        let calls = canvas.0.lock().unwrap();
        assert!(calls.len() >= 2);
        assert_eq!(calls.last().map(String::as_str), Some("clear"));
    }
}
