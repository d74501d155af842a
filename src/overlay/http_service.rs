//! Remote pose estimation over HTTP
//!
//! - `GET  {base}/health` - checked once when the model is loaded
//! - `POST {base}/estimate?timestamp_ms=N` - JPEG body, JSON landmarks back

use async_trait::async_trait;
use image::RgbImage;
use reqwest::Client;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{Landmark, PoseEstimator, VisionError, VisionLoader};
use crate::capture::{encode_frame, JPEG_MIME};

/// Frames sent for estimation are downscaled to this
const ESTIMATE_MAX_DIMENSION: u32 = 256;
const ESTIMATE_JPEG_QUALITY: u8 = 80;

#[derive(Debug, Deserialize)]
struct EstimateResponse {
    #[serde(default)]
    landmarks: Option<Vec<Landmark>>,
}

/// Loader for the pose service at `base_url`
#[derive(Debug, Clone)]
pub struct HttpPoseService {
    base_url: String,
    timeout: Duration,
}

impl HttpPoseService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl VisionLoader for HttpPoseService {
    async fn load(&self) -> Result<Arc<dyn PoseEstimator>, VisionError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| VisionError::LoadFailed(e.to_string()))?;

        let url = format!("{}/health", self.base_url);
        log::info!("HttpPoseService: checking {}", url);

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| VisionError::LoadFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VisionError::LoadFailed(format!(
                "pose service unhealthy: HTTP {}",
                response.status()
            )));
        }

        log::info!("HttpPoseService: ready");
        Ok(Arc::new(HttpPoseEstimator {
            client,
            estimate_url: format!("{}/estimate", self.base_url),
            closed: AtomicBool::new(false),
        }))
    }
}

struct HttpPoseEstimator {
    client: Client,
    estimate_url: String,
    closed: AtomicBool,
}

#[async_trait]
impl PoseEstimator for HttpPoseEstimator {
    async fn estimate(
        &self,
        frame: &RgbImage,
        timestamp_ms: u64,
    ) -> Result<Option<Vec<Landmark>>, VisionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(VisionError::Closed);
        }

        let body = encode_frame(frame, ESTIMATE_MAX_DIMENSION, ESTIMATE_JPEG_QUALITY)
            .map_err(|e| VisionError::Estimation(e.to_string()))?;

        let response = self
            .client
            .post(&self.estimate_url)
            .query(&[("timestamp_ms", timestamp_ms)])
            .header("Content-Type", JPEG_MIME)
            .body(body)
            .send()
            .await
            .map_err(|e| VisionError::Estimation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VisionError::Estimation(format!("HTTP {}", status)));
        }

        let parsed: EstimateResponse = response
            .json()
            .await
            .map_err(|e| VisionError::Estimation(e.to_string()))?;

        Ok(parsed.landmarks.filter(|l| !l.is_empty()))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            log::info!("HttpPoseService: estimator closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_landmarks() {
        let json = r#"{"landmarks":[{"name":"nose","x":0.5,"y":0.2,"visibility":0.9},{"name":"left_knee","x":0.4,"y":0.8}]}"#;
        let parsed: EstimateResponse = serde_json::from_str(json).unwrap();
        let landmarks = parsed.landmarks.unwrap();
        assert_eq!(landmarks.len(), 2);
        assert_eq!(landmarks[0].visibility, Some(0.9));
        assert_eq!(landmarks[1].visibility, None);
    }

    #[test]
    fn test_parse_no_pose() {
        let parsed: EstimateResponse = serde_json::from_str(r#"{"landmarks":null}"#).unwrap();
        assert!(parsed.landmarks.is_none());
        let parsed: EstimateResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.landmarks.is_none());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let service = HttpPoseService::new("http://127.0.0.1:8766/");
        assert_eq!(service.base_url, "http://127.0.0.1:8766");
    }

    #[tokio::test]
    async fn test_unreachable_service_fails_load() {
        let service =
            HttpPoseService::new("http://127.0.0.1:9").with_timeout(Duration::from_secs(2));
        assert!(matches!(
            service.load().await,
            Err(VisionError::LoadFailed(_))
        ));
    }
}
