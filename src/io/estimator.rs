//! Pose estimator interface and HTTP sidecar client
//!
//! The pose model runs out of process. The service sends the raw RGB raster
//! to the sidecar and receives normalized landmarks back:
//! - Request: `POST <url>?width=W&height=H&<options>` with `W*H*3` RGB8 bytes
//! - Response: `{"pose_landmarks": [{"x":..,"y":..,"z":..,"visibility":..}, ..]}`
//! - `pose_landmarks` null, absent or empty means no skeleton was found

use crate::domain::types::{Landmark, LandmarkSet};
use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Longest error body kept from a failed sidecar response
const MAX_ERROR_BODY_LEN: usize = 256;

/// Settings passed to the estimator with every image
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorOptions {
    /// Treat every image independently, no temporal tracking
    pub static_image_mode: bool,
    /// Model tier: 0 = lite, 1 = full, 2 = heavy
    pub model_complexity: u8,
    pub enable_segmentation: bool,
    pub min_detection_confidence: f64,
}

impl Default for EstimatorOptions {
    fn default() -> Self {
        Self {
            static_image_mode: true,
            model_complexity: 2,
            enable_segmentation: true,
            min_detection_confidence: 0.5,
        }
    }
}

impl EstimatorOptions {
    fn query_pairs(&self) -> [(&'static str, String); 4] {
        [
            ("static_image_mode", self.static_image_mode.to_string()),
            ("model_complexity", self.model_complexity.to_string()),
            ("enable_segmentation", self.enable_segmentation.to_string()),
            ("min_detection_confidence", self.min_detection_confidence.to_string()),
        ]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EstimatorError {
    #[error("estimator request failed: {0}")]
    Transport(String),

    #[error("estimator returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid estimator response: {0}")]
    InvalidResponse(String),

    #[error("estimator timed out after {0} ms")]
    Timeout(u64),
}

/// Raster in, landmark set or nothing out.
///
/// `Ok(None)` means the model ran and found no skeleton.
#[async_trait]
pub trait PoseEstimator: Send + Sync {
    async fn estimate(
        &self,
        image: &RgbImage,
        options: &EstimatorOptions,
    ) -> Result<Option<LandmarkSet>, EstimatorError>;

    /// Short identifier for logs
    fn name(&self) -> &str;
}

/// Response body of the pose sidecar
#[derive(Debug, Serialize, Deserialize)]
pub struct EstimatorResponse {
    #[serde(default)]
    pub pose_landmarks: Option<Vec<Landmark>>,
}

impl EstimatorResponse {
    pub fn into_landmarks(self) -> Option<LandmarkSet> {
        self.pose_landmarks.filter(|landmarks| !landmarks.is_empty()).map(LandmarkSet::new)
    }
}

/// Client for a pose model served over HTTP
pub struct HttpPoseEstimator {
    url: String,
    client: reqwest::Client,
}

impl HttpPoseEstimator {
    /// Build the client once for reuse (connection pooling).
    ///
    /// `timeout` bounds the whole HTTP exchange; callers may wrap the call in
    /// a tighter deadline of their own.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, EstimatorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EstimatorError::Transport(e.to_string()))?;
        Ok(Self { url: url.into(), client })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PoseEstimator for HttpPoseEstimator {
    async fn estimate(
        &self,
        image: &RgbImage,
        options: &EstimatorOptions,
    ) -> Result<Option<LandmarkSet>, EstimatorError> {
        let (width, height) = image.dimensions();

        let response = self
            .client
            .post(&self.url)
            .query(&[("width", width.to_string()), ("height", height.to_string())])
            .query(&options.query_pairs())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.as_raw().clone())
            .send()
            .await
            .map_err(|e| EstimatorError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| EstimatorError::Transport(e.to_string()))?;

        if !status.is_success() {
            let mut text = String::from_utf8_lossy(&body).into_owned();
            if text.len() > MAX_ERROR_BODY_LEN {
                let cut = (0..=MAX_ERROR_BODY_LEN).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0);
                text.truncate(cut);
            }
            return Err(EstimatorError::Status { status: status.as_u16(), body: text });
        }

        let parsed: EstimatorResponse = serde_json::from_slice(&body)
            .map_err(|e| EstimatorError::InvalidResponse(e.to_string()))?;

        let landmarks = parsed.into_landmarks();
        debug!(
            width = %width,
            height = %height,
            landmarks = %landmarks.as_ref().map_or(0, LandmarkSet::len),
            "estimator_response"
        );
        Ok(landmarks)
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = EstimatorOptions::default();
        assert!(options.static_image_mode);
        assert_eq!(options.model_complexity, 2);
        assert!(options.enable_segmentation);
        assert_eq!(options.min_detection_confidence, 0.5);
    }

    #[test]
    fn test_query_pairs() {
        let pairs = EstimatorOptions::default().query_pairs();
        assert_eq!(pairs[0], ("static_image_mode", "true".to_string()));
        assert_eq!(pairs[1], ("model_complexity", "2".to_string()));
        assert_eq!(pairs[2], ("enable_segmentation", "true".to_string()));
        assert_eq!(pairs[3], ("min_detection_confidence", "0.5".to_string()));
    }

    #[test]
    fn test_response_with_landmarks() {
        let response: EstimatorResponse = serde_json::from_str(
            r#"{"pose_landmarks":[{"x":0.5,"y":0.1,"z":-0.2,"visibility":0.99},{"x":0.4,"y":0.2,"visibility":0.8}]}"#,
        )
        .unwrap();
        let landmarks = response.into_landmarks().unwrap();
        assert_eq!(landmarks.len(), 2);
        assert_eq!(landmarks.as_slice()[0].z, -0.2);
        assert_eq!(landmarks.as_slice()[1].visibility, 0.8);
    }

    #[test]
    fn test_response_without_pose() {
        for body in [r#"{"pose_landmarks":null}"#, r#"{"pose_landmarks":[]}"#, "{}"] {
            let response: EstimatorResponse = serde_json::from_str(body).unwrap();
            assert!(response.into_landmarks().is_none(), "body {body} should mean no pose");
        }
    }

    #[tokio::test]
    async fn test_unreachable_sidecar_is_transport_error() {
        // Port 9 (discard) is not expected to serve HTTP on the test host
        let estimator =
            HttpPoseEstimator::new("http://127.0.0.1:9/pose", Duration::from_millis(500)).unwrap();
        let image = RgbImage::new(2, 2);

        let result = estimator.estimate(&image, &EstimatorOptions::default()).await;
        assert!(matches!(result, Err(EstimatorError::Transport(_))));
    }
}
