//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `estimator` - HTTP client for the pose estimation sidecar
//! - `raster` - Image decoding to RGB8
//! - `upload` - Multipart upload extraction
//! - `http` - HTTP API server
//! - `prometheus` - Prometheus text exposition

pub mod estimator;
pub mod http;
pub mod prometheus;
pub mod raster;
pub mod upload;

// Re-export commonly used types
pub use estimator::{EstimatorError, EstimatorOptions, HttpPoseEstimator, PoseEstimator};
pub use http::{serve, start_server, AppState};
pub use raster::decode_rgb;
pub use upload::{Upload, UploadError};
