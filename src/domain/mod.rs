//! Domain models - landmarks, measurements, and size recommendations
//!
//! This module contains the value types passed between layers:
//! - `Landmark` / `LandmarkSet` - estimator output for one skeleton
//! - `BodyLandmark` - index of each keypoint in the pose topology
//! - `Measurements` - centimeter-scale body measurements
//! - `SizeRecommendation` - garment size labels and fit confidence

pub mod types;

// Re-export commonly used types at module level
pub use types::{
    BodyLandmark, FitConfidence, Landmark, LandmarkSet, Measurements, SizeLabel,
    SizeRecommendation,
};
