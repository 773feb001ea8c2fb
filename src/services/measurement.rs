//! Pose-to-measurement conversion
//!
//! Runs the pose estimator over a decoded raster and turns the normalized
//! landmark coordinates into centimeter measurements:
//! 1. Pixel distances: shoulder and hip width (x axis), nose to mean ankle (y axis)
//! 2. Scale factor from the reference shoulder width, or the reference height
//!    when the shoulders are degenerate, clamped to the scale range
//! 3. Convert and clamp height, shoulder and hip width
//! 4. Chest and waist as fixed ratios of the clamped shoulder and hip widths
//! 5. Round to one decimal

use crate::domain::types::{BodyLandmark, Landmark, LandmarkSet, Measurements};
use crate::io::estimator::{EstimatorError, EstimatorOptions, PoseEstimator};
use crate::services::calibration::Calibration;
use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum MeasureError {
    #[error("No pose landmarks detected in the image")]
    NoPoseDetected,

    #[error("Pose result is missing the {0} landmark")]
    MissingLandmark(BodyLandmark),

    #[error("Degenerate pose geometry: {0}")]
    DegenerateGeometry(String),

    #[error("Pose estimator failed: {0}")]
    Estimator(#[from] EstimatorError),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Processing task failed: {0}")]
    Worker(String),
}

impl MeasureError {
    /// Whether the failure is a validation error (the image could not be
    /// measured) as opposed to an unexpected processing failure.
    pub fn is_validation(&self) -> bool {
        match self {
            MeasureError::NoPoseDetected
            | MeasureError::MissingLandmark(_)
            | MeasureError::DegenerateGeometry(_)
            | MeasureError::Estimator(_) => true,
            MeasureError::Decode(_) | MeasureError::Worker(_) => false,
        }
    }
}

/// Which reference dimension produced the scale factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleSource {
    ShoulderWidth,
    BodyHeight,
}

impl ScaleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleSource::ShoulderWidth => "shoulder_width",
            ScaleSource::BodyHeight => "body_height",
        }
    }
}

/// Measurements plus the intermediate values that produced them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Derivation {
    pub measurements: Measurements,
    pub image_width: u32,
    pub image_height: u32,
    pub shoulder_width_px: f64,
    pub hip_width_px: f64,
    pub body_height_px: f64,
    pub scale_factor: f64,
    pub scale_source: ScaleSource,
}

impl Derivation {
    pub fn log(&self) {
        let m = &self.measurements;
        info!(
            height_cm = %m.height,
            shoulder_width_cm = %m.shoulder_width,
            chest_width_cm = %m.chest_width,
            waist_width_cm = %m.waist_width,
            confidence = %m.confidence,
            landmarks_detected = %m.landmarks_detected,
            "measurements_calculated"
        );
        info!(
            scale_factor = %format!("{:.4}", self.scale_factor),
            scale_source = %self.scale_source.as_str(),
            image_width = %self.image_width,
            image_height = %self.image_height,
            body_height_px = %format!("{:.1}", self.body_height_px),
            shoulder_width_px = %format!("{:.1}", self.shoulder_width_px),
            hip_width_px = %format!("{:.1}", self.hip_width_px),
            "measurement_derivation"
        );
    }
}

/// Round to one decimal place, nearest decimal of the exact binary value,
/// ties to even
pub(crate) fn round1(value: f64) -> f64 {
    format!("{value:.1}").parse().unwrap_or(value)
}

fn required(landmarks: &LandmarkSet, which: BodyLandmark) -> Result<Landmark, MeasureError> {
    let landmark = landmarks.get(which).copied().ok_or(MeasureError::MissingLandmark(which))?;
    if !landmark.is_finite() {
        return Err(MeasureError::DegenerateGeometry(format!(
            "{which} has non-finite coordinates ({}, {})",
            landmark.x, landmark.y
        )));
    }
    Ok(landmark)
}

/// Pixel-to-centimeter scale, clamped to the calibration's scale range
pub fn scale_factor(
    shoulder_width_px: f64,
    body_height_px: f64,
    calibration: &Calibration,
) -> (f64, ScaleSource) {
    let (raw, source) = if shoulder_width_px > 0.0 {
        (calibration.reference_shoulder_width_cm / shoulder_width_px, ScaleSource::ShoulderWidth)
    } else {
        let height_px = body_height_px.max(calibration.min_body_height_px);
        (calibration.reference_body_height_cm / height_px, ScaleSource::BodyHeight)
    };
    (calibration.scale_factor.clamp(raw), source)
}

/// Convert one skeleton into measurements. Pure arithmetic, no I/O.
pub fn derive_measurements(
    landmarks: &LandmarkSet,
    image_width: u32,
    image_height: u32,
    calibration: &Calibration,
) -> Result<Derivation, MeasureError> {
    if landmarks.is_empty() {
        return Err(MeasureError::NoPoseDetected);
    }
    if image_width == 0 || image_height == 0 {
        return Err(MeasureError::DegenerateGeometry(format!(
            "image has zero dimension ({image_width}x{image_height})"
        )));
    }

    let nose = required(landmarks, BodyLandmark::Nose)?;
    let left_shoulder = required(landmarks, BodyLandmark::LeftShoulder)?;
    let right_shoulder = required(landmarks, BodyLandmark::RightShoulder)?;
    let left_hip = required(landmarks, BodyLandmark::LeftHip)?;
    let right_hip = required(landmarks, BodyLandmark::RightHip)?;
    let left_ankle = required(landmarks, BodyLandmark::LeftAnkle)?;
    let right_ankle = required(landmarks, BodyLandmark::RightAnkle)?;

    let width = f64::from(image_width);
    let height = f64::from(image_height);

    let shoulder_width_px = (left_shoulder.x - right_shoulder.x).abs() * width;
    let hip_width_px = (left_hip.x - right_hip.x).abs() * width;
    let avg_ankle_y = (left_ankle.y + right_ankle.y) / 2.0;
    let body_height_px = (nose.y - avg_ankle_y).abs() * height;

    let (scale, scale_source) = scale_factor(shoulder_width_px, body_height_px, calibration);

    let height_cm = calibration.height_cm.clamp(body_height_px * scale);
    let shoulder_width_cm = calibration.shoulder_width_cm.clamp(shoulder_width_px * scale);
    let hip_width_cm = calibration.hip_width_cm.clamp(hip_width_px * scale);

    let chest_width_cm =
        calibration.chest_width_cm.clamp(shoulder_width_cm * calibration.chest_to_shoulder_ratio);
    let waist_width_cm =
        calibration.waist_width_cm.clamp(hip_width_cm * calibration.waist_to_hip_ratio);

    let measurements = Measurements {
        height: round1(height_cm),
        shoulder_width: round1(shoulder_width_cm),
        chest_width: round1(chest_width_cm),
        waist_width: round1(waist_width_cm),
        confidence: nose.visibility,
        landmarks_detected: landmarks.len(),
    };

    Ok(Derivation {
        measurements,
        image_width,
        image_height,
        shoulder_width_px,
        hip_width_px,
        body_height_px,
        scale_factor: scale,
        scale_source,
    })
}

/// Estimator plus calibration; shared by all requests, holds no mutable state
pub struct MeasurementConverter {
    estimator: Arc<dyn PoseEstimator>,
    options: EstimatorOptions,
    calibration: Calibration,
    timeout: Duration,
}

impl MeasurementConverter {
    pub fn new(
        estimator: Arc<dyn PoseEstimator>,
        options: EstimatorOptions,
        calibration: Calibration,
        timeout: Duration,
    ) -> Self {
        Self { estimator, options, calibration, timeout }
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn estimator_name(&self) -> &str {
        self.estimator.name()
    }

    /// Run the estimator over `image` and derive measurements.
    ///
    /// Only the estimator call is bounded by the timeout.
    pub async fn measure(&self, image: &RgbImage) -> Result<Derivation, MeasureError> {
        let (width, height) = image.dimensions();

        let estimate = self.estimator.estimate(image, &self.options);
        let landmarks = match tokio::time::timeout(self.timeout, estimate).await {
            Ok(result) => result?,
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                warn!(
                    estimator = %self.estimator.name(),
                    timeout_ms = %timeout_ms,
                    "estimator_timeout"
                );
                return Err(EstimatorError::Timeout(timeout_ms).into());
            }
        };

        let landmarks = landmarks.ok_or(MeasureError::NoPoseDetected)?;
        derive_measurements(&landmarks, width, height, &self.calibration)
    }
}
