//! Calibration heuristic for converting pixel distances to centimeters
//!
//! The scale factor is anchored on an assumed average adult shoulder width,
//! with an assumed average height as fallback when the shoulders collapse to
//! a single column. Every derived measurement is clamped to a plausible range.
//! None of this accounts for camera distance or lens geometry.

use serde::Deserialize;

/// Assumed true shoulder width (cm) used as the primary scale reference
pub const REFERENCE_SHOULDER_WIDTH_CM: f64 = 45.0;

/// Assumed true body height (cm) used when shoulder width is degenerate
pub const REFERENCE_BODY_HEIGHT_CM: f64 = 170.0;

/// Lower bound on body height in pixels for the fallback scale
pub const MIN_BODY_HEIGHT_PX: f64 = 400.0;

pub const SCALE_FACTOR_RANGE: Range = Range::new(0.1, 2.0);

pub const HEIGHT_RANGE_CM: Range = Range::new(140.0, 220.0);
pub const SHOULDER_WIDTH_RANGE_CM: Range = Range::new(30.0, 60.0);
pub const HIP_WIDTH_RANGE_CM: Range = Range::new(25.0, 50.0);
pub const CHEST_WIDTH_RANGE_CM: Range = Range::new(25.0, 55.0);
pub const WAIST_WIDTH_RANGE_CM: Range = Range::new(20.0, 45.0);

/// Chest width as a fraction of shoulder width
pub const CHEST_TO_SHOULDER_RATIO: f64 = 0.85;

/// Waist width as a fraction of hip width
pub const WAIST_TO_HIP_RATIO: f64 = 0.9;

/// Closed interval used for clamping
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Clamp `value` into `[min, max]`
    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        value.min(self.max).max(self.min)
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }
}

/// Full set of heuristic constants, overridable from the `[calibration]` section
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub reference_shoulder_width_cm: f64,
    pub reference_body_height_cm: f64,
    pub min_body_height_px: f64,
    pub scale_factor: Range,
    pub height_cm: Range,
    pub shoulder_width_cm: Range,
    pub hip_width_cm: Range,
    pub chest_width_cm: Range,
    pub waist_width_cm: Range,
    pub chest_to_shoulder_ratio: f64,
    pub waist_to_hip_ratio: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            reference_shoulder_width_cm: REFERENCE_SHOULDER_WIDTH_CM,
            reference_body_height_cm: REFERENCE_BODY_HEIGHT_CM,
            min_body_height_px: MIN_BODY_HEIGHT_PX,
            scale_factor: SCALE_FACTOR_RANGE,
            height_cm: HEIGHT_RANGE_CM,
            shoulder_width_cm: SHOULDER_WIDTH_RANGE_CM,
            hip_width_cm: HIP_WIDTH_RANGE_CM,
            chest_width_cm: CHEST_WIDTH_RANGE_CM,
            waist_width_cm: WAIST_WIDTH_RANGE_CM,
            chest_to_shoulder_ratio: CHEST_TO_SHOULDER_RATIO,
            waist_to_hip_ratio: WAIST_TO_HIP_RATIO,
        }
    }
}

impl Calibration {
    /// Reject ranges and references that would make the heuristic meaningless
    pub fn validate(&self) -> Result<(), String> {
        let ranges = [
            ("scale_factor", &self.scale_factor),
            ("height_cm", &self.height_cm),
            ("shoulder_width_cm", &self.shoulder_width_cm),
            ("hip_width_cm", &self.hip_width_cm),
            ("chest_width_cm", &self.chest_width_cm),
            ("waist_width_cm", &self.waist_width_cm),
        ];
        for (name, range) in ranges {
            if !range.is_valid() {
                return Err(format!("{name}: min {} must not exceed max {}", range.min, range.max));
            }
        }

        let positives = [
            ("reference_shoulder_width_cm", self.reference_shoulder_width_cm),
            ("reference_body_height_cm", self.reference_body_height_cm),
            ("min_body_height_px", self.min_body_height_px),
            ("chest_to_shoulder_ratio", self.chest_to_shoulder_ratio),
            ("waist_to_hip_ratio", self.waist_to_hip_ratio),
        ];
        for (name, value) in positives {
            if !(value.is_finite() && value > 0.0) {
                return Err(format!("{name} must be positive, got {value}"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_clamp() {
        let range = Range::new(30.0, 60.0);
        assert_eq!(range.clamp(10.0), 30.0);
        assert_eq!(range.clamp(45.5), 45.5);
        assert_eq!(range.clamp(61.0), 60.0);
        assert_eq!(range.clamp(30.0), 30.0);
        assert_eq!(range.clamp(60.0), 60.0);
    }

    #[test]
    fn test_range_contains() {
        assert!(HEIGHT_RANGE_CM.contains(140.0));
        assert!(HEIGHT_RANGE_CM.contains(220.0));
        assert!(!HEIGHT_RANGE_CM.contains(139.9));
    }

    #[test]
    fn test_default_calibration_matches_constants() {
        let calibration = Calibration::default();
        assert_eq!(calibration.reference_shoulder_width_cm, 45.0);
        assert_eq!(calibration.reference_body_height_cm, 170.0);
        assert_eq!(calibration.min_body_height_px, 400.0);
        assert_eq!(calibration.scale_factor, Range::new(0.1, 2.0));
        assert_eq!(calibration.chest_to_shoulder_ratio, 0.85);
        assert_eq!(calibration.waist_to_hip_ratio, 0.9);
        assert!(calibration.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let calibration =
            Calibration { height_cm: Range::new(220.0, 140.0), ..Calibration::default() };
        let err = calibration.validate().unwrap_err();
        assert!(err.contains("height_cm"));
    }

    #[test]
    fn test_validate_rejects_non_positive_reference() {
        let calibration =
            Calibration { reference_shoulder_width_cm: 0.0, ..Calibration::default() };
        assert!(calibration.validate().is_err());
    }

    #[test]
    fn test_partial_toml_override() {
        let calibration: Calibration = toml::from_str(
            r#"
reference_shoulder_width_cm = 42.0
height_cm = { min = 120.0, max = 210.0 }
"#,
        )
        .unwrap();

        assert_eq!(calibration.reference_shoulder_width_cm, 42.0);
        assert_eq!(calibration.height_cm, Range::new(120.0, 210.0));
        assert_eq!(calibration.hip_width_cm, HIP_WIDTH_RANGE_CM);
    }
}
