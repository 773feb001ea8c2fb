//! Uniform size recommendation from measured height
//!
//! Every garment category gets the overall size. The confidence tier is
//! one-sided: anything at or below the threshold is "medium", never "low".

use crate::domain::types::{FitConfidence, Measurements, SizeLabel, SizeRecommendation};

/// Exclusive upper height bound (cm) for each size below XL
pub const SIZE_HEIGHT_BOUNDS: [(f64, SizeLabel); 4] = [
    (150.0, SizeLabel::ExtraSmall),
    (160.0, SizeLabel::Small),
    (170.0, SizeLabel::Medium),
    (180.0, SizeLabel::Large),
];

/// Confidence strictly above this is a "high" fit confidence
pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.7;

pub fn size_for_height(height_cm: f64) -> SizeLabel {
    SIZE_HEIGHT_BOUNDS
        .iter()
        .find(|(bound, _)| height_cm < *bound)
        .map_or(SizeLabel::ExtraLarge, |&(_, size)| size)
}

pub fn fit_confidence(confidence: f64) -> FitConfidence {
    if confidence > HIGH_CONFIDENCE_THRESHOLD {
        FitConfidence::High
    } else {
        FitConfidence::Medium
    }
}

pub fn recommend(measurements: &Measurements) -> SizeRecommendation {
    let size = size_for_height(measurements.height);
    SizeRecommendation {
        recommended_size: size,
        shirt_size: size,
        pants_size: size,
        blazer_size: size,
        fit_confidence: fit_confidence(measurements.confidence),
    }
}
