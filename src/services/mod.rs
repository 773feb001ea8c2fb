//! Services - measurement derivation and size mapping
//!
//! This module contains the request-independent business logic:
//! - `calibration` - Named heuristic constants and clamp ranges
//! - `measurement` - Pose-to-measurement converter
//! - `sizing` - Height to garment size recommendation

pub mod calibration;
pub mod measurement;
pub mod sizing;

// Re-export commonly used types
pub use calibration::{Calibration, Range};
pub use measurement::{derive_measurements, Derivation, MeasureError, MeasurementConverter};
pub use sizing::recommend;
