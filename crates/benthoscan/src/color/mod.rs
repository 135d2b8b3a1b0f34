//! Adaptive per-class color models.
//!
//! Histogram tables seed per-pixel classification at the start of each image
//! and are drifted toward that image's own accepted detections afterwards.

mod histogram;
mod model;

pub use histogram::{ColorHistogram, HistogramError, CHANNELS, CHECKSUM_SENTINEL};
pub use model::{ColorModel, ResponseMap, ResponseMaps};
