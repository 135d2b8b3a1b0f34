//! Per-class color model: pixel classification and the per-image feedback
//! update.

use std::path::Path;

use image::{GrayImage, ImageBuffer, Luma, RgbImage};

use super::histogram::{ColorHistogram, HistogramError};
use crate::config::AdaptConfig;

/// Floating-point single-channel buffer used for response maps.
pub type ResponseMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Per-pixel classification output for one image.
pub struct ResponseMaps {
    /// One likelihood map per target class (class value minus environment).
    pub maps: Vec<ResponseMap>,
    /// Argmax label per pixel: 0 = environment, `k + 1` = target class `k`.
    pub labels: GrayImage,
}

/// Color model: one histogram per target class plus the environment.
///
/// Each worker owns a private clone, independently seeded and independently
/// adapted; models are never merged across workers.
#[derive(Debug, Clone)]
pub struct ColorModel {
    classes: Vec<ColorHistogram>,
    environment: ColorHistogram,
}

impl ColorModel {
    /// Build from already-loaded histograms.
    pub fn new(classes: Vec<ColorHistogram>, environment: ColorHistogram) -> Self {
        Self {
            classes,
            environment,
        }
    }

    /// Load target-class histograms and the environment histogram from files.
    ///
    /// Any checksum or format failure aborts setup before any image is
    /// processed.
    pub fn load(class_paths: &[&Path], environment_path: &Path) -> Result<Self, HistogramError> {
        let mut classes = Vec::with_capacity(class_paths.len());
        for path in class_paths {
            classes.push(ColorHistogram::load(path)?);
        }
        let environment = ColorHistogram::load(environment_path)?;
        tracing::info!(
            "color model loaded: {} target classes + environment",
            classes.len()
        );
        Ok(Self {
            classes,
            environment,
        })
    }

    /// Number of target classes (environment excluded).
    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    /// Access a class histogram.
    pub fn class_histogram(&self, class: usize) -> &ColorHistogram {
        &self.classes[class]
    }

    /// Access the environment histogram.
    pub fn environment_histogram(&self) -> &ColorHistogram {
        &self.environment
    }

    /// Classify every pixel: per-class response maps plus an argmax label
    /// mask. Environment wins ties so sparse class evidence does not smear.
    pub fn classify_image(&self, image: &RgbImage) -> ResponseMaps {
        let (w, h) = image.dimensions();
        let mut maps: Vec<ResponseMap> = (0..self.classes.len())
            .map(|_| ResponseMap::new(w, h))
            .collect();
        let mut labels = GrayImage::new(w, h);

        for (col, row, px) in image.enumerate_pixels() {
            let p = [px.0[0] as f32, px.0[1] as f32, px.0[2] as f32];
            let env = self.environment.value_at(p);
            let mut best = env;
            let mut best_label = 0u8;
            for (k, hist) in self.classes.iter().enumerate() {
                let v = hist.value_at(p);
                maps[k].put_pixel(col, row, Luma([v - env]));
                if v > best {
                    best = v;
                    best_label = (k + 1) as u8;
                }
            }
            labels.put_pixel(col, row, Luma([best_label]));
        }

        ResponseMaps { maps, labels }
    }

    /// Drift the model toward the current image's accepted detections.
    ///
    /// `detection_mask` is the rasterized label mask of final detections
    /// (0 = background, `k + 1` = class `k`); `class_counts` are this image's
    /// per-class detection counts, which scale the blend ratio.
    pub fn adapt(
        &mut self,
        image: &RgbImage,
        detection_mask: &GrayImage,
        class_counts: &[usize],
        config: &AdaptConfig,
    ) {
        let (w, h) = image.dimensions();
        let total_px = (w as usize) * (h as usize);

        // Lengthen both strides proportionally when a dense scan of a large
        // image would exceed the scanned-pixel budget.
        let mut object_stride = config.object_stride.max(1);
        let mut background_stride = config.background_stride.max(1);
        let estimated = total_px / object_stride + total_px / background_stride;
        if estimated > config.max_scanned_px {
            let factor = estimated.div_ceil(config.max_scanned_px);
            object_stride *= factor;
            background_stride *= factor;
        }

        for hist in &mut self.classes {
            hist.clear_scratch();
        }
        self.environment.clear_scratch();

        let mut background_samples: u64 = 0;
        for (idx, (px, lbl)) in image.pixels().zip(detection_mask.pixels()).enumerate() {
            let p = [px.0[0] as f32, px.0[1] as f32, px.0[2] as f32];
            let label = lbl.0[0] as usize;
            if label == 0 {
                if idx % background_stride == 0 {
                    self.environment.scratch_add(p, -1.0);
                    background_samples += 1;
                }
            } else if idx % object_stride == 0 {
                if let Some(hist) = self.classes.get_mut(label - 1) {
                    hist.scratch_add(p, -1.0);
                }
            }
        }

        if background_samples == 0 {
            tracing::debug!("color adapt skipped: no background samples");
            return;
        }
        // Scratch holds negative increments; the negative inverse count
        // turns them into positive normalized evidence.
        let normalizer = -1.0 / background_samples as f32;

        let mut total_ratio = 0.0;
        for (k, hist) in self.classes.iter_mut().enumerate() {
            let count = class_counts.get(k).copied().unwrap_or(0);
            let coeff = config
                .class_blend_coeff
                .get(k)
                .copied()
                .unwrap_or_else(|| config.class_blend_coeff.last().copied().unwrap_or(0.0));
            let ratio = (coeff * count as f32).clamp(0.0, config.max_blend_ratio);
            total_ratio += ratio;
            hist.blend_scratch(ratio, normalizer);
        }

        // Background drifts no faster than the strongest class drift.
        let env_ratio = (total_ratio / self.classes.len().max(1) as f32)
            .clamp(0.0, config.max_blend_ratio);
        self.environment.blend_scratch(env_ratio, normalizer);

        tracing::debug!(
            "color adapt: {} bg samples, mean ratio {:.4}",
            background_samples,
            env_ratio
        );
    }
}
