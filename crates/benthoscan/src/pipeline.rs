//! Per-image detection pipeline.
//!
//! One [`ImagePipeline`] per worker: it owns a private color model and
//! density tracker that drift with the images the worker processes, plus a
//! shared read-only handle to the classifier system. A single call to
//! [`ImagePipeline::process`] runs the full staged pipeline on one image:
//! pixel classification, the four proposal generators, consolidation, the
//! classifier cascade, edge refinement, overlap suppression, mask
//! rasterization, and the color/density feedback update.

use std::sync::Arc;

use image::RgbImage;
use serde::Serialize;

use crate::candidate::{Candidate, Detection, Method};
use crate::cascade::{compute_features, ClassifierSystem};
use crate::color::{ColorModel, ResponseMap};
use crate::config::{DetectConfig, ImageScale};
use crate::consolidate::consolidate;
use crate::density::DensityTracker;
use crate::generators::{
    adaptive::detect_adaptive, blob::detect_blobs, edgefit::detect_edge_circles,
    template::detect_template,
};
use crate::mask::rasterize_detections;
use crate::refine::refine_survivors;
use crate::suppress::suppress_overlaps;

/// Finalized result of one image.
#[derive(Debug, Clone, Serialize)]
pub struct ImageDetections {
    /// Source image name as supplied by the caller.
    pub image_name: String,
    /// Working-image dimensions.
    pub width: u32,
    /// Working-image dimensions.
    pub height: u32,
    /// Scale metadata the image was processed under.
    pub scale: ImageScale,
    /// Kept detections in working-frame pixel units.
    pub detections: Vec<Detection>,
    /// Detection count per classifier index.
    pub class_counts: Vec<usize>,
}

/// Worker-owned detection pipeline.
pub struct ImagePipeline {
    classifiers: Arc<ClassifierSystem>,
    model: ColorModel,
    density: DensityTracker,
    base_config: DetectConfig,
}

impl ImagePipeline {
    /// Build a pipeline around a session's shared classifier system and a
    /// private clone of the seed color model.
    pub fn new(
        classifiers: Arc<ClassifierSystem>,
        model: ColorModel,
        config: DetectConfig,
    ) -> Self {
        let density = DensityTracker::new(classifiers.len(), config.density.clone());
        Self {
            classifiers,
            model,
            density,
            base_config: config,
        }
    }

    /// Read access to the worker's drifted color model.
    pub fn color_model(&self) -> &ColorModel {
        &self.model
    }

    /// Read access to the worker's density statistics.
    pub fn density(&self) -> &DensityTracker {
        &self.density
    }

    /// Run the full pipeline on one working-frame image.
    pub fn process(&mut self, image_name: &str, image: &RgbImage, scale: ImageScale) -> ImageDetections {
        let (width, height) = image.dimensions();
        let mut config = self.base_config.clone();
        config.set_radius_band(scale.band);

        let span = tracing::info_span!("image", name = image_name);
        let _guard = span.enter();

        // Stage 1: per-pixel color classification.
        let maps = self.model.classify_image(image);
        let gray = image::imageops::grayscale(image);
        let gray_f32: ResponseMap = ResponseMap::from_fn(width, height, |c, r| {
            image::Luma([gray.get_pixel(c, r).0[0] as f32])
        });

        // Stage 2: proposal generation.
        let favored = self.density.favored_method();
        let per_method = vec![
            (
                Method::Template,
                detect_template(&maps, &config.band, &config.template),
            ),
            (
                Method::Blob,
                detect_blobs(&maps, &config.band, config.band_slack, &config.blob),
            ),
            (
                Method::Adaptive,
                detect_adaptive(&maps, &config.band, config.band_slack, &config.adaptive),
            ),
            (
                Method::Edge,
                detect_edge_circles(&gray, &config.band, config.band_slack, &config.edgefit),
            ),
        ];
        let n_proposed: usize = per_method.iter().map(|(_, l)| l.len()).sum();
        tracing::debug!("{} proposals across 4 generators", n_proposed);

        // Stage 3: consolidation.
        let mut consolidated = consolidate(per_method, favored);
        let order = consolidated.consumption_order();

        // Stage 4: cascade classification in consumption order.
        for id in order {
            let cand: &mut Candidate = &mut consolidated.arena[id];
            if !cand.active {
                continue;
            }
            cand.features = Some(compute_features(
                &gray_f32,
                &maps,
                &cand.ellipse,
                &config.band,
                &config.features,
            ));
            self.classifiers.classify(cand);
        }

        // Stage 5: survivor edge refinement.
        refine_survivors(&gray_f32, &mut consolidated.arena, &config.refine);

        // Stage 6: overlap suppression on finalized detections.
        let detections: Vec<Detection> = consolidated
            .arena
            .iter()
            .filter_map(|c| self.classifiers.into_detection(c))
            .collect();
        let detections = suppress_overlaps(detections);

        let mut class_counts = vec![0usize; self.classifiers.len()];
        for det in &detections {
            class_counts[det.class_index] += 1;
        }
        tracing::info!("{} detections kept", detections.len());

        // Stage 7: feedback. The mask routes adaptation samples; the density
        // tracker steers the next image's generator priority.
        let mask = rasterize_detections(width, height, &detections);
        self.model
            .adapt(image, &mask, &class_counts, &config.adapt);
        let area_m2 = (width as f32 * scale.meters_per_px) * (height as f32 * scale.meters_per_px);
        self.density.record_image(&class_counts, area_m2);

        ImageDetections {
            image_name: image_name.to_string(),
            width,
            height,
            scale,
            detections,
            class_counts,
        }
    }
}
