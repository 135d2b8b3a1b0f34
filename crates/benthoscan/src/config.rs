//! Detection configuration.
//!
//! [`DetectConfig`] aggregates per-stage sub-configs. Scale-coupled fields are
//! derived from the per-image radius search band via
//! [`DetectConfig::from_radius_band`]; individual fields can be overridden
//! afterwards.

use serde::{Deserialize, Serialize};

use crate::generators::blob::ExtremumMode;

/// Expected organism radius range in working-frame pixels.
///
/// Supplied per image by the upstream geometry collaborator together with the
/// ground-sample distance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RadiusBand {
    /// Minimum search radius in pixels.
    pub min_radius_px: f32,
    /// Maximum search radius in pixels.
    pub max_radius_px: f32,
}

impl RadiusBand {
    const MIN_RADIUS_FLOOR_PX: f32 = 2.0;

    /// Construct a normalized band (ordered, finite, floored).
    pub fn new(min_radius_px: f32, max_radius_px: f32) -> Self {
        let mut out = Self {
            min_radius_px,
            max_radius_px,
        };
        out.normalize_in_place();
        out
    }

    /// Whether a radius falls within the band, widened by `slack` on each side
    /// as a multiplicative factor.
    pub fn contains(&self, radius: f32, slack: f32) -> bool {
        radius >= self.min_radius_px / slack && radius <= self.max_radius_px * slack
    }

    /// Band midpoint radius.
    pub fn nominal_radius_px(&self) -> f32 {
        0.5 * (self.min_radius_px + self.max_radius_px)
    }

    fn normalize_in_place(&mut self) {
        let defaults = RadiusBand::default();
        if !self.min_radius_px.is_finite() {
            self.min_radius_px = defaults.min_radius_px;
        }
        if !self.max_radius_px.is_finite() {
            self.max_radius_px = defaults.max_radius_px;
        }
        if self.min_radius_px > self.max_radius_px {
            std::mem::swap(&mut self.min_radius_px, &mut self.max_radius_px);
        }
        self.min_radius_px = self.min_radius_px.max(Self::MIN_RADIUS_FLOOR_PX);
        self.max_radius_px = self.max_radius_px.max(self.min_radius_px);
    }
}

impl Default for RadiusBand {
    fn default() -> Self {
        Self {
            min_radius_px: 12.0,
            max_radius_px: 60.0,
        }
    }
}

/// Per-image scale metadata from the upstream geometry collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImageScale {
    /// Ground sample distance in meters per pixel.
    pub meters_per_px: f32,
    /// Factor the working image was resized by relative to the original;
    /// output geometry is divided by this to restore original-pixel units.
    pub resize_factor: f32,
    /// Radius search band in working-frame pixels.
    pub band: RadiusBand,
}

impl Default for ImageScale {
    fn default() -> Self {
        Self {
            meters_per_px: 0.001,
            resize_factor: 1.0,
            band: RadiusBand::default(),
        }
    }
}

/// Blob / difference-of-Gaussians generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    /// Base Gaussian sigma of the finest pyramid level.
    pub sigma0: f32,
    /// Multiplicative sigma step between adjacent levels.
    pub sigma_step: f32,
    /// Number of pyramid levels.
    pub n_levels: usize,
    /// Extremum polarity to search for.
    pub mode: ExtremumMode,
    /// Minimum absolute DoG response for a seed extremum.
    pub min_magnitude: f32,
    /// Newton refinement iteration budget.
    pub max_newton_iters: usize,
    /// Radius compensation factor applied to the sigma-derived radius.
    pub radius_compensation: f32,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            sigma0: 4.0,
            sigma_step: 1.26,
            n_levels: 8,
            mode: ExtremumMode::Both,
            min_magnitude: 4.0,
            max_newton_iters: 5,
            radius_compensation: 1.41,
        }
    }
}

/// Adaptive-threshold generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Percentile table explored by bisection, ascending in [0, 1].
    pub percentile_table: Vec<f32>,
    /// Components smaller than this pixel area count as noise.
    pub min_component_area: usize,
    /// More sub-minimum components than this marks a threshold as too low.
    pub max_small_components: usize,
    /// Hard cap on components per binarization; more aborts the attempt.
    pub max_components: usize,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            percentile_table: vec![0.50, 0.62, 0.74, 0.82, 0.88, 0.93, 0.96, 0.98],
            min_component_area: 24,
            max_small_components: 64,
            max_components: 512,
        }
    }
}

/// Template scale-space generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Number of octaves in the radius pyramid.
    pub n_octaves: usize,
    /// Radius steps per octave.
    pub radii_per_octave: usize,
    /// Directional-gradient samples per radius hypothesis.
    pub n_taps: usize,
    /// Minimum radial-symmetry response for a seed.
    pub min_response: f32,
    /// Spatial bin edge length, as a fraction of the hypothesis radius.
    pub bin_size_frac: f32,
    /// Maximum candidates kept per (scale, spatial bin).
    pub per_bin_quota: usize,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            n_octaves: 3,
            radii_per_octave: 4,
            n_taps: 20,
            min_response: 6.0,
            bin_size_frac: 2.0,
            per_bin_quota: 3,
        }
    }
}

/// Edge-run circle-fit generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeFitConfig {
    /// Gradient magnitude threshold as a fraction of the image maximum.
    pub grad_threshold: f32,
    /// Minimum pixels in an edge run before fits are attempted.
    pub min_run_len: usize,
    /// Circle fits sampled per edge run.
    pub fits_per_run: usize,
    /// Maximum accepted mean-squared radial residual, in pixels squared.
    pub max_residual: f32,
    /// Minimum run-coverage-to-radius ratio.
    pub min_coverage_ratio: f32,
    /// Keep at most this many best fits.
    pub top_n: usize,
}

impl Default for EdgeFitConfig {
    fn default() -> Self {
        Self {
            grad_threshold: 0.12,
            min_run_len: 18,
            fits_per_run: 6,
            max_residual: 4.0,
            min_coverage_ratio: 1.2,
            top_n: 40,
        }
    }
}

/// Feature extraction configuration for the cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Orientation bins per HOG block.
    pub hog_bins: usize,
    /// Ring band half-width as a fraction of the major axis.
    pub ring_band_frac: f32,
    /// Boundary samples for edge/color statistics.
    pub n_boundary_samples: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            hog_bins: 9,
            ring_band_frac: 0.2,
            n_boundary_samples: 48,
        }
    }
}

/// Survivor edge-refinement configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    /// Number of radial rays cast per candidate.
    pub n_rays: usize,
    /// Search band around the hypothesized radius, multiplicative.
    pub band_slack: f32,
    /// Step along each ray in pixels.
    pub r_step: f32,
    /// Minimum sub-pixel edge points for an accepted refit.
    pub min_edge_points: usize,
    /// Minimum gradient magnitude for an edge sample.
    pub min_gradient: f32,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            n_rays: 48,
            band_slack: 1.5,
            r_step: 0.5,
            min_edge_points: 12,
            min_gradient: 6.0,
        }
    }
}

/// Adaptive color-model update configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptConfig {
    /// Sample stride over object pixels.
    pub object_stride: usize,
    /// Sample stride over background pixels (denser object sampling).
    pub background_stride: usize,
    /// Total scanned-pixel cap; strides are lengthened for large images.
    pub max_scanned_px: usize,
    /// Per-class blend growth coefficient: `ratio = coeff * count`, clamped.
    pub class_blend_coeff: Vec<f32>,
    /// Upper clamp on the blend ratio.
    pub max_blend_ratio: f32,
}

impl Default for AdaptConfig {
    fn default() -> Self {
        Self {
            object_stride: 2,
            background_stride: 7,
            max_scanned_px: 1_500_000,
            class_blend_coeff: vec![0.02, 0.015, 0.01],
            max_blend_ratio: 0.25,
        }
    }
}

/// Density tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DensityConfig {
    /// Exponential weight on the newest per-image density.
    pub ew_alpha: f32,
    /// Images in the short rolling window.
    pub window: usize,
    /// Density (detections per square meter) above which the template
    /// strategy is favored over blob-first generation.
    pub favor_template_above: f32,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            ew_alpha: 0.2,
            window: 10,
            favor_template_above: 0.05,
        }
    }
}

/// Top-level detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectConfig {
    /// Radius search band in working-frame pixels.
    pub band: RadiusBand,
    /// Blob/DoG generator controls.
    pub blob: BlobConfig,
    /// Adaptive-threshold generator controls.
    pub adaptive: AdaptiveConfig,
    /// Template scale-space generator controls.
    pub template: TemplateConfig,
    /// Edge circle-fit generator controls.
    pub edgefit: EdgeFitConfig,
    /// Feature extraction controls.
    pub features: FeatureConfig,
    /// Survivor edge-refinement controls.
    pub refine: RefineConfig,
    /// Color-model adaptation controls.
    pub adapt: AdaptConfig,
    /// Density tracker controls.
    pub density: DensityConfig,
    /// Slack factor applied to the band when validating candidate radii.
    pub band_slack: f32,
}

impl Default for DetectConfig {
    fn default() -> Self {
        let mut cfg = Self {
            band: RadiusBand::default(),
            blob: BlobConfig::default(),
            adaptive: AdaptiveConfig::default(),
            template: TemplateConfig::default(),
            edgefit: EdgeFitConfig::default(),
            features: FeatureConfig::default(),
            refine: RefineConfig::default(),
            adapt: AdaptConfig::default(),
            density: DensityConfig::default(),
            band_slack: 1.5,
        };
        apply_radius_band(&mut cfg);
        cfg
    }
}

impl DetectConfig {
    /// Build a configuration with all scale-coupled parameters derived from a
    /// radius search band. The recommended constructor; fields can be
    /// overridden afterwards.
    pub fn from_radius_band(band: RadiusBand) -> Self {
        let mut cfg = Self {
            band: RadiusBand::new(band.min_radius_px, band.max_radius_px),
            ..Default::default()
        };
        apply_radius_band(&mut cfg);
        cfg
    }

    /// Update the band and re-derive scale-coupled parameters.
    pub fn set_radius_band(&mut self, band: RadiusBand) {
        self.band = RadiusBand::new(band.min_radius_px, band.max_radius_px);
        apply_radius_band(self);
    }
}

fn apply_radius_band(cfg: &mut DetectConfig) {
    let r_min = cfg.band.min_radius_px;
    let r_max = cfg.band.max_radius_px;

    // DoG sigma range: blob radius ≈ sigma * sqrt(2) * compensation.
    cfg.blob.sigma0 = (r_min / (std::f32::consts::SQRT_2 * cfg.blob.radius_compensation)).max(1.2);
    let sigma_top = r_max / std::f32::consts::SQRT_2;
    let ratio = (sigma_top / cfg.blob.sigma0).max(1.1);
    cfg.blob.n_levels = ((ratio.ln() / cfg.blob.sigma_step.ln()).ceil() as usize + 2).clamp(4, 12);

    // Adaptive components: area gates from the band extremes.
    cfg.adaptive.min_component_area =
        ((std::f32::consts::PI * r_min * r_min * 0.25) as usize).max(12);

    // Edge runs must span a reasonable arc of the smallest circle.
    cfg.edgefit.min_run_len = ((r_min * 1.5) as usize).max(12);

    // Refinement reaches the whole band around each hypothesis.
    cfg.refine.band_slack = (r_max / r_min).clamp(1.3, 2.0);
}
