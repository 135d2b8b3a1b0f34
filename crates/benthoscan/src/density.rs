//! Survey density statistics.
//!
//! Tracks per-class detection density across the image sequence and steers
//! generator strategy: dense scenes favor the template generator, whose
//! per-bin quota keeps crowded frames tractable, over blob-first proposal
//! generation.

use std::collections::VecDeque;

use crate::candidate::Method;
use crate::config::DensityConfig;

/// Running density statistics over a detection session.
#[derive(Debug, Clone)]
pub struct DensityTracker {
    config: DensityConfig,
    /// Exponentially-weighted density per class (detections / m²).
    ew_density: Vec<f32>,
    /// Total density of the most recent images.
    window: VecDeque<f32>,
    /// Cumulative detection counts per class.
    counts: Vec<u64>,
    n_images: u64,
}

impl DensityTracker {
    pub fn new(n_classes: usize, config: DensityConfig) -> Self {
        Self {
            config,
            ew_density: vec![0.0; n_classes],
            window: VecDeque::new(),
            counts: vec![0; n_classes],
            n_images: 0,
        }
    }

    /// Record one finished image: per-class detection counts and the
    /// surveyed area in square meters.
    pub fn record_image(&mut self, class_counts: &[usize], area_m2: f32) {
        let area = area_m2.max(1e-6);
        let alpha = self.config.ew_alpha;
        let mut total = 0.0f32;
        for (class, &count) in class_counts.iter().enumerate().take(self.ew_density.len()) {
            let density = count as f32 / area;
            total += density;
            let ew = &mut self.ew_density[class];
            *ew = if self.n_images == 0 {
                density
            } else {
                alpha * density + (1.0 - alpha) * *ew
            };
            self.counts[class] += count as u64;
        }

        self.window.push_back(total);
        while self.window.len() > self.config.window {
            self.window.pop_front();
        }
        self.n_images += 1;

        tracing::debug!(
            "density update: image {} total {:.4}/m², window mean {:.4}/m²",
            self.n_images,
            total,
            self.window_mean()
        );
    }

    /// Exponentially-weighted density of one class.
    pub fn ew_density(&self, class: usize) -> f32 {
        self.ew_density.get(class).copied().unwrap_or(0.0)
    }

    /// Mean total density over the rolling window.
    pub fn window_mean(&self) -> f32 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f32>() / self.window.len() as f32
    }

    /// Cumulative per-class detection counts.
    pub fn total_counts(&self) -> &[u64] {
        &self.counts
    }

    /// Images recorded so far.
    pub fn n_images(&self) -> u64 {
        self.n_images
    }

    /// Generator strategy to favor for the next image.
    ///
    /// Sparse surveys rank blob proposals first: isolated organisms give the
    /// DoG detector its cleanest responses. Once recent density crosses the
    /// configured threshold the template generator takes the front of the
    /// queue, since its per-bin quota handles crowded frames better. `None`
    /// (default rank order) only before the first image.
    pub fn favored_method(&self) -> Option<Method> {
        if self.n_images == 0 {
            return None;
        }
        if self.window_mean() > self.config.favor_template_above {
            Some(Method::Template)
        } else {
            Some(Method::Blob)
        }
    }
}
