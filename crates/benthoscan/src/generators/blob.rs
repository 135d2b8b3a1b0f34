//! Blob detection by difference-of-Gaussians scale-space extrema.
//!
//! A Gaussian pyramid is built over the per-class color response maps,
//! adjacent levels are differenced and summed across channels, and 3×3×3
//! (row, col, scale) local extrema are promoted to candidates after a bounded
//! Newton refinement on the local quadratic model.

use image::{ImageBuffer, Luma};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::candidate::{Candidate, Method};
use crate::color::ResponseMaps;
use crate::config::{BlobConfig, RadiusBand};
use crate::ellipse::Ellipse;

/// Which DoG extremum polarity to promote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExtremumMode {
    /// Dark blobs (scale-space minima) only.
    Minima,
    /// Bright blobs (scale-space maxima) only.
    Maxima,
    /// Both polarities.
    #[default]
    Both,
}

impl ExtremumMode {
    fn wants_maxima(self) -> bool {
        matches!(self, Self::Maxima | Self::Both)
    }

    fn wants_minima(self) -> bool {
        matches!(self, Self::Minima | Self::Both)
    }
}

struct DogStack {
    levels: Vec<Vec<f32>>,
    sigmas: Vec<f32>,
    width: usize,
    height: usize,
}

impl DogStack {
    #[inline]
    fn at(&self, level: usize, row: usize, col: usize) -> f32 {
        self.levels[level][row * self.width + col]
    }
}

/// Detect blob candidates in the summed-channel DoG scale space.
pub fn detect_blobs(
    maps: &ResponseMaps,
    band: &RadiusBand,
    band_slack: f32,
    config: &BlobConfig,
) -> Vec<Candidate> {
    let (w, h) = match maps.maps.first() {
        Some(m) => m.dimensions(),
        None => return Vec::new(),
    };
    if w < 8 || h < 8 || config.n_levels < 3 {
        return Vec::new();
    }

    let stack = build_dog_stack(maps, config, w, h);
    let mut out = Vec::new();

    let n_dog = stack.levels.len();
    for level in 1..n_dog.saturating_sub(1) {
        for row in 1..(stack.height - 1) {
            for col in 1..(stack.width - 1) {
                let v = stack.at(level, row, col);
                if v.abs() < config.min_magnitude {
                    continue;
                }
                // Polarity is gated by the DoG sign, not the neighborhood
                // shape: response maps are near zero outside objects, so a
                // bright blob is a positive excursion and a dark one
                // negative. A local maximum sitting below zero is background
                // ripple and is skipped even in Maxima mode.
                let is_max = v > 0.0 && config.mode.wants_maxima();
                let is_min = v < 0.0 && config.mode.wants_minima();
                if !is_max && !is_min {
                    continue;
                }
                if !is_local_extremum(&stack, level, row, col, v >= 0.0) {
                    continue;
                }

                // Sub-pixel / sub-scale refinement; divergence or leaving the
                // valid volume aborts this candidate, not the scan.
                let refined = match newton_refine(&stack, level, row, col, config.max_newton_iters)
                {
                    Some(r) => r,
                    None => continue,
                };
                let (rr, rc, rs, magnitude) = refined;

                let sigma = interp_sigma(&stack.sigmas, rs);
                let radius = sigma * std::f32::consts::SQRT_2 * config.radius_compensation;
                if !band.contains(radius, band_slack) {
                    continue;
                }

                out.push(Candidate::new(
                    Ellipse::circle(rr, rc, radius),
                    Method::Blob,
                    magnitude.abs(),
                ));
            }
        }
    }

    tracing::debug!("blob generator: {} candidates", out.len());
    out
}

fn build_dog_stack(maps: &ResponseMaps, config: &BlobConfig, w: u32, h: u32) -> DogStack {
    let mut sigmas = Vec::with_capacity(config.n_levels);
    let mut sigma = config.sigma0;
    for _ in 0..config.n_levels {
        sigmas.push(sigma);
        sigma *= config.sigma_step;
    }

    let n = (w as usize) * (h as usize);
    let mut dog: Vec<Vec<f32>> = vec![vec![0.0; n]; config.n_levels - 1];

    // Channel sum: each class map contributes its own DoG stack.
    for map in &maps.maps {
        let mut prev: Option<ImageBuffer<Luma<f32>, Vec<f32>>> = None;
        for (i, &s) in sigmas.iter().enumerate() {
            let blurred = imageproc::filter::gaussian_blur_f32(map, s);
            if let Some(p) = prev.take() {
                let acc = &mut dog[i - 1];
                // Fine minus coarse: bright blobs become scale-space maxima.
                for (d, (cur, pv)) in acc
                    .iter_mut()
                    .zip(blurred.as_raw().iter().zip(p.as_raw().iter()))
                {
                    *d += pv - cur;
                }
            }
            prev = Some(blurred);
        }
    }

    // DoG level i sits between sigma_i and sigma_{i+1}; use the geometric mean.
    let dog_sigmas: Vec<f32> = sigmas
        .windows(2)
        .map(|pair| (pair[0] * pair[1]).sqrt())
        .collect();

    DogStack {
        levels: dog,
        sigmas: dog_sigmas,
        width: w as usize,
        height: h as usize,
    }
}

fn is_local_extremum(stack: &DogStack, level: usize, row: usize, col: usize, maximum: bool) -> bool {
    let v = stack.at(level, row, col);
    for dl in -1i32..=1 {
        for dr in -1i32..=1 {
            for dc in -1i32..=1 {
                if dl == 0 && dr == 0 && dc == 0 {
                    continue;
                }
                let nv = stack.at(
                    (level as i32 + dl) as usize,
                    (row as i32 + dr) as usize,
                    (col as i32 + dc) as usize,
                );
                if (maximum && nv >= v) || (!maximum && nv <= v) {
                    return false;
                }
            }
        }
    }
    true
}

/// Bounded Newton step on the 3×3×3 quadratic model around an extremum.
///
/// Returns `(row, col, scale, value)` at the interpolated extremum, or `None`
/// on divergence (offset still > 1 after the budget), singular Hessians, or
/// stepping outside the valid scale-space volume.
fn newton_refine(
    stack: &DogStack,
    mut level: usize,
    mut row: usize,
    mut col: usize,
    max_iters: usize,
) -> Option<(f32, f32, f32, f32)> {
    for _ in 0..max_iters.max(1) {
        let in_bounds = level >= 1
            && level + 1 < stack.levels.len()
            && row >= 1
            && row + 1 < stack.height
            && col >= 1
            && col + 1 < stack.width;
        if !in_bounds {
            return None;
        }

        let v = stack.at(level, row, col);
        // Central differences: gradient and Hessian in (row, col, scale).
        let g = Vector3::new(
            0.5 * (stack.at(level, row + 1, col) - stack.at(level, row - 1, col)),
            0.5 * (stack.at(level, row, col + 1) - stack.at(level, row, col - 1)),
            0.5 * (stack.at(level + 1, row, col) - stack.at(level - 1, row, col)),
        );
        let h_rr = stack.at(level, row + 1, col) + stack.at(level, row - 1, col) - 2.0 * v;
        let h_cc = stack.at(level, row, col + 1) + stack.at(level, row, col - 1) - 2.0 * v;
        let h_ss = stack.at(level + 1, row, col) + stack.at(level - 1, row, col) - 2.0 * v;
        let h_rc = 0.25
            * (stack.at(level, row + 1, col + 1) - stack.at(level, row + 1, col - 1)
                - stack.at(level, row - 1, col + 1)
                + stack.at(level, row - 1, col - 1));
        let h_rs = 0.25
            * (stack.at(level + 1, row + 1, col) - stack.at(level + 1, row - 1, col)
                - stack.at(level - 1, row + 1, col)
                + stack.at(level - 1, row - 1, col));
        let h_cs = 0.25
            * (stack.at(level + 1, row, col + 1) - stack.at(level + 1, row, col - 1)
                - stack.at(level - 1, row, col + 1)
                + stack.at(level - 1, row, col - 1));
        let hessian = Matrix3::new(h_rr, h_rc, h_rs, h_rc, h_cc, h_cs, h_rs, h_cs, h_ss);

        let inv = hessian.try_inverse()?;
        let offset = -inv * g;
        if !offset.iter().all(|x| x.is_finite()) {
            return None;
        }

        if offset[0].abs() <= 0.5 && offset[1].abs() <= 0.5 && offset[2].abs() <= 0.5 {
            let value = v + 0.5 * g.dot(&offset);
            return Some((
                row as f32 + offset[0],
                col as f32 + offset[1],
                level as f32 + offset[2],
                value,
            ));
        }

        // Move to the neighboring sample and try again.
        row = (row as i32 + offset[0].round() as i32).try_into().ok()?;
        col = (col as i32 + offset[1].round() as i32).try_into().ok()?;
        level = (level as i32 + offset[2].round() as i32).try_into().ok()?;
    }

    // Out of iteration budget without settling inside one sample: divergent.
    None
}

fn interp_sigma(sigmas: &[f32], scale: f32) -> f32 {
    let lo = scale.floor().clamp(0.0, (sigmas.len() - 1) as f32) as usize;
    let hi = (lo + 1).min(sigmas.len() - 1);
    let t = (scale - lo as f32).clamp(0.0, 1.0);
    // Geometric interpolation between adjacent level sigmas.
    sigmas[lo].powf(1.0 - t) * sigmas[hi].powf(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::ResponseMaps;
    use image::GrayImage;

    fn disk_response(w: u32, h: u32, cr: f32, cc: f32, radius: f32, value: f32) -> ResponseMaps {
        let mut map = ImageBuffer::new(w, h);
        for row in 0..h {
            for col in 0..w {
                let dr = row as f32 - cr;
                let dc = col as f32 - cc;
                let v = if (dr * dr + dc * dc).sqrt() <= radius {
                    value
                } else {
                    0.0
                };
                map.put_pixel(col, row, Luma([v]));
            }
        }
        ResponseMaps {
            maps: vec![map],
            labels: GrayImage::new(w, h),
        }
    }

    #[test]
    fn finds_bright_disk_near_center() {
        let (cr, cc, radius) = (40.0, 44.0, 9.0);
        let maps = disk_response(90, 90, cr, cc, radius, 60.0);
        let band = RadiusBand::new(5.0, 16.0);
        let config = BlobConfig {
            sigma0: 2.5,
            sigma_step: 1.3,
            n_levels: 7,
            min_magnitude: 1.0,
            ..BlobConfig::default()
        };

        let cands = detect_blobs(&maps, &band, 1.5, &config);
        assert!(!cands.is_empty(), "should find the disk");

        let best = cands
            .iter()
            .max_by(|a, b| a.magnitude.partial_cmp(&b.magnitude).unwrap())
            .unwrap();
        let err = ((best.ellipse.row - cr).powi(2) + (best.ellipse.col - cc).powi(2)).sqrt();
        assert!(err < 4.0, "center error {} too large", err);
    }

    #[test]
    fn candidates_respect_band_and_axis_order() {
        let maps = disk_response(90, 90, 40.0, 44.0, 9.0, 60.0);
        let band = RadiusBand::new(5.0, 16.0);
        let slack = 1.5;
        let config = BlobConfig {
            sigma0: 2.0,
            sigma_step: 1.3,
            n_levels: 8,
            min_magnitude: 0.5,
            ..BlobConfig::default()
        };
        for c in detect_blobs(&maps, &band, slack, &config) {
            assert!(c.ellipse.minor <= c.ellipse.major);
            assert!(band.contains(c.ellipse.major, slack));
        }
    }

    #[test]
    fn minima_mode_ignores_bright_blobs() {
        let maps = disk_response(90, 90, 40.0, 44.0, 9.0, 60.0);
        let band = RadiusBand::new(5.0, 16.0);
        let config = BlobConfig {
            sigma0: 2.5,
            sigma_step: 1.3,
            n_levels: 7,
            min_magnitude: 1.0,
            mode: ExtremumMode::Minima,
            ..BlobConfig::default()
        };
        // A bright disk yields positive-center extrema; minima-only must not
        // report a strong candidate at the disk center.
        let cands = detect_blobs(&maps, &band, 1.5, &config);
        for c in &cands {
            let err = ((c.ellipse.row - 40.0).powi(2) + (c.ellipse.col - 44.0).powi(2)).sqrt();
            assert!(err > 3.0);
        }
    }

    #[test]
    fn maxima_mode_ignores_dark_blobs() {
        // A negative-response disk produces negative DoG excursions; the
        // sign gate must keep them out in maxima-only mode and report them
        // in minima mode.
        let maps = disk_response(90, 90, 40.0, 44.0, 9.0, -60.0);
        let band = RadiusBand::new(5.0, 16.0);
        let config = BlobConfig {
            sigma0: 2.5,
            sigma_step: 1.3,
            n_levels: 7,
            min_magnitude: 1.0,
            mode: ExtremumMode::Maxima,
            ..BlobConfig::default()
        };
        for c in detect_blobs(&maps, &band, 1.5, &config) {
            let err = ((c.ellipse.row - 40.0).powi(2) + (c.ellipse.col - 44.0).powi(2)).sqrt();
            assert!(err > 3.0);
        }

        let minima_config = BlobConfig {
            mode: ExtremumMode::Minima,
            ..config
        };
        let cands = detect_blobs(&maps, &band, 1.5, &minima_config);
        assert!(
            cands.iter().any(|c| {
                ((c.ellipse.row - 40.0).powi(2) + (c.ellipse.col - 44.0).powi(2)).sqrt() < 4.0
            }),
            "minima mode should report the dark disk"
        );
    }
}
