//! Scale-pyramid radial-symmetry template detection.
//!
//! A bank of hypothesized radii (three octaves, geometrically spaced) is
//! swept over the combined response map. For each (pixel, radius) the
//! template evaluates directional gradients at fixed angles around the
//! hypothesized circle and accumulates the inward radial component; disk
//! boundaries answer strongly at their true radius. 3×3×3 scale-space maxima
//! become candidates, spatially binned per scale with a fixed per-bin quota
//! to bound output and enforce spread.

use std::collections::HashMap;

use crate::candidate::{Candidate, Method};
use crate::color::ResponseMaps;
use crate::config::{RadiusBand, TemplateConfig};
use crate::generators::combined_response;

struct GradientField {
    grad_r: Vec<f32>,
    grad_c: Vec<f32>,
    width: usize,
    height: usize,
}

impl GradientField {
    fn from_response(response: &[f32], width: usize, height: usize) -> Self {
        let mut grad_r = vec![0.0f32; response.len()];
        let mut grad_c = vec![0.0f32; response.len()];
        for row in 1..height.saturating_sub(1) {
            for col in 1..width.saturating_sub(1) {
                let idx = row * width + col;
                grad_r[idx] = 0.5 * (response[idx + width] - response[idx - width]);
                grad_c[idx] = 0.5 * (response[idx + 1] - response[idx - 1]);
            }
        }
        Self {
            grad_r,
            grad_c,
            width,
            height,
        }
    }

    /// Bilinear gradient sample; `None` outside the interior.
    #[inline]
    fn sample(&self, row: f32, col: f32) -> Option<(f32, f32)> {
        if row < 1.0 || col < 1.0 || row >= (self.height - 2) as f32 || col >= (self.width - 2) as f32
        {
            return None;
        }
        let r0 = row as usize;
        let c0 = col as usize;
        let fr = row - r0 as f32;
        let fc = col - c0 as f32;
        let base = r0 * self.width + c0;
        let lerp = |v: &[f32]| -> f32 {
            v[base] * (1.0 - fr) * (1.0 - fc)
                + v[base + 1] * (1.0 - fr) * fc
                + v[base + self.width] * fr * (1.0 - fc)
                + v[base + self.width + 1] * fr * fc
        };
        Some((lerp(&self.grad_r), lerp(&self.grad_c)))
    }
}

/// Radial-symmetry response of one (center, radius) hypothesis.
fn template_response(field: &GradientField, row: f32, col: f32, radius: f32, taps: &[(f32, f32)]) -> f32 {
    let mut sum = 0.0;
    for &(sin_t, cos_t) in taps {
        let sr = row + radius * sin_t;
        let sc = col + radius * cos_t;
        // A tap outside the image contributes nothing; the window is simply
        // truncated rather than the hypothesis rejected.
        if let Some((gr, gc)) = field.sample(sr, sc) {
            // Inward radial component: boundary gradients of a bright disk
            // point toward its center.
            sum += -(gr * sin_t + gc * cos_t);
        }
    }
    sum / taps.len() as f32
}

/// Detect candidates with the radial-symmetry template pyramid.
pub fn detect_template(
    maps: &ResponseMaps,
    band: &RadiusBand,
    config: &TemplateConfig,
) -> Vec<Candidate> {
    let response = combined_response(maps);
    let (w, h) = match maps.maps.first() {
        Some(m) => m.dimensions(),
        None => return Vec::new(),
    };
    let (width, height) = (w as usize, h as usize);
    if width < 8 || height < 8 {
        return Vec::new();
    }

    let n_scales = (config.n_octaves * config.radii_per_octave).max(3);
    let ratio = band.max_radius_px / band.min_radius_px.max(1.0e-3);
    let radii: Vec<f32> = (0..n_scales)
        .map(|i| band.min_radius_px * ratio.powf(i as f32 / (n_scales - 1) as f32))
        .collect();

    let taps: Vec<(f32, f32)> = (0..config.n_taps)
        .map(|k| {
            let t = std::f32::consts::TAU * k as f32 / config.n_taps as f32;
            t.sin_cos()
        })
        .collect();

    let field = GradientField::from_response(&response, width, height);

    // Dense response stack over (scale, row, col).
    let mut stack: Vec<Vec<f32>> = Vec::with_capacity(n_scales);
    for &radius in &radii {
        let mut level = vec![0.0f32; width * height];
        let margin = 1usize;
        for row in margin..height - margin {
            for col in margin..width - margin {
                level[row * width + col] =
                    template_response(&field, row as f32, col as f32, radius, &taps);
            }
        }
        stack.push(level);
    }

    // 3×3×3 maxima, spatially binned per scale with a per-bin quota.
    let mut bins: HashMap<(usize, i32, i32), Vec<(f32, usize, usize, f32)>> = HashMap::new();
    for s in 1..n_scales - 1 {
        let level = &stack[s];
        for row in 1..height - 1 {
            for col in 1..width - 1 {
                let idx = row * width + col;
                let v = level[idx];
                if v < config.min_response {
                    continue;
                }
                let mut is_max = true;
                'outer: for ds in -1i32..=1 {
                    let lvl = &stack[(s as i32 + ds) as usize];
                    for dr in -1i32..=1 {
                        for dc in -1i32..=1 {
                            if ds == 0 && dr == 0 && dc == 0 {
                                continue;
                            }
                            let nidx = ((row as i32 + dr) * width as i32 + col as i32 + dc) as usize;
                            if lvl[nidx] > v || (lvl[nidx] == v && (ds, dr, dc) < (0, 0, 0)) {
                                is_max = false;
                                break 'outer;
                            }
                        }
                    }
                }
                if !is_max {
                    continue;
                }

                // Parabolic radius interpolation along the scale axis.
                let v_lo = stack[s - 1][idx];
                let v_hi = stack[s + 1][idx];
                let denom = v_lo - 2.0 * v + v_hi;
                let ds = if denom.abs() > 1e-9 {
                    (0.5 * (v_lo - v_hi) / denom).clamp(-0.5, 0.5)
                } else {
                    0.0
                };
                let radius = if ds >= 0.0 {
                    radii[s] * (radii[s + 1] / radii[s]).powf(ds)
                } else {
                    radii[s] * (radii[s] / radii[s - 1]).powf(ds)
                };

                let bin_edge = (config.bin_size_frac * radii[s]).max(2.0);
                let key = (
                    s,
                    (row as f32 / bin_edge) as i32,
                    (col as f32 / bin_edge) as i32,
                );
                bins.entry(key).or_default().push((v, row, col, radius));
            }
        }
    }

    let mut out = Vec::new();
    for peaks in bins.values_mut() {
        peaks.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
        for &(v, row, col, radius) in peaks.iter().take(config.per_bin_quota) {
            out.push(Candidate::new(
                crate::ellipse::Ellipse::circle(row as f32, col as f32, radius),
                Method::Template,
                v,
            ));
        }
    }

    tracing::debug!("template generator: {} candidates", out.len());
    out
}
