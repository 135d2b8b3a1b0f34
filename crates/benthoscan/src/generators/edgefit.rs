//! Edge-run circle fitting.
//!
//! Strong-gradient pixels are grouped into 8-connected runs; each run is
//! ordered around its centroid and circles are fitted through spaced
//! 3-point samples with the closed-form circumscribed-circle formula.
//! Fits are scored by mean-squared radial residual and the run's
//! coverage-to-radius ratio, and the top-N in-range fits survive.

use image::GrayImage;

use crate::candidate::{Candidate, Method};
use crate::config::{EdgeFitConfig, RadiusBand};
use crate::ellipse::{circle_from_three_points, Ellipse};

struct EdgeRun {
    /// Run pixels ordered by angle around the run centroid.
    pixels: Vec<(f32, f32)>,
}

/// Detect circle candidates from traced edge runs.
pub fn detect_edge_circles(
    gray: &GrayImage,
    band: &RadiusBand,
    band_slack: f32,
    config: &EdgeFitConfig,
) -> Vec<Candidate> {
    let (w, h) = gray.dimensions();
    if w < 8 || h < 8 {
        return Vec::new();
    }

    let gx = imageproc::gradients::horizontal_scharr(gray);
    let gy = imageproc::gradients::vertical_scharr(gray);
    let gx = gx.as_raw();
    let gy = gy.as_raw();

    let n = (w as usize) * (h as usize);
    let mut mag_sq = vec![0.0f32; n];
    let mut max_sq = 0.0f32;
    for i in 0..n {
        let m = (gx[i] as f32).powi(2) + (gy[i] as f32).powi(2);
        mag_sq[i] = m;
        if m > max_sq {
            max_sq = m;
        }
    }
    if max_sq <= 0.0 {
        return Vec::new();
    }
    let threshold_sq = (config.grad_threshold * config.grad_threshold) * max_sq;

    let runs = trace_runs(&mag_sq, w as usize, h as usize, threshold_sq, config.min_run_len);

    let mut fits: Vec<(f32, Candidate)> = Vec::new();
    for run in &runs {
        fit_run(run, band, band_slack, config, &mut fits);
    }

    // Keep the best top_n by score.
    fits.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
    fits.truncate(config.top_n);

    let out: Vec<Candidate> = fits.into_iter().map(|(_, c)| c).collect();
    tracing::debug!("edge-fit generator: {} candidates", out.len());
    out
}

/// Group strong-edge pixels into 8-connected runs.
fn trace_runs(
    mag_sq: &[f32],
    width: usize,
    height: usize,
    threshold_sq: f32,
    min_run_len: usize,
) -> Vec<EdgeRun> {
    let mut visited = vec![false; mag_sq.len()];
    let mut runs = Vec::new();
    let mut queue = Vec::new();

    for row in 0..height {
        for col in 0..width {
            let idx = row * width + col;
            if visited[idx] || mag_sq[idx] < threshold_sq {
                continue;
            }
            // Flood the 8-connected run from this pixel.
            let mut pixels = Vec::new();
            visited[idx] = true;
            queue.push((row, col));
            while let Some((r, c)) = queue.pop() {
                pixels.push((r as f32, c as f32));
                for dr in -1i32..=1 {
                    for dc in -1i32..=1 {
                        if dr == 0 && dc == 0 {
                            continue;
                        }
                        let nr = r as i32 + dr;
                        let nc = c as i32 + dc;
                        if nr < 0 || nc < 0 || nr >= height as i32 || nc >= width as i32 {
                            continue;
                        }
                        let nidx = nr as usize * width + nc as usize;
                        if !visited[nidx] && mag_sq[nidx] >= threshold_sq {
                            visited[nidx] = true;
                            queue.push((nr as usize, nc as usize));
                        }
                    }
                }
            }
            if pixels.len() < min_run_len {
                continue;
            }

            // Order along the curve by angle around the centroid; flood order
            // is arbitrary and would break spaced sampling.
            let inv = 1.0 / pixels.len() as f32;
            let (mr, mc) = pixels
                .iter()
                .fold((0.0, 0.0), |(ar, ac), (r, c)| (ar + r * inv, ac + c * inv));
            pixels.sort_by(|a, b| {
                let ta = (a.0 - mr).atan2(a.1 - mc);
                let tb = (b.0 - mr).atan2(b.1 - mc);
                ta.partial_cmp(&tb).unwrap()
            });
            runs.push(EdgeRun { pixels });
        }
    }
    runs
}

fn fit_run(
    run: &EdgeRun,
    band: &RadiusBand,
    band_slack: f32,
    config: &EdgeFitConfig,
    fits: &mut Vec<(f32, Candidate)>,
) {
    let len = run.pixels.len();
    let third = len / 3;
    if third == 0 {
        return;
    }

    for attempt in 0..config.fits_per_run.max(1) {
        // Rotate the three sample points through the ordered run.
        let offset = attempt * third / config.fits_per_run.max(1);
        let p1 = run.pixels[offset % len];
        let p2 = run.pixels[(offset + third) % len];
        let p3 = run.pixels[(offset + 2 * third) % len];

        // Collinear samples are a documented no-fit, not an error.
        let Some((row, col, radius)) = circle_from_three_points(p1, p2, p3) else {
            continue;
        };
        if !band.contains(radius, band_slack) {
            continue;
        }

        // Mean-squared radial residual over the whole run.
        let mut residual = 0.0f32;
        for &(r, c) in &run.pixels {
            let d = ((r - row).powi(2) + (c - col).powi(2)).sqrt() - radius;
            residual += d * d;
        }
        residual /= len as f32;
        if residual > config.max_residual {
            continue;
        }

        let coverage_ratio = len as f32 / radius;
        if coverage_ratio < config.min_coverage_ratio {
            continue;
        }

        let score = coverage_ratio / (1.0 + residual);
        fits.push((
            score,
            Candidate::new(Ellipse::circle(row, col, radius), Method::Edge, score),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn ring_image(w: u32, h: u32, cr: f32, cc: f32, radius: f32) -> GrayImage {
        let mut img = GrayImage::new(w, h);
        for row in 0..h {
            for col in 0..w {
                let dr = row as f32 - cr;
                let dc = col as f32 - cc;
                let d = (dr * dr + dc * dc).sqrt();
                let v = if d <= radius { 220u8 } else { 30u8 };
                img.put_pixel(col, row, Luma([v]));
            }
        }
        img
    }

    #[test]
    fn fits_circle_on_disk_boundary() {
        let (cr, cc, radius) = (40.0, 36.0, 12.0);
        let img = ring_image(80, 80, cr, cc, radius);
        let band = RadiusBand::new(8.0, 18.0);
        let config = EdgeFitConfig::default();

        let cands = detect_edge_circles(&img, &band, 1.5, &config);
        assert!(!cands.is_empty());
        let best = &cands[0];
        let err = ((best.ellipse.row - cr).powi(2) + (best.ellipse.col - cc).powi(2)).sqrt();
        assert!(err < 3.0, "center error {}", err);
        assert!((best.ellipse.major - radius).abs() < 3.0);
        assert_eq!(best.ellipse.major, best.ellipse.minor);
        assert_eq!(best.ellipse.angle, 0.0);
    }

    #[test]
    fn flat_image_produces_no_candidates() {
        let img = GrayImage::from_pixel(64, 64, Luma([128]));
        let band = RadiusBand::new(8.0, 18.0);
        assert!(detect_edge_circles(&img, &band, 1.5, &EdgeFitConfig::default()).is_empty());
    }

    #[test]
    fn out_of_band_circle_is_rejected() {
        let img = ring_image(80, 80, 40.0, 40.0, 30.0);
        let band = RadiusBand::new(5.0, 10.0);
        let cands = detect_edge_circles(&img, &band, 1.2, &EdgeFitConfig::default());
        for c in &cands {
            assert!(band.contains(c.ellipse.major, 1.2));
        }
    }
}
