//! Survivor edge refinement.
//!
//! Cascade survivors get one geometry polish before suppression: radial rays
//! cast from the candidate center locate the strongest intensity step within
//! a band around the hypothesized radius, and the sub-pixel edge points are
//! refit to an ellipse. Candidates without enough edge support are
//! deactivated rather than reported with stale geometry.

use crate::candidate::Candidate;
use crate::color::ResponseMap;
use crate::config::RefineConfig;
use crate::ellipse::Ellipse;

/// Bilinear sample; `None` outside the valid interpolation area.
fn sample(map: &ResponseMap, row: f32, col: f32) -> Option<f32> {
    if row < 0.0 || col < 0.0 {
        return None;
    }
    let (r0, c0) = (row.floor() as u32, col.floor() as u32);
    if r0 + 1 >= map.height() || c0 + 1 >= map.width() {
        return None;
    }
    let (fr, fc) = (row - r0 as f32, col - c0 as f32);
    let v00 = map.get_pixel(c0, r0).0[0];
    let v01 = map.get_pixel(c0 + 1, r0).0[0];
    let v10 = map.get_pixel(c0, r0 + 1).0[0];
    let v11 = map.get_pixel(c0 + 1, r0 + 1).0[0];
    Some(
        v00 * (1.0 - fr) * (1.0 - fc)
            + v01 * (1.0 - fr) * fc
            + v10 * fr * (1.0 - fc)
            + v11 * fr * fc,
    )
}

/// Ellipse radius along a ray at absolute angle `theta` (row/col frame).
fn radius_towards(ellipse: &Ellipse, theta: f32) -> f32 {
    let phi = theta - ellipse.angle;
    let (s, c) = phi.sin_cos();
    let a = ellipse.major;
    let b = ellipse.minor;
    (a * b) / ((b * c).powi(2) + (a * s).powi(2)).sqrt().max(1e-6)
}

/// Strongest intensity-step location along one ray, sub-pixel.
///
/// Samples the profile at `r_step` spacing between `expected / slack` and
/// `expected * slack`, differentiates it, and parabolically interpolates
/// around the strongest derivative. `None` when every step is weaker than
/// `min_gradient` or the ray leaves the image.
fn edge_along_ray(
    map: &ResponseMap,
    center_row: f32,
    center_col: f32,
    theta: f32,
    expected: f32,
    config: &RefineConfig,
) -> Option<(f32, f32)> {
    let (dr, dc) = theta.sin_cos();
    let r_lo = expected / config.band_slack;
    let r_hi = expected * config.band_slack;
    let n = ((r_hi - r_lo) / config.r_step).ceil() as usize + 1;
    if n < 3 {
        return None;
    }

    let mut profile = Vec::with_capacity(n);
    for i in 0..n {
        let r = r_lo + i as f32 * config.r_step;
        profile.push(sample(map, center_row + r * dr, center_col + r * dc)?);
    }

    let mut best_i = 0usize;
    let mut best_step = 0.0f32;
    for i in 1..n - 1 {
        let step = 0.5 * (profile[i + 1] - profile[i - 1]).abs() / config.r_step;
        if step > best_step {
            best_step = step;
            best_i = i;
        }
    }
    if best_step < config.min_gradient {
        return None;
    }

    // Parabolic sub-sample refinement over the derivative magnitudes.
    let d = |i: usize| 0.5 * (profile[i + 1] - profile[i - 1]).abs();
    let offset = if best_i > 1 && best_i < n - 2 {
        let (dm, d0, dp) = (d(best_i - 1), d(best_i), d(best_i + 1));
        let denom = dm - 2.0 * d0 + dp;
        if denom.abs() > 1e-6 {
            (0.5 * (dm - dp) / denom).clamp(-0.5, 0.5)
        } else {
            0.0
        }
    } else {
        0.0
    };

    let r = r_lo + (best_i as f32 + offset) * config.r_step;
    Some((center_row + r * dr, center_col + r * dc))
}

/// Refit an ellipse to boundary points via second moments.
///
/// For points spread over a full boundary the eigenvalues of the covariance
/// are half the squared semi-axes, so `axis = sqrt(2 * lambda)`.
fn fit_boundary_points(points: &[(f32, f32)]) -> Option<Ellipse> {
    let n = points.len() as f32;
    if points.len() < 5 {
        return None;
    }
    let (mut mr, mut mc) = (0.0f32, 0.0f32);
    for &(r, c) in points {
        mr += r;
        mc += c;
    }
    mr /= n;
    mc /= n;

    let (mut srr, mut scc, mut src) = (0.0f32, 0.0f32, 0.0f32);
    for &(r, c) in points {
        let (dr, dc) = (r - mr, c - mc);
        srr += dr * dr;
        scc += dc * dc;
        src += dr * dc;
    }
    srr /= n;
    scc /= n;
    src /= n;

    let trace_half = 0.5 * (srr + scc);
    let det = srr * scc - src * src;
    let disc = (trace_half * trace_half - det).max(0.0).sqrt();
    let l_major = trace_half + disc;
    let l_minor = (trace_half - disc).max(0.0);
    if l_minor <= 1e-6 {
        return None;
    }

    let angle = 0.5 * (2.0 * src).atan2(scc - srr);
    Some(
        Ellipse {
            row: mr,
            col: mc,
            major: (2.0 * l_major).sqrt(),
            minor: (2.0 * l_minor).sqrt(),
            angle,
        }
        .canonicalized(),
    )
}

/// Refine one candidate's geometry against the grayscale image.
///
/// Returns `false` when edge support was insufficient and the candidate was
/// deactivated.
pub fn refine_candidate(gray: &ResponseMap, candidate: &mut Candidate, config: &RefineConfig) -> bool {
    let e = candidate.ellipse;
    let mut points = Vec::with_capacity(config.n_rays);
    for k in 0..config.n_rays {
        let theta = 2.0 * std::f32::consts::PI * k as f32 / config.n_rays as f32;
        let expected = radius_towards(&e, theta);
        if let Some(p) = edge_along_ray(gray, e.row, e.col, theta, expected, config) {
            points.push(p);
        }
    }

    if points.len() < config.min_edge_points {
        candidate.deactivate();
        return false;
    }
    match fit_boundary_points(&points) {
        Some(refined) if refined.is_valid() => {
            candidate.ellipse = refined;
            true
        }
        _ => {
            candidate.deactivate();
            false
        }
    }
}

/// Refine every active candidate in place; returns the survivor count.
pub fn refine_survivors(gray: &ResponseMap, arena: &mut [Candidate], config: &RefineConfig) -> usize {
    let mut kept = 0usize;
    let mut dropped = 0usize;
    for cand in arena.iter_mut().filter(|c| c.active) {
        if refine_candidate(gray, cand, config) {
            kept += 1;
        } else {
            dropped += 1;
        }
    }
    if dropped > 0 {
        tracing::debug!("edge refinement dropped {} of {} survivors", dropped, kept + dropped);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Method;
    use image::ImageBuffer;

    fn disk_image(size: u32, row: f32, col: f32, radius: f32) -> ResponseMap {
        // Sigmoid edge in u8 intensity range so the gradient peaks on the
        // true boundary well above the default threshold.
        ImageBuffer::from_fn(size, size, |c, r| {
            let d = ((r as f32 - row).powi(2) + (c as f32 - col).powi(2)).sqrt();
            image::Luma([255.0 / (1.0 + ((d - radius) / 0.8).exp())])
        })
    }

    #[test]
    fn refinement_recovers_the_true_radius() {
        let image = disk_image(128, 64.0, 64.0, 20.0);
        // Start from a deliberately off geometry.
        let mut cand = Candidate::new(Ellipse::circle(63.0, 65.0, 17.0), Method::Blob, 1.0);
        let config = RefineConfig::default();
        assert!(refine_candidate(&image, &mut cand, &config));
        assert!((cand.ellipse.row - 64.0).abs() < 1.0);
        assert!((cand.ellipse.col - 64.0).abs() < 1.0);
        assert!((cand.ellipse.major - 20.0).abs() < 1.5);
    }

    #[test]
    fn flat_image_deactivates_the_candidate() {
        let image: ResponseMap = ImageBuffer::from_pixel(64, 64, image::Luma([0.5]));
        let mut cand = Candidate::new(Ellipse::circle(32.0, 32.0, 10.0), Method::Blob, 1.0);
        let config = RefineConfig::default();
        assert!(!refine_candidate(&image, &mut cand, &config));
        assert!(!cand.active);
    }

    #[test]
    fn boundary_fit_reproduces_a_circle() {
        let e = Ellipse::circle(40.0, 50.0, 12.0);
        let points = e.sample_boundary(48);
        let fit = fit_boundary_points(&points).unwrap();
        assert!((fit.row - 40.0).abs() < 0.1);
        assert!((fit.col - 50.0).abs() < 0.1);
        assert!((fit.major - 12.0).abs() < 0.2);
        assert!((fit.minor - 12.0).abs() < 0.2);
    }

    #[test]
    fn boundary_fit_recovers_orientation() {
        let e = Ellipse {
            row: 30.0,
            col: 30.0,
            major: 15.0,
            minor: 7.0,
            angle: 0.5,
        };
        let points = e.sample_boundary(96);
        let fit = fit_boundary_points(&points).unwrap();
        assert!((fit.major - 15.0).abs() < 0.5);
        assert!((fit.minor - 7.0).abs() < 0.5);
        assert!(fit.axis_angle_diff(&e) < 0.05);
    }
}
