//! Feature extraction on candidate promotion.
//!
//! Computed once per candidate when it enters the cascade, grouped so that
//! individual groups stay inspectable. The flattened layout (size, color,
//! edge, HOG ring, HOG patch, texture) is part of the trained-model contract
//! and must not be reordered.

use crate::candidate::FeatureGroups;
use crate::color::{ResponseMap, ResponseMaps};
use crate::config::{FeatureConfig, RadiusBand};
use crate::ellipse::Ellipse;

/// Nearest-pixel read clamped to the image bounds.
fn value_at(map: &ResponseMap, row: f32, col: f32) -> f32 {
    let r = (row.round().max(0.0) as u32).min(map.height().saturating_sub(1));
    let c = (col.round().max(0.0) as u32).min(map.width().saturating_sub(1));
    map.get_pixel(c, r).0[0]
}

/// Central-difference gradient `(d/drow, d/dcol)` at a pixel.
fn gradient_at(map: &ResponseMap, row: f32, col: f32) -> (f32, f32) {
    let gr = 0.5 * (value_at(map, row + 1.0, col) - value_at(map, row - 1.0, col));
    let gc = 0.5 * (value_at(map, row, col + 1.0) - value_at(map, row, col - 1.0));
    (gr, gc)
}

/// Compute all feature groups for one candidate ellipse.
pub fn compute_features(
    gray: &ResponseMap,
    maps: &ResponseMaps,
    ellipse: &Ellipse,
    band: &RadiusBand,
    config: &FeatureConfig,
) -> FeatureGroups {
    FeatureGroups {
        size: size_features(ellipse, band),
        color: color_features(maps, ellipse, config),
        edge: edge_features(gray, ellipse, config),
        hog_ring: hog_block(gray, ellipse, config, true),
        hog_patch: hog_block(gray, ellipse, config, false),
        texture: texture_features(gray, ellipse),
    }
}

fn size_features(ellipse: &Ellipse, band: &RadiusBand) -> Vec<f32> {
    let span = (band.max_radius_px - band.min_radius_px).max(1e-6);
    vec![
        ellipse.major,
        ellipse.minor,
        ellipse.minor / ellipse.major.max(1e-6),
        ellipse.area(),
        ellipse.area() / (std::f32::consts::PI * band.max_radius_px * band.max_radius_px),
        ((ellipse.major - band.min_radius_px) / span).clamp(0.0, 1.0),
    ]
}

/// Per class-response map: mean inside, mean in the outer ring, and contrast.
fn color_features(maps: &ResponseMaps, ellipse: &Ellipse, config: &FeatureConfig) -> Vec<f32> {
    let mut out = Vec::with_capacity(3 * maps.maps.len());
    let inner: Vec<(f32, f32)> = scaled_boundary(ellipse, 0.6, config.n_boundary_samples);
    let outer: Vec<(f32, f32)> = scaled_boundary(ellipse, 1.4, config.n_boundary_samples);
    for map in &maps.maps {
        let mean_in = mean_value(map, &inner);
        let mean_out = mean_value(map, &outer);
        out.push(mean_in);
        out.push(mean_out);
        out.push(mean_in - mean_out);
    }
    out
}

fn scaled_boundary(ellipse: &Ellipse, scale: f32, n: usize) -> Vec<(f32, f32)> {
    let scaled = Ellipse {
        major: ellipse.major * scale,
        minor: ellipse.minor * scale,
        ..*ellipse
    };
    scaled.sample_boundary(n)
}

fn mean_value(map: &ResponseMap, points: &[(f32, f32)]) -> f32 {
    if points.is_empty() {
        return 0.0;
    }
    let sum: f32 = points.iter().map(|&(r, c)| value_at(map, r, c)).sum();
    sum / points.len() as f32
}

/// Gradient alignment with the outward boundary normal, plus magnitude stats.
fn edge_features(gray: &ResponseMap, ellipse: &Ellipse, config: &FeatureConfig) -> Vec<f32> {
    let points = ellipse.sample_boundary(config.n_boundary_samples);
    let mut align_sum = 0.0f32;
    let mut mag_sum = 0.0f32;
    let mut strong = 0usize;
    for &(r, c) in &points {
        let (gr, gc) = gradient_at(gray, r, c);
        let mag = (gr * gr + gc * gc).sqrt();
        // Outward normal of a circle approximation; good enough for the
        // near-circular shapes this pipeline targets.
        let nr = r - ellipse.row;
        let nc = c - ellipse.col;
        let nlen = (nr * nr + nc * nc).sqrt().max(1e-6);
        align_sum += (gr * nr + gc * nc).abs() / (mag * nlen).max(1e-6);
        mag_sum += mag;
        if mag > 1e-3 {
            strong += 1;
        }
    }
    let n = points.len().max(1) as f32;
    vec![align_sum / n, mag_sum / n, strong as f32 / n]
}

/// Magnitude-weighted orientation histogram, L1 normalized.
///
/// `ring` restricts samples to the band around the boundary; otherwise the
/// enclosing axis-aligned patch is used.
fn hog_block(gray: &ResponseMap, ellipse: &Ellipse, config: &FeatureConfig, ring: bool) -> Vec<f32> {
    let mut hist = vec![0.0f32; config.hog_bins.max(1)];
    let r0 = (ellipse.row - ellipse.major).floor().max(0.0) as i64;
    let r1 = (ellipse.row + ellipse.major).ceil() as i64;
    let c0 = (ellipse.col - ellipse.major).floor().max(0.0) as i64;
    let c1 = (ellipse.col + ellipse.major).ceil() as i64;

    for row in r0..=r1 {
        for col in c0..=c1 {
            if row < 0
                || col < 0
                || row >= gray.height() as i64
                || col >= gray.width() as i64
            {
                continue;
            }
            let (fr, fc) = (row as f32, col as f32);
            if ring {
                let dr = fr - ellipse.row;
                let dc = fc - ellipse.col;
                let dist = (dr * dr + dc * dc).sqrt();
                let rel = dist / ellipse.major.max(1e-6);
                if (rel - 1.0).abs() > config.ring_band_frac {
                    continue;
                }
            }
            let (gr, gc) = gradient_at(gray, fr, fc);
            let mag = (gr * gr + gc * gc).sqrt();
            if mag < 1e-6 {
                continue;
            }
            // Unsigned orientation in [0, π).
            let mut theta = gr.atan2(gc);
            if theta < 0.0 {
                theta += std::f32::consts::PI;
            }
            let last = hist.len() - 1;
            let bin = ((theta / std::f32::consts::PI) * hist.len() as f32) as usize;
            hist[bin.min(last)] += mag;
        }
    }

    let total: f32 = hist.iter().sum();
    if total > 1e-6 {
        for h in &mut hist {
            *h /= total;
        }
    }
    hist
}

/// Intensity mean/variance and gradient energy over the enclosing patch.
fn texture_features(gray: &ResponseMap, ellipse: &Ellipse) -> Vec<f32> {
    let r0 = (ellipse.row - ellipse.major).floor().max(0.0) as u32;
    let r1 = ((ellipse.row + ellipse.major).ceil() as u32).min(gray.height().saturating_sub(1));
    let c0 = (ellipse.col - ellipse.major).floor().max(0.0) as u32;
    let c1 = ((ellipse.col + ellipse.major).ceil() as u32).min(gray.width().saturating_sub(1));

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut grad_energy = 0.0f64;
    let mut n = 0usize;
    for row in r0..=r1 {
        for col in c0..=c1 {
            let v = gray.get_pixel(col, row).0[0];
            sum += v as f64;
            sum_sq += (v as f64) * (v as f64);
            let (gr, gc) = gradient_at(gray, row as f32, col as f32);
            grad_energy += (gr * gr + gc * gc) as f64;
            n += 1;
        }
    }
    if n == 0 {
        return vec![0.0, 0.0, 0.0];
    }
    let mean = sum / n as f64;
    let var = (sum_sq / n as f64 - mean * mean).max(0.0);
    vec![mean as f32, var as f32, (grad_energy / n as f64) as f32]
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer};

    fn flat_map(width: u32, height: u32, fill: f32) -> ResponseMap {
        ImageBuffer::from_pixel(width, height, image::Luma([fill]))
    }

    fn disk_map(width: u32, height: u32, row: f32, col: f32, radius: f32) -> ResponseMap {
        ImageBuffer::from_fn(width, height, |c, r| {
            let d = ((r as f32 - row).powi(2) + (c as f32 - col).powi(2)).sqrt();
            image::Luma([if d <= radius { 1.0 } else { 0.0 }])
        })
    }

    fn maps_of(map: ResponseMap) -> ResponseMaps {
        let labels = GrayImage::new(map.width(), map.height());
        ResponseMaps {
            maps: vec![map],
            labels,
        }
    }

    #[test]
    fn feature_layout_is_stable() {
        let gray = flat_map(64, 64, 0.5);
        let maps = maps_of(flat_map(64, 64, 0.0));
        let config = FeatureConfig::default();
        let band = RadiusBand::new(5.0, 20.0);
        let e = Ellipse::circle(32.0, 32.0, 10.0);
        let groups = compute_features(&gray, &maps, &e, &band, &config);

        assert_eq!(groups.size.len(), 6);
        assert_eq!(groups.color.len(), 3 * maps.maps.len());
        assert_eq!(groups.edge.len(), 3);
        assert_eq!(groups.hog_ring.len(), config.hog_bins);
        assert_eq!(groups.hog_patch.len(), config.hog_bins);
        assert_eq!(groups.texture.len(), 3);
        let flat = groups.flatten();
        assert_eq!(
            flat.len(),
            6 + 3 * maps.maps.len() + 3 + 2 * config.hog_bins + 3
        );
    }

    #[test]
    fn color_contrast_is_positive_inside_a_bright_disk() {
        let gray = flat_map(96, 96, 0.5);
        let maps = maps_of(disk_map(96, 96, 48.0, 48.0, 12.0));
        let config = FeatureConfig::default();
        let band = RadiusBand::new(5.0, 30.0);
        let e = Ellipse::circle(48.0, 48.0, 12.0);
        let groups = compute_features(&gray, &maps, &e, &band, &config);
        // [mean_in, mean_out, contrast] for the single map.
        assert!(groups.color[0] > groups.color[1]);
        assert!(groups.color[2] > 0.2);
    }

    #[test]
    fn edge_alignment_high_on_a_disk_boundary() {
        let gray = disk_map(96, 96, 48.0, 48.0, 14.0);
        let maps = maps_of(flat_map(96, 96, 0.0));
        let config = FeatureConfig::default();
        let band = RadiusBand::new(5.0, 30.0);
        let e = Ellipse::circle(48.0, 48.0, 14.0);
        let on = compute_features(&gray, &maps, &e, &band, &config);

        let off = Ellipse::circle(20.0, 70.0, 8.0);
        let away = compute_features(&gray, &maps, &off, &band, &config);
        // Mean gradient magnitude on the true boundary beats flat background.
        assert!(on.edge[1] > away.edge[1]);
    }

    #[test]
    fn flat_patch_has_zero_variance() {
        let gray = flat_map(64, 64, 0.7);
        let e = Ellipse::circle(32.0, 32.0, 10.0);
        let t = texture_features(&gray, &e);
        assert!((t[0] - 0.7).abs() < 1e-4);
        assert!(t[1] < 1e-6);
    }
}
