//! Adaptive-threshold contour detection.
//!
//! Percentile thresholds of the combined response map are explored by
//! bisection over a small fixed table. Each attempt binarizes the map,
//! labels connected components with a union-find pass, and fits an ellipse
//! per in-range component from its area moments. The verdict of each attempt
//! (threshold too low / segmented cleanly / nothing segmented) steers which
//! half of the table is explored next; the search terminates when the table
//! is exhausted, not on convergence.

use crate::candidate::{Candidate, Method};
use crate::color::ResponseMaps;
use crate::config::{AdaptiveConfig, RadiusBand};
use crate::ellipse::ellipse_from_moments;
use crate::generators::{combined_response, quantile};

/// Disjoint-set forest with path halving and union by rank.
struct UnionFind {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size as u32).collect(),
            rank: vec![0; size],
        }
    }

    #[inline]
    fn find(&mut self, i: u32) -> u32 {
        let mut root = i;
        while self.parent[root as usize] != root {
            self.parent[root as usize] = self.parent[self.parent[root as usize] as usize];
            root = self.parent[root as usize];
        }
        root
    }

    #[inline]
    fn union(&mut self, i: u32, j: u32) {
        let ri = self.find(i);
        let rj = self.find(j);
        if ri == rj {
            return;
        }
        match self.rank[ri as usize].cmp(&self.rank[rj as usize]) {
            std::cmp::Ordering::Less => self.parent[ri as usize] = rj,
            std::cmp::Ordering::Greater => self.parent[rj as usize] = ri,
            std::cmp::Ordering::Equal => {
                self.parent[ri as usize] = rj;
                self.rank[rj as usize] += 1;
            }
        }
    }
}

/// Running moment sums for one connected component.
#[derive(Clone, Copy, Default)]
struct ComponentMoments {
    count: u64,
    sum_r: f64,
    sum_c: f64,
    sum_rr: f64,
    sum_cc: f64,
    sum_rc: f64,
    response: f64,
}

/// Outcome of one binarization attempt.
struct AttemptOutcome {
    candidates: Vec<Candidate>,
    too_low: bool,
}

/// Detect candidates by adaptive-threshold contour extraction.
pub fn detect_adaptive(
    maps: &ResponseMaps,
    band: &RadiusBand,
    band_slack: f32,
    config: &AdaptiveConfig,
) -> Vec<Candidate> {
    let response = combined_response(maps);
    let (w, h) = match maps.maps.first() {
        Some(m) => m.dimensions(),
        None => return Vec::new(),
    };
    if response.is_empty() || config.percentile_table.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();

    // Explicit worklist of inclusive table-index intervals instead of
    // recursion; each index is visited at most once.
    let mut worklist: Vec<(usize, usize)> = vec![(0, config.percentile_table.len() - 1)];
    while let Some((lo, hi)) = worklist.pop() {
        if lo > hi {
            continue;
        }
        let mid = lo + (hi - lo) / 2;
        let threshold = quantile(&response, config.percentile_table[mid]);
        let attempt = binarize_and_fit(
            &response,
            w as usize,
            h as usize,
            threshold,
            band,
            band_slack,
            config,
        );

        let found_in_range = !attempt.candidates.is_empty();
        out.extend(attempt.candidates);

        if attempt.too_low || found_in_range {
            // Threshold admitted too much, or segmented cleanly; either way
            // a tighter threshold may still separate more structure.
            if mid < hi {
                worklist.push((mid + 1, hi));
            }
        } else if mid > lo {
            // Nothing segmented at all: relax toward lower percentiles.
            worklist.push((lo, mid - 1));
        }
    }

    tracing::debug!("adaptive generator: {} candidates", out.len());
    out
}

fn binarize_and_fit(
    response: &[f32],
    width: usize,
    height: usize,
    threshold: f32,
    band: &RadiusBand,
    band_slack: f32,
    config: &AdaptiveConfig,
) -> AttemptOutcome {
    let n = width * height;
    let mut uf = UnionFind::new(n);
    let above = |idx: usize| response[idx] > threshold;

    // Single raster pass, 8-connected: union with the west and the three
    // northern neighbors.
    for row in 0..height {
        for col in 0..width {
            let idx = row * width + col;
            if !above(idx) {
                continue;
            }
            if col > 0 && above(idx - 1) {
                uf.union(idx as u32, (idx - 1) as u32);
            }
            if row > 0 {
                let up = idx - width;
                if above(up) {
                    uf.union(idx as u32, up as u32);
                }
                if col > 0 && above(up - 1) {
                    uf.union(idx as u32, (up - 1) as u32);
                }
                if col + 1 < width && above(up + 1) {
                    uf.union(idx as u32, (up + 1) as u32);
                }
            }
        }
    }

    // Accumulate per-root moments.
    let mut moments: std::collections::HashMap<u32, ComponentMoments> =
        std::collections::HashMap::new();
    for row in 0..height {
        for col in 0..width {
            let idx = row * width + col;
            if !above(idx) {
                continue;
            }
            let root = uf.find(idx as u32);
            let m = moments.entry(root).or_default();
            m.count += 1;
            m.sum_r += row as f64;
            m.sum_c += col as f64;
            m.sum_rr += (row * row) as f64;
            m.sum_cc += (col * col) as f64;
            m.sum_rc += (row * col) as f64;
            m.response += response[idx] as f64;
        }
    }

    let max_area = std::f32::consts::PI
        * (band.max_radius_px * band_slack)
        * (band.max_radius_px * band_slack);
    let mut small_components = 0usize;
    let mut oversized = false;
    let mut candidates = Vec::new();

    if moments.len() > config.max_components {
        // Hopeless segmentation; classify as too low and bail out of fitting.
        return AttemptOutcome {
            candidates,
            too_low: true,
        };
    }

    for m in moments.values() {
        if (m.count as usize) < config.min_component_area {
            small_components += 1;
            continue;
        }
        if m.count as f32 > max_area {
            oversized = true;
            continue;
        }

        let inv = 1.0 / m.count as f64;
        let mean_r = m.sum_r * inv;
        let mean_c = m.sum_c * inv;
        let mu_rr = (m.sum_rr * inv - mean_r * mean_r) as f32;
        let mu_cc = (m.sum_cc * inv - mean_c * mean_c) as f32;
        let mu_rc = (m.sum_rc * inv - mean_r * mean_c) as f32;

        // Degenerate moments fall through as a skipped candidate, not an error.
        let Some(ellipse) = ellipse_from_moments(mean_r as f32, mean_c as f32, mu_rr, mu_cc, mu_rc)
        else {
            continue;
        };
        if !ellipse.is_valid() || !band.contains(ellipse.major, band_slack) {
            continue;
        }

        let magnitude = (m.response * inv) as f32;
        candidates.push(Candidate::new(ellipse, Method::Adaptive, magnitude));
    }

    AttemptOutcome {
        candidates,
        too_low: small_components > config.max_small_components || oversized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageBuffer, Luma};

    fn response_with_disk(
        w: u32,
        h: u32,
        cr: f32,
        cc: f32,
        radius: f32,
        object: f32,
        floor: f32,
    ) -> ResponseMaps {
        let mut map = ImageBuffer::new(w, h);
        for row in 0..h {
            for col in 0..w {
                let dr = row as f32 - cr;
                let dc = col as f32 - cc;
                let v = if (dr * dr + dc * dc).sqrt() <= radius {
                    object
                } else {
                    floor
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
    fn segments_disk_within_band() {
        let maps = response_with_disk(80, 80, 40.0, 40.0, 10.0, 10.0, 0.0);
        let band = RadiusBand::new(6.0, 16.0);
        let cands = detect_adaptive(&maps, &band, 1.5, &AdaptiveConfig::default());
        assert!(!cands.is_empty());
        let best = &cands[0];
        assert!((best.ellipse.row - 40.0).abs() < 2.0);
        assert!((best.ellipse.col - 40.0).abs() < 2.0);
        assert!((best.ellipse.major - 10.0).abs() < 3.0);
        assert!(best.ellipse.minor <= best.ellipse.major);
    }

    #[test]
    fn raise_branch_finds_disk_invisible_at_low_percentile() {
        // Background ramps across columns, so low and mid percentiles merge
        // the disk into one oversized component; only the top percentiles
        // isolate it.
        let mut map = ImageBuffer::new(80, 80);
        for row in 0..80u32 {
            for col in 0..80u32 {
                let dr = row as f32 - 30.0;
                let dc = col as f32 - 50.0;
                let v = if (dr * dr + dc * dc).sqrt() <= 9.0 {
                    20.0
                } else {
                    10.0 * col as f32 / 79.0
                };
                map.put_pixel(col, row, Luma([v]));
            }
        }
        let maps = ResponseMaps {
            maps: vec![map],
            labels: GrayImage::new(80, 80),
        };
        let band = RadiusBand::new(6.0, 14.0);
        let config = AdaptiveConfig {
            percentile_table: vec![0.0, 0.3, 0.5, 0.7, 0.9, 0.97],
            ..AdaptiveConfig::default()
        };
        let cands = detect_adaptive(&maps, &band, 1.5, &config);
        assert!(
            cands.iter().any(|c| {
                (c.ellipse.row - 30.0).abs() < 2.0 && (c.ellipse.col - 50.0).abs() < 2.0
            }),
            "raise branch should reach a percentile that isolates the disk"
        );
    }

    #[test]
    fn empty_map_yields_no_candidates() {
        let maps = response_with_disk(40, 40, 20.0, 20.0, 0.0, 0.0, 0.0);
        let band = RadiusBand::new(4.0, 10.0);
        assert!(detect_adaptive(&maps, &band, 1.5, &AdaptiveConfig::default()).is_empty());
    }
}
