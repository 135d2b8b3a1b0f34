//! Greedy overlap suppression of classified detections.
//!
//! Detections are visited in descending confidence order; each one is kept
//! only if its circular overlap with every already-kept detection stays at
//! or below [`MAX_KEPT_OVERLAP`]. The metric treats both shapes as circles
//! of their major radii, so elongated pairs are suppressed conservatively.

use crate::candidate::Detection;

/// Maximum tolerated pairwise overlap between two kept detections.
pub const MAX_KEPT_OVERLAP: f32 = 0.25;

/// Circular overlap of two detections, normalized to the smaller circle.
///
/// `(r + R - d) / (2 * min(r, R))` clamped to `[0, 1]`. Concentric circles
/// score 1.0 regardless of radii; disjoint circles score 0.0. Symmetric in
/// its arguments.
pub fn circle_overlap(
    row_a: f32,
    col_a: f32,
    radius_a: f32,
    row_b: f32,
    col_b: f32,
    radius_b: f32,
) -> f32 {
    let d = ((row_a - row_b).powi(2) + (col_a - col_b).powi(2)).sqrt();
    if d < 1e-6 {
        return 1.0;
    }
    if d >= radius_a + radius_b {
        return 0.0;
    }
    let smaller = radius_a.min(radius_b).max(1e-6);
    ((radius_a + radius_b - d) / (2.0 * smaller)).clamp(0.0, 1.0)
}

fn detection_overlap(a: &Detection, b: &Detection) -> f32 {
    circle_overlap(
        a.ellipse.row,
        a.ellipse.col,
        a.ellipse.major,
        b.ellipse.row,
        b.ellipse.col,
        b.ellipse.major,
    )
}

/// Suppress overlapping detections, keeping the most confident of each
/// overlapping group. Input order does not matter.
pub fn suppress_overlaps(mut detections: Vec<Detection>) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    let mut n_dropped = 0usize;
    for det in detections {
        let clear = kept
            .iter()
            .all(|k| detection_overlap(k, &det) <= MAX_KEPT_OVERLAP);
        if clear {
            kept.push(det);
        } else {
            n_dropped += 1;
        }
    }

    if n_dropped > 0 {
        tracing::debug!("suppressed {} overlapping detections", n_dropped);
    }
    kept
}
