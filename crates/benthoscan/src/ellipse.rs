//! Core ellipse geometry shared by all pipeline stages.
//!
//! Coordinates follow image convention: `row` grows downward, `col` grows
//! rightward. Angles are measured from the +col axis toward +row, in radians,
//! normalized to (−π/2, π/2].

use serde::{Deserialize, Serialize};

/// Geometric ellipse in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    /// Center row (sub-pixel).
    pub row: f32,
    /// Center column (sub-pixel).
    pub col: f32,
    /// Semi-major axis in pixels.
    pub major: f32,
    /// Semi-minor axis in pixels.
    pub minor: f32,
    /// Rotation of the major axis in radians, (−π/2, π/2].
    pub angle: f32,
}

impl Ellipse {
    /// Axis-aligned circle shorthand.
    pub fn circle(row: f32, col: f32, radius: f32) -> Self {
        Self {
            row,
            col,
            major: radius,
            minor: radius,
            angle: 0.0,
        }
    }

    /// Basic validity: finite values, `major >= minor > 0`.
    pub fn is_valid(&self) -> bool {
        self.minor > 0.0
            && self.major >= self.minor
            && self.row.is_finite()
            && self.col.is_finite()
            && self.major.is_finite()
            && self.angle.is_finite()
    }

    /// Axis ratio `major / minor` (>= 1 for a canonical ellipse).
    pub fn aspect_ratio(&self) -> f32 {
        if self.minor > 0.0 {
            self.major / self.minor
        } else {
            f32::INFINITY
        }
    }

    /// Enclosed area in square pixels.
    pub fn area(&self) -> f32 {
        std::f32::consts::PI * self.major * self.minor
    }

    /// Return a copy with `major >= minor` and the angle normalized.
    pub fn canonicalized(&self) -> Self {
        let (major, minor, angle) = if self.major >= self.minor {
            (self.major, self.minor, self.angle)
        } else {
            (
                self.minor,
                self.major,
                self.angle + std::f32::consts::FRAC_PI_2,
            )
        };
        Self {
            row: self.row,
            col: self.col,
            major,
            minor,
            angle: normalize_angle(angle),
        }
    }

    /// Euclidean center distance to another ellipse.
    pub fn center_distance(&self, other: &Ellipse) -> f32 {
        let dr = self.row - other.row;
        let dc = self.col - other.col;
        (dr * dr + dc * dc).sqrt()
    }

    /// Whether `(row, col)` lies inside the ellipse boundary.
    pub fn contains(&self, row: f32, col: f32) -> bool {
        let (sin_a, cos_a) = self.angle.sin_cos();
        let dr = row - self.row;
        let dc = col - self.col;
        // Rotate into the ellipse frame (u along major axis).
        let u = dc * cos_a + dr * sin_a;
        let v = -dc * sin_a + dr * cos_a;
        let mu = u / self.major;
        let mv = v / self.minor;
        mu * mu + mv * mv <= 1.0
    }

    /// Sample `n` points on the boundary, returned as `(row, col)` pairs.
    pub fn sample_boundary(&self, n: usize) -> Vec<(f32, f32)> {
        let (sin_a, cos_a) = self.angle.sin_cos();
        (0..n)
            .map(|i| {
                let t = std::f32::consts::TAU * (i as f32) / (n as f32);
                let u = self.major * t.cos();
                let v = self.minor * t.sin();
                let col = self.col + u * cos_a - v * sin_a;
                let row = self.row + u * sin_a + v * cos_a;
                (row, col)
            })
            .collect()
    }

    /// Smallest absolute angle between the major axes of two ellipses,
    /// accounting for the π ambiguity of an undirected axis.
    pub fn axis_angle_diff(&self, other: &Ellipse) -> f32 {
        let mut d = (self.angle - other.angle).abs() % std::f32::consts::PI;
        if d > std::f32::consts::FRAC_PI_2 {
            d = std::f32::consts::PI - d;
        }
        d
    }
}

/// Normalize an axis angle to (−π/2, π/2].
pub fn normalize_angle(mut angle: f32) -> f32 {
    let pi = std::f32::consts::PI;
    while angle > pi / 2.0 {
        angle -= pi;
    }
    while angle <= -pi / 2.0 {
        angle += pi;
    }
    angle
}

/// Fit an ellipse to a pixel blob from its area centroid and second central
/// moments. `mu_rr`, `mu_cc`, `mu_rc` are the normalized central moments.
///
/// Returns `None` for degenerate moment matrices (collinear or empty blobs).
pub fn ellipse_from_moments(
    row: f32,
    col: f32,
    mu_rr: f32,
    mu_cc: f32,
    mu_rc: f32,
) -> Option<Ellipse> {
    let trace = mu_rr + mu_cc;
    let det = mu_rr * mu_cc - mu_rc * mu_rc;
    if !(trace.is_finite() && det.is_finite()) || det <= 0.0 {
        return None;
    }
    let disc = (trace * trace / 4.0 - det).max(0.0).sqrt();
    let lambda1 = trace / 2.0 + disc;
    let lambda2 = trace / 2.0 - disc;
    if lambda2 <= 0.0 {
        return None;
    }
    // Equivalent-ellipse semi-axes: lambda = axis^2 / 4.
    let major = 2.0 * lambda1.sqrt();
    let minor = 2.0 * lambda2.sqrt();
    let angle = if (mu_cc - mu_rr).abs() < 1e-12 && mu_rc.abs() < 1e-12 {
        0.0
    } else {
        0.5 * (2.0 * mu_rc).atan2(mu_cc - mu_rr)
    };
    Some(
        Ellipse {
            row,
            col,
            major,
            minor,
            angle,
        }
        .canonicalized(),
    )
}

/// Circumscribed circle through three points, via the closed-form
/// perpendicular-bisector intersection.
///
/// Returns `None` when the points are (near-)collinear: the documented
/// no-fit sentinel, never an error.
pub fn circle_from_three_points(
    p1: (f32, f32),
    p2: (f32, f32),
    p3: (f32, f32),
) -> Option<(f32, f32, f32)> {
    let (r1, c1) = p1;
    let (r2, c2) = p2;
    let (r3, c3) = p3;
    let d = 2.0 * (c1 * (r2 - r3) + c2 * (r3 - r1) + c3 * (r1 - r2));
    if d.abs() < 1e-6 {
        return None;
    }
    let s1 = c1 * c1 + r1 * r1;
    let s2 = c2 * c2 + r2 * r2;
    let s3 = c3 * c3 + r3 * r3;
    let col = (s1 * (r2 - r3) + s2 * (r3 - r1) + s3 * (r1 - r2)) / d;
    let row = (s1 * (c3 - c2) + s2 * (c1 - c3) + s3 * (c2 - c1)) / d;
    let radius = ((col - c1) * (col - c1) + (row - r1) * (row - r1)).sqrt();
    if radius.is_finite() {
        Some((row, col, radius))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_swaps_axes_and_normalizes_angle() {
        let e = Ellipse {
            row: 10.0,
            col: 20.0,
            major: 3.0,
            minor: 7.0,
            angle: 0.2,
        };
        let c = e.canonicalized();
        assert!(c.major >= c.minor);
        assert!((c.major - 7.0).abs() < 1e-6);
        assert!(c.angle > -std::f32::consts::FRAC_PI_2);
        assert!(c.angle <= std::f32::consts::FRAC_PI_2 + 1e-6);
    }

    #[test]
    fn contains_respects_rotation() {
        let e = Ellipse {
            row: 0.0,
            col: 0.0,
            major: 10.0,
            minor: 2.0,
            angle: std::f32::consts::FRAC_PI_2,
        };
        // Major axis now runs along rows.
        assert!(e.contains(8.0, 0.0));
        assert!(!e.contains(0.0, 8.0));
    }

    #[test]
    fn circle_fit_recovers_known_circle() {
        let (cr, cc, r) = (12.0f32, -3.0f32, 7.5f32);
        let pt = |t: f32| (cr + r * t.sin(), cc + r * t.cos());
        let (row, col, radius) =
            circle_from_three_points(pt(0.3), pt(1.9), pt(4.0)).expect("non-collinear");
        assert!((row - cr).abs() < 1e-3);
        assert!((col - cc).abs() < 1e-3);
        assert!((radius - r).abs() < 1e-3);
    }

    #[test]
    fn circle_fit_collinear_returns_none() {
        assert!(circle_from_three_points((0.0, 0.0), (1.0, 1.0), (2.0, 2.0)).is_none());
    }

    #[test]
    fn moments_of_axis_aligned_disk() {
        // Uniform disk of radius R: mu_rr = mu_cc = R^2 / 4.
        let r = 6.0f32;
        let e = ellipse_from_moments(5.0, 5.0, r * r / 4.0, r * r / 4.0, 0.0).unwrap();
        assert!((e.major - r).abs() < 1e-3);
        assert!((e.minor - r).abs() < 1e-3);
    }

    #[test]
    fn axis_angle_diff_wraps_pi() {
        let a = Ellipse::circle(0.0, 0.0, 5.0);
        let mut b = a;
        b.angle = std::f32::consts::FRAC_PI_2 - 0.01;
        let mut a2 = a;
        a2.angle = -std::f32::consts::FRAC_PI_2 + 0.01;
        assert!(a2.axis_angle_diff(&b) < 0.05);
    }
}
