//! Detection label masks.
//!
//! Finalized detections are rasterized into a per-pixel label image
//! (0 = background, `k + 1` = class `k`) that feeds the color-model
//! adaptation pass and ships alongside the CSV as an optional artifact.
//! Partially buried individuals contribute only their visible rim, so they
//! are drawn as a ring instead of a filled disk; the sediment-covered
//! interior must not pollute the class color statistics.

use image::GrayImage;

use crate::candidate::Detection;
use crate::ellipse::Ellipse;

/// Inner-boundary scale of the ring drawn for buried detections.
const BURIED_INNER_FRAC: f32 = 0.6;

fn shrink(ellipse: &Ellipse, scale: f32) -> Ellipse {
    Ellipse {
        major: ellipse.major * scale,
        minor: ellipse.minor * scale,
        ..*ellipse
    }
}

/// Rasterize detections into a label mask of the working-image size.
///
/// Later detections overwrite earlier ones on overlap; the suppression
/// stage keeps overlaps small enough for that not to matter in practice.
pub fn rasterize_detections(width: u32, height: u32, detections: &[Detection]) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    for det in detections {
        let label = (det.class_index + 1).min(u8::MAX as usize) as u8;
        let e = &det.ellipse;
        let inner = det.flags.is_buried.then(|| shrink(e, BURIED_INNER_FRAC));

        let r0 = (e.row - e.major).floor().max(0.0) as u32;
        let r1 = ((e.row + e.major).ceil().max(0.0) as u32).min(height.saturating_sub(1));
        let c0 = (e.col - e.major).floor().max(0.0) as u32;
        let c1 = ((e.col + e.major).ceil().max(0.0) as u32).min(width.saturating_sub(1));

        for row in r0..=r1 {
            for col in c0..=c1 {
                let (fr, fc) = (row as f32, col as f32);
                if !e.contains(fr, fc) {
                    continue;
                }
                if let Some(inner) = &inner {
                    if inner.contains(fr, fc) {
                        continue;
                    }
                }
                mask.put_pixel(col, row, image::Luma([label]));
            }
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{Method, MethodMask, RankedLabel, SpeciesFlags};

    fn det(row: f32, col: f32, radius: f32, class_index: usize, buried: bool) -> Detection {
        Detection {
            ellipse: Ellipse::circle(row, col, radius),
            class_index,
            ranked: vec![RankedLabel {
                label: "x".to_string(),
                confidence: 1.0,
            }],
            flags: SpeciesFlags {
                is_buried: buried,
                ..SpeciesFlags::default()
            },
            methods: MethodMask::single(Method::Blob),
        }
    }

    #[test]
    fn filled_disk_labels_center_and_leaves_background() {
        let mask = rasterize_detections(64, 64, &[det(32.0, 32.0, 10.0, 0, false)]);
        assert_eq!(mask.get_pixel(32, 32).0[0], 1);
        assert_eq!(mask.get_pixel(32, 43).0[0], 0);
        assert_eq!(mask.get_pixel(2, 2).0[0], 0);
    }

    #[test]
    fn buried_detection_leaves_the_interior_unlabeled() {
        let mask = rasterize_detections(64, 64, &[det(32.0, 32.0, 10.0, 2, true)]);
        // Center is inside the ring hole.
        assert_eq!(mask.get_pixel(32, 32).0[0], 0);
        // The rim (between 0.6r and r) carries the class label.
        assert_eq!(mask.get_pixel(32 + 8, 32).0[0], 3);
    }

    #[test]
    fn detection_at_the_image_border_is_clipped() {
        let mask = rasterize_detections(32, 32, &[det(0.0, 0.0, 10.0, 0, false)]);
        assert_eq!(mask.get_pixel(0, 0).0[0], 1);
        assert_eq!(mask.get_pixel(31, 31).0[0], 0);
    }
}
