//! End-to-end pipeline tests on synthetic survey frames.

use std::sync::Arc;

use image::RgbImage;

use benthoscan::cascade::Classifier;
use benthoscan::candidate::SpeciesFlags;
use benthoscan::{
    ClassifierSystem, ColorHistogram, ColorModel, DetectConfig, ImagePipeline, ImageScale,
    RadiusBand, Scorer,
};

/// Single-class system that accepts everything with confidence 1.0.
fn accept_all_system() -> Arc<ClassifierSystem> {
    Arc::new(ClassifierSystem {
        threshold: 0.0,
        classifiers: vec![Classifier {
            label: "live".to_string(),
            suppression: false,
            flags: SpeciesFlags {
                is_live: true,
                ..SpeciesFlags::default()
            },
            scorer: Scorer::Linear {
                weights: Vec::new(),
                bias: 1.0,
            },
        }],
    })
}

/// Color model peaked on bright shell pixels over a dark seafloor.
fn shell_model() -> ColorModel {
    let mut class = ColorHistogram::new([4, 4, 4], [0.0; 3], [255.0; 3]);
    let mut env = ColorHistogram::new([4, 4, 4], [0.0; 3], [255.0; 3]);
    class.scratch_add([220.0, 220.0, 220.0], -1.0);
    class.blend_scratch(1.0, -1.0);
    env.scratch_add([30.0, 30.0, 30.0], -1.0);
    env.blend_scratch(1.0, -1.0);
    ColorModel::new(vec![class], env)
}

/// Dark frame with bright sigmoid-edged disks at the given spots.
fn survey_frame(size: u32, disks: &[(f32, f32, f32)]) -> RgbImage {
    RgbImage::from_fn(size, size, |c, r| {
        let mut v = 30.0f32;
        for &(row, col, radius) in disks {
            let d = ((r as f32 - row).powi(2) + (c as f32 - col).powi(2)).sqrt();
            v += 200.0 / (1.0 + ((d - radius) / 1.2).exp());
        }
        let v = v.clamp(0.0, 255.0) as u8;
        image::Rgb([v, v, v])
    })
}

fn scale() -> ImageScale {
    ImageScale {
        meters_per_px: 0.002,
        resize_factor: 1.0,
        band: RadiusBand::new(8.0, 24.0),
    }
}

fn pipeline() -> ImagePipeline {
    let config = DetectConfig::from_radius_band(RadiusBand::new(8.0, 24.0));
    ImagePipeline::new(accept_all_system(), shell_model(), config)
}

#[test]
fn two_separated_disks_give_two_detections() {
    let mut pipeline = pipeline();
    let image = survey_frame(256, &[(70.0, 70.0, 14.0), (180.0, 185.0, 18.0)]);
    let result = pipeline.process("frame.png", &image, scale());

    assert_eq!(result.detections.len(), 2, "one detection per disk");
    let mut rows: Vec<f32> = result.detections.iter().map(|d| d.ellipse.row).collect();
    rows.sort_by(f32::total_cmp);
    assert!((rows[0] - 70.0).abs() < 4.0);
    assert!((rows[1] - 180.0).abs() < 4.0);
    for det in &result.detections {
        assert_eq!(det.label(), "live");
        assert!(det.ellipse.minor <= det.ellipse.major);
    }
}

#[test]
fn detected_radii_stay_within_the_search_band() {
    let mut pipeline = pipeline();
    let image = survey_frame(200, &[(100.0, 100.0, 16.0)]);
    let result = pipeline.process("frame.png", &image, scale());

    assert!(!result.detections.is_empty());
    let band = RadiusBand::new(8.0, 24.0);
    for det in &result.detections {
        assert!(
            band.contains(det.ellipse.major, 1.5),
            "radius {} outside band",
            det.ellipse.major
        );
    }
}

#[test]
fn overlapping_disks_keep_only_one_detection() {
    let mut pipeline = pipeline();
    // Two disks almost on top of each other read as one bright region.
    let image = survey_frame(200, &[(100.0, 100.0, 16.0), (103.0, 102.0, 15.0)]);
    let result = pipeline.process("frame.png", &image, scale());

    assert_eq!(
        result.detections.len(),
        1,
        "consolidation + suppression should collapse the pair"
    );
}

#[test]
fn feedback_state_advances_across_a_sequence() {
    let mut pipeline = pipeline();
    for i in 0..3 {
        let image = survey_frame(160, &[(80.0, 80.0, 14.0)]);
        pipeline.process(&format!("frame{i}.png"), &image, scale());
    }
    assert_eq!(pipeline.density().n_images(), 3);
    assert!(pipeline.density().ew_density(0) > 0.0);
}
