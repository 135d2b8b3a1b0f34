//! Detection list output.
//!
//! One CSV accumulates every detection of a session. Workers process images
//! concurrently, so the writer is shared behind a mutex and rows are
//! appended image by image; row order between images follows completion
//! order, rows within an image stay together.

use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

use crate::candidate::Detection;

/// Output-writer errors.
#[derive(Debug)]
pub enum OutputError {
    /// The output file could not be created.
    Io(std::io::Error),
    /// A row failed to serialize or flush.
    Csv(csv::Error),
    /// The writer mutex was poisoned by a panicking worker.
    Poisoned,
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputError::Io(e) => write!(f, "output i/o error: {e}"),
            OutputError::Csv(e) => write!(f, "csv write error: {e}"),
            OutputError::Poisoned => write!(f, "output writer poisoned"),
        }
    }
}

impl std::error::Error for OutputError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OutputError::Io(e) => Some(e),
            OutputError::Csv(e) => Some(e),
            OutputError::Poisoned => None,
        }
    }
}

impl From<std::io::Error> for OutputError {
    fn from(e: std::io::Error) -> Self {
        OutputError::Io(e)
    }
}

impl From<csv::Error> for OutputError {
    fn from(e: csv::Error) -> Self {
        OutputError::Csv(e)
    }
}

/// One output row: a single ranked label of a single detection.
#[derive(Debug, Serialize)]
struct DetectionRow<'a> {
    image_name: &'a str,
    row: f32,
    col: f32,
    major_axis: f32,
    minor_axis: f32,
    angle: f32,
    label: &'a str,
    confidence: f32,
    /// 1-based rank of this label among the detection's alternatives.
    rank: usize,
}

/// Thread-shared, append-only CSV detection writer.
pub struct CsvDetectionWriter {
    inner: Mutex<csv::Writer<File>>,
}

impl CsvDetectionWriter {
    /// Create the output file; the header row comes from the field names.
    pub fn create(path: &Path) -> Result<Self, OutputError> {
        let file = File::create(path)?;
        Ok(Self {
            inner: Mutex::new(csv::Writer::from_writer(file)),
        })
    }

    /// Append one image's detections.
    ///
    /// Geometry is divided by `resize_factor` to restore original-image
    /// pixel units. Every ranked label of a detection gets its own row with
    /// a 1-based rank.
    pub fn append_image(
        &self,
        image_name: &str,
        detections: &[Detection],
        resize_factor: f32,
    ) -> Result<(), OutputError> {
        let scale = 1.0 / resize_factor.max(1e-6);
        let mut writer = self.inner.lock().map_err(|_| OutputError::Poisoned)?;
        for det in detections {
            for (i, ranked) in det.ranked.iter().enumerate() {
                writer.serialize(DetectionRow {
                    image_name,
                    row: det.ellipse.row * scale,
                    col: det.ellipse.col * scale,
                    major_axis: det.ellipse.major * scale,
                    minor_axis: det.ellipse.minor * scale,
                    angle: det.ellipse.angle,
                    label: &ranked.label,
                    confidence: ranked.confidence,
                    rank: i + 1,
                })?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{Method, MethodMask, RankedLabel, SpeciesFlags};
    use crate::ellipse::Ellipse;

    fn two_label_detection() -> Detection {
        Detection {
            ellipse: Ellipse::circle(100.0, 200.0, 25.0),
            class_index: 0,
            ranked: vec![
                RankedLabel {
                    label: "live".to_string(),
                    confidence: 0.9,
                },
                RankedLabel {
                    label: "dead".to_string(),
                    confidence: 0.3,
                },
            ],
            flags: SpeciesFlags::default(),
            methods: MethodMask::single(Method::Blob),
        }
    }

    #[test]
    fn rows_restore_original_pixel_units_and_rank_labels() {
        let dir = std::env::temp_dir().join("benthoscan-output-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("detections.csv");

        let writer = CsvDetectionWriter::create(&path).unwrap();
        // Working image was half-size: geometry doubles on output.
        writer
            .append_image("dive01_0001.jpg", &[two_label_detection()], 0.5)
            .unwrap();
        drop(writer);

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "image_name,row,col,major_axis,minor_axis,angle,label,confidence,rank"
        );
        let first = lines.next().unwrap();
        assert!(first.starts_with("dive01_0001.jpg,200.0,400.0,50.0,50.0,"));
        assert!(first.contains("live"));
        assert!(first.ends_with(",1"));
        let second = lines.next().unwrap();
        assert!(second.contains("dead"));
        assert!(second.ends_with(",2"));
        assert!(lines.next().is_none());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn unwritable_path_fails_with_io_error() {
        let path = Path::new("/nonexistent-dir/detections.csv");
        assert!(matches!(
            CsvDetectionWriter::create(path),
            Err(OutputError::Io(_))
        ));
    }
}
