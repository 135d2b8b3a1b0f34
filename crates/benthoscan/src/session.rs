//! Detection session context.
//!
//! Everything shared across the images of one survey run: the trained
//! classifier system, the seed color model, the output writer, and the exit
//! flag. Workers clone the color model into per-image pipelines (adaptation
//! stays worker-private) and check the exit flag only between images, so a
//! requested stop never truncates an image mid-pipeline.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cascade::{ClassifierError, ClassifierSystem};
use crate::color::{ColorModel, HistogramError};
use crate::config::DetectConfig;
use crate::output::{CsvDetectionWriter, OutputError};

/// Session setup errors; all fatal before any image is processed.
#[derive(Debug)]
pub enum SessionError {
    Classifier(ClassifierError),
    Histogram(HistogramError),
    Output(OutputError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Classifier(e) => write!(f, "classifier setup failed: {e}"),
            SessionError::Histogram(e) => write!(f, "color model setup failed: {e}"),
            SessionError::Output(e) => write!(f, "output setup failed: {e}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Classifier(e) => Some(e),
            SessionError::Histogram(e) => Some(e),
            SessionError::Output(e) => Some(e),
        }
    }
}

impl From<ClassifierError> for SessionError {
    fn from(e: ClassifierError) -> Self {
        SessionError::Classifier(e)
    }
}

impl From<HistogramError> for SessionError {
    fn from(e: HistogramError) -> Self {
        SessionError::Histogram(e)
    }
}

impl From<OutputError> for SessionError {
    fn from(e: OutputError) -> Self {
        SessionError::Output(e)
    }
}

/// Shared state of one detection session.
pub struct Session {
    /// Trained classifier system, read-only after load.
    pub classifiers: Arc<ClassifierSystem>,
    /// Seed color model; workers clone and adapt privately.
    pub seed_model: ColorModel,
    /// Detection configuration shared by every image.
    pub config: DetectConfig,
    /// Session-wide CSV writer.
    pub output: Arc<CsvDetectionWriter>,
    exit_requested: Arc<AtomicBool>,
}

impl Session {
    /// Load all session inputs; any failure here aborts before the first
    /// image.
    pub fn open(
        classifier_path: &Path,
        class_histogram_paths: &[&Path],
        environment_histogram_path: &Path,
        output_path: &Path,
        config: DetectConfig,
    ) -> Result<Self, SessionError> {
        let classifiers = ClassifierSystem::load(classifier_path)?;
        let seed_model = ColorModel::load(class_histogram_paths, environment_histogram_path)?;
        let output = CsvDetectionWriter::create(output_path)?;
        tracing::info!(
            "session open: {} classifiers, {} color classes, output {}",
            classifiers.len(),
            seed_model.n_classes(),
            output_path.display()
        );
        Ok(Self {
            classifiers: Arc::new(classifiers),
            seed_model,
            config,
            output: Arc::new(output),
            exit_requested: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Build a session from already-loaded parts.
    pub fn from_parts(
        classifiers: ClassifierSystem,
        seed_model: ColorModel,
        config: DetectConfig,
        output: CsvDetectionWriter,
    ) -> Self {
        Self {
            classifiers: Arc::new(classifiers),
            seed_model,
            config,
            output: Arc::new(output),
            exit_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle that lets another thread (a signal handler, a UI) request a
    /// stop.
    pub fn exit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.exit_requested)
    }

    /// Request the session to stop after the images currently in flight.
    pub fn request_exit(&self) {
        self.exit_requested.store(true, Ordering::Relaxed);
    }

    /// Checked by workers between images, never inside an image.
    pub fn exit_requested(&self) -> bool {
        self.exit_requested.load(Ordering::Relaxed)
    }
}
