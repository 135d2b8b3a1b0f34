//! Trained scoring functions.
//!
//! Classifiers are opaque trained models; only loading and prediction are
//! exposed. The variant set is closed on purpose: model files name one of
//! the known kinds and anything else fails deserialization.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Classifier setup and scoring errors.
#[derive(Debug)]
pub enum ClassifierError {
    /// Model file could not be read.
    Io(std::io::Error),
    /// Model file is not a valid classifier description.
    Malformed(serde_json::Error),
    /// The main tier has no classifiers.
    EmptyMainTier,
}

impl fmt::Display for ClassifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifierError::Io(e) => write!(f, "classifier model i/o error: {e}"),
            ClassifierError::Malformed(e) => write!(f, "malformed classifier model: {e}"),
            ClassifierError::EmptyMainTier => write!(f, "classifier model has no main tier"),
        }
    }
}

impl std::error::Error for ClassifierError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClassifierError::Io(e) => Some(e),
            ClassifierError::Malformed(e) => Some(e),
            ClassifierError::EmptyMainTier => None,
        }
    }
}

impl From<std::io::Error> for ClassifierError {
    fn from(e: std::io::Error) -> Self {
        ClassifierError::Io(e)
    }
}

impl From<serde_json::Error> for ClassifierError {
    fn from(e: serde_json::Error) -> Self {
        ClassifierError::Malformed(e)
    }
}

/// One decision stump of a boosted ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stump {
    /// Index into the flattened feature vector.
    pub feature: usize,
    /// Split threshold.
    pub threshold: f32,
    /// Vote when the feature is below the threshold.
    pub below: f32,
    /// Vote when the feature is at or above the threshold.
    pub above: f32,
}

/// A trained scoring function; higher scores mean stronger class evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scorer {
    /// Dot product plus bias.
    Linear { weights: Vec<f32>, bias: f32 },
    /// Sum of decision-stump votes.
    BoostedStumps { stumps: Vec<Stump> },
}

impl Scorer {
    /// Score one flattened feature vector.
    ///
    /// Feature indices past the end of the vector read as zero, so a model
    /// trained on a richer feature layout degrades instead of panicking.
    pub fn predict(&self, features: &[f32]) -> f32 {
        match self {
            Scorer::Linear { weights, bias } => {
                let dot: f32 = weights
                    .iter()
                    .zip(features.iter().chain(std::iter::repeat(&0.0)))
                    .map(|(w, x)| w * x)
                    .sum();
                dot + bias
            }
            Scorer::BoostedStumps { stumps } => stumps
                .iter()
                .map(|s| {
                    let x = features.get(s.feature).copied().unwrap_or(0.0);
                    if x < s.threshold {
                        s.below
                    } else {
                        s.above
                    }
                })
                .sum(),
        }
    }
}

/// Deserialize a JSON value of type `T` from a model file.
pub(crate) fn load_json<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<T, ClassifierError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}
