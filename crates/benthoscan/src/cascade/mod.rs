//! Two-tier classifier cascade.
//!
//! The main tier holds one-vs-rest classifiers for the target classes. The
//! suppression tier holds contextual classifiers for look-alike structures
//! (rocks, debris, sand ripples) that only matter once something target-like
//! was seen: it is evaluated only when the main-tier maximum clears the
//! acceptance threshold. A candidate whose overall argmax lands on a
//! suppression classifier is deactivated instead of reported.

mod features;
mod scorer;

pub use features::compute_features;
pub use scorer::{ClassifierError, Scorer, Stump};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::candidate::{Candidate, CascadeState, Detection, RankedLabel, SpeciesFlags};

/// One classifier of the system: a trained scorer plus its semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classifier {
    /// Output label text.
    pub label: String,
    /// Suppression-tier membership.
    #[serde(default)]
    pub suppression: bool,
    /// Species flags attached to detections won by this classifier.
    #[serde(default)]
    pub flags: SpeciesFlags,
    /// The trained scoring function.
    pub scorer: Scorer,
}

/// The full classifier system of a detection session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierSystem {
    /// Global acceptance threshold applied to the main-tier maximum.
    pub threshold: f32,
    /// All classifiers; tier membership is per-classifier.
    pub classifiers: Vec<Classifier>,
}

impl ClassifierSystem {
    /// Load from a JSON model file.
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let system: ClassifierSystem = scorer::load_json(path)?;
        system.validate()?;
        tracing::info!(
            "loaded classifier system: {} main + {} suppression classifiers",
            system.main_count(),
            system.classifiers.len() - system.main_count(),
        );
        Ok(system)
    }

    fn validate(&self) -> Result<(), ClassifierError> {
        if self.main_count() == 0 {
            return Err(ClassifierError::EmptyMainTier);
        }
        Ok(())
    }

    /// Number of main-tier classifiers.
    pub fn main_count(&self) -> usize {
        self.classifiers.iter().filter(|c| !c.suppression).count()
    }

    /// Total classifier count across both tiers.
    pub fn len(&self) -> usize {
        self.classifiers.len()
    }

    /// Whether the system holds no classifiers at all.
    pub fn is_empty(&self) -> bool {
        self.classifiers.is_empty()
    }

    /// Run the cascade on one candidate.
    ///
    /// Fills `class_scores` (unevaluated entries stay at `-inf`), advances
    /// the cascade state, and resolves `class_index`. Candidates rejected at
    /// the main tier or won by a suppression classifier are deactivated.
    pub fn classify(&self, candidate: &mut Candidate) {
        let features = match &candidate.features {
            Some(groups) => groups.flatten(),
            None => {
                candidate.deactivate();
                return;
            }
        };
        candidate.class_scores = vec![f32::NEG_INFINITY; self.classifiers.len()];

        // Main tier.
        let mut best = f32::NEG_INFINITY;
        let mut best_idx = 0usize;
        for (i, classifier) in self.classifiers.iter().enumerate() {
            if classifier.suppression {
                continue;
            }
            let score = classifier.scorer.predict(&features);
            candidate.class_scores[i] = score;
            if score > best {
                best = score;
                best_idx = i;
            }
        }
        candidate.state = CascadeState::MainScored;

        if best < self.threshold {
            candidate.state = CascadeState::Rejected;
            candidate.class_index = None;
            candidate.deactivate();
            return;
        }

        // Suppression tier, continuing the overall argmax.
        for (i, classifier) in self.classifiers.iter().enumerate() {
            if !classifier.suppression {
                continue;
            }
            let score = classifier.scorer.predict(&features);
            candidate.class_scores[i] = score;
            if score > best {
                best = score;
                best_idx = i;
            }
        }
        candidate.state = CascadeState::SuppressionScored;

        candidate.class_index = Some(best_idx);
        candidate.state = CascadeState::Classified;
        if self.classifiers[best_idx].suppression {
            candidate.deactivate();
        }
    }

    /// Convert a classified, still-active candidate into a detection.
    ///
    /// Returns `None` for unclassified or suppressed candidates. The ranked
    /// list covers the main-tier classifiers in descending score order.
    pub fn into_detection(&self, candidate: &Candidate) -> Option<Detection> {
        let class_index = candidate.class_index?;
        if !candidate.active || self.classifiers[class_index].suppression {
            return None;
        }

        let mut ranked: Vec<(usize, f32)> = self
            .classifiers
            .iter()
            .enumerate()
            .filter(|(i, c)| !c.suppression && candidate.class_scores[*i].is_finite())
            .map(|(i, _)| (i, candidate.class_scores[i]))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        Some(Detection {
            ellipse: candidate.ellipse,
            class_index,
            ranked: ranked
                .into_iter()
                .map(|(i, score)| RankedLabel {
                    label: self.classifiers[i].label.clone(),
                    confidence: score,
                })
                .collect(),
            flags: self.classifiers[class_index].flags,
            methods: candidate.methods,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{FeatureGroups, Method};
    use crate::ellipse::Ellipse;

    fn constant(score: f32, label: &str, suppression: bool) -> Classifier {
        Classifier {
            label: label.to_string(),
            suppression,
            flags: SpeciesFlags {
                is_live: !suppression,
                ..SpeciesFlags::default()
            },
            scorer: Scorer::Linear {
                weights: Vec::new(),
                bias: score,
            },
        }
    }

    fn candidate_with_features() -> Candidate {
        let mut c = Candidate::new(Ellipse::circle(10.0, 10.0, 5.0), Method::Blob, 1.0);
        c.features = Some(FeatureGroups {
            size: vec![1.0],
            ..FeatureGroups::default()
        });
        c
    }

    #[test]
    fn below_threshold_rejects_without_touching_suppression_tier() {
        let system = ClassifierSystem {
            threshold: 0.5,
            classifiers: vec![
                constant(0.1, "live", false),
                constant(10.0, "rock", true),
            ],
        };
        let mut cand = candidate_with_features();
        system.classify(&mut cand);

        assert_eq!(cand.state, CascadeState::Rejected);
        assert_eq!(cand.class_index, None);
        assert!(!cand.active);
        // The suppression scorer was never evaluated: its slot still holds
        // the unevaluated sentinel.
        assert_eq!(cand.class_scores[1], f32::NEG_INFINITY);
    }

    #[test]
    fn suppression_winner_deactivates_the_candidate() {
        let system = ClassifierSystem {
            threshold: 0.5,
            classifiers: vec![
                constant(0.8, "live", false),
                constant(2.0, "rock", true),
            ],
        };
        let mut cand = candidate_with_features();
        system.classify(&mut cand);

        assert_eq!(cand.state, CascadeState::Classified);
        assert_eq!(cand.class_index, Some(1));
        assert!(!cand.active);
        assert!(system.into_detection(&cand).is_none());
    }

    #[test]
    fn main_winner_becomes_a_ranked_detection() {
        let system = ClassifierSystem {
            threshold: 0.5,
            classifiers: vec![
                constant(0.9, "live", false),
                constant(0.7, "dead", false),
                constant(0.1, "rock", true),
            ],
        };
        let mut cand = candidate_with_features();
        system.classify(&mut cand);

        assert_eq!(cand.class_index, Some(0));
        assert!(cand.active);
        let det = system.into_detection(&cand).unwrap();
        assert_eq!(det.label(), "live");
        assert!((det.confidence() - 0.9).abs() < 1e-6);
        assert_eq!(det.ranked.len(), 2);
        assert_eq!(det.ranked[1].label, "dead");
        assert!(det.flags.is_live);
    }

    #[test]
    fn empty_main_tier_fails_validation() {
        let system = ClassifierSystem {
            threshold: 0.0,
            classifiers: vec![constant(1.0, "rock", true)],
        };
        assert!(matches!(
            system.validate(),
            Err(ClassifierError::EmptyMainTier)
        ));
    }

    #[test]
    fn system_round_trips_through_json() {
        let system = ClassifierSystem {
            threshold: 0.4,
            classifiers: vec![constant(0.9, "live", false)],
        };
        let text = serde_json::to_string(&system).unwrap();
        let back: ClassifierSystem = serde_json::from_str(&text).unwrap();
        assert_eq!(back.classifiers.len(), 1);
        assert!((back.threshold - 0.4).abs() < 1e-6);
    }
}
