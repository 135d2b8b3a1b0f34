//! Candidate and detection value types.
//!
//! Candidates are arena values: each image's pipeline owns one `Vec<Candidate>`
//! and every stage refers to entries by index. Nothing here outlives the
//! processing of a single image except the finalized [`Detection`] list.

use serde::{Deserialize, Serialize};

use crate::ellipse::Ellipse;

/// Proposal generator that produced a candidate.
///
/// Variant order is load-bearing: it is both the consolidator insertion order
/// and the method priority used for ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// Scale-pyramid radial-symmetry template detector.
    Template,
    /// Blob / difference-of-Gaussians detector.
    Blob,
    /// Recursive adaptive-threshold contour detector.
    Adaptive,
    /// Edge-run circle-fit detector.
    Edge,
}

impl Method {
    /// Fixed consolidator insertion order (Template → Blob → Adaptive → Edge).
    pub const INSERTION_ORDER: [Method; 4] =
        [Method::Template, Method::Blob, Method::Adaptive, Method::Edge];

    /// Priority used when assigning method-local ranks; lower is consumed first.
    pub fn priority(self) -> u8 {
        match self {
            Method::Template => 0,
            Method::Blob => 1,
            Method::Adaptive => 2,
            Method::Edge => 3,
        }
    }

    fn bit(self) -> u8 {
        1 << self.priority()
    }
}

/// Set of methods that contributed to a candidate through merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MethodMask(u8);

impl MethodMask {
    /// Mask containing a single method.
    pub fn single(method: Method) -> Self {
        Self(method.bit())
    }

    /// Add a method to the mask.
    pub fn insert(&mut self, method: Method) {
        self.0 |= method.bit();
    }

    /// Merge another mask into this one.
    pub fn union(&mut self, other: MethodMask) {
        self.0 |= other.0;
    }

    /// Whether the mask contains the given method.
    pub fn contains(self, method: Method) -> bool {
        self.0 & method.bit() != 0
    }

    /// Whether more than one method contributed.
    pub fn is_multi_method(self) -> bool {
        self.0.count_ones() > 1
    }

    /// Number of contributing methods.
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Whether no method has been recorded.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Per-group feature vectors computed on candidate promotion.
#[derive(Debug, Clone, Default)]
pub struct FeatureGroups {
    /// Geometry-derived features (radii, ratio, area vs. search band).
    pub size: Vec<f32>,
    /// Color-response statistics inside/outside the candidate boundary.
    pub color: Vec<f32>,
    /// Gradient alignment along the candidate boundary.
    pub edge: Vec<f32>,
    /// Oriented-gradient histogram over the boundary ring band.
    pub hog_ring: Vec<f32>,
    /// Oriented-gradient histogram over the enclosing patch.
    pub hog_patch: Vec<f32>,
    /// Local texture statistics (variance, gradient energy).
    pub texture: Vec<f32>,
}

impl FeatureGroups {
    /// Flatten all groups in fixed order into one classifier input vector.
    pub fn flatten(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(
            self.size.len()
                + self.color.len()
                + self.edge.len()
                + self.hog_ring.len()
                + self.hog_patch.len()
                + self.texture.len(),
        );
        out.extend_from_slice(&self.size);
        out.extend_from_slice(&self.color);
        out.extend_from_slice(&self.edge);
        out.extend_from_slice(&self.hog_ring);
        out.extend_from_slice(&self.hog_patch);
        out.extend_from_slice(&self.texture);
        out
    }
}

/// Cascade progress of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CascadeState {
    /// Not yet scored.
    #[default]
    Pending,
    /// Main tier scored; threshold check not yet applied.
    MainScored,
    /// Main-tier maximum fell below the acceptance threshold.
    Rejected,
    /// Suppression tier scored.
    SuppressionScored,
    /// Final class resolved.
    Classified,
}

/// An unclassified proposed detection.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Proposed ellipse geometry.
    pub ellipse: Ellipse,
    /// Generator that created this candidate.
    pub method: Method,
    /// All methods that contributed through consolidation merges.
    pub methods: MethodMask,
    /// Raw detector response magnitude (method-local scale).
    pub magnitude: f32,
    /// Method-local rank; lower ranks are classified first.
    pub rank: u32,
    /// Feature groups, computed lazily on cascade entry.
    pub features: Option<FeatureGroups>,
    /// Per-classifier score vector, filled by the cascade.
    pub class_scores: Vec<f32>,
    /// Resolved classifier index, `None` while unclassified.
    pub class_index: Option<usize>,
    /// Cascade progress.
    pub state: CascadeState,
    /// Inactive candidates are excluded from every downstream stage but kept
    /// in the arena until end-of-image cleanup.
    pub active: bool,
}

impl Candidate {
    /// Create a fresh candidate from a generator proposal.
    pub fn new(ellipse: Ellipse, method: Method, magnitude: f32) -> Self {
        Self {
            ellipse: ellipse.canonicalized(),
            method,
            methods: MethodMask::single(method),
            magnitude,
            rank: 0,
            features: None,
            class_scores: Vec::new(),
            class_index: None,
            state: CascadeState::default(),
            active: true,
        }
    }

    /// Best classifier score seen so far, or `-inf` when unscored.
    pub fn best_score(&self) -> f32 {
        match self.class_index {
            Some(i) => self.class_scores.get(i).copied().unwrap_or(f32::NEG_INFINITY),
            None => f32::NEG_INFINITY,
        }
    }

    /// Mark the candidate inactive; it stays in the arena but is skipped
    /// by all later stages.
    pub fn deactivate(&mut self) {
        self.active = false;
    }
}

/// Species flags derived from classifier semantics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesFlags {
    /// Live individual of a target species.
    pub is_live: bool,
    /// Dead shell / clapper.
    pub is_dead: bool,
    /// Partially buried individual; rasterized as a ring rather than a disk.
    pub is_buried: bool,
}

/// One ranked label alternative for a detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedLabel {
    /// Classifier label text.
    pub label: String,
    /// Classifier confidence for this label.
    pub confidence: f32,
}

/// A classified, finalized detection ready for output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Final refined ellipse in working-image pixels.
    pub ellipse: Ellipse,
    /// Winning classifier index within the [`crate::cascade::ClassifierSystem`].
    pub class_index: usize,
    /// Label alternatives, descending confidence; entry 0 is the winner.
    pub ranked: Vec<RankedLabel>,
    /// Species flags of the winning classifier.
    pub flags: SpeciesFlags,
    /// Methods that contributed to the underlying candidate.
    pub methods: MethodMask,
}

impl Detection {
    /// Winning confidence (entry 0 of the ranked list).
    pub fn confidence(&self) -> f32 {
        self.ranked.first().map(|r| r.confidence).unwrap_or(0.0)
    }

    /// Winning label text.
    pub fn label(&self) -> &str {
        self.ranked.first().map(|r| r.label.as_str()).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_mask_merge_tracks_multi_method() {
        let mut mask = MethodMask::single(Method::Blob);
        assert!(!mask.is_multi_method());
        mask.insert(Method::Template);
        assert!(mask.is_multi_method());
        assert!(mask.contains(Method::Blob));
        assert!(mask.contains(Method::Template));
        assert!(!mask.contains(Method::Edge));
        assert_eq!(mask.len(), 2);
    }

    #[test]
    fn insertion_order_matches_priorities() {
        for (i, m) in Method::INSERTION_ORDER.iter().enumerate() {
            assert_eq!(m.priority() as usize, i);
        }
    }

    #[test]
    fn new_candidate_is_canonical() {
        let e = Ellipse {
            row: 1.0,
            col: 2.0,
            major: 2.0,
            minor: 5.0,
            angle: 0.0,
        };
        let c = Candidate::new(e, Method::Adaptive, 1.0);
        assert!(c.ellipse.major >= c.ellipse.minor);
        assert!(c.active);
        assert_eq!(c.state, CascadeState::Pending);
    }
}
