//! Candidate consolidation.
//!
//! All generator outputs are folded into one spatially deduplicated arena.
//! Per-method lists are ranked by (method priority, descending magnitude),
//! then inserted in fixed method order into a 2-D point index. Before each
//! insertion a radius query collects neighbors and the merge predicate
//! decides between merging into an existing candidate and inserting as new.
//! The insertion order (Template → Blob → Adaptive → Edge) changes merge
//! outcomes and must not be reordered.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::candidate::{Candidate, Method};
use crate::spatial::PointIndex;

/// Neighbor query radius as a fraction of the candidate's major axis.
pub const NEIGHBOR_QUERY_FRAC: f32 = 0.5;
/// Axis ratio beyond which two candidates cannot describe the same object.
pub const MAX_AXIS_RATIO: f32 = 2.0;
/// Major-axis angle difference beyond which association is rejected (degrees).
pub const MAX_ANGLE_DIFF_DEG: f32 = 25.0;
/// Major-axis ratio of the tight merge band.
pub const TIGHT_MAJOR_RATIO: f32 = 1.11;
/// Minor-axis ratio of the tight merge band.
pub const TIGHT_MINOR_RATIO: f32 = 1.20;

/// Outcome of testing an incoming candidate against one neighbor.
///
/// Insertion treats `Reject` and `Distinct` the same way (the incoming
/// candidate stays its own arena entry); the distinction exists for the
/// predicate's contract — `Reject` pairs can never describe one object,
/// `Distinct` pairs merely fell outside the tight merge band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Shapes are incompatible; the pair cannot be one object.
    Reject,
    /// Within the tight band: fold the incoming candidate into the neighbor.
    Merge,
    /// Compatible but not close enough in size to merge.
    Distinct,
}

/// Merge predicate between an arena resident and an incoming candidate.
pub fn merge_decision(resident: &Candidate, incoming: &Candidate) -> MergeDecision {
    let a = &resident.ellipse;
    let b = &incoming.ellipse;

    let major_ratio = a.major.max(b.major) / a.major.min(b.major).max(1e-6);
    let minor_ratio = a.minor.max(b.minor) / a.minor.min(b.minor).max(1e-6);
    let angle_diff_deg = a.axis_angle_diff(b).to_degrees();

    if major_ratio > MAX_AXIS_RATIO
        || minor_ratio > MAX_AXIS_RATIO
        || angle_diff_deg > MAX_ANGLE_DIFF_DEG
    {
        return MergeDecision::Reject;
    }
    if major_ratio <= TIGHT_MAJOR_RATIO && minor_ratio <= TIGHT_MINOR_RATIO {
        return MergeDecision::Merge;
    }
    MergeDecision::Distinct
}

/// Consolidated candidate arena plus its spatial index.
pub struct Consolidated {
    /// Candidate arena; merged-away entries never appear here.
    pub arena: Vec<Candidate>,
    index: PointIndex,
}

impl Consolidated {
    /// Arena indices in classification consumption order
    /// (ascending method-local rank over a pre-order walk of the index).
    pub fn consumption_order(&self) -> Vec<usize> {
        let mut heap: BinaryHeap<Reverse<(u32, usize)>> = self
            .index
            .preorder_ids()
            .into_iter()
            .map(|id| Reverse((self.arena[id].rank, id)))
            .collect();
        let mut out = Vec::with_capacity(heap.len());
        while let Some(Reverse((_, id))) = heap.pop() {
            out.push(id);
        }
        out
    }
}

/// Consolidate per-method candidate lists into one deduplicated arena.
///
/// `favored` lifts one method to the front of the rank ordering; it never
/// changes the spatial insertion order.
pub fn consolidate(
    mut per_method: Vec<(Method, Vec<Candidate>)>,
    favored: Option<Method>,
) -> Consolidated {
    // Rank assignment: concatenation sorted by (effective priority,
    // descending magnitude).
    let effective_priority = |m: Method| -> u8 {
        match favored {
            Some(f) if f == m => 0,
            Some(f) if m.priority() < f.priority() => m.priority() + 1,
            _ => m.priority(),
        }
    };
    for (_, list) in per_method.iter_mut() {
        list.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));
    }
    per_method.sort_by_key(|(m, _)| effective_priority(*m));
    let mut rank = 0u32;
    for (_, list) in per_method.iter_mut() {
        for cand in list.iter_mut() {
            cand.rank = rank;
            rank += 1;
        }
    }

    // Spatial insertion strictly in the fixed method order.
    let mut consolidated = Consolidated {
        arena: Vec::new(),
        index: PointIndex::new(),
    };
    let mut n_merged = 0usize;
    for wanted in Method::INSERTION_ORDER {
        for (method, list) in per_method.iter_mut() {
            if *method != wanted {
                continue;
            }
            for cand in list.drain(..) {
                if insert_candidate(&mut consolidated, cand) {
                    n_merged += 1;
                }
            }
        }
    }

    tracing::debug!(
        "consolidated {} candidates ({} merged away)",
        consolidated.arena.len(),
        n_merged
    );
    consolidated
}

/// Insert one candidate; returns `true` if it merged into a resident.
fn insert_candidate(set: &mut Consolidated, incoming: Candidate) -> bool {
    let query_radius = NEIGHBOR_QUERY_FRAC * incoming.ellipse.major;
    let neighbors = set
        .index
        .radius_query(incoming.ellipse.row, incoming.ellipse.col, query_radius);

    for id in neighbors {
        let resident = &set.arena[id];
        if !resident.active {
            continue;
        }
        if merge_decision(resident, &incoming) == MergeDecision::Merge {
            merge_into(&mut set.arena[id], incoming);
            return true;
        }
    }

    let id = set.arena.len();
    set.index
        .insert(incoming.ellipse.row, incoming.ellipse.col, id);
    set.arena.push(incoming);
    false
}

/// 50/50 average of position, size, and angle; keep the larger magnitude,
/// the earlier rank, and the union of contributing methods.
fn merge_into(resident: &mut Candidate, incoming: Candidate) {
    let a = resident.ellipse;
    let b = incoming.ellipse;

    // Average the doubled axis angle on the unit circle; plain averaging
    // breaks at the ±π/2 wrap.
    let (s1, c1) = (2.0 * a.angle).sin_cos();
    let (s2, c2) = (2.0 * b.angle).sin_cos();
    let angle = 0.5 * (s1 + s2).atan2(c1 + c2);

    resident.ellipse = crate::ellipse::Ellipse {
        row: 0.5 * (a.row + b.row),
        col: 0.5 * (a.col + b.col),
        major: 0.5 * (a.major + b.major),
        minor: 0.5 * (a.minor + b.minor),
        angle,
    }
    .canonicalized();
    resident.magnitude = resident.magnitude.max(incoming.magnitude);
    resident.rank = resident.rank.min(incoming.rank);
    resident.methods.union(incoming.methods);
}
