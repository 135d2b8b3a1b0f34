//! Proposal generators.
//!
//! Four independent single-purpose detectors turn one image (or a derived
//! response map) plus a radius band into candidate lists. Generators never
//! fail: recoverable per-image conditions skip the affected candidate and a
//! generator always returns a (possibly empty) list.

pub mod adaptive;
pub mod blob;
pub mod edgefit;
pub mod template;

use crate::color::ResponseMaps;

/// Value below the `q`-quantile of a response map, `q` in [0, 1].
///
/// Sorted-copy selection; maps are small enough that this stays off the
/// profile.
pub(crate) fn quantile(values: &[f32], q: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let idx = ((sorted.len() - 1) as f32 * q.clamp(0.0, 1.0)).round() as usize;
    sorted[idx]
}

/// Sum the per-class response maps into a single combined map.
pub(crate) fn combined_response(maps: &ResponseMaps) -> Vec<f32> {
    let first = match maps.maps.first() {
        Some(m) => m,
        None => return Vec::new(),
    };
    let mut out = vec![0.0f32; first.as_raw().len()];
    for map in &maps.maps {
        for (acc, v) in out.iter_mut().zip(map.as_raw().iter()) {
            *acc += *v;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_is_monotone() {
        let v: Vec<f32> = (0..100).map(|i| i as f32).collect();
        assert!(quantile(&v, 0.1) < quantile(&v, 0.5));
        assert!(quantile(&v, 0.5) < quantile(&v, 0.95));
        assert_eq!(quantile(&[], 0.5), 0.0);
    }
}
