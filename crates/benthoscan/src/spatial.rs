//! 2-D point index for candidate consolidation.
//!
//! A plain k-d tree over (row, col) keys carrying candidate arena indices.
//! Points are inserted one at a time (consolidation interleaves queries and
//! insertions, so a bulk build is not an option) and never moved or removed;
//! merged candidates keep their original key point.

/// A k-d tree over (row, col) points with attached payload ids.
#[derive(Debug, Default)]
pub struct PointIndex {
    nodes: Vec<Node>,
}

#[derive(Debug)]
struct Node {
    row: f32,
    col: f32,
    id: usize,
    left: Option<usize>,
    right: Option<usize>,
    /// 0 splits on row, 1 on col.
    split_dim: u8,
}

impl PointIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored points.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the index holds no points.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert a point with its payload id.
    pub fn insert(&mut self, row: f32, col: f32, id: usize) {
        let new_idx = self.nodes.len();
        if self.nodes.is_empty() {
            self.nodes.push(Node {
                row,
                col,
                id,
                left: None,
                right: None,
                split_dim: 0,
            });
            return;
        }

        let mut cur = 0usize;
        loop {
            let (go_left, next_dim) = {
                let node = &self.nodes[cur];
                let key = if node.split_dim == 0 { row } else { col };
                let node_key = if node.split_dim == 0 { node.row } else { node.col };
                (key < node_key, (node.split_dim + 1) % 2)
            };
            let child = if go_left {
                self.nodes[cur].left
            } else {
                self.nodes[cur].right
            };
            match child {
                Some(c) => cur = c,
                None => {
                    self.nodes.push(Node {
                        row,
                        col,
                        id,
                        left: None,
                        right: None,
                        split_dim: next_dim,
                    });
                    if go_left {
                        self.nodes[cur].left = Some(new_idx);
                    } else {
                        self.nodes[cur].right = Some(new_idx);
                    }
                    return;
                }
            }
        }
    }

    /// Payload ids of all points within `radius` of `(row, col)`,
    /// ordered by ascending distance.
    pub fn radius_query(&self, row: f32, col: f32, radius: f32) -> Vec<usize> {
        if self.nodes.is_empty() || radius < 0.0 {
            return Vec::new();
        }
        let mut hits: Vec<(f32, usize)> = Vec::new();
        self.radius_query_rec(0, row, col, radius * radius, &mut hits);
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits.into_iter().map(|(_, id)| id).collect()
    }

    fn radius_query_rec(
        &self,
        node_idx: usize,
        row: f32,
        col: f32,
        radius_sq: f32,
        hits: &mut Vec<(f32, usize)>,
    ) {
        let node = &self.nodes[node_idx];
        let dr = row - node.row;
        let dc = col - node.col;
        let dist_sq = dr * dr + dc * dc;
        if dist_sq <= radius_sq {
            hits.push((dist_sq, node.id));
        }

        let diff = if node.split_dim == 0 { dr } else { dc };
        let diff_sq = diff * diff;
        if let Some(left) = node.left {
            if diff <= 0.0 || diff_sq <= radius_sq {
                self.radius_query_rec(left, row, col, radius_sq, hits);
            }
        }
        if let Some(right) = node.right {
            if diff >= 0.0 || diff_sq <= radius_sq {
                self.radius_query_rec(right, row, col, radius_sq, hits);
            }
        }
    }

    /// Pre-order walk of the tree, yielding payload ids.
    pub fn preorder_ids(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.nodes.len());
        if self.nodes.is_empty() {
            return out;
        }
        let mut stack = vec![0usize];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            out.push(node.id);
            if let Some(r) = node.right {
                stack.push(r);
            }
            if let Some(l) = node.left {
                stack.push(l);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radius_query_orders_by_distance() {
        let mut index = PointIndex::new();
        index.insert(0.0, 0.0, 10);
        index.insert(0.0, 3.0, 11);
        index.insert(0.0, 1.0, 12);
        index.insert(5.0, 5.0, 13);

        let hits = index.radius_query(0.0, 0.0, 3.5);
        assert_eq!(hits, vec![10, 12, 11]);
    }

    #[test]
    fn radius_query_respects_radius() {
        let mut index = PointIndex::new();
        for i in 0..20 {
            index.insert(i as f32, 0.0, i);
        }
        let hits = index.radius_query(10.0, 0.0, 2.0);
        assert_eq!(hits.len(), 5); // 8..=12
        assert!(hits.contains(&10));
        assert!(!hits.contains(&13));
    }

    #[test]
    fn preorder_visits_every_point_once() {
        let mut index = PointIndex::new();
        for i in 0..50 {
            index.insert((i * 7 % 13) as f32, (i * 3 % 11) as f32, i);
        }
        let mut ids = index.preorder_ids();
        assert_eq!(ids.len(), 50);
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn radius_query_matches_brute_force_on_random_points() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        let mut index = PointIndex::new();
        let mut points = Vec::new();
        for id in 0..300 {
            let (r, c) = (rng.gen_range(0.0..200.0), rng.gen_range(0.0..200.0));
            index.insert(r, c, id);
            points.push((r, c));
        }

        for _ in 0..20 {
            let (qr, qc) = (rng.gen_range(0.0..200.0), rng.gen_range(0.0..200.0));
            let radius = rng.gen_range(5.0..40.0);
            let mut expected: Vec<usize> = points
                .iter()
                .enumerate()
                .filter(|(_, &(r, c))| (r - qr).hypot(c - qc) <= radius)
                .map(|(id, _)| id)
                .collect();
            let mut hits = index.radius_query(qr, qc, radius);
            expected.sort_unstable();
            hits.sort_unstable();
            assert_eq!(hits, expected);
        }
    }

    #[test]
    fn empty_index_is_well_behaved() {
        let index = PointIndex::new();
        assert!(index.is_empty());
        assert!(index.radius_query(0.0, 0.0, 10.0).is_empty());
        assert!(index.preorder_ids().is_empty());
    }
}
