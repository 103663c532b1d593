// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! §4.1 SpatialIndex: a balanced k-d tree over a borrowed point slice,
//! serving k-NN and radius queries. The tree partitions a permutation of
//! point indices in place; the point buffer itself is never copied.

#[cfg(test)]
mod tests;

use crate::{ReconstructError, Result};
use rayon::prelude::*;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use vector_traits::glam::Vec3A;

/// Below this permutation length construction falls back to a single leaf
/// (brute-force linear scan), matching lvr2's `SearchTreeNabo` behavior for
/// point counts at or below `max_leaf_size`.
const BRUTE_FORCE_THRESHOLD: usize = 1;

/// A single node of the array-backed tree. Interior nodes store the split
/// axis/value and the index of their two children in `SpatialIndex::nodes`;
/// leaves store a `[start, end)` range into the permutation array.
#[derive(Debug, Clone, Copy)]
enum Node {
    Leaf { start: u32, end: u32 },
    Interior {
        axis: u8,
        split_value: f32,
        left: u32,
        right: u32,
    },
}

/// An immutable k-d tree over `points`. Safe to query concurrently from
/// multiple threads once built (§5 "Thread-safe regions").
pub struct SpatialIndex<'p> {
    points: &'p [Vec3A],
    /// permutation of `0..points.len()`, partitioned in place during build.
    order: Vec<u32>,
    nodes: Vec<Node>,
    max_leaf_size: usize,
}

/// One result of a k-NN or radius query: the original point index and the
/// squared Euclidean distance to the query point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: u32,
    pub distance_squared: f32,
}

impl Eq for Neighbor {}

/// Ordered by distance ascending; ties broken by smaller index (§4.1 "Tie
/// breaking").
impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance_squared
            .partial_cmp(&other.distance_squared)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.index.cmp(&other.index))
    }
}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn validate_query_point(q: Vec3A) -> Result<()> {
    if !q.is_finite() {
        return Err(ReconstructError::InvalidArgument(format!(
            "query point contains a NaN or infinite coordinate: {q:?}"
        )));
    }
    Ok(())
}

impl<'p> SpatialIndex<'p> {
    /// Builds a balanced k-d tree over `points`. `max_leaf_size` bounds the
    /// number of points a leaf may hold (default 20, §4.1); it is clamped
    /// to at least 1.
    pub fn build(points: &'p [Vec3A], max_leaf_size: usize) -> Result<Self> {
        for p in points {
            if !p.is_finite() {
                return Err(ReconstructError::InvalidArgument(
                    "point cloud contains a NaN or infinite coordinate".to_string(),
                ));
            }
        }
        let max_leaf_size = max_leaf_size.max(1);
        let mut order: Vec<u32> = (0..points.len() as u32).collect();
        let mut nodes = Vec::new();
        if !order.is_empty() {
            let _ = build_recursive(points, &mut order, 0, order.len(), 0, max_leaf_size, &mut nodes);
        }
        Ok(Self {
            points,
            order,
            nodes,
            max_leaf_size,
        })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns the `k` nearest points to `q`, ascending by distance, ties
    /// broken by smaller index. Empty input, or `k == 0`, yields an empty
    /// result rather than an error.
    pub fn k_search(&self, q: Vec3A, k: usize) -> Result<Vec<Neighbor>> {
        validate_query_point(q)?;
        if self.points.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let mut heap: BinaryHeap<Neighbor> = BinaryHeap::with_capacity(k + 1);
        if let Some(root) = self.nodes.last().map(|_| self.nodes.len() as u32 - 1) {
            self.k_search_node(root, q, k, &mut heap);
        } else {
            // single implicit leaf spanning the whole permutation (tiny input)
            self.scan_leaf(0, self.order.len() as u32, q, k, &mut heap);
        }
        let mut result: Vec<Neighbor> = heap.into_vec();
        result.sort();
        Ok(result)
    }

    /// Returns up to `k_max` points within distance `r` of `q`. Order is
    /// unspecified but the result is guaranteed complete.
    pub fn radius_search(&self, q: Vec3A, r: f32, k_max: usize) -> Result<Vec<Neighbor>> {
        validate_query_point(q)?;
        if self.points.is_empty() || k_max == 0 || r < 0.0 {
            return Ok(Vec::new());
        }
        let r2 = r * r;
        let mut out = Vec::new();
        if let Some(_) = self.nodes.last() {
            self.radius_search_node(self.nodes.len() as u32 - 1, q, r2, k_max, &mut out);
        } else {
            self.radius_scan_leaf(0, self.order.len() as u32, q, r2, k_max, &mut out);
        }
        Ok(out)
    }

    fn scan_leaf(&self, start: u32, end: u32, q: Vec3A, k: usize, heap: &mut BinaryHeap<Neighbor>) {
        for &idx in &self.order[start as usize..end as usize] {
            let d2 = (self.points[idx as usize] - q).length_squared();
            let candidate = Neighbor {
                index: idx,
                distance_squared: d2,
            };
            if heap.len() < k {
                heap.push(candidate);
            } else if let Some(worst) = heap.peek() {
                if candidate < *worst {
                    let _ = heap.pop();
                    heap.push(candidate);
                }
            }
        }
    }

    fn k_search_node(&self, node_idx: u32, q: Vec3A, k: usize, heap: &mut BinaryHeap<Neighbor>) {
        match self.nodes[node_idx as usize] {
            Node::Leaf { start, end } => self.scan_leaf(start, end, q, k, heap),
            Node::Interior {
                axis,
                split_value,
                left,
                right,
            } => {
                let q_axis = axis_value(q, axis);
                let (near, far) = if q_axis <= split_value {
                    (left, right)
                } else {
                    (right, left)
                };
                self.k_search_node(near, q, k, heap);
                let axis_dist2 = {
                    let d = q_axis - split_value;
                    d * d
                };
                let worst_bound = heap
                    .peek()
                    .filter(|_| heap.len() >= k)
                    .map(|w| w.distance_squared);
                if worst_bound.is_none_or(|wb| axis_dist2 < wb) {
                    self.k_search_node(far, q, k, heap);
                }
            }
        }
    }

    fn radius_scan_leaf(
        &self,
        start: u32,
        end: u32,
        q: Vec3A,
        r2: f32,
        k_max: usize,
        out: &mut Vec<Neighbor>,
    ) {
        for &idx in &self.order[start as usize..end as usize] {
            if out.len() >= k_max {
                return;
            }
            let d2 = (self.points[idx as usize] - q).length_squared();
            if d2 <= r2 {
                out.push(Neighbor {
                    index: idx,
                    distance_squared: d2,
                });
            }
        }
    }

    fn radius_search_node(
        &self,
        node_idx: u32,
        q: Vec3A,
        r2: f32,
        k_max: usize,
        out: &mut Vec<Neighbor>,
    ) {
        if out.len() >= k_max {
            return;
        }
        match self.nodes[node_idx as usize] {
            Node::Leaf { start, end } => self.radius_scan_leaf(start, end, q, r2, k_max, out),
            Node::Interior {
                axis,
                split_value,
                left,
                right,
            } => {
                let q_axis = axis_value(q, axis);
                let d = q_axis - split_value;
                // the near side is always worth descending into
                if q_axis <= split_value {
                    self.radius_search_node(left, q, r2, k_max, out);
                    if d * d <= r2 {
                        self.radius_search_node(right, q, r2, k_max, out);
                    }
                } else {
                    self.radius_search_node(right, q, r2, k_max, out);
                    if d * d <= r2 {
                        self.radius_search_node(left, q, r2, k_max, out);
                    }
                }
            }
        }
    }

    /// parallel variant of `k_search` for batches: independent queries, no
    /// shared mutable state (§5 "fully concurrent reads").
    pub fn k_search_many(&self, queries: &[Vec3A], k: usize) -> Result<Vec<Vec<Neighbor>>>
    where
        Self: Sync,
    {
        queries
            .par_iter()
            .map(|&q| self.k_search(q, k))
            .collect()
    }
}

#[inline]
fn axis_value(v: Vec3A, axis: u8) -> f32 {
    match axis % 3 {
        0 => v.x,
        1 => v.y,
        _ => v.z,
    }
}

/// Recursively partitions `order[start..end]` into a balanced subtree,
/// splitting on axis `depth % 3` at the median (expected-linear selection
/// via `select_nth_unstable_by`). Returns the index of the node just
/// pushed into `nodes`.
fn build_recursive(
    points: &[Vec3A],
    order: &mut [u32],
    start: usize,
    end: usize,
    depth: usize,
    max_leaf_size: usize,
    nodes: &mut Vec<Node>,
) -> u32 {
    let len = end - start;
    if len <= max_leaf_size.max(BRUTE_FORCE_THRESHOLD) {
        nodes.push(Node::Leaf {
            start: start as u32,
            end: end as u32,
        });
        return nodes.len() as u32 - 1;
    }
    let axis = (depth % 3) as u8;
    let slice = &mut order[start..end];
    let mid = len / 2;
    let (_, median_elem, _) = slice.select_nth_unstable_by(mid, |&a, &b| {
        axis_value(points[a as usize], axis)
            .partial_cmp(&axis_value(points[b as usize], axis))
            .unwrap_or(Ordering::Equal)
    });
    let split_value = axis_value(points[*median_elem as usize], axis);

    let left = build_recursive(points, order, start, start + mid, depth + 1, max_leaf_size, nodes);
    let right = build_recursive(points, order, start + mid, end, depth + 1, max_leaf_size, nodes);
    nodes.push(Node::Interior {
        axis,
        split_value,
        left,
        right,
    });
    nodes.len() as u32 - 1
}

/// A trivial fixed-capacity result buffer used by callers that want to
/// avoid a heap allocation for small, bounded k-NN queries (e.g. the voxel
/// grid's per-corner distance evaluation, §4.3.2).
pub type SmallNeighborVec = SmallVec<[Neighbor; 16]>;
