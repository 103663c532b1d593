// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! §3 "Signed-distance cell"/"Corner vertex" and §9's "Shared-corner
//! sharing" design note: a lattice-keyed table of corners, owned by the
//! grid, looked up by index from every cell that touches them. A corner's
//! distance value is written exactly once (§4.3.1 invariant); every cell
//! that later asks for the same `(i, j, k)` gets back the identical
//! `Corner`, which is what makes two adjacent cells agree bit-exactly on
//! their shared corner's scalar.
//!
//! `get_or_insert` is the concurrent entry point construction uses: keys
//! are sharded by hash, each shard behind its own lock, matching §5's "a
//! single per-bucket lock" alternative to a lock-free CAS per bucket.

use crate::point_set_surface::PointSetSurface;
use crate::{ReconstructError, Result};
use rustc_hash::{FxHashMap, FxHasher};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use vector_traits::glam::Vec3A;

const SHARD_BITS: u32 = 6;
const SHARD_COUNT: usize = 1 << SHARD_BITS;
const LOCAL_BITS: u32 = 32 - SHARD_BITS;
const LOCAL_MASK: u32 = (1 << LOCAL_BITS) - 1;

/// A stable handle into a `CornerTable`. Once issued for a given lattice
/// coordinate, the handle never changes and always resolves to the same
/// `Corner` for the lifetime of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CornerHandle(u32);

impl CornerHandle {
    fn pack(shard: usize, local: usize) -> Self {
        Self(((shard as u32) << LOCAL_BITS) | (local as u32 & LOCAL_MASK))
    }

    fn shard(self) -> usize {
        (self.0 >> LOCAL_BITS) as usize
    }

    fn local(self) -> usize {
        (self.0 & LOCAL_MASK) as usize
    }

    /// `(min, max)` of two handles, used as the edge key §4.3.4 dedup uses.
    pub fn edge_key(a: CornerHandle, b: CornerHandle) -> (CornerHandle, CornerHandle) {
        if a.0 <= b.0 {
            (a, b)
        } else {
            (b, a)
        }
    }
}

/// One lattice corner: its world position, the signed distance the surface
/// evaluated there, and whether that evaluation had any support at all.
#[derive(Debug, Clone, Copy)]
pub struct Corner {
    pub position: Vec3A,
    pub distance: f32,
    /// `false` when the surface had no neighbors to sample here
    /// (§4.3.2 "corners with empty k-NN support are marked invalid").
    pub valid: bool,
}

impl Default for Corner {
    /// A placeholder, never-sampled corner: infinitely far outside,
    /// invalid. Only used to pre-fill a fixed-size array before every
    /// slot is overwritten with a real lookup.
    fn default() -> Self {
        Self {
            position: Vec3A::ZERO,
            distance: f32::INFINITY,
            valid: false,
        }
    }
}

#[derive(Default)]
struct Shard {
    index: FxHashMap<(i32, i32, i32), u32>,
    corners: Vec<Corner>,
}

/// The sparse map from integer lattice coordinate to `Corner`, shared by
/// every cell instantiated during one `voxel_grid::reconstruct` call.
pub struct CornerTable {
    cell_size: f32,
    shards: Vec<Mutex<Shard>>,
}

impl CornerTable {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(Shard::default())).collect(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    fn shard_of(key: (i32, i32, i32)) -> usize {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & (SHARD_COUNT - 1)
    }

    pub fn lattice_position(&self, key: (i32, i32, i32)) -> Vec3A {
        Vec3A::new(key.0 as f32, key.1 as f32, key.2 as f32) * self.cell_size
    }

    /// Returns the corner at `key`, evaluating `surface.distance` the
    /// first time any cell asks for it and handing back the cached value
    /// to every later caller. Safe to call from multiple threads: each
    /// shard serializes its own inserts, and a key already present never
    /// triggers a second evaluation.
    pub fn get_or_insert(
        &self,
        key: (i32, i32, i32),
        surface: &PointSetSurface<'_>,
        kd: usize,
    ) -> Result<CornerHandle> {
        let shard_idx = Self::shard_of(key);
        {
            let shard = self.shards[shard_idx].lock().expect("corner shard lock poisoned");
            if let Some(&local) = shard.index.get(&key) {
                return Ok(CornerHandle::pack(shard_idx, local as usize));
            }
        }
        let position = self.lattice_position(key);
        let (distance, valid) = match surface.distance(position, kd) {
            Ok((d, _)) => (d, true),
            Err(ReconstructError::InsufficientSupport(_)) => (f32::INFINITY, false),
            Err(e) => return Err(e),
        };
        let mut shard = self.shards[shard_idx].lock().expect("corner shard lock poisoned");
        if let Some(&local) = shard.index.get(&key) {
            // another thread inserted it while we were off-lock computing the distance
            return Ok(CornerHandle::pack(shard_idx, local as usize));
        }
        let local = shard.corners.len();
        if local as u32 > LOCAL_MASK {
            return Err(ReconstructError::AllocationFailed(
                "voxel corner table shard exceeded its index range".to_string(),
            ));
        }
        shard.corners.push(Corner {
            position,
            distance,
            valid,
        });
        shard.index.insert(key, local as u32);
        Ok(CornerHandle::pack(shard_idx, local))
    }

    pub fn get(&self, handle: CornerHandle) -> Corner {
        let shard = self.shards[handle.shard()].lock().expect("corner shard lock poisoned");
        shard.corners[handle.local()]
    }
}

/// Linear interpolation along a sign-changing edge: `t = d0 / (d0 - d1)`
/// (§4.3.3 MC). Both endpoints must already be known valid; callers skip
/// the cell entirely otherwise.
pub fn interpolate_edge(a: Corner, b: Corner) -> Vec3A {
    let denom = a.distance - b.distance;
    let t = if denom.abs() > 1e-12 { a.distance / denom } else { 0.5 };
    let t = t.clamp(0.0, 1.0);
    a.position + (b.position - a.position) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OrientationReference, SurfaceConfig};
    use crate::spatial_index::SpatialIndex;

    fn flat_surface_points() -> Vec<Vec3A> {
        let mut pts = Vec::new();
        for i in -5..=5 {
            for j in -5..=5 {
                pts.push(Vec3A::new(i as f32 * 0.2, j as f32 * 0.2, 0.0));
            }
        }
        pts
    }

    fn build_surface(points: &[Vec3A]) -> PointSetSurface<'_> {
        let index = SpatialIndex::build(points, 20).unwrap();
        let mut surface = PointSetSurface::estimate_normals(points, index, &SurfaceConfig::default()).unwrap();
        surface
            .orient_normals(&OrientationReference::FlipPoint(Vec3A::new(0.0, 0.0, 1.0)))
            .unwrap();
        surface
    }

    #[test]
    fn repeated_lookups_of_the_same_key_return_the_same_corner() {
        let pts = flat_surface_points();
        let surface = build_surface(&pts);
        let table = CornerTable::new(0.2);
        let h1 = table.get_or_insert((0, 0, 3), &surface, 5).unwrap();
        let h2 = table.get_or_insert((0, 0, 3), &surface, 5).unwrap();
        assert_eq!(h1, h2);
        let c1 = table.get(h1);
        let c2 = table.get(h2);
        assert_eq!(c1.distance.to_bits(), c2.distance.to_bits());
        assert_eq!(c1.position, c2.position);
    }

    #[test]
    fn distinct_keys_get_distinct_handles() {
        let pts = flat_surface_points();
        let surface = build_surface(&pts);
        let table = CornerTable::new(0.2);
        let h1 = table.get_or_insert((0, 0, 3), &surface, 5).unwrap();
        let h2 = table.get_or_insert((1, 0, 3), &surface, 5).unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn edge_key_is_order_independent() {
        let pts = flat_surface_points();
        let surface = build_surface(&pts);
        let table = CornerTable::new(0.2);
        let a = table.get_or_insert((0, 0, 3), &surface, 5).unwrap();
        let b = table.get_or_insert((1, 0, 3), &surface, 5).unwrap();
        assert_eq!(CornerHandle::edge_key(a, b), CornerHandle::edge_key(b, a));
    }

    #[test]
    fn interpolation_lands_at_the_zero_crossing() {
        let a = Corner {
            position: Vec3A::new(0.0, 0.0, 0.0),
            distance: -1.0,
            valid: true,
        };
        let b = Corner {
            position: Vec3A::new(1.0, 0.0, 0.0),
            distance: 1.0,
            valid: true,
        };
        let p = interpolate_edge(a, b);
        assert!((p.x - 0.5).abs() < 1e-6);
    }
}
