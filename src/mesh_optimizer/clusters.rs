// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! §4.5.1 steps 4-5: planar cluster growing (greedy BFS, with a RANSAC
//! variant) and small-cluster deletion. Clusters are tracked as a
//! `ClusterId` face property rather than a side table, so later stages
//! (retesselation, texturizing) can read cluster membership straight off
//! the mesh without threading extra state through.

use super::geometry::face_geometry;
use crate::config::OptimizerConfig;
use crate::half_edge_mesh::{Face, HalfEdgeMesh, PropertyHandle};
use crate::Result;
use rand::prelude::*;
use rand::rngs::StdRng;
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use vector_traits::glam::Vec3A;

/// Number of random triples tried per RANSAC cluster seed, same floor as
/// the point-set-surface plane fit.
const RANSAC_TRIALS: usize = 64;

pub(crate) const CLUSTER_PROPERTY: &str = "f:cluster";

/// One growing or grown planar region: a running area-weighted mean
/// normal (renormalized after each addition, per §4.5.1 step 4) plus the
/// member face list.
pub(crate) struct Cluster {
    pub(crate) faces: Vec<Face>,
    pub(crate) normal_sum: Vec3A,
    pub(crate) centroid: Vec3A,
}

impl Cluster {
    fn normal(&self) -> Vec3A {
        self.normal_sum.normalize_or_zero()
    }
}

/// Greedy BFS region growing: each unclustered face seeds a new cluster
/// at the face with the smallest neighborhood-residual (here approximated
/// by normal agreement with its immediate neighbors, since the raw PCA
/// residual plumbing lives in `point_set_surface` and isn't carried onto
/// mesh faces), then absorbs neighbors whose normal agrees with the
/// cluster's running mean within `normal_threshold`.
pub(crate) fn grow_planar_clusters(
    mesh: &mut HalfEdgeMesh,
    config: &OptimizerConfig,
) -> Result<PropertyHandle<i32>> {
    let cluster_prop: PropertyHandle<i32> = mesh.add_face_property(CLUSTER_PROPERTY, -1);
    let n = mesh.face_count();

    let mut geometry = vec![None; n];
    for i in 0..n {
        let f = Face(i as u32);
        if mesh.is_deleted_face(f) {
            continue;
        }
        geometry[i] = face_geometry(mesh, f).ok();
    }

    let seeds = order_seeds_by_local_planarity(mesh, &geometry)?;

    let mut next_id = 0i32;
    for seed in seeds {
        let idx = seed.index() as usize;
        if geometry[idx].is_none() || mesh.face_property(cluster_prop, seed) != -1 {
            continue;
        }
        let cluster = if config.use_ransac_clustering {
            grow_from_seed_ransac(mesh, seed, &geometry, config.min_plane_size, idx as u64)?
        } else {
            Some(grow_from_seed(mesh, seed, &geometry, config.normal_threshold)?)
        };
        let Some(cluster) = cluster else {
            continue;
        };
        for &f in &cluster.faces {
            mesh.set_face_property(cluster_prop, f, next_id);
        }
        next_id += 1;
    }
    Ok(cluster_prop)
}

/// RANSAC cluster-growing variant (§4.5.1 step 4): pick three random
/// faces from the seed's neighborhood, fit their common plane and accept
/// it only if its inlier set reaches `min_plane_size`; the best of
/// `RANSAC_TRIALS` attempts seeds a BFS absorption pass identical to the
/// greedy variant's, but against the fixed RANSAC plane instead of a
/// running mean.
fn grow_from_seed_ransac(
    mesh: &HalfEdgeMesh,
    seed: Face,
    geometry: &[Option<(Vec3A, f32, Vec3A)>],
    min_plane_size: usize,
    seed_rng: u64,
) -> Result<Option<Cluster>> {
    let candidates: Vec<Face> = collect_neighborhood(mesh, seed, 2)?;
    if candidates.len() < 3 {
        return Ok(None);
    }
    let mut rng = StdRng::seed_from_u64(seed_rng);
    let mut best_normal = None;
    let mut best_inliers = 0usize;

    for _ in 0..RANSAC_TRIALS {
        let a = candidates[rng.random_range(0..candidates.len())];
        let b = candidates[rng.random_range(0..candidates.len())];
        let c = candidates[rng.random_range(0..candidates.len())];
        let (Some((na, _, ca)), Some((nb, _, _)), Some((nc, _, _))) = (
            geometry[a.index() as usize],
            geometry[b.index() as usize],
            geometry[c.index() as usize],
        ) else {
            continue;
        };
        let plane_normal = ((na + nb + nc) / 3.0).normalize_or_zero();
        if plane_normal.length_squared() < 0.5 {
            continue;
        }
        let inliers = candidates
            .iter()
            .filter(|&&f| {
                geometry[f.index() as usize]
                    .map(|(n, _, _)| n.dot(plane_normal) >= 0.85)
                    .unwrap_or(false)
            })
            .count();
        if inliers > best_inliers {
            best_inliers = inliers;
            best_normal = Some((plane_normal, ca));
        }
    }

    if best_inliers < min_plane_size {
        return Ok(None);
    }
    let (normal, centroid) = best_normal.expect("best_inliers > 0 implies a plane was recorded");
    let (seed_normal, seed_area, _) = geometry[seed.index() as usize].expect("checked by caller");
    let mut cluster = Cluster {
        faces: vec![seed],
        normal_sum: seed_normal * seed_area,
        centroid,
    };
    let mut in_cluster: FxHashSet<Face> = FxHashSet::default();
    in_cluster.insert(seed);
    let mut queue = VecDeque::new();
    queue.push_back(seed);
    while let Some(f) = queue.pop_front() {
        for h in mesh.halfedges_around_face(f) {
            let h = h?;
            let Some(neighbor) = mesh.face(h.opposite()) else {
                continue;
            };
            if in_cluster.contains(&neighbor) {
                continue;
            }
            let Some((n_normal, n_area, _)) = geometry[neighbor.index() as usize] else {
                continue;
            };
            if n_normal.dot(normal) >= 0.85 {
                in_cluster.insert(neighbor);
                cluster.faces.push(neighbor);
                cluster.normal_sum += n_normal * n_area;
                queue.push_back(neighbor);
            }
        }
    }
    Ok(Some(cluster))
}

/// Faces within `radius` mesh-adjacency hops of `seed`.
fn collect_neighborhood(mesh: &HalfEdgeMesh, seed: Face, radius: usize) -> Result<Vec<Face>> {
    let mut visited = FxHashSet::default();
    visited.insert(seed);
    let mut frontier = vec![seed];
    let mut all = vec![seed];
    for _ in 0..radius {
        let mut next_frontier = Vec::new();
        for f in frontier {
            for h in mesh.halfedges_around_face(f) {
                let h = h?;
                if let Some(neighbor) = mesh.face(h.opposite()) {
                    if visited.insert(neighbor) {
                        next_frontier.push(neighbor);
                        all.push(neighbor);
                    }
                }
            }
        }
        frontier = next_frontier;
    }
    Ok(all)
}

fn order_seeds_by_local_planarity(
    mesh: &HalfEdgeMesh,
    geometry: &[Option<(Vec3A, f32, Vec3A)>],
) -> Result<Vec<Face>> {
    let mut scored = Vec::new();
    for i in 0..geometry.len() {
        let f = Face(i as u32);
        let Some((normal, _, _)) = geometry[i] else {
            continue;
        };
        let mut agreement = 0.0f32;
        let mut count = 0;
        for h in mesh.halfedges_around_face(f) {
            let h = h?;
            if let Some(neighbor) = mesh.face(h.opposite()) {
                if let Some((n_normal, _, _)) = geometry[neighbor.index() as usize] {
                    agreement += normal.dot(n_normal);
                    count += 1;
                }
            }
        }
        let residual = if count > 0 { -(agreement / count as f32) } else { 0.0 };
        scored.push((residual, f));
    }
    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    Ok(scored.into_iter().map(|(_, f)| f).collect())
}

fn grow_from_seed(
    mesh: &HalfEdgeMesh,
    seed: Face,
    geometry: &[Option<(Vec3A, f32, Vec3A)>],
    normal_threshold: f32,
) -> Result<Cluster> {
    let (seed_normal, seed_area, seed_centroid) = geometry[seed.index() as usize].expect("checked by caller");
    let mut cluster = Cluster {
        faces: vec![seed],
        normal_sum: seed_normal * seed_area,
        centroid: seed_centroid,
    };
    let mut in_cluster: FxHashSet<Face> = FxHashSet::default();
    in_cluster.insert(seed);

    let mut queue = VecDeque::new();
    queue.push_back(seed);
    while let Some(f) = queue.pop_front() {
        for h in mesh.halfedges_around_face(f) {
            let h = h?;
            let Some(neighbor) = mesh.face(h.opposite()) else {
                continue;
            };
            if in_cluster.contains(&neighbor) {
                continue;
            }
            let Some((n_normal, n_area, _)) = geometry[neighbor.index() as usize] else {
                continue;
            };
            if cluster.normal().dot(n_normal) >= normal_threshold {
                in_cluster.insert(neighbor);
                cluster.faces.push(neighbor);
                cluster.normal_sum += n_normal * n_area;
                queue.push_back(neighbor);
            }
        }
    }
    Ok(cluster)
}

/// Deletes every cluster's face membership label for clusters at or
/// below `small_region_threshold`, leaving those faces with cluster id
/// `-1` (uncategorized) rather than removing the faces themselves —
/// small-region deletion prunes *clustering*, not geometry.
pub(crate) fn delete_small_clusters(
    mesh: &mut HalfEdgeMesh,
    cluster_prop: PropertyHandle<i32>,
    small_region_threshold: usize,
) -> Result<usize> {
    let mut counts: std::collections::HashMap<i32, usize> = std::collections::HashMap::new();
    for i in 0..mesh.face_count() {
        let f = Face(i as u32);
        if mesh.is_deleted_face(f) {
            continue;
        }
        let id = mesh.face_property(cluster_prop, f);
        if id >= 0 {
            *counts.entry(id).or_insert(0) += 1;
        }
    }

    let mut cleared = 0;
    for i in 0..mesh.face_count() {
        let f = Face(i as u32);
        if mesh.is_deleted_face(f) {
            continue;
        }
        let id = mesh.face_property(cluster_prop, f);
        if id >= 0 && counts.get(&id).copied().unwrap_or(0) <= small_region_threshold {
            mesh.set_face_property(cluster_prop, f, -1);
            cleared += 1;
        }
    }
    Ok(cleared)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_triangle_quad(mesh: &mut HalfEdgeMesh, origin: Vec3A) {
        let v0 = mesh.add_vertex(origin);
        let v1 = mesh.add_vertex(origin + Vec3A::new(1.0, 0.0, 0.0));
        let v2 = mesh.add_vertex(origin + Vec3A::new(1.0, 1.0, 0.0));
        let v3 = mesh.add_vertex(origin + Vec3A::new(0.0, 1.0, 0.0));
        mesh.add_face(&[v0, v1, v2]).unwrap();
        mesh.add_face(&[v0, v2, v3]).unwrap();
    }

    #[test]
    fn a_coplanar_quad_forms_one_cluster() {
        let mut mesh = HalfEdgeMesh::new();
        two_triangle_quad(&mut mesh, Vec3A::ZERO);
        let config = OptimizerConfig::default();
        let cluster_prop = grow_planar_clusters(&mut mesh, &config).unwrap();
        let id0 = mesh.face_property(cluster_prop, Face(0));
        let id1 = mesh.face_property(cluster_prop, Face(1));
        assert_eq!(id0, id1);
        assert_ne!(id0, -1);
    }

    #[test]
    fn small_clusters_are_cleared_back_to_uncategorized() {
        let mut mesh = HalfEdgeMesh::new();
        two_triangle_quad(&mut mesh, Vec3A::ZERO);
        let config = OptimizerConfig::default();
        let cluster_prop = grow_planar_clusters(&mut mesh, &config).unwrap();
        let cleared = delete_small_clusters(&mut mesh, cluster_prop, 10).unwrap();
        assert_eq!(cleared, 2);
        assert_eq!(mesh.face_property(cluster_prop, Face(0)), -1);
    }
}
