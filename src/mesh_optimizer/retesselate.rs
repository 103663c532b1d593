// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! §4.5.1 step 6: retesselation. Each planar cluster's boundary loop is
//! projected onto the cluster's best-fit plane and re-triangulated with
//! `earcutr`, replacing the cluster's interior with the new triangles.
//! Collinear boundary edges are fused first so the ear-clipper sees a
//! simplified polygon rather than a staircase of iso-extraction's unit
//! steps.

use crate::half_edge_mesh::{Face, HalfEdgeMesh, PropertyHandle, Vertex};
use crate::Result;
use std::collections::HashMap;
use vector_traits::glam::Vec3A;

/// Replaces every cluster's interior with a fresh triangulation of its
/// boundary loop, skipping clusters whose boundary isn't a single simple
/// loop (§4.4.4-style multi-loop clusters are left untouched rather than
/// guessed at).
pub(crate) fn retesselate_clusters(
    mesh: &mut HalfEdgeMesh,
    cluster_prop: PropertyHandle<i32>,
    line_fusion_threshold: f32,
) -> Result<usize> {
    let mut by_cluster: HashMap<i32, Vec<Face>> = HashMap::new();
    for i in 0..mesh.face_count() {
        let f = Face(i as u32);
        if mesh.is_deleted_face(f) {
            continue;
        }
        let id = mesh.face_property(cluster_prop, f);
        if id >= 0 {
            by_cluster.entry(id).or_default().push(f);
        }
    }

    let mut retesselated = 0;
    for (_, faces) in by_cluster {
        if faces.len() < 2 {
            continue;
        }
        if let Some(boundary) = cluster_boundary_loop(mesh, &faces)? {
            if boundary.len() < 3 {
                continue;
            }
            let fused = fuse_collinear(mesh, &boundary, line_fusion_threshold);
            if fused.len() < 3 {
                continue;
            }
            if retriangulate(mesh, &faces, &fused).is_ok() {
                retesselated += 1;
            }
        }
    }
    if retesselated > 0 {
        mesh.garbage_collect()?;
    }
    Ok(retesselated)
}

/// Collects the ordered boundary loop of a face set: halfedges whose
/// opposite face (if any) isn't itself in the set. Returns `None` if the
/// boundary doesn't form a single connected loop (non-disk topology).
fn cluster_boundary_loop(mesh: &HalfEdgeMesh, faces: &[Face]) -> Result<Option<Vec<Vertex>>> {
    use std::collections::HashSet;
    let set: HashSet<Face> = faces.iter().copied().collect();

    let mut next_of: HashMap<Vertex, Vertex> = HashMap::new();
    for &f in faces {
        for h in mesh.halfedges_around_face(f) {
            let h = h?;
            let outside = match mesh.face(h.opposite()) {
                Some(neighbor) => !set.contains(&neighbor),
                None => true,
            };
            if outside {
                let from = mesh.from_vertex(h);
                let to = mesh.to_vertex(h);
                if next_of.insert(from, to).is_some() {
                    // a vertex with two boundary-outgoing edges means the
                    // cluster boundary branches; bail out rather than guess
                    return Ok(None);
                }
            }
        }
    }
    if next_of.is_empty() {
        return Ok(None);
    }

    let start = *next_of.keys().next().unwrap();
    let mut loop_verts = vec![start];
    let mut current = start;
    let bound = next_of.len() + 1;
    for _ in 0..bound {
        let Some(&next) = next_of.get(&current) else {
            return Ok(None);
        };
        if next == start {
            return Ok(Some(loop_verts));
        }
        loop_verts.push(next);
        current = next;
    }
    Ok(None)
}

/// Drops boundary vertices whose turning angle is within
/// `line_fusion_threshold` radians of straight, so the ear-clipper
/// triangulates a simplified polygon rather than every unit step of a
/// voxel-grid staircase.
fn fuse_collinear(mesh: &HalfEdgeMesh, loop_verts: &[Vertex], threshold: f32) -> Vec<Vertex> {
    let n = loop_verts.len();
    if n < 4 {
        return loop_verts.to_vec();
    }
    let mut kept = Vec::with_capacity(n);
    for i in 0..n {
        let prev = loop_verts[(i + n - 1) % n];
        let curr = loop_verts[i];
        let next = loop_verts[(i + 1) % n];
        let (pp, pc, pn) = (mesh.point(prev), mesh.point(curr), mesh.point(next));
        let u = (pc - pp).normalize_or_zero();
        let v = (pn - pc).normalize_or_zero();
        let turn = u.dot(v).clamp(-1.0, 1.0).acos();
        if turn > threshold {
            kept.push(curr);
        }
    }
    if kept.len() < 3 {
        loop_verts.to_vec()
    } else {
        kept
    }
}

/// Deletes `faces` and fans an `earcutr` triangulation of `boundary`
/// across the freed interior, projected onto the loop's best-fit plane.
fn retriangulate(mesh: &mut HalfEdgeMesh, faces: &[Face], boundary: &[Vertex]) -> Result<()> {
    mesh.delete_many_faces(faces)?;

    let points: Vec<Vec3A> = boundary.iter().map(|&v| mesh.point(v)).collect();
    let normal = super::geometry::polygon_normal_unnormalized(&points).normalize_or_zero();
    let up = if normal.x.abs() < 0.9 { Vec3A::X } else { Vec3A::Y };
    let u_axis = up.cross(normal).normalize_or_zero();
    let v_axis = normal.cross(u_axis);
    let origin = points[0];

    let mut flat = Vec::with_capacity(points.len() * 2);
    for p in &points {
        let d = *p - origin;
        flat.push(d.dot(u_axis));
        flat.push(d.dot(v_axis));
    }

    let indices = earcutr::earcut(&flat, &[], 2).map_err(|e| {
        crate::ReconstructError::TopologyException(format!("retesselation failed: {e:?}"))
    })?;
    for tri in indices.chunks_exact(3) {
        mesh.add_face(&[boundary[tri[0]], boundary[tri[1]], boundary[tri[2]]])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizerConfig;
    use crate::mesh_optimizer::clusters::grow_planar_clusters;

    #[test]
    fn a_staircased_strip_retesselates_into_fewer_triangles() {
        // a 1x4 strip of unit quads, all coplanar, each split the same way
        let mut mesh = HalfEdgeMesh::new();
        let mut top = Vec::new();
        let mut bottom = Vec::new();
        for i in 0..=4 {
            top.push(mesh.add_vertex(Vec3A::new(i as f32, 1.0, 0.0)));
            bottom.push(mesh.add_vertex(Vec3A::new(i as f32, 0.0, 0.0)));
        }
        for i in 0..4 {
            mesh.add_face(&[bottom[i], bottom[i + 1], top[i + 1]]).unwrap();
            mesh.add_face(&[bottom[i], top[i + 1], top[i]]).unwrap();
        }
        let before = mesh.face_count();

        let config = OptimizerConfig::default();
        let cluster_prop = grow_planar_clusters(&mut mesh, &config).unwrap();
        let retesselated = retesselate_clusters(&mut mesh, cluster_prop, 0.01).unwrap();
        assert_eq!(retesselated, 1);
        assert!(mesh.face_count() <= before);
    }
}
