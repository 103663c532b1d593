// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! §4.5.1 steps 2-3: contour cleaning (dangling-triangle removal plus
//! minimum-angle-improving boundary flips) and hole filling via an
//! ear-clipping fan through `earcutr`.

use crate::half_edge_mesh::{Edge, Face, Halfedge, HalfEdgeMesh, Vertex};
use crate::Result;
use std::collections::HashSet;
use vector_traits::glam::Vec3A;

/// A triangular face with exactly two boundary edges is a dangling spike
/// left by iso-extraction along a narrow band; its one remaining edge is
/// deleted along with it. Repeats `iterations` times since removing one
/// spike can expose the triangle behind it as a fresh spike.
pub(crate) fn clean_contours(mesh: &mut HalfEdgeMesh, iterations: u32) -> Result<usize> {
    let mut removed = 0;
    for _ in 0..iterations {
        let mut changed = false;

        let mut dangling = Vec::new();
        for i in 0..mesh.face_count() {
            let f = Face(i as u32);
            if mesh.is_deleted_face(f) {
                continue;
            }
            let hs: Vec<Halfedge> = mesh.halfedges_around_face(f).collect::<Result<Vec<_>>>()?;
            if hs.len() == 3 {
                let boundary_edges = hs.iter().filter(|h| mesh.is_boundary_halfedge(h.opposite())).count();
                if boundary_edges >= 2 {
                    dangling.push(f);
                }
            }
        }
        if !dangling.is_empty() {
            mesh.delete_many_faces(&dangling)?;
            removed += dangling.len();
            changed = true;
        }

        let flips = collect_angle_improving_flips(mesh)?;
        for e in flips {
            if mesh.is_flip_ok(e) {
                mesh.flip(e)?;
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }
    if removed > 0 {
        mesh.garbage_collect()?;
    }
    Ok(removed)
}

/// An edge shared by exactly one interior face and one boundary gap, whose
/// flip would raise the minimum interior angle of the two triangles it
/// touches, is a classic thin-sliver artifact along a reconstructed
/// boundary. Edges already bounding two interior faces are left to the
/// planar-growing/retesselation stages instead.
fn collect_angle_improving_flips(mesh: &HalfEdgeMesh) -> Result<Vec<Edge>> {
    let mut flips = Vec::new();
    for i in 0..mesh.edge_count() {
        let e = Edge(i as u32);
        if mesh.is_deleted_edge(e) {
            continue;
        }
        let h0 = e.halfedge(0);
        let h1 = e.halfedge(1);
        let (f0, f1) = (mesh.face(h0), mesh.face(h1));
        let (interior, boundary_h) = match (f0, f1) {
            (Some(_), None) => (h0, h1),
            (None, Some(_)) => (h1, h0),
            _ => continue,
        };
        let _ = boundary_h;
        if !mesh.is_flip_ok(e) {
            continue;
        }
        let before = min_interior_angle_of_edge(mesh, interior)?;
        let apex_c = mesh.to_vertex(mesh.next_halfedge(interior));
        let apex_d = mesh.to_vertex(mesh.next_halfedge(interior.opposite()));
        let va = mesh.to_vertex(interior);
        let vb = mesh.to_vertex(interior.opposite());
        let after = min_triangle_angle(mesh, va, apex_c, apex_d).min(min_triangle_angle(mesh, apex_c, vb, apex_d));
        if after > before {
            flips.push(e);
        }
    }
    Ok(flips)
}

fn min_interior_angle_of_edge(mesh: &HalfEdgeMesh, h: Halfedge) -> Result<f32> {
    let va = mesh.from_vertex(h);
    let vb = mesh.to_vertex(h);
    let apex = mesh.to_vertex(mesh.next_halfedge(h));
    let opp_apex = mesh.to_vertex(mesh.next_halfedge(h.opposite()));
    Ok(min_triangle_angle(mesh, va, vb, apex).min(min_triangle_angle(mesh, vb, va, opp_apex)))
}

fn min_triangle_angle(mesh: &HalfEdgeMesh, a: Vertex, b: Vertex, c: Vertex) -> f32 {
    let (pa, pb, pc) = (mesh.point(a), mesh.point(b), mesh.point(c));
    angle_at(pa, pb, pc).min(angle_at(pb, pc, pa)).min(angle_at(pc, pa, pb))
}

fn angle_at(at: Vec3A, p: Vec3A, q: Vec3A) -> f32 {
    let u = (p - at).normalize_or_zero();
    let v = (q - at).normalize_or_zero();
    u.dot(v).clamp(-1.0, 1.0).acos()
}

/// Every maximal run of boundary halfedges forms a loop; short loops
/// (`max_boundary_length` edges or fewer) are patched with an ear-clipping
/// fan, oriented to match the faces already bordering the hole.
pub(crate) fn fill_holes(mesh: &mut HalfEdgeMesh, max_boundary_length: usize) -> Result<usize> {
    if max_boundary_length == 0 {
        return Ok(0);
    }
    let mut filled = 0;
    let mut visited: HashSet<Halfedge> = HashSet::new();

    for i in 0..mesh.halfedge_count() {
        let start = Halfedge(i as u32);
        if !mesh.is_boundary_halfedge(start) || visited.contains(&start) {
            continue;
        }
        let loop_halfedges = collect_boundary_loop(mesh, start)?;
        for &h in &loop_halfedges {
            visited.insert(h);
        }
        if loop_halfedges.len() > max_boundary_length || loop_halfedges.len() < 3 {
            continue;
        }
        let verts: Vec<Vertex> = loop_halfedges.iter().map(|h| mesh.to_vertex(*h)).collect();
        if triangulate_hole(mesh, &verts).is_ok() {
            filled += 1;
        }
    }
    Ok(filled)
}

fn collect_boundary_loop(mesh: &HalfEdgeMesh, start: Halfedge) -> Result<Vec<Halfedge>> {
    let mut loop_halfedges = vec![start];
    let mut h = mesh.next_halfedge(start);
    let bound = mesh.halfedge_count() + 1;
    for _ in 0..bound {
        if h == start {
            break;
        }
        loop_halfedges.push(h);
        h = mesh.next_halfedge(h);
    }
    Ok(loop_halfedges)
}

/// Fans an ear-clipping triangulation (`earcutr`, projected to the loop's
/// best-fit plane) across the hole. A face is added per resulting
/// triangle, winding consistent with `verts`' boundary order (i.e. with
/// the surrounding faces, since a boundary loop's halfedges already run
/// opposite to their neighboring faces' winding).
fn triangulate_hole(mesh: &mut HalfEdgeMesh, verts: &[Vertex]) -> Result<()> {
    let points: Vec<Vec3A> = verts.iter().map(|&v| mesh.point(v)).collect();
    let normal = super::geometry::polygon_normal_unnormalized(&points).normalize_or_zero();
    let (u_axis, v_axis) = orthonormal_basis(normal);
    let origin = points[0];

    let mut flat = Vec::with_capacity(points.len() * 2);
    for p in &points {
        let d = *p - origin;
        flat.push(d.dot(u_axis));
        flat.push(d.dot(v_axis));
    }

    let indices = earcutr::earcut(&flat, &[], 2).map_err(|e| {
        crate::ReconstructError::TopologyException(format!("hole triangulation failed: {e:?}"))
    })?;

    for tri in indices.chunks_exact(3) {
        let a = verts[tri[0]];
        let b = verts[tri[1]];
        let c = verts[tri[2]];
        mesh.add_face(&[a, b, c])?;
    }
    Ok(())
}

fn orthonormal_basis(normal: Vec3A) -> (Vec3A, Vec3A) {
    let up = if normal.x.abs() < 0.9 { Vec3A::X } else { Vec3A::Y };
    let u = up.cross(normal).normalize_or_zero();
    let v = normal.cross(u);
    (u, v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pentagon() -> (HalfEdgeMesh, Vec<Vertex>) {
        let mut mesh = HalfEdgeMesh::new();
        let center = Vec3A::ZERO;
        let mut verts = Vec::new();
        for i in 0..5 {
            let a = i as f32 / 5.0 * std::f32::consts::TAU;
            verts.push(mesh.add_vertex(center + Vec3A::new(a.cos(), a.sin(), 0.0)));
        }
        (mesh, verts)
    }

    #[test]
    fn a_pentagon_hole_within_the_limit_is_filled() {
        let (mut mesh, verts) = pentagon();
        // a fan around a distant hub gives the pentagon boundary a genuine
        // opposite-facing hole to fill, rather than a dangling rim
        let hub = mesh.add_vertex(Vec3A::new(5.0, 5.0, 5.0));
        for i in 0..verts.len() {
            let j = (i + 1) % verts.len();
            mesh.add_face(&[hub, verts[j], verts[i]]).unwrap();
        }
        let filled = fill_holes(&mut mesh, 5).unwrap();
        assert_eq!(filled, 1);
        assert_eq!(mesh.face_count(), 5 + 3);
    }

    #[test]
    fn a_hole_larger_than_the_limit_is_left_open() {
        let (mut mesh, verts) = pentagon();
        let hub = mesh.add_vertex(Vec3A::new(5.0, 5.0, 5.0));
        for i in 0..verts.len() {
            let j = (i + 1) % verts.len();
            let _ = mesh.add_face(&[hub, verts[j], verts[i]]);
        }
        let filled = fill_holes(&mut mesh, 3).unwrap();
        assert_eq!(filled, 0);
        assert_eq!(mesh.face_count(), 5);
    }
}
