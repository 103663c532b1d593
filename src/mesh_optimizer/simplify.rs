// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! §4.5.1 step 7: Garland-Heckbert quadric-error edge-collapse
//! simplification. Each vertex accumulates a 4x4 symmetric error quadric
//! from its incident face planes; an edge's collapse cost is the minimum
//! of the combined quadric evaluated at either endpoint or their
//! midpoint. A lazily-invalidated binary-heap priority queue drives the
//! collapse order, matching the classic mesh-simplification literature
//! this algorithm comes from rather than any one crate in particular.

use super::geometry::face_geometry;
use crate::half_edge_mesh::{Face, HalfEdgeMesh, Halfedge, Vertex};
use crate::Result;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use vector_traits::glam::Vec3A;

/// Symmetric 4x4 error quadric stored as its 10 distinct entries
/// (`a..j` reading row-major upper triangle), so `q += q` style
/// accumulation is a plain component-wise add.
#[derive(Clone, Copy, Default)]
struct Quadric {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
    g: f64,
    h: f64,
    i: f64,
    j: f64,
}

impl Quadric {
    /// The quadric `(n.p + d)^2` contributed by a face plane with unit
    /// normal `n` passing through `p0` (`d = -n.dot(p0)`), weighted by the
    /// face's area so large faces dominate small slivers.
    fn from_plane(normal: Vec3A, p0: Vec3A, weight: f64) -> Self {
        let nx = normal.x as f64;
        let ny = normal.y as f64;
        let nz = normal.z as f64;
        let d = -(normal.dot(p0) as f64);
        Self {
            a: weight * nx * nx,
            b: weight * nx * ny,
            c: weight * nx * nz,
            d: weight * nx * d,
            e: weight * ny * ny,
            f: weight * ny * nz,
            g: weight * ny * d,
            h: weight * nz * nz,
            i: weight * nz * d,
            j: weight * d * d,
        }
    }

    fn add(&self, other: &Quadric) -> Quadric {
        Quadric {
            a: self.a + other.a,
            b: self.b + other.b,
            c: self.c + other.c,
            d: self.d + other.d,
            e: self.e + other.e,
            f: self.f + other.f,
            g: self.g + other.g,
            h: self.h + other.h,
            i: self.i + other.i,
            j: self.j + other.j,
        }
    }

    /// `v^T Q v` for homogeneous `v = (x, y, z, 1)`.
    fn evaluate(&self, p: Vec3A) -> f64 {
        let (x, y, z) = (p.x as f64, p.y as f64, p.z as f64);
        x * x * self.a
            + 2.0 * x * y * self.b
            + 2.0 * x * z * self.c
            + 2.0 * x * self.d
            + y * y * self.e
            + 2.0 * y * z * self.f
            + 2.0 * y * self.g
            + z * z * self.h
            + 2.0 * z * self.i
            + self.j
    }
}

struct QueueEntry {
    cost: f64,
    generation: u32,
    h: Halfedge,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost && self.h == other.h
    }
}
impl Eq for QueueEntry {}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueEntry {
    /// Reversed so `BinaryHeap` (a max-heap) pops the lowest cost first;
    /// ties broken by the smaller halfedge handle (§4.5.1).
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.h.index().cmp(&self.h.index()))
    }
}

/// Collapses edges lowest-quadric-cost-first until the face count has
/// dropped by `reduction_ratio` (clamped to `[0, 1]`) or no more edges can
/// legally collapse. Returns the number of collapses performed.
pub(crate) fn simplify(mesh: &mut HalfEdgeMesh, reduction_ratio: f32) -> Result<usize> {
    let reduction_ratio = reduction_ratio.clamp(0.0, 1.0);
    if reduction_ratio <= 0.0 {
        return Ok(0);
    }
    let starting_faces = mesh.face_count();
    let target_removed = (starting_faces as f64 * reduction_ratio as f64).round() as usize;
    if target_removed == 0 {
        return Ok(0);
    }

    let mut quadrics = compute_vertex_quadrics(mesh)?;
    let mut generation = vec![0u32; mesh.halfedge_count()];
    let mut heap = BinaryHeap::new();
    for i in 0..mesh.halfedge_count() {
        let h = Halfedge(i as u32);
        if let Some(cost) = edge_cost(mesh, &quadrics, h) {
            heap.push(QueueEntry { cost, generation: 0, h });
        }
    }

    let mut collapsed_faces = 0usize;
    while collapsed_faces < target_removed {
        let Some(entry) = heap.pop() else { break };
        let h = entry.h;
        let e = h.edge();
        if mesh.is_deleted_edge(e) {
            continue;
        }
        if generation[h.index() as usize] != entry.generation {
            continue;
        }
        if !mesh.is_collapse_ok(h)? {
            continue;
        }
        let v0 = mesh.from_vertex(h);
        let v1 = mesh.to_vertex(h);
        if collapse_inverts_a_face_normal(mesh, h)? {
            continue;
        }

        let removed_faces = if mesh.face(h).is_some() { 1 } else { 0 }
            + if mesh.face(h.opposite()).is_some() { 1 } else { 0 };

        let merged = quadrics[v0.index() as usize].add(&quadrics[v1.index() as usize]);
        mesh.collapse(h)?;
        collapsed_faces += removed_faces;
        quadrics[v1.index() as usize] = merged;

        // Neighboring edges' costs have changed; bump their generation so
        // stale heap entries are skipped rather than acted on, and push
        // freshly computed entries for them.
        for h2 in mesh.halfedges_around_vertex(v1) {
            let h2 = h2?;
            let idx = h2.index() as usize;
            if idx >= generation.len() {
                generation.resize(idx + 1, 0);
            }
            generation[idx] = generation[idx].wrapping_add(1);
            if let Some(cost) = edge_cost(mesh, &quadrics, h2) {
                heap.push(QueueEntry {
                    cost,
                    generation: generation[idx],
                    h: h2,
                });
            }
        }
    }

    if collapsed_faces > 0 {
        mesh.garbage_collect()?;
    }
    Ok(collapsed_faces)
}

fn compute_vertex_quadrics(mesh: &HalfEdgeMesh) -> Result<Vec<Quadric>> {
    let mut quadrics = vec![Quadric::default(); mesh.vertex_count()];
    for i in 0..mesh.face_count() {
        let f = Face(i as u32);
        if mesh.is_deleted_face(f) {
            continue;
        }
        let Ok((normal, area, _)) = face_geometry(mesh, f) else {
            continue;
        };
        let verts: Vec<Vertex> = mesh.vertices_around_face(f).collect::<Result<Vec<_>>>()?;
        let p0 = mesh.point(verts[0]);
        let q = Quadric::from_plane(normal, p0, area as f64);
        for v in verts {
            quadrics[v.index() as usize] = quadrics[v.index() as usize].add(&q);
        }
    }
    Ok(quadrics)
}

fn edge_cost(mesh: &HalfEdgeMesh, quadrics: &[Quadric], h: Halfedge) -> Option<f64> {
    let e = h.edge();
    if mesh.is_deleted_edge(e) {
        return None;
    }
    let v0 = mesh.from_vertex(h);
    let v1 = mesh.to_vertex(h);
    let q = quadrics
        .get(v0.index() as usize)?
        .add(quadrics.get(v1.index() as usize)?);
    let p0 = mesh.point(v0);
    let p1 = mesh.point(v1);
    let mid = (p0 + p1) * 0.5;
    Some(q.evaluate(p0).min(q.evaluate(p1)).min(q.evaluate(mid)))
}

/// Rejects a collapse if any surviving face incident to `to_vertex(h)`
/// would have its normal flip by more than 90 degrees once `from_vertex`
/// is relabeled to `to_vertex` (§4.5.1 "forbid collapses ... that would
/// invert a face normal").
fn collapse_inverts_a_face_normal(mesh: &HalfEdgeMesh, h: Halfedge) -> Result<bool> {
    let v0 = mesh.from_vertex(h);
    let v1 = mesh.to_vertex(h);
    let f_h = mesh.face(h);
    let f_ho = mesh.face(h.opposite());

    for face in mesh.faces_around_vertex(v0) {
        let face = face?;
        if Some(face) == f_h || Some(face) == f_ho {
            continue;
        }
        let Ok((before_normal, _, _)) = face_geometry(mesh, face) else {
            continue;
        };
        let verts: Vec<Vertex> = mesh.vertices_around_face(face).collect::<Result<Vec<_>>>()?;
        let relabeled: Vec<Vec3A> = verts
            .iter()
            .map(|&v| if v == v0 { mesh.point(v1) } else { mesh.point(v) })
            .collect();
        let after_normal = super::geometry::polygon_normal_unnormalized(&relabeled).normalize_or_zero();
        if before_normal.dot(after_normal) < 0.0 {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: usize) -> HalfEdgeMesh {
        let mut mesh = HalfEdgeMesh::new();
        let mut verts = vec![vec![Vertex::INVALID; n + 1]; n + 1];
        for (y, row) in verts.iter_mut().enumerate() {
            for (x, slot) in row.iter_mut().enumerate() {
                *slot = mesh.add_vertex(Vec3A::new(x as f32, y as f32, 0.0));
            }
        }
        for y in 0..n {
            for x in 0..n {
                mesh.add_face(&[verts[y][x], verts[y][x + 1], verts[y + 1][x + 1]]).unwrap();
                mesh.add_face(&[verts[y][x], verts[y + 1][x + 1], verts[y + 1][x]]).unwrap();
            }
        }
        mesh
    }

    #[test]
    fn simplifying_a_flat_grid_reduces_face_count_without_changing_the_plane() {
        let mut mesh = grid(4);
        let before = mesh.face_count();
        let removed = simplify(&mut mesh, 0.5).unwrap();
        assert!(removed > 0);
        assert!(mesh.face_count() < before);
        for i in 0..mesh.vertex_count() {
            let v = Vertex(i as u32);
            if !mesh.is_deleted_vertex(v) {
                assert!((mesh.point(v).z).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn zero_ratio_is_a_no_op() {
        let mut mesh = grid(2);
        let before = mesh.face_count();
        let removed = simplify(&mut mesh, 0.0).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(mesh.face_count(), before);
    }
}
