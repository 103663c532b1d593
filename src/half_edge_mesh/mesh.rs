// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! The connectivity struct itself: four `PropertyStore`s (vertex, halfedge,
//! edge, face) plus the handful of built-in properties every mesh carries
//! (`v:point`, `v:halfedge`, `h:vertex`, `h:next`, `h:prev`, `h:face`,
//! `f:halfedge`, and a `:deleted` flag per class), grounded in PMP's
//! `SurfaceMesh` member layout.

use super::circulators::{
    FaceAroundVertex, HalfedgeAroundFace, HalfedgeAroundVertex, LoopDetector, VertexAroundFace,
    VertexAroundVertex,
};
use super::handle::{Edge, Face, Halfedge, Vertex};
use super::properties::{PropertyHandle, PropertyStore};
use crate::{ReconstructError, Result};
use vector_traits::glam::Vec3A;

/// The result of `HalfEdgeMesh::join_mesh`: how far `other`'s vertex indices
/// were shifted, and which of its custom properties had no same-named,
/// same-typed counterpart in `self` and were therefore dropped.
#[derive(Debug, Clone, Default)]
pub struct JoinReport {
    pub vertex_offset: u32,
    pub dropped_properties: Vec<&'static str>,
}

/// A manifold half-edge mesh. Vertex, halfedge, edge and face handles are
/// indices into their respective `PropertyStore`; `garbage_collect` is the
/// only operation that invalidates previously issued handles.
///
/// `Clone` deep-copies every property array, including caller-added ones
/// (§4.4.3 "Deep-copying the mesh deep-copies all properties").
#[derive(Clone)]
pub struct HalfEdgeMesh {
    vprops: PropertyStore,
    hprops: PropertyStore,
    eprops: PropertyStore,
    fprops: PropertyStore,

    v_point: PropertyHandle<Vec3A>,
    v_halfedge: PropertyHandle<Halfedge>,
    v_deleted: PropertyHandle<bool>,

    h_vertex: PropertyHandle<Vertex>,
    h_next: PropertyHandle<Halfedge>,
    h_prev: PropertyHandle<Halfedge>,
    h_face: PropertyHandle<Face>,

    e_deleted: PropertyHandle<bool>,

    f_halfedge: PropertyHandle<Halfedge>,
    f_deleted: PropertyHandle<bool>,

    deleted_vertices: usize,
    deleted_edges: usize,
    deleted_faces: usize,
}

impl Default for HalfEdgeMesh {
    fn default() -> Self {
        Self::new()
    }
}

impl HalfEdgeMesh {
    pub fn new() -> Self {
        let mut vprops = PropertyStore::new();
        let v_point = vprops.add::<Vec3A>("v:point", Vec3A::ZERO);
        let v_halfedge = vprops.add::<Halfedge>("v:halfedge", Halfedge::INVALID);
        let v_deleted = vprops.add::<bool>("v:deleted", false);

        let mut hprops = PropertyStore::new();
        let h_vertex = hprops.add::<Vertex>("h:vertex", Vertex::INVALID);
        let h_next = hprops.add::<Halfedge>("h:next", Halfedge::INVALID);
        let h_prev = hprops.add::<Halfedge>("h:prev", Halfedge::INVALID);
        let h_face = hprops.add::<Face>("h:face", Face::INVALID);

        let mut eprops = PropertyStore::new();
        let e_deleted = eprops.add::<bool>("e:deleted", false);

        let mut fprops = PropertyStore::new();
        let f_halfedge = fprops.add::<Halfedge>("f:halfedge", Halfedge::INVALID);
        let f_deleted = fprops.add::<bool>("f:deleted", false);

        Self {
            vprops,
            hprops,
            eprops,
            fprops,
            v_point,
            v_halfedge,
            v_deleted,
            h_vertex,
            h_next,
            h_prev,
            h_face,
            e_deleted,
            f_halfedge,
            f_deleted,
            deleted_vertices: 0,
            deleted_edges: 0,
            deleted_faces: 0,
        }
    }

    // -- counts -----------------------------------------------------------

    pub fn vertex_count(&self) -> usize {
        self.vprops.len()
    }

    pub fn halfedge_count(&self) -> usize {
        self.hprops.len()
    }

    pub fn edge_count(&self) -> usize {
        self.eprops.len()
    }

    pub fn face_count(&self) -> usize {
        self.fprops.len()
    }

    pub fn points(&self) -> &[Vec3A] {
        self.vprops.slice(self.v_point)
    }

    // -- basic accessors ----------------------------------------------------

    pub fn point(&self, v: Vertex) -> Vec3A {
        self.vprops.get(self.v_point, v.0 as usize)
    }

    pub fn set_point(&mut self, v: Vertex, p: Vec3A) {
        self.vprops.set(self.v_point, v.0 as usize, p);
    }

    pub fn halfedge(&self, v: Vertex) -> Halfedge {
        self.vprops.get(self.v_halfedge, v.0 as usize)
    }

    fn set_halfedge_of_vertex(&mut self, v: Vertex, h: Halfedge) {
        self.vprops.set(self.v_halfedge, v.0 as usize, h);
    }

    pub fn to_vertex(&self, h: Halfedge) -> Vertex {
        self.hprops.get(self.h_vertex, h.0 as usize)
    }

    fn set_to_vertex(&mut self, h: Halfedge, v: Vertex) {
        self.hprops.set(self.h_vertex, h.0 as usize, v);
    }

    pub fn from_vertex(&self, h: Halfedge) -> Vertex {
        self.to_vertex(h.opposite())
    }

    pub fn next_halfedge(&self, h: Halfedge) -> Halfedge {
        self.hprops.get(self.h_next, h.0 as usize)
    }

    pub fn prev_halfedge(&self, h: Halfedge) -> Halfedge {
        self.hprops.get(self.h_prev, h.0 as usize)
    }

    /// Links `h -> next` and, symmetrically, `next`'s prev back to `h`; the
    /// two properties are never set independently (PMP's invariant).
    fn set_next_halfedge(&mut self, h: Halfedge, next: Halfedge) {
        self.hprops.set(self.h_next, h.0 as usize, next);
        self.hprops.set(self.h_prev, next.0 as usize, h);
    }

    pub fn face(&self, h: Halfedge) -> Option<Face> {
        let f = self.hprops.get(self.h_face, h.0 as usize);
        if f.is_valid() {
            Some(f)
        } else {
            None
        }
    }

    fn set_face(&mut self, h: Halfedge, f: Face) {
        self.hprops.set(self.h_face, h.0 as usize, f);
    }

    pub fn is_boundary_halfedge(&self, h: Halfedge) -> bool {
        self.face(h).is_none()
    }

    pub fn is_boundary_vertex(&self, v: Vertex) -> bool {
        let h = self.halfedge(v);
        !h.is_valid() || self.is_boundary_halfedge(h)
    }

    pub fn halfedge_of_face(&self, f: Face) -> Halfedge {
        self.fprops.get(self.f_halfedge, f.0 as usize)
    }

    fn set_halfedge_of_face(&mut self, f: Face, h: Halfedge) {
        self.fprops.set(self.f_halfedge, f.0 as usize, h);
    }

    pub fn is_deleted_vertex(&self, v: Vertex) -> bool {
        self.vprops.get(self.v_deleted, v.0 as usize)
    }

    pub fn is_deleted_edge(&self, e: Edge) -> bool {
        self.eprops.get(self.e_deleted, e.0 as usize)
    }

    pub fn is_deleted_face(&self, f: Face) -> bool {
        self.fprops.get(self.f_deleted, f.0 as usize)
    }

    // -- caller-defined properties -------------------------------------------
    //
    // A name-keyed typed array per entity class (§4.4.3), for optimizer-
    // and texturizer-owned state (face clusters, vertex quadrics, ...) that
    // has no place among the built-in connectivity properties above.

    pub fn add_vertex_property<T: Clone + 'static>(
        &mut self,
        name: &'static str,
        default: T,
    ) -> PropertyHandle<T> {
        self.vprops.add(name, default)
    }

    pub fn vertex_property<T: Clone + 'static>(&self, handle: PropertyHandle<T>, v: Vertex) -> T {
        self.vprops.get(handle, v.0 as usize)
    }

    pub fn set_vertex_property<T: Clone + 'static>(&mut self, handle: PropertyHandle<T>, v: Vertex, value: T) {
        self.vprops.set(handle, v.0 as usize, value);
    }

    pub fn remove_vertex_property(&mut self, name: &str) {
        self.vprops.remove(name);
    }

    pub fn add_face_property<T: Clone + 'static>(
        &mut self,
        name: &'static str,
        default: T,
    ) -> PropertyHandle<T> {
        self.fprops.add(name, default)
    }

    pub fn face_property<T: Clone + 'static>(&self, handle: PropertyHandle<T>, f: Face) -> T {
        self.fprops.get(handle, f.0 as usize)
    }

    pub fn set_face_property<T: Clone + 'static>(&mut self, handle: PropertyHandle<T>, f: Face, value: T) {
        self.fprops.set(handle, f.0 as usize, value);
    }

    pub fn remove_face_property(&mut self, name: &str) {
        self.fprops.remove(name);
    }

    pub fn face_property_handle<T: Clone + 'static>(&self, name: &'static str) -> Option<PropertyHandle<T>> {
        self.fprops.get_handle(name)
    }

    pub fn add_edge_property<T: Clone + 'static>(
        &mut self,
        name: &'static str,
        default: T,
    ) -> PropertyHandle<T> {
        self.eprops.add(name, default)
    }

    pub fn edge_property<T: Clone + 'static>(&self, handle: PropertyHandle<T>, e: Edge) -> T {
        self.eprops.get(handle, e.0 as usize)
    }

    pub fn set_edge_property<T: Clone + 'static>(&mut self, handle: PropertyHandle<T>, e: Edge, value: T) {
        self.eprops.set(handle, e.0 as usize, value);
    }

    pub fn remove_edge_property(&mut self, name: &str) {
        self.eprops.remove(name);
    }

    pub fn add_halfedge_property<T: Clone + 'static>(
        &mut self,
        name: &'static str,
        default: T,
    ) -> PropertyHandle<T> {
        self.hprops.add(name, default)
    }

    pub fn halfedge_property<T: Clone + 'static>(&self, handle: PropertyHandle<T>, h: Halfedge) -> T {
        self.hprops.get(handle, h.0 as usize)
    }

    pub fn set_halfedge_property<T: Clone + 'static>(&mut self, handle: PropertyHandle<T>, h: Halfedge, value: T) {
        self.hprops.set(handle, h.0 as usize, value);
    }

    pub fn remove_halfedge_property(&mut self, name: &str) {
        self.hprops.remove(name);
    }

    // -- circulators --------------------------------------------------------

    pub fn halfedges_around_vertex(&self, v: Vertex) -> HalfedgeAroundVertex<'_> {
        HalfedgeAroundVertex::new(self, v)
    }

    pub fn vertices_around_vertex(&self, v: Vertex) -> VertexAroundVertex<'_> {
        VertexAroundVertex::new(self, v)
    }

    pub fn faces_around_vertex(&self, v: Vertex) -> FaceAroundVertex<'_> {
        FaceAroundVertex::new(self, v)
    }

    pub fn halfedges_around_face(&self, f: Face) -> HalfedgeAroundFace<'_> {
        HalfedgeAroundFace::new(self, f)
    }

    pub fn vertices_around_face(&self, f: Face) -> VertexAroundFace<'_> {
        VertexAroundFace::new(self, f)
    }

    pub fn degree(&self, v: Vertex) -> Result<usize> {
        self.vertices_around_vertex(v).count_checked()
    }

    pub fn valence(&self, f: Face) -> Result<usize> {
        self.halfedges_around_face(f).count_checked()
    }

    // -- construction ---------------------------------------------------

    pub fn add_vertex(&mut self, point: Vec3A) -> Vertex {
        let idx = self.vprops.push_back();
        let v = Vertex(idx as u32);
        self.set_point(v, point);
        v
    }

    fn new_edge(&mut self, from: Vertex, to: Vertex) -> Halfedge {
        let h0 = Halfedge(self.hprops.push_back() as u32);
        let h1 = Halfedge(self.hprops.push_back() as u32);
        debug_assert_eq!(h0.opposite(), h1);
        self.set_to_vertex(h0, to);
        self.set_to_vertex(h1, from);
        let _ = self.eprops.push_back();
        h0
    }

    fn find_halfedge(&self, v0: Vertex, v1: Vertex) -> Option<Halfedge> {
        let start = self.halfedge(v0);
        if !start.is_valid() {
            return None;
        }
        let mut h = start;
        let bound = self.halfedge_count() + 1;
        for _ in 0..bound {
            if self.to_vertex(h) == v1 {
                return Some(h);
            }
            h = self.prev_halfedge(h).opposite();
            if h == start {
                break;
            }
        }
        None
    }

    /// Picks a boundary halfedge as `v`'s outgoing anchor if one exists
    /// (PMP's invariant: a boundary vertex always anchors on its gap).
    fn adjust_outgoing_halfedge(&mut self, v: Vertex) -> Result<()> {
        let start = self.halfedge(v);
        if !start.is_valid() {
            return Ok(());
        }
        let mut h = start;
        let mut detector = LoopDetector::new(start);
        loop {
            if self.is_boundary_halfedge(h) {
                self.set_halfedge_of_vertex(v, h);
                return Ok(());
            }
            let next = self.prev_halfedge(h).opposite();
            match detector.step(next) {
                Ok(true) => return Ok(()),
                Ok(false) => h = next,
                Err(e) => return Err(e),
            }
        }
    }

    /// Re-derives `v`'s outgoing anchor by scanning every halfedge, for the
    /// rare case a pointer-patching edit (`flip`) leaves the cached anchor
    /// stale. O(halfedge count); only ever called a handful of times per
    /// edit, never in a hot loop.
    fn ensure_valid_outgoing_halfedge(&mut self, v: Vertex) -> Result<()> {
        let current = self.halfedge(v);
        if current.is_valid() && self.from_vertex(current) == v {
            return self.adjust_outgoing_halfedge(v);
        }
        for i in 0..self.halfedge_count() {
            let h = Halfedge(i as u32);
            if self.from_vertex(h) == v {
                self.set_halfedge_of_vertex(v, h);
                return self.adjust_outgoing_halfedge(v);
            }
        }
        self.set_halfedge_of_vertex(v, Halfedge::INVALID);
        Ok(())
    }

    /// Inserts a (possibly non-triangular) face. Reuses any pre-existing
    /// boundary edges among `verts`' consecutive pairs, relinking the
    /// boundary loop around them as needed; rejects an edge already bounding
    /// another face (non-manifold) or a vertex whose boundary can't be
    /// patched into a single gap. Ported from the standard manifold
    /// half-edge `add_face` algorithm (PMP/OpenMesh).
    pub fn add_face(&mut self, verts: &[Vertex]) -> Result<Face> {
        let n = verts.len();
        if n < 3 {
            return Err(ReconstructError::InvalidArgument(
                "a face needs at least 3 vertices".to_string(),
            ));
        }
        for &v in verts {
            if !v.is_valid() || v.0 as usize >= self.vertex_count() {
                return Err(ReconstructError::InvalidArgument(
                    "face references an unknown vertex".to_string(),
                ));
            }
        }

        let mut is_new = vec![false; n];
        let mut halfedges = vec![Halfedge::INVALID; n];

        for i in 0..n {
            let (v0, v1) = (verts[i], verts[(i + 1) % n]);
            match self.find_halfedge(v0, v1) {
                Some(h) => {
                    if self.face(h).is_some() {
                        return Err(ReconstructError::TopologyException(format!(
                            "edge {v0}-{v1} already bounds another face"
                        )));
                    }
                    halfedges[i] = h;
                }
                None => is_new[i] = true,
            }
        }

        // relink any pair of adjacent pre-existing boundary halfedges that
        // aren't already next-to-next in the boundary loop
        for i in 0..n {
            let j = (i + 1) % n;
            if is_new[i] || is_new[j] {
                continue;
            }
            let inner_prev = halfedges[i];
            let inner_next = halfedges[j];
            if self.next_halfedge(inner_prev) == inner_next {
                continue;
            }
            let outer_prev = inner_next.opposite();
            let boundary_prev = self.find_free_gap_before(outer_prev, inner_prev)?;
            let boundary_next = self.next_halfedge(boundary_prev);
            if boundary_next == inner_next {
                return Err(ReconstructError::TopologyException(
                    "non-manifold vertex fan around the new face".to_string(),
                ));
            }
            let patch_start = self.next_halfedge(inner_prev);
            let patch_end = self.prev_halfedge(inner_next);
            self.set_next_halfedge(boundary_prev, patch_start);
            self.set_next_halfedge(patch_end, boundary_next);
            self.set_next_halfedge(inner_prev, inner_next);
        }

        for i in 0..n {
            if is_new[i] {
                halfedges[i] = self.new_edge(verts[i], verts[(i + 1) % n]);
            }
        }

        let f = Face(self.fprops.push_back() as u32);
        self.set_halfedge_of_face(f, halfedges[n - 1]);

        let mut needs_adjust = vec![false; n];
        for i in 0..n {
            let j = (i + 1) % n;
            let vh = verts[j];
            let inner_prev = halfedges[i];
            let inner_next = halfedges[j];

            let mut id = 0u8;
            if is_new[i] {
                id |= 1;
            }
            if is_new[j] {
                id |= 2;
            }

            if id != 0 {
                let outer_prev = inner_next.opposite();
                let outer_next = inner_prev.opposite();

                match id {
                    1 => {
                        // prev is new, next pre-existing
                        let boundary_prev = self.prev_halfedge(inner_next);
                        self.set_next_halfedge(boundary_prev, outer_next);
                        self.set_halfedge_of_vertex(vh, outer_next);
                    }
                    2 => {
                        // next is new, prev pre-existing
                        let boundary_next = self.next_halfedge(inner_prev);
                        self.set_next_halfedge(outer_prev, boundary_next);
                        self.set_halfedge_of_vertex(vh, boundary_next);
                    }
                    3 => {
                        // both new
                        let existing = self.halfedge(vh);
                        if !existing.is_valid() {
                            self.set_halfedge_of_vertex(vh, outer_next);
                            self.set_next_halfedge(outer_prev, outer_next);
                        } else {
                            let boundary_next = existing;
                            let boundary_prev = self.prev_halfedge(boundary_next);
                            self.set_next_halfedge(boundary_prev, outer_next);
                            self.set_next_halfedge(outer_prev, boundary_next);
                        }
                    }
                    _ => unreachable!(),
                }
                self.set_next_halfedge(inner_prev, inner_next);
            } else {
                needs_adjust[j] = self.halfedge(vh) == inner_next;
            }

            self.set_face(halfedges[i], f);
        }

        for (i, &v) in verts.iter().enumerate() {
            if needs_adjust[i] {
                self.adjust_outgoing_halfedge(v)?;
            }
        }

        Ok(f)
    }

    /// Walks the boundary loop starting just before `outer_prev` until a
    /// boundary halfedge is found (skipping `skip`, the edge being relinked
    /// around). Bounded by halfedge count to avoid spinning on a corrupt
    /// mesh.
    fn find_free_gap_before(&self, mut outer_prev: Halfedge, skip: Halfedge) -> Result<Halfedge> {
        let bound = self.halfedge_count() + 1;
        for _ in 0..bound {
            if outer_prev != skip && self.is_boundary_halfedge(outer_prev) {
                return Ok(outer_prev);
            }
            outer_prev = self.next_halfedge(outer_prev).opposite();
        }
        Err(ReconstructError::TopologyException(
            "could not find a free boundary gap to attach the new face".to_string(),
        ))
    }

    // -- deletion ---------------------------------------------------------

    /// Turns every halfedge of `f` into a boundary halfedge (face=`None`);
    /// the face's edges and vertices are left in place, forming a hole.
    /// Idempotent.
    pub fn delete_face(&mut self, f: Face) -> Result<()> {
        if self.is_deleted_face(f) {
            return Ok(());
        }
        let hs: Vec<Halfedge> = self
            .halfedges_around_face(f)
            .collect::<Result<Vec<_>>>()?;
        for &h in &hs {
            self.set_face(h, Face::INVALID);
        }
        for &h in &hs {
            self.adjust_outgoing_halfedge(self.from_vertex(h))?;
        }
        self.fprops.set(self.f_deleted, f.0 as usize, true);
        self.deleted_faces += 1;
        Ok(())
    }

    pub fn delete_many_faces(&mut self, faces: &[Face]) -> Result<()> {
        for &f in faces {
            self.delete_face(f)?;
        }
        Ok(())
    }

    /// Removes an edge whose both sides are already boundary, splicing the
    /// boundary loop(s) around its two endpoints to skip it.
    pub fn delete_edge(&mut self, e: Edge) -> Result<()> {
        if self.is_deleted_edge(e) {
            return Ok(());
        }
        let h0 = e.halfedge(0);
        let h1 = e.halfedge(1);
        if self.face(h0).is_some() || self.face(h1).is_some() {
            return Err(ReconstructError::TopologyException(
                "cannot delete an edge that still bounds a face".to_string(),
            ));
        }
        let p0 = self.prev_halfedge(h0);
        let n0 = self.next_halfedge(h0);
        let p1 = self.prev_halfedge(h1);
        let n1 = self.next_halfedge(h1);
        let va = self.to_vertex(h1);
        let vb = self.to_vertex(h0);

        if p0 == h1 && n0 == h1 {
            // isolated dangling edge, nothing left to splice
            self.set_halfedge_of_vertex(va, Halfedge::INVALID);
            self.set_halfedge_of_vertex(vb, Halfedge::INVALID);
        } else {
            self.set_next_halfedge(p0, n1);
            self.set_next_halfedge(p1, n0);
            if self.halfedge(va) == h0 {
                self.set_halfedge_of_vertex(va, if n1 != h0 { n1 } else { Halfedge::INVALID });
            }
            if self.halfedge(vb) == h1 {
                self.set_halfedge_of_vertex(vb, if n0 != h1 { n0 } else { Halfedge::INVALID });
            }
        }

        self.eprops.set(self.e_deleted, e.0 as usize, true);
        self.deleted_edges += 1;
        Ok(())
    }

    /// Deletes every incident face, then every incident edge, then the
    /// vertex itself.
    pub fn delete_vertex(&mut self, v: Vertex) -> Result<()> {
        if self.is_deleted_vertex(v) {
            return Ok(());
        }
        let faces: Vec<Face> = self.faces_around_vertex(v).collect::<Result<Vec<_>>>()?;
        self.delete_many_faces(&faces)?;

        let edges: Vec<Edge> = self
            .halfedges_around_vertex(v)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .map(Halfedge::edge)
            .collect();
        for e in edges {
            if !self.is_deleted_edge(e) {
                self.delete_edge(e)?;
            }
        }

        self.vprops.set(self.v_deleted, v.0 as usize, true);
        self.deleted_vertices += 1;
        Ok(())
    }

    // -- topology edits -----------------------------------------------------

    /// The link condition: collapsing `h` must not create a non-manifold
    /// vertex, i.e. the 1-rings of its two endpoints may share only the
    /// apex vertex/vertices of the (at most two) faces already incident to
    /// the edge.
    pub fn is_collapse_ok(&self, h: Halfedge) -> Result<bool> {
        let v0 = self.from_vertex(h);
        let v1 = self.to_vertex(h);
        if self.degree(v0)? < 2 || self.degree(v1)? < 2 {
            return Ok(false);
        }

        let mut allowed: Vec<Vertex> = Vec::with_capacity(2);
        if let Some(f) = self.face(h) {
            allowed.push(self.to_vertex(self.next_halfedge(h)));
            let _ = f;
        }
        if let Some(f) = self.face(h.opposite()) {
            allowed.push(self.to_vertex(self.next_halfedge(h.opposite())));
            let _ = f;
        }

        let ring0: Vec<Vertex> = self.vertices_around_vertex(v0).collect::<Result<Vec<_>>>()?;
        let ring1: Vec<Vertex> = self.vertices_around_vertex(v1).collect::<Result<Vec<_>>>()?;
        for &u in &ring0 {
            if u == v1 {
                continue;
            }
            if ring1.contains(&u) && !allowed.contains(&u) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Collapses `h`, merging `from_vertex(h)` into `to_vertex(h)`. Rebuilt
    /// from `delete_face`/`add_face` rather than pointer surgery: every
    /// remaining face incident to the removed vertex is re-added with that
    /// vertex relabeled, which is slower than in-place relinking but far
    /// less error-prone.
    pub fn collapse(&mut self, h: Halfedge) -> Result<()> {
        if !self.is_collapse_ok(h)? {
            return Err(ReconstructError::TopologyException(
                "collapse would create a non-manifold vertex".to_string(),
            ));
        }
        let v0 = self.from_vertex(h);
        let v1 = self.to_vertex(h);

        let surviving_faces: Vec<Vec<Vertex>> = self
            .faces_around_vertex(v0)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .filter(|&f| f != self.face(h).unwrap_or(Face::INVALID) && Some(f) != self.face(h.opposite()))
            .map(|f| {
                self.vertices_around_face(f)
                    .collect::<Result<Vec<_>>>()
                    .map(|vs| vs.into_iter().map(|v| if v == v0 { v1 } else { v }).collect())
            })
            .collect::<Result<Vec<_>>>()?;

        let faces_to_delete: Vec<Face> = self.faces_around_vertex(v0).collect::<Result<Vec<_>>>()?;
        self.delete_many_faces(&faces_to_delete)?;

        let dangling_edges: Vec<Edge> = self
            .halfedges_around_vertex(v0)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .map(Halfedge::edge)
            .collect();
        for e in dangling_edges {
            if !self.is_deleted_edge(e) {
                self.delete_edge(e)?;
            }
        }

        self.vprops.set(self.v_deleted, v0.0 as usize, true);
        self.deleted_vertices += 1;

        for verts in surviving_faces {
            self.add_face(&verts)?;
        }
        self.ensure_valid_outgoing_halfedge(v1)?;
        Ok(())
    }

    /// Flipping is only valid for an interior edge shared by two triangles,
    /// and only if the new diagonal doesn't already exist (no duplicate
    /// edge).
    pub fn is_flip_ok(&self, e: Edge) -> bool {
        let h0 = e.halfedge(0);
        let h1 = e.halfedge(1);
        if self.face(h0).is_none() || self.face(h1).is_none() {
            return false;
        }
        let apex_c = self.to_vertex(self.next_halfedge(h0));
        let apex_d = self.to_vertex(self.next_halfedge(h1));
        if apex_c == apex_d {
            return false;
        }
        self.find_halfedge(apex_c, apex_d).is_none()
    }

    /// Replaces the shared diagonal of the two triangles bounding `e` with
    /// the other diagonal of their quad. Rebuilt from `delete_face`/
    /// `delete_edge`/`add_face` for the same robustness reason as `collapse`.
    pub fn flip(&mut self, e: Edge) -> Result<()> {
        if !self.is_flip_ok(e) {
            return Err(ReconstructError::TopologyException(
                "flip would create a non-manifold edge".to_string(),
            ));
        }
        let h0 = e.halfedge(0);
        let h1 = e.halfedge(1);
        let f0 = self.face(h0).expect("checked by is_flip_ok");
        let f1 = self.face(h1).expect("checked by is_flip_ok");
        let va = self.to_vertex(h0);
        let vb = self.to_vertex(h1);
        let apex_c = self.to_vertex(self.next_halfedge(h0));
        let apex_d = self.to_vertex(self.next_halfedge(h1));

        self.delete_face(f0)?;
        self.delete_face(f1)?;
        self.delete_edge(e)?;
        self.add_face(&[va, apex_c, apex_d])?;
        self.add_face(&[apex_c, vb, apex_d])?;
        Ok(())
    }

    /// Splits `e` by inserting `p` as a new vertex in the middle, retriangulating
    /// its one or two incident faces as fans through the new vertex.
    pub fn split_edge(&mut self, e: Edge, p: Vec3A) -> Result<Vertex> {
        let h0 = e.halfedge(0);
        let h1 = e.halfedge(1);
        let va = self.to_vertex(h0);
        let vb = self.to_vertex(h1);

        let face_a: Option<Vec<Vertex>> = match self.face(h0) {
            Some(f) => Some(self.vertices_around_face(f).collect::<Result<Vec<_>>>()?),
            None => None,
        };
        let face_b: Option<Vec<Vertex>> = match self.face(h1) {
            Some(f) => Some(self.vertices_around_face(f).collect::<Result<Vec<_>>>()?),
            None => None,
        };
        let fa_handle = self.face(h0);
        let fb_handle = self.face(h1);

        let mut to_delete = Vec::with_capacity(2);
        if let Some(f) = fa_handle {
            to_delete.push(f);
        }
        if let Some(f) = fb_handle {
            to_delete.push(f);
        }
        self.delete_many_faces(&to_delete)?;
        self.delete_edge(e)?;

        let vm = self.add_vertex(p);
        for face in [face_a, face_b].into_iter().flatten() {
            let pos = face.iter().position(|&v| v == va).expect("va is on this face");
            let n = face.len();
            let next = face[(pos + 1) % n];
            if next == vb {
                let mut a = Vec::with_capacity(n + 1);
                a.push(va);
                a.push(vm);
                a.extend(face.iter().skip(1).copied());
                self.add_face(&a)?;
            } else {
                // vb precedes va in this loop
                let mut a = Vec::with_capacity(n + 1);
                for &v in &face {
                    a.push(v);
                    if v == vb {
                        a.push(vm);
                    }
                }
                self.add_face(&a)?;
            }
        }
        Ok(vm)
    }

    /// Splits `f` by connecting every one of its boundary vertices to a new
    /// central vertex at `p`, replacing the n-gon with an n-triangle fan.
    pub fn split_face(&mut self, f: Face, p: Vec3A) -> Result<Vertex> {
        let verts: Vec<Vertex> = self.vertices_around_face(f).collect::<Result<Vec<_>>>()?;
        self.delete_face(f)?;
        let vm = self.add_vertex(p);
        let n = verts.len();
        for i in 0..n {
            self.add_face(&[verts[i], verts[(i + 1) % n], vm])?;
        }
        Ok(vm)
    }

    // -- bulk structure -----------------------------------------------------

    /// Appends `other`'s geometry verbatim (no vertex welding), concatenating
    /// any vertex/face property `self` and `other` both register under the
    /// same name and type. Properties `other` carries that `self` has no
    /// same-named/same-typed counterpart for are dropped; their names are
    /// returned alongside the vertex-index offset `other`'s vertices were
    /// shifted by (§4.4.4).
    pub fn join_mesh(&mut self, other: &HalfEdgeMesh) -> Result<JoinReport> {
        let offset = self.vertex_count() as u32;
        let mut dropped_properties = Vec::new();
        let mut remap = vec![Vertex::INVALID; other.vertex_count()];
        for i in 0..other.vertex_count() {
            let v = Vertex(i as u32);
            if other.is_deleted_vertex(v) {
                continue;
            }
            let new_v = self.add_vertex(other.point(v));
            let dropped = self.vprops.copy_entry_from(&other.vprops, i, new_v.0 as usize);
            dropped_properties.extend(dropped);
            remap[i] = new_v;
        }
        for i in 0..other.face_count() {
            let f = Face(i as u32);
            if other.is_deleted_face(f) {
                continue;
            }
            let verts: Vec<Vertex> = other
                .vertices_around_face(f)
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .map(|v| remap[v.0 as usize])
                .collect();
            let new_f = self.add_face(&verts)?;
            let dropped = self.fprops.copy_entry_from(&other.fprops, i, new_f.0 as usize);
            dropped_properties.extend(dropped);
        }
        dropped_properties.sort_unstable();
        dropped_properties.dedup();
        Ok(JoinReport {
            vertex_offset: offset,
            dropped_properties,
        })
    }

    /// Partitions faces matching `predicate` into a new mesh, leaving the
    /// rest (and all vertices) in `self` untouched until a subsequent
    /// `garbage_collect`. A vertex referenced by faces on both sides of the
    /// predicate is duplicated, once per side (§4.4.4: "shared interior
    /// vertices between parts are duplicated into each part that uses
    /// them").
    pub fn split_mesh(&self, predicate: impl Fn(Face) -> bool) -> Result<HalfEdgeMesh> {
        let mut out = HalfEdgeMesh::new();
        let mut remap = vec![Vertex::INVALID; self.vertex_count()];
        for i in 0..self.face_count() {
            let f = Face(i as u32);
            if self.is_deleted_face(f) || !predicate(f) {
                continue;
            }
            let verts: Vec<Vertex> = self
                .vertices_around_face(f)
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .map(|v| {
                    if !remap[v.0 as usize].is_valid() {
                        remap[v.0 as usize] = out.add_vertex(self.point(v));
                    }
                    remap[v.0 as usize]
                })
                .collect();
            out.add_face(&verts)?;
        }
        Ok(out)
    }

    /// Partitions every face by an integer label, producing one sub-mesh per
    /// distinct label in ascending label order (§4.4.4's plural
    /// `split_mesh`: a face-label array rather than a single predicate).
    /// `labels` is indexed by face index; faces with no entry (`labels`
    /// shorter than `face_count`) are treated as unlabeled and excluded from
    /// every output mesh.
    pub fn split_mesh_by_label(&self, labels: &[i32]) -> Result<Vec<HalfEdgeMesh>> {
        let mut distinct: Vec<i32> = labels.iter().copied().collect();
        distinct.sort_unstable();
        distinct.dedup();
        distinct
            .into_iter()
            .map(|label| {
                self.split_mesh(|f| labels.get(f.index() as usize) == Some(&label))
            })
            .collect()
    }

    /// Compacts every property store in place, dropping deleted entities and
    /// renumbering every surviving handle. Every registered property (the
    /// built-in connectivity arrays and any caller-added ones, e.g.
    /// `f:cluster` or `h:texcoord`) is carried through via
    /// `PropertyStore::compact`; only the handle-*valued* built-in
    /// properties (`v:halfedge`, `h:vertex`, `h:next`, `h:prev`, `h:face`,
    /// `f:halfedge`) need an extra pass afterwards, since compaction moves
    /// an entry without touching the old handle it still points at.
    pub fn garbage_collect(&mut self) -> Result<()> {
        if self.deleted_vertices == 0 && self.deleted_edges == 0 && self.deleted_faces == 0 {
            return Ok(());
        }

        let vertex_order: Vec<usize> = (0..self.vertex_count())
            .filter(|&i| !self.is_deleted_vertex(Vertex(i as u32)))
            .collect();
        let mut vmap = vec![Vertex::INVALID; self.vertex_count()];
        for (new_i, &old_i) in vertex_order.iter().enumerate() {
            vmap[old_i] = Vertex(new_i as u32);
        }

        let edge_order_entities: Vec<usize> = (0..self.edge_count())
            .filter(|&i| !self.is_deleted_edge(Edge(i as u32)))
            .collect();
        let mut hmap = vec![Halfedge::INVALID; self.halfedge_count()];
        let mut halfedge_order = vec![0usize; edge_order_entities.len() * 2];
        for (new_e, &old_e) in edge_order_entities.iter().enumerate() {
            let old_h0 = Edge(old_e as u32).halfedge(0);
            let old_h1 = Edge(old_e as u32).halfedge(1);
            let new_h0 = Edge(new_e as u32).halfedge(0);
            let new_h1 = Edge(new_e as u32).halfedge(1);
            hmap[old_h0.0 as usize] = new_h0;
            hmap[old_h1.0 as usize] = new_h1;
            halfedge_order[new_h0.0 as usize] = old_h0.0 as usize;
            halfedge_order[new_h1.0 as usize] = old_h1.0 as usize;
        }

        let face_order: Vec<usize> = (0..self.face_count())
            .filter(|&i| !self.is_deleted_face(Face(i as u32)))
            .collect();
        let mut fmap = vec![Face::INVALID; self.face_count()];
        for (new_i, &old_i) in face_order.iter().enumerate() {
            fmap[old_i] = Face(new_i as u32);
        }

        let remap_v = |v: Vertex| if v.is_valid() { vmap[v.0 as usize] } else { Vertex::INVALID };
        let remap_h = |h: Halfedge| if h.is_valid() { hmap[h.0 as usize] } else { Halfedge::INVALID };
        let remap_f = |f: Face| if f.is_valid() { fmap[f.0 as usize] } else { Face::INVALID };

        self.vprops.compact(&vertex_order);
        self.hprops.compact(&halfedge_order);
        self.eprops.compact(&edge_order_entities);
        self.fprops.compact(&face_order);

        for i in 0..self.vertex_count() {
            let v = Vertex(i as u32);
            let h = self.halfedge(v);
            self.set_halfedge_of_vertex(v, remap_h(h));
        }
        for i in 0..self.halfedge_count() {
            let to = self.hprops.get(self.h_vertex, i);
            self.hprops.set(self.h_vertex, i, remap_v(to));
            let next = self.hprops.get(self.h_next, i);
            self.hprops.set(self.h_next, i, remap_h(next));
            let prev = self.hprops.get(self.h_prev, i);
            self.hprops.set(self.h_prev, i, remap_h(prev));
            let face = self.hprops.get(self.h_face, i);
            self.hprops.set(self.h_face, i, remap_f(face));
        }
        for i in 0..self.face_count() {
            let f = Face(i as u32);
            let h = self.halfedge_of_face(f);
            self.set_halfedge_of_face(f, remap_h(h));
        }

        self.deleted_vertices = 0;
        self.deleted_edges = 0;
        self.deleted_faces = 0;
        Ok(())
    }
}

trait CountChecked {
    fn count_checked(self) -> Result<usize>;
}

impl<I, T> CountChecked for I
where
    I: Iterator<Item = Result<T>>,
{
    fn count_checked(self) -> Result<usize> {
        let mut n = 0;
        for item in self {
            item?;
            n += 1;
        }
        Ok(n)
    }
}
