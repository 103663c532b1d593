// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! Iterators over the one-ring of a vertex or the boundary of a face,
//! mirroring PMP's `*AroundVertexCirculator`/`*AroundFaceCirculator`
//! family and its `CirculatorLoopDetector`: a corrupted mesh can make a
//! `next`/`prev` chain cycle without ever revisiting its start, so after
//! 100 steps the detector falls back to a visited-set and raises
//! `TopologyException` on a genuine repeat.

use super::handle::{Face, Halfedge, Vertex};
use super::HalfEdgeMesh;
use crate::{ReconstructError, Result};
use rustc_hash::FxHashSet;

const LOOP_DETECTOR_THRESHOLD: usize = 100;

pub(crate) struct LoopDetector {
    start: Halfedge,
    iter_count: usize,
    visited: FxHashSet<Halfedge>,
}

impl LoopDetector {
    pub(crate) fn new(start: Halfedge) -> Self {
        Self {
            start,
            iter_count: 0,
            visited: FxHashSet::default(),
        }
    }

    /// Call once per step with the halfedge just arrived at. Returns `Ok(true)`
    /// when the circulation is complete (back at `start`), `Ok(false)` to
    /// keep going, or `Err` if a loop not containing `start` was detected.
    pub(crate) fn step(&mut self, current: Halfedge) -> Result<bool> {
        if current == self.start {
            self.iter_count = 0;
            self.visited.clear();
            return Ok(true);
        }
        self.iter_count += 1;
        if self.iter_count > LOOP_DETECTOR_THRESHOLD && !self.visited.insert(current) {
            return Err(ReconstructError::TopologyException(
                "circulator detected a loop that never returns to its start".to_string(),
            ));
        }
        Ok(false)
    }
}

/// Outgoing halfedges around `v`, i.e. `h` with `origin(h) == v`.
pub struct HalfedgeAroundVertex<'m> {
    mesh: &'m HalfEdgeMesh,
    detector: LoopDetector,
    current: Option<Halfedge>,
}

impl<'m> HalfedgeAroundVertex<'m> {
    pub(crate) fn new(mesh: &'m HalfEdgeMesh, v: Vertex) -> Self {
        let start = mesh.halfedge(v);
        Self {
            mesh,
            detector: LoopDetector::new(start),
            current: if start.is_valid() { Some(start) } else { None },
        }
    }
}

impl Iterator for HalfedgeAroundVertex<'_> {
    type Item = Result<Halfedge>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        let next = self.mesh.prev_halfedge(current).opposite();
        match self.detector.step(next) {
            Ok(true) => self.current = None,
            Ok(false) => self.current = Some(next),
            Err(e) => {
                self.current = None;
                return Some(Err(e));
            }
        }
        Some(Ok(current))
    }
}

/// One-ring neighbor vertices of `v`.
pub struct VertexAroundVertex<'m> {
    inner: HalfedgeAroundVertex<'m>,
}

impl<'m> VertexAroundVertex<'m> {
    pub(crate) fn new(mesh: &'m HalfEdgeMesh, v: Vertex) -> Self {
        Self {
            inner: HalfedgeAroundVertex::new(mesh, v),
        }
    }
}

impl Iterator for VertexAroundVertex<'_> {
    type Item = Result<Vertex>;

    fn next(&mut self) -> Option<Self::Item> {
        let h = self.inner.next()?;
        match h {
            Ok(h) => Some(Ok(self.inner.mesh.to_vertex(h))),
            Err(e) => Some(Err(e)),
        }
    }
}

/// Incident faces of `v` (boundary gaps yield no item for that step).
pub struct FaceAroundVertex<'m> {
    inner: HalfedgeAroundVertex<'m>,
}

impl<'m> FaceAroundVertex<'m> {
    pub(crate) fn new(mesh: &'m HalfEdgeMesh, v: Vertex) -> Self {
        Self {
            inner: HalfedgeAroundVertex::new(mesh, v),
        }
    }
}

impl Iterator for FaceAroundVertex<'_> {
    type Item = Result<Face>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let h = self.inner.next()?;
            match h {
                Ok(h) => {
                    if let Some(f) = self.inner.mesh.face(h) {
                        return Some(Ok(f));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Halfedges bounding `f`, in order.
pub struct HalfedgeAroundFace<'m> {
    mesh: &'m HalfEdgeMesh,
    detector: LoopDetector,
    current: Option<Halfedge>,
}

impl<'m> HalfedgeAroundFace<'m> {
    pub(crate) fn new(mesh: &'m HalfEdgeMesh, f: Face) -> Self {
        let start = mesh.halfedge_of_face(f);
        Self {
            mesh,
            detector: LoopDetector::new(start),
            current: if start.is_valid() { Some(start) } else { None },
        }
    }
}

impl Iterator for HalfedgeAroundFace<'_> {
    type Item = Result<Halfedge>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        let next = self.mesh.next_halfedge(current);
        match self.detector.step(next) {
            Ok(true) => self.current = None,
            Ok(false) => self.current = Some(next),
            Err(e) => {
                self.current = None;
                return Some(Err(e));
            }
        }
        Some(Ok(current))
    }
}

/// Vertices bounding `f`, in order.
pub struct VertexAroundFace<'m> {
    inner: HalfedgeAroundFace<'m>,
}

impl<'m> VertexAroundFace<'m> {
    pub(crate) fn new(mesh: &'m HalfEdgeMesh, f: Face) -> Self {
        Self {
            inner: HalfedgeAroundFace::new(mesh, f),
        }
    }
}

impl Iterator for VertexAroundFace<'_> {
    type Item = Result<Vertex>;

    fn next(&mut self) -> Option<Self::Item> {
        let h = self.inner.next()?;
        match h {
            Ok(h) => Some(Ok(self.inner.mesh.to_vertex(h))),
            Err(e) => Some(Err(e)),
        }
    }
}
