// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! Small per-face geometric queries shared by every optimizer stage: a
//! face's normal/area/centroid, computed by Newell's method so they work
//! uniformly on the triangles iso-extraction emits and the n-gons
//! retesselation and hole-filling produce.

use crate::half_edge_mesh::{Face, HalfEdgeMesh};
use crate::{ReconstructError, Result};
use vector_traits::glam::Vec3A;

/// Newell's method: robust for planar or near-planar polygons of any
/// vertex count, unlike a single cross product which degenerates on
/// concave or collinear-leading vertex orderings.
pub(crate) fn polygon_normal_unnormalized(points: &[Vec3A]) -> Vec3A {
    let mut n = Vec3A::ZERO;
    let len = points.len();
    for i in 0..len {
        let a = points[i];
        let b = points[(i + 1) % len];
        n.x += (a.y - b.y) * (a.z + b.z);
        n.y += (a.z - b.z) * (a.x + b.x);
        n.z += (a.x - b.x) * (a.y + b.y);
    }
    n
}

pub(crate) fn polygon_centroid(points: &[Vec3A]) -> Vec3A {
    let sum: Vec3A = points.iter().copied().sum();
    sum / points.len() as f32
}

/// A face's unit normal, area (via the same Newell sum) and centroid.
/// Errs `Numeric` on a zero-area (degenerate) face, per §4.5.1's quality
/// gates ("Forbid collapses that ... would invert a face normal" and the
/// §7 `Numeric` taxonomy entry for "zero-area face").
pub(crate) fn face_geometry(mesh: &HalfEdgeMesh, f: Face) -> Result<(Vec3A, f32, Vec3A)> {
    let points: Vec<Vec3A> = mesh
        .vertices_around_face(f)
        .map(|v| v.map(|v| mesh.point(v)))
        .collect::<Result<Vec<_>>>()?;
    geometry_from_points(&points, f)
}

fn geometry_from_points(points: &[Vec3A], f: Face) -> Result<(Vec3A, f32, Vec3A)> {
    let raw = polygon_normal_unnormalized(points);
    let len = raw.length();
    if len <= f32::EPSILON {
        return Err(ReconstructError::Numeric(format!(
            "face {f} has zero area"
        )));
    }
    Ok((raw / len, 0.5 * len, polygon_centroid(points)))
}

pub(crate) fn face_normal(mesh: &HalfEdgeMesh, f: Face) -> Result<Vec3A> {
    face_geometry(mesh, f).map(|(n, _, _)| n)
}

/// Alias kept for call sites that read more naturally naming all three
/// returned quantities (e.g. the texturizer's area-weighted cluster plane
/// fit).
pub(crate) fn face_normal_area_centroid(mesh: &HalfEdgeMesh, f: Face) -> Result<(Vec3A, f32, Vec3A)> {
    face_geometry(mesh, f)
}

#[allow(dead_code)]
pub(crate) fn face_area(mesh: &HalfEdgeMesh, f: Face) -> Result<f32> {
    face_geometry(mesh, f).map(|(_, a, _)| a)
}
