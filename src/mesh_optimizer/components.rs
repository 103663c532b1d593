// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! Connected-component face labeling and dangling-artifact removal
//! (§4.5.1 step 1): iso-extraction over a noisy point cloud commonly
//! emits a handful of stray triangles or tiny islands far from the main
//! surface, which a flood fill over face adjacency isolates cheaply.

use crate::half_edge_mesh::{Face, HalfEdgeMesh};
use crate::Result;
use std::collections::VecDeque;

/// Faces reachable from one another by crossing a shared edge, grouped
/// into components and ordered largest-first.
pub(crate) fn connected_components(mesh: &HalfEdgeMesh) -> Result<Vec<Vec<Face>>> {
    let n = mesh.face_count();
    let mut visited = vec![false; n];
    let mut components = Vec::new();

    for i in 0..n {
        let start = Face(i as u32);
        if mesh.is_deleted_face(start) || visited[i] {
            continue;
        }
        let mut component = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(start);
        visited[i] = true;
        while let Some(f) = queue.pop_front() {
            component.push(f);
            for h in mesh.halfedges_around_face(f) {
                let h = h?;
                if let Some(neighbor) = mesh.face(h.opposite()) {
                    let idx = neighbor.index() as usize;
                    if !visited[idx] {
                        visited[idx] = true;
                        queue.push_back(neighbor);
                    }
                }
            }
        }
        components.push(component);
    }

    components.sort_by_key(|c| std::cmp::Reverse(c.len()));
    Ok(components)
}

/// Deletes every component at or below `max_size` faces, keeping at
/// least one component (the largest) no matter how small the mesh is.
/// Returns the number of faces removed.
pub(crate) fn remove_dangling_artifacts(mesh: &mut HalfEdgeMesh, max_size: usize) -> Result<usize> {
    if max_size == 0 {
        return Ok(0);
    }
    let components = connected_components(mesh)?;
    let mut removed = 0;
    for (i, component) in components.iter().enumerate() {
        if i == 0 {
            continue;
        }
        if component.len() <= max_size {
            mesh.delete_many_faces(component)?;
            removed += component.len();
        }
    }
    if removed > 0 {
        mesh.garbage_collect()?;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vector_traits::glam::Vec3A;

    fn quad(mesh: &mut HalfEdgeMesh, origin: Vec3A) {
        let v0 = mesh.add_vertex(origin);
        let v1 = mesh.add_vertex(origin + Vec3A::new(1.0, 0.0, 0.0));
        let v2 = mesh.add_vertex(origin + Vec3A::new(1.0, 1.0, 0.0));
        let v3 = mesh.add_vertex(origin + Vec3A::new(0.0, 1.0, 0.0));
        mesh.add_face(&[v0, v1, v2]).unwrap();
        mesh.add_face(&[v0, v2, v3]).unwrap();
    }

    #[test]
    fn two_disconnected_quads_form_two_components() {
        let mut mesh = HalfEdgeMesh::new();
        quad(&mut mesh, Vec3A::ZERO);
        quad(&mut mesh, Vec3A::new(100.0, 100.0, 100.0));
        let components = connected_components(&mesh).unwrap();
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].len(), 2);
        assert_eq!(components[1].len(), 2);
    }

    #[test]
    fn a_small_island_is_removed_but_the_main_body_survives() {
        let mut mesh = HalfEdgeMesh::new();
        quad(&mut mesh, Vec3A::ZERO);
        quad(&mut mesh, Vec3A::new(0.0, 0.0, 1.0));
        quad(&mut mesh, Vec3A::new(0.0, 0.0, 2.0));
        quad(&mut mesh, Vec3A::new(500.0, 500.0, 500.0));

        let removed = remove_dangling_artifacts(&mut mesh, 2).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(mesh.face_count(), 6);
    }

    #[test]
    fn a_lone_mesh_is_never_emptied_even_if_tiny() {
        let mut mesh = HalfEdgeMesh::new();
        quad(&mut mesh, Vec3A::ZERO);
        let removed = remove_dangling_artifacts(&mut mesh, 1000).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(mesh.face_count(), 2);
    }
}
