// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! End-to-end tests against `HalfEdgeMesh` itself, exercising §8's seed
//! scenario 4 (half-edge collapse correctness) plus the idempotence and
//! delete-everything boundary behaviors.

use super::*;
use vector_traits::glam::Vec3A;

fn tetrahedron() -> (HalfEdgeMesh, [Vertex; 4]) {
    let mut mesh = HalfEdgeMesh::new();
    let v0 = mesh.add_vertex(Vec3A::new(0.0, 0.0, 0.0));
    let v1 = mesh.add_vertex(Vec3A::new(1.0, 0.0, 0.0));
    let v2 = mesh.add_vertex(Vec3A::new(0.0, 1.0, 0.0));
    let v3 = mesh.add_vertex(Vec3A::new(0.0, 0.0, 1.0));
    mesh.add_face(&[v0, v2, v1]).unwrap();
    mesh.add_face(&[v0, v1, v3]).unwrap();
    mesh.add_face(&[v1, v2, v3]).unwrap();
    mesh.add_face(&[v2, v0, v3]).unwrap();
    (mesh, [v0, v1, v2, v3])
}

#[test]
fn tetrahedron_has_expected_counts() {
    let (mesh, _) = tetrahedron();
    assert_eq!(mesh.vertex_count(), 4);
    assert_eq!(mesh.face_count(), 4);
    assert_eq!(mesh.edge_count(), 6);
}

#[test]
fn opposite_and_next_prev_invariants_hold_on_a_closed_mesh() {
    let (mesh, _) = tetrahedron();
    for i in 0..mesh.halfedge_count() {
        let h = Halfedge(i as u32);
        assert_eq!(h.opposite().opposite(), h);
        assert_ne!(h.opposite(), h);
        assert_eq!(mesh.next_halfedge(mesh.prev_halfedge(h)), h);
        assert_eq!(mesh.prev_halfedge(mesh.next_halfedge(h)), h);
        if let Some(f) = mesh.face(h) {
            assert_eq!(mesh.face(mesh.next_halfedge(h)), Some(f));
        }
    }
}

#[test]
fn collapse_on_an_open_fan_leaves_one_face_and_consistent_circulators() {
    // An open 3-triangle fan around `v0`: collapsing the edge shared by
    // the first two fan triangles removes both of them plus `v0`, and
    // reconstructs the third (untouched) triangle with `v0` relabeled to
    // the surviving endpoint — exactly the "one face survives" half of
    // the collapse contract (§4.4.1, interior case minus the fan's open
    // boundary).
    let mut mesh = HalfEdgeMesh::new();
    let v0 = mesh.add_vertex(Vec3A::new(0.0, 0.0, 0.0));
    let v1 = mesh.add_vertex(Vec3A::new(1.0, 0.0, 0.0));
    let v2 = mesh.add_vertex(Vec3A::new(1.0, 1.0, 0.0));
    let v3 = mesh.add_vertex(Vec3A::new(0.0, 1.0, 0.0));
    let v4 = mesh.add_vertex(Vec3A::new(-1.0, 1.0, 0.0));
    mesh.add_face(&[v0, v1, v2]).unwrap();
    mesh.add_face(&[v0, v2, v3]).unwrap();
    mesh.add_face(&[v0, v3, v4]).unwrap();

    let h = mesh
        .halfedges_around_vertex(v0)
        .find_map(|h| {
            let h = h.unwrap();
            (mesh.to_vertex(h) == v2).then_some(h)
        })
        .unwrap();
    assert!(mesh.is_collapse_ok(h).unwrap());
    mesh.collapse(h).unwrap();

    assert!(mesh.is_deleted_vertex(v0));
    // the untouched third triangle survives, relabeled (v0 -> v2)
    let surviving: Vec<Face> = (0..mesh.face_count() as u32)
        .map(Face)
        .filter(|&f| !mesh.is_deleted_face(f))
        .collect();
    assert_eq!(surviving.len(), 1);
    let verts: Vec<Vertex> = mesh
        .vertices_around_face(surviving[0])
        .collect::<Result<Vec<_>>>()
        .unwrap();
    assert!(verts.contains(&v2));
    assert!(verts.contains(&v3));
    assert!(verts.contains(&v4));

    for i in 0..mesh.halfedge_count() {
        let hh = Halfedge(i as u32);
        assert_eq!(hh.opposite().opposite(), hh);
        assert_eq!(mesh.next_halfedge(mesh.prev_halfedge(hh)), hh);
        if let Some(f) = mesh.face(hh) {
            assert_eq!(mesh.face(mesh.next_halfedge(hh)), Some(f));
        }
    }
}

#[test]
fn flip_swaps_the_diagonal_of_two_triangles() {
    let mut mesh = HalfEdgeMesh::new();
    let v0 = mesh.add_vertex(Vec3A::new(0.0, 0.0, 0.0));
    let v1 = mesh.add_vertex(Vec3A::new(1.0, 0.0, 0.0));
    let v2 = mesh.add_vertex(Vec3A::new(1.0, 1.0, 0.0));
    let v3 = mesh.add_vertex(Vec3A::new(0.0, 1.0, 0.0));
    mesh.add_face(&[v0, v1, v2]).unwrap();
    mesh.add_face(&[v0, v2, v3]).unwrap();

    let diagonal = mesh
        .halfedges_around_vertex(v0)
        .find_map(|h| {
            let h = h.unwrap();
            (mesh.to_vertex(h) == v2).then_some(h)
        })
        .unwrap();
    let e = diagonal.edge();
    assert!(mesh.is_flip_ok(e));
    mesh.flip(e).unwrap();

    assert!(
        mesh.find_halfedge_for_test(v1, v3).is_some()
            || mesh.find_halfedge_for_test(v3, v1).is_some()
    );
    assert_eq!(mesh.face_count(), 2);
    assert_eq!(mesh.vertex_count(), 4);
}

#[test]
fn garbage_collect_is_idempotent() {
    let (mut mesh, [v0, ..]) = tetrahedron();
    let faces: Vec<Face> = (0..mesh.face_count() as u32)
        .map(Face)
        .filter(|f| mesh.vertices_around_face(*f).any(|v| v.unwrap() == v0))
        .collect();
    mesh.delete_many_faces(&faces).unwrap();
    mesh.garbage_collect().unwrap();
    let after_first = (mesh.vertex_count(), mesh.face_count(), mesh.edge_count());
    mesh.garbage_collect().unwrap();
    let after_second = (mesh.vertex_count(), mesh.face_count(), mesh.edge_count());
    assert_eq!(after_first, after_second);
}

#[test]
fn delete_many_faces_with_every_face_selected_empties_the_mesh() {
    let (mut mesh, _) = tetrahedron();
    let all_faces: Vec<Face> = (0..mesh.face_count() as u32).map(Face).collect();
    mesh.delete_many_faces(&all_faces).unwrap();
    for i in 0..mesh.face_count() {
        assert!(mesh.is_deleted_face(Face(i as u32)));
    }
    mesh.garbage_collect().unwrap();
    assert_eq!(mesh.face_count(), 0);
    // every halfedge is now a boundary halfedge with no face
    for i in 0..mesh.halfedge_count() {
        assert!(mesh.is_boundary_halfedge(Halfedge(i as u32)));
    }
}

#[test]
fn split_face_fans_a_new_vertex_into_the_interior() {
    let mut mesh = HalfEdgeMesh::new();
    let v0 = mesh.add_vertex(Vec3A::new(0.0, 0.0, 0.0));
    let v1 = mesh.add_vertex(Vec3A::new(1.0, 0.0, 0.0));
    let v2 = mesh.add_vertex(Vec3A::new(1.0, 1.0, 0.0));
    let v3 = mesh.add_vertex(Vec3A::new(0.0, 1.0, 0.0));
    let f = mesh.add_face(&[v0, v1, v2, v3]).unwrap();
    mesh.split_face(f, Vec3A::new(0.5, 0.5, 0.0)).unwrap();
    assert_eq!(mesh.vertex_count(), 5);
    assert_eq!(mesh.face_count(), 4);
}

#[test]
fn join_mesh_concatenates_geometry_without_welding() {
    let (mesh_a, _) = tetrahedron();
    let (mesh_b, _) = tetrahedron();
    let mut combined = HalfEdgeMesh::new();
    combined.join_mesh(&mesh_a).unwrap();
    combined.join_mesh(&mesh_b).unwrap();
    assert_eq!(combined.vertex_count(), 8);
    assert_eq!(combined.face_count(), 8);
}

#[test]
fn join_mesh_carries_matching_face_properties_and_reports_dropped_ones() {
    let (mut mesh_a, _) = tetrahedron();
    let cluster = mesh_a.add_face_property::<i32>("f:cluster", -1);
    mesh_a.set_face_property(cluster, Face(0), 7);
    let only_in_a = mesh_a.add_face_property::<bool>("f:only_in_a", false);
    mesh_a.set_face_property(only_in_a, Face(0), true);

    let mut combined = HalfEdgeMesh::new();
    let combined_cluster = combined.add_face_property::<i32>("f:cluster", -1);
    let report = combined.join_mesh(&mesh_a).unwrap();

    assert_eq!(report.vertex_offset, 0);
    assert_eq!(report.dropped_properties, vec!["f:only_in_a"]);
    assert_eq!(combined.face_property(combined_cluster, Face(0)), 7);
}

#[test]
fn garbage_collect_preserves_a_custom_face_property_across_compaction() {
    let (mut mesh, [v0, ..]) = tetrahedron();
    let cluster = mesh.add_face_property::<i32>("f:cluster", -1);
    let surviving_face = (0..mesh.face_count() as u32)
        .map(Face)
        .find(|&f| mesh.vertices_around_face(f).all(|v| v.unwrap() != v0))
        .unwrap();
    mesh.set_face_property(cluster, surviving_face, 42);

    let dangling_faces: Vec<Face> = (0..mesh.face_count() as u32)
        .map(Face)
        .filter(|f| mesh.vertices_around_face(*f).any(|v| v.unwrap() == v0))
        .collect();
    mesh.delete_many_faces(&dangling_faces).unwrap();
    mesh.garbage_collect().unwrap();

    assert_eq!(mesh.face_count(), 1);
    assert_eq!(mesh.face_property(cluster, Face(0)), 42);
}

#[test]
fn split_mesh_by_label_groups_faces_by_distinct_label() {
    let (mesh, _) = tetrahedron();
    let labels = vec![0, 0, 1, 1];
    let parts = mesh.split_mesh_by_label(&labels).unwrap();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].face_count(), 2);
    assert_eq!(parts[1].face_count(), 2);
}

#[test]
fn custom_face_property_survives_a_clone_independently() {
    let (mut mesh, _) = tetrahedron();
    let cluster = mesh.add_face_property::<i32>("f:cluster", -1);
    mesh.set_face_property(cluster, Face(0), 3);
    let mut cloned = mesh.clone();
    cloned.set_face_property(cluster, Face(0), 9);
    assert_eq!(mesh.face_property(cluster, Face(0)), 3);
    assert_eq!(cloned.face_property(cluster, Face(0)), 9);
}

#[test]
fn re_registering_a_face_property_name_yields_an_invalid_handle() {
    let (mut mesh, _) = tetrahedron();
    let _ = mesh.add_face_property::<i32>("f:degenerate", 0);
    let dup = mesh.add_face_property::<i32>("f:degenerate", 0);
    assert!(!dup.is_valid());
}

impl HalfEdgeMesh {
    /// test-only helper mirroring the private `find_halfedge` lookup.
    fn find_halfedge_for_test(&self, v0: Vertex, v1: Vertex) -> Option<Halfedge> {
        self.halfedges_around_vertex(v0)
            .find_map(|h| {
                let h = h.ok()?;
                (self.to_vertex(h) == v1).then_some(h)
            })
    }
}
