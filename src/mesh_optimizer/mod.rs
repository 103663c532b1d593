// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! §4.5 MeshOptimizer: post-processes a raw iso-extracted mesh into a
//! clean, near-planar-aware one by running the seven §4.5.1 stages in
//! order, each individually toggled by `OptimizerConfig`.

mod clusters;
mod components;
mod contours;
pub(crate) mod geometry;
mod retesselate;
mod simplify;

use crate::config::OptimizerConfig;
use crate::half_edge_mesh::HalfEdgeMesh;
use crate::progress::{self, ProgressFn};
use crate::Result;

pub(crate) use clusters::CLUSTER_PROPERTY;

/// Exposes `clusters::grow_planar_clusters` to other modules' tests (the
/// texturizer's test suite needs a clustered mesh fixture but the
/// clustering internals otherwise stay private to this module).
#[cfg(test)]
pub(crate) fn grow_planar_clusters_for_test(
    mesh: &mut HalfEdgeMesh,
    config: &OptimizerConfig,
) -> crate::half_edge_mesh::PropertyHandle<i32> {
    clusters::grow_planar_clusters(mesh, config).expect("clustering should succeed in test fixtures")
}

/// Per-stage counts, surfaced for diagnostics/logging the way the rest of
/// the pipeline reports progress (§9: no cancellation, synchronous
/// callback only).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OptimizerReport {
    pub dangling_faces_removed: usize,
    pub contour_faces_removed: usize,
    pub holes_filled: usize,
    pub clusters_found: usize,
    pub small_clusters_cleared: usize,
    pub clusters_retesselated: usize,
    pub faces_simplified: usize,
}

/// Runs every enabled stage over `mesh` in the order fixed by §4.5.1:
/// dangling-artifact removal, contour cleaning, hole filling, planar
/// cluster growing, small-cluster deletion, retesselation, then quadric
/// simplification.
pub fn optimize(
    mesh: &mut HalfEdgeMesh,
    config: &OptimizerConfig,
    progress_cb: Option<&ProgressFn<'_>>,
) -> Result<OptimizerReport> {
    const STAGE_COUNT: usize = 7;
    let mut report = OptimizerReport::default();
    let mut stage = 0;

    if config.dangling_artifacts > 0 {
        report.dangling_faces_removed =
            components::remove_dangling_artifacts(mesh, config.dangling_artifacts)?;
    }
    stage += 1;
    progress::report(progress_cb, stage, STAGE_COUNT);

    if config.clean_contour_iterations > 0 {
        report.contour_faces_removed =
            contours::clean_contours(mesh, config.clean_contour_iterations as u32)?;
    }
    stage += 1;
    progress::report(progress_cb, stage, STAGE_COUNT);

    if config.fill_holes > 0 {
        report.holes_filled = contours::fill_holes(mesh, config.fill_holes)?;
    }
    stage += 1;
    progress::report(progress_cb, stage, STAGE_COUNT);

    let cluster_prop = if config.planar_cluster_growing {
        let handle = clusters::grow_planar_clusters(mesh, config)?;
        report.clusters_found = count_clusters(mesh, handle)?;
        Some(handle)
    } else {
        None
    };
    stage += 1;
    progress::report(progress_cb, stage, STAGE_COUNT);

    if let Some(handle) = cluster_prop {
        report.small_clusters_cleared =
            clusters::delete_small_clusters(mesh, handle, config.small_region_threshold)?;
    }
    stage += 1;
    progress::report(progress_cb, stage, STAGE_COUNT);

    if config.retesselate {
        if let Some(handle) = cluster_prop {
            report.clusters_retesselated =
                retesselate::retesselate_clusters(mesh, handle, config.line_fusion_threshold)?;
        }
    }
    stage += 1;
    progress::report(progress_cb, stage, STAGE_COUNT);

    if config.reduction_ratio > 0.0 {
        report.faces_simplified = simplify::simplify(mesh, config.reduction_ratio)?;
    }
    stage += 1;
    progress::report(progress_cb, stage, STAGE_COUNT);

    Ok(report)
}

fn count_clusters(mesh: &HalfEdgeMesh, handle: crate::half_edge_mesh::PropertyHandle<i32>) -> Result<usize> {
    let mut max_id = -1i32;
    for i in 0..mesh.face_count() {
        let f = crate::half_edge_mesh::Face(i as u32);
        if mesh.is_deleted_face(f) {
            continue;
        }
        max_id = max_id.max(mesh.face_property(handle, f));
    }
    Ok((max_id + 1).max(0) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vector_traits::glam::Vec3A;

    #[test]
    fn a_default_config_runs_every_stage_as_a_no_op() {
        let mut mesh = HalfEdgeMesh::new();
        let v0 = mesh.add_vertex(Vec3A::new(0.0, 0.0, 0.0));
        let v1 = mesh.add_vertex(Vec3A::new(1.0, 0.0, 0.0));
        let v2 = mesh.add_vertex(Vec3A::new(1.0, 1.0, 0.0));
        mesh.add_face(&[v0, v1, v2]).unwrap();
        let config = OptimizerConfig::default();
        let report = optimize(&mut mesh, &config, None).unwrap();
        assert_eq!(report, OptimizerReport::default());
        assert_eq!(mesh.face_count(), 1);
    }

    #[test]
    fn dangling_artifact_removal_runs_when_enabled() {
        let mut mesh = HalfEdgeMesh::new();
        let v0 = mesh.add_vertex(Vec3A::new(0.0, 0.0, 0.0));
        let v1 = mesh.add_vertex(Vec3A::new(1.0, 0.0, 0.0));
        let v2 = mesh.add_vertex(Vec3A::new(1.0, 1.0, 0.0));
        mesh.add_face(&[v0, v1, v2]).unwrap();
        let w0 = mesh.add_vertex(Vec3A::new(1.0, 1.0, 1.0));
        let w1 = mesh.add_vertex(Vec3A::new(2.0, 1.0, 1.0));
        let w2 = mesh.add_vertex(Vec3A::new(2.0, 2.0, 1.0));
        let w3 = mesh.add_vertex(Vec3A::new(1.0, 2.0, 1.0));
        mesh.add_face(&[w0, w1, w2]).unwrap();
        mesh.add_face(&[w0, w2, w3]).unwrap();

        let mut config = OptimizerConfig::default();
        config.dangling_artifacts = 1;
        let report = optimize(&mut mesh, &config, None).unwrap();
        assert_eq!(report.dangling_faces_removed, 1);
        assert_eq!(mesh.face_count(), 2);
    }
}
