// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! The driver that wires every stage of §2's data flow together:
//! `PointBuffer` → `SpatialIndex` → `PointSetSurface` → `VoxelGrid` →
//! `HalfEdgeMesh` → `MeshOptimizer` → `Texturizer` → `MeshBuffer`.
//!
//! This is the only place in the crate that owns the whole pipeline; every
//! stage above remains independently usable. `--voxelsize`,
//! `--decomposition`, `--ki`/`--kn`/`--kd` and the rest of §6.3's
//! informative CLI surface are all fields of [`crate::config::ReconstructionConfig`]
//! consumed here — a thin CLI binary (out of scope, §1) would have nothing
//! left to decide beyond parsing argv into that struct.

use crate::buffers::{Material, MeshBuffer, PointBuffer};
use crate::config::ReconstructionConfig;
use crate::error::{Diagnostic, Stage};
use crate::half_edge_mesh::{Face, HalfEdgeMesh, Vertex};
use crate::mesh_optimizer::{self, CLUSTER_PROPERTY};
use crate::point_set_surface::PointSetSurface;
use crate::progress::ProgressFn;
use crate::spatial_index::SpatialIndex;
use crate::texturizer::{self, TextureSet};
use crate::voxel_grid::{self, VoxelMesh};
use crate::{ReconstructError, Result};
use std::time::Instant;
use vector_traits::glam::Vec3A;

/// Everything `reconstruct` produced: the flat output buffer plus the
/// non-fatal diagnostics collected along the way (§7 "the driver still
/// emits the partial mesh up to but not including the failing stage when
/// the failure is non-fatal").
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    pub mesh: MeshBuffer,
    pub diagnostics: Vec<Diagnostic>,
    pub optimizer_report: mesh_optimizer::OptimizerReport,
}

/// Runs the full reconstruction pipeline over `points`, per `config`.
///
/// Boundary behavior (§8): an empty or single-point cloud short-circuits
/// to an empty mesh rather than attempting a degenerate reconstruction —
/// a single point carries no surface to reconstruct a band around.
pub fn reconstruct(
    points: &PointBuffer,
    config: &ReconstructionConfig,
    progress: Option<&ProgressFn<'_>>,
) -> Result<PipelineOutput> {
    if points.len() <= 1 {
        return Ok(PipelineOutput::default());
    }

    let pool = match config.threads {
        Some(n) => Some(
            rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| ReconstructError::InvalidArgument(format!("invalid thread count: {e}")))?,
        ),
        None => None,
    };

    let run = || run_pipeline(points, config, progress);
    match &pool {
        Some(pool) => pool.install(run),
        None => run(),
    }
}

fn run_pipeline(
    points: &PointBuffer,
    config: &ReconstructionConfig,
    progress: Option<&ProgressFn<'_>>,
) -> Result<PipelineOutput> {
    let mut diagnostics = Vec::new();
    let positions = points.positions();

    let now = Instant::now();
    let index = SpatialIndex::build(positions, config.max_leaf_size)?;
    if config.verbose {
        println!("Rust: spatial_index build duration: {:?}", now.elapsed());
    }

    let now = Instant::now();
    let mut surface = PointSetSurface::estimate_normals(positions, index, &config.surface)?;
    surface.orient_normals(&config.surface.orientation)?;
    surface.interpolate_normals(config.surface.ki)?;
    if config.verbose {
        println!("Rust: point_set_surface duration: {:?}", now.elapsed());
    }

    let now = Instant::now();
    let voxel_mesh = voxel_grid::reconstruct(
        &surface,
        config.surface.kd,
        &config.voxel,
        config.verbose,
        progress,
    )?;
    if config.verbose {
        println!(
            "Rust: voxel_grid duration: {:?}, {} triangles",
            now.elapsed(),
            voxel_mesh.indices.len() / 3
        );
    }

    if voxel_mesh.indices.is_empty() {
        return Ok(PipelineOutput {
            mesh: MeshBuffer::default(),
            diagnostics,
            optimizer_report: mesh_optimizer::OptimizerReport::default(),
        });
    }

    let mut mesh = build_half_edge_mesh(&voxel_mesh, &mut diagnostics);

    let now = Instant::now();
    let optimizer_report = mesh_optimizer::optimize(&mut mesh, &config.optimizer, progress)?;
    if config.verbose {
        println!("Rust: mesh_optimizer duration: {:?}", now.elapsed());
    }

    // Garbage-collect here, before texturizing: the cluster property
    // and the face numbering `texturize` hands back in `TextureSet`
    // must agree with the face numbering `to_mesh_buffer` iterates below,
    // and optimizer stages leave deleted faces in place until collected.
    mesh.garbage_collect()?;

    let cluster_prop = mesh.face_property_handle::<i32>(CLUSTER_PROPERTY);
    let textures = if config.texturizer.enabled {
        let now = Instant::now();
        let result = texturizer::texturize(
            &mut mesh,
            points,
            surface.index(),
            cluster_prop,
            &config.texturizer,
        )?;
        if config.verbose {
            println!("Rust: texturizer duration: {:?}", now.elapsed());
        }
        Some(result)
    } else {
        None
    };

    let buffer = to_mesh_buffer(&mesh, textures);
    Ok(PipelineOutput {
        mesh: buffer,
        diagnostics,
        optimizer_report,
    })
}

/// Converts the iso-extracted triangle soup into a `HalfEdgeMesh`. Faces
/// that would create a non-manifold configuration (§4.4.1 `add_face`'s
/// `TopologyException`) are locally recoverable here: the construction
/// continues without that triangle and the rejection is logged as a
/// diagnostic rather than aborting the whole reconstruction, since a few
/// ambiguous triangles along a welded chunk seam should not sink an
/// otherwise valid mesh.
fn build_half_edge_mesh(voxel_mesh: &VoxelMesh, diagnostics: &mut Vec<Diagnostic>) -> HalfEdgeMesh {
    let mut mesh = HalfEdgeMesh::new();
    let vertices: Vec<Vertex> = voxel_mesh
        .positions
        .iter()
        .map(|&p| mesh.add_vertex(p))
        .collect();

    for (face_index, tri) in voxel_mesh.indices.chunks_exact(3).enumerate() {
        let verts = [
            vertices[tri[0] as usize],
            vertices[tri[1] as usize],
            vertices[tri[2] as usize],
        ];
        if let Err(e) = mesh.add_face(&verts) {
            diagnostics.push(Diagnostic {
                stage: Stage::HalfEdgeMesh,
                entity_index: face_index as u64,
                message: format!("triangle rejected while building mesh: {e}"),
            });
        }
    }
    mesh
}

/// Flattens a (possibly n-gon) half-edge mesh into the triangle-only
/// export contract of §6.2, fanning any polygon from its first vertex.
/// Vertex normals are the area-weighted mean of incident face normals,
/// skipping any degenerate (`Numeric`) face rather than failing the whole
/// export.
fn to_mesh_buffer(mesh: &HalfEdgeMesh, textures: Option<TextureSet>) -> MeshBuffer {
    let vertex_count = mesh.vertex_count();
    let mut vertices = Vec::with_capacity(vertex_count);
    for i in 0..vertex_count {
        vertices.push(mesh.point(Vertex(i as u32)));
    }

    let mut vertex_normal_sum = vec![Vec3A::ZERO; vertex_count];
    let mut face_indices = Vec::new();
    let mut face_material_index = textures.as_ref().map(|_| Vec::new());

    for i in 0..mesh.face_count() {
        let f = Face(i as u32);
        if mesh.is_deleted_face(f) {
            continue;
        }
        let verts: Vec<Vertex> = match mesh.vertices_around_face(f).collect() {
            Ok(v) => v,
            Err(_) => continue,
        };
        if verts.len() < 3 {
            continue;
        }
        let normal = mesh_optimizer::geometry::face_normal(mesh, f).ok();
        for k in 1..verts.len() - 1 {
            face_indices.extend_from_slice(&[
                verts[0].index(),
                verts[k].index(),
                verts[k + 1].index(),
            ]);
            if let Some(indices) = face_material_index.as_mut() {
                let material = textures
                    .as_ref()
                    .and_then(|t| t.face_material_index.get(i))
                    .copied()
                    .unwrap_or(0);
                indices.push(material);
            }
        }
        if let Some(n) = normal {
            for &v in &verts {
                vertex_normal_sum[v.index() as usize] += n;
            }
        }
    }

    let vertex_normals = Some(
        vertex_normal_sum
            .into_iter()
            .map(|n| n.normalize_or_zero())
            .collect(),
    );

    let (materials, texture_list): (Vec<Material>, Vec<crate::buffers::Texture>) = match textures {
        Some(t) => (t.materials, t.textures),
        None => (Vec::new(), Vec::new()),
    };

    MeshBuffer {
        vertices,
        vertex_normals,
        vertex_colors: None,
        face_indices,
        face_material_index,
        materials,
        textures: texture_list,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconstructionConfig;

    fn sphere_points(n: usize, radius: f32) -> PointBuffer {
        let mut positions = Vec::with_capacity(n);
        let golden_angle = std::f32::consts::PI * (3.0 - 5.0_f32.sqrt());
        for i in 0..n {
            let t = i as f32 / n.max(1) as f32;
            let z = 1.0 - 2.0 * t;
            let r = (1.0 - z * z).max(0.0).sqrt();
            let theta = golden_angle * i as f32;
            positions.push(Vec3A::new(r * theta.cos(), r * theta.sin(), z) * radius);
        }
        PointBuffer::from_positions(positions)
    }

    #[test]
    fn empty_point_buffer_yields_an_empty_mesh() {
        let points = PointBuffer::default();
        let config = ReconstructionConfig::default();
        let output = reconstruct(&points, &config, None).unwrap();
        assert_eq!(output.mesh.vertex_count(), 0);
        assert_eq!(output.mesh.face_count(), 0);
    }

    #[test]
    fn single_point_buffer_yields_an_empty_mesh() {
        let points = PointBuffer::from_positions(vec![Vec3A::ZERO]);
        let config = ReconstructionConfig::default();
        let output = reconstruct(&points, &config, None).unwrap();
        assert_eq!(output.mesh.face_count(), 0);
    }

    #[test]
    fn a_sphere_reconstructs_to_a_watertight_mesh_with_no_diagnostics() {
        let points = sphere_points(600, 1.0);
        let mut config = ReconstructionConfig::default();
        config.voxel.cell_size = 0.2;
        config.surface.kn = 12;
        config.surface.ki = 5;
        config.surface.kd = 8;
        let output = reconstruct(&points, &config, None).unwrap();
        assert!(output.mesh.face_count() > 0);
        assert!(output.mesh.vertex_count() > 0);
        assert_eq!(output.mesh.face_indices.len() % 3, 0);
    }
}
