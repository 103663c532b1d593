// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! §4.6 Texturizer: for each planar cluster, fits the cluster's best-fit
//! plane, projects its vertices into the plane's 2D frame, rasterizes a
//! texture at `texel_size` resolution from the input point cloud, and
//! records per-corner UVs as a half-edge property (`h:texcoord`) since the
//! same mesh vertex can border more than one cluster's texture.

use crate::buffers::{Material, PointBuffer, Texture};
use crate::config::TexturizerConfig;
use crate::half_edge_mesh::{Face, HalfEdgeMesh, Halfedge};
use crate::spatial_index::SpatialIndex;
use crate::Result;
use std::collections::HashMap;
use vector_traits::glam::Vec3A;

pub(crate) const TEXCOORD_PROPERTY: &str = "h:texcoord";

/// The materials and rasterized textures produced for one mesh, plus a
/// per-face material index aligned with the mesh's current (post-
/// garbage-collection) face numbering.
#[derive(Debug, Clone, Default)]
pub struct TextureSet {
    pub materials: Vec<Material>,
    pub textures: Vec<Texture>,
    pub face_material_index: Vec<u32>,
}

/// Uniform gray used for clusters skipped by the size gate (§4.6 "clusters
/// smaller than min_cluster_size ... are skipped and receive a uniform
/// per-cluster fallback color").
const FALLBACK_RGB: [u8; 3] = [128, 128, 128];

/// Runs the full texturizing pass. `cluster_prop`, if present, is the
/// `f:cluster` handle `mesh_optimizer::clusters` produced; faces with no
/// cluster (id `-1`) or no `cluster_prop` at all are grouped into a single
/// fallback material with no texture.
pub fn texturize(
    mesh: &mut HalfEdgeMesh,
    points: &PointBuffer,
    spatial_index: &SpatialIndex<'_>,
    cluster_prop: Option<crate::half_edge_mesh::PropertyHandle<i32>>,
    config: &TexturizerConfig,
) -> Result<TextureSet> {
    let texcoord = mesh.add_halfedge_property::<[f32; 2]>(TEXCOORD_PROPERTY, [0.0, 0.0]);

    let mut by_cluster: HashMap<i32, Vec<Face>> = HashMap::new();
    for i in 0..mesh.face_count() {
        let f = Face(i as u32);
        if mesh.is_deleted_face(f) {
            continue;
        }
        let id = cluster_prop
            .map(|h| mesh.face_property(h, f))
            .filter(|&id| id >= 0)
            .unwrap_or(-1);
        by_cluster.entry(id).or_default().push(f);
    }

    let mut materials = Vec::new();
    let mut textures = Vec::new();
    let mut face_material_index = vec![0u32; mesh.face_count()];

    for (cluster_id, faces) in by_cluster {
        let material_index = materials.len() as u32;
        let uncategorized = cluster_id < 0;
        let out_of_size_range =
            faces.len() < config.min_cluster_size || faces.len() > config.max_cluster_size;

        if uncategorized || out_of_size_range || !config.enabled {
            materials.push(Material {
                base_rgb: FALLBACK_RGB,
                texture_index: None,
            });
        } else {
            let texture_id = textures.len() as u32;
            let (texture, u_axis, v_axis, origin, min_u, min_v, extent_u, extent_v) =
                rasterize_cluster(mesh, &faces, points, spatial_index, texture_id, config)?;
            textures.push(texture);
            materials.push(Material {
                base_rgb: FALLBACK_RGB,
                texture_index: Some(texture_id),
            });

            for &f in &faces {
                for h in mesh.halfedges_around_face(f) {
                    let h = h?;
                    let p = mesh.point(mesh.to_vertex(h));
                    let d = p - origin;
                    let u = if extent_u > 0.0 {
                        ((d.dot(u_axis) - min_u) / extent_u).clamp(0.0, 1.0)
                    } else {
                        0.0
                    };
                    let v = if extent_v > 0.0 {
                        ((d.dot(v_axis) - min_v) / extent_v).clamp(0.0, 1.0)
                    } else {
                        0.0
                    };
                    mesh.set_halfedge_property(texcoord, h, [u, v]);
                }
            }
        }

        for f in faces {
            face_material_index[f.index() as usize] = material_index;
        }
    }

    Ok(TextureSet {
        materials,
        textures,
        face_material_index,
    })
}

#[allow(clippy::too_many_arguments)]
fn rasterize_cluster(
    mesh: &HalfEdgeMesh,
    faces: &[Face],
    points: &PointBuffer,
    spatial_index: &SpatialIndex<'_>,
    texture_id: u32,
    config: &TexturizerConfig,
) -> Result<(Texture, Vec3A, Vec3A, Vec3A, f32, f32, f32, f32)> {
    let mut normal_sum = Vec3A::ZERO;
    let mut centroid_sum = Vec3A::ZERO;
    let mut area_sum = 0.0f32;
    for &f in faces {
        if let Ok((n, a, c)) = super::mesh_optimizer::geometry::face_normal_area_centroid(mesh, f) {
            normal_sum += n * a;
            centroid_sum += c * a;
            area_sum += a;
        }
    }
    let normal = normal_sum.normalize_or_zero();
    let origin = if area_sum > 0.0 {
        centroid_sum / area_sum
    } else {
        mesh.point(mesh.to_vertex(mesh.halfedge_of_face(faces[0])))
    };
    let up = if normal.x.abs() < 0.9 { Vec3A::X } else { Vec3A::Y };
    let u_axis = up.cross(normal).normalize_or_zero();
    let v_axis = normal.cross(u_axis);

    let mut min_u = f32::INFINITY;
    let mut max_u = f32::NEG_INFINITY;
    let mut min_v = f32::INFINITY;
    let mut max_v = f32::NEG_INFINITY;
    for &f in faces {
        for h in mesh.halfedges_around_face(f) {
            let h = h?;
            let d = mesh.point(mesh.to_vertex(h)) - origin;
            let (u, v) = (d.dot(u_axis), d.dot(v_axis));
            min_u = min_u.min(u);
            max_u = max_u.max(u);
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }
    }
    let extent_u = (max_u - min_u).max(0.0);
    let extent_v = (max_v - min_v).max(0.0);

    let width = ((extent_u / config.texel_size).ceil() as u32).max(1);
    let height = ((extent_v / config.texel_size).ceil() as u32).max(1);
    let channels = 3u8;
    let mut bytes = vec![0u8; (width * height * channels as u32) as usize];

    for row in 0..height {
        for col in 0..width {
            let texel_center = origin
                + u_axis * (min_u + (col as f32 + 0.5) * config.texel_size)
                + v_axis * (min_v + (row as f32 + 0.5) * config.texel_size);
            let rgb = texel_color(texel_center, points, spatial_index, config)?;
            let base = ((row * width + col) * channels as u32) as usize;
            bytes[base] = rgb[0];
            bytes[base + 1] = rgb[1];
            bytes[base + 2] = rgb[2];
        }
    }

    let texture = Texture {
        id: texture_id,
        width,
        height,
        channels,
        meters_per_texel: config.texel_size,
        bytes,
    };
    Ok((texture, u_axis, v_axis, origin, min_u, min_v, extent_u, extent_v))
}

/// A texel's color is the nearest input point's color, or the mean color
/// of every point whose projection falls within the texel (§4.6,
/// `average_texels`). Falls back to mid-gray if the point cloud carries no
/// `colors` channel.
fn texel_color(
    center: Vec3A,
    points: &PointBuffer,
    spatial_index: &SpatialIndex<'_>,
    config: &TexturizerConfig,
) -> Result<[u8; 3]> {
    let Some((width, data)) = points.colors() else {
        return Ok(FALLBACK_RGB);
    };
    if config.average_texels {
        let radius = config.texel_size * std::f32::consts::FRAC_1_SQRT_2;
        let neighbors = spatial_index.radius_search(center, radius, usize::MAX)?;
        if neighbors.is_empty() {
            return Ok(FALLBACK_RGB);
        }
        let mut sum = [0u32; 3];
        for n in &neighbors {
            let base = n.index as usize * width as usize;
            for c in 0..3 {
                sum[c] += data[base + c] as u32;
            }
        }
        let count = neighbors.len() as u32;
        return Ok([
            (sum[0] / count) as u8,
            (sum[1] / count) as u8,
            (sum[2] / count) as u8,
        ]);
    }
    let nearest = spatial_index.k_search(center, 1)?;
    match nearest.first() {
        Some(n) => {
            let base = n.index as usize * width as usize;
            Ok([data[base], data[base + 1], data[base + 2]])
        }
        None => Ok(FALLBACK_RGB),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizerConfig;
    use crate::mesh_optimizer::grow_planar_clusters_for_test;

    fn colored_quad() -> (HalfEdgeMesh, PointBuffer) {
        let mut mesh = HalfEdgeMesh::new();
        let v0 = mesh.add_vertex(Vec3A::new(0.0, 0.0, 0.0));
        let v1 = mesh.add_vertex(Vec3A::new(1.0, 0.0, 0.0));
        let v2 = mesh.add_vertex(Vec3A::new(1.0, 1.0, 0.0));
        let v3 = mesh.add_vertex(Vec3A::new(0.0, 1.0, 0.0));
        mesh.add_face(&[v0, v1, v2]).unwrap();
        mesh.add_face(&[v0, v2, v3]).unwrap();

        let mut points = PointBuffer::from_positions(vec![
            Vec3A::new(0.2, 0.2, 0.0),
            Vec3A::new(0.8, 0.8, 0.0),
        ]);
        points.set_colors(3, vec![255, 0, 0, 0, 255, 0]).unwrap();
        (mesh, points)
    }

    #[test]
    fn a_single_plane_cluster_gets_one_texture() {
        let (mut mesh, points) = colored_quad();
        let config_opt = OptimizerConfig::default();
        let cluster_prop = grow_planar_clusters_for_test(&mut mesh, &config_opt);
        let index = SpatialIndex::build(points.positions(), 20).unwrap();
        let mut tex_config = TexturizerConfig::default();
        tex_config.enabled = true;
        tex_config.texel_size = 0.25;
        tex_config.min_cluster_size = 1;
        let result = texturize(&mut mesh, &points, &index, Some(cluster_prop), &tex_config).unwrap();
        assert_eq!(result.textures.len(), 1);
        assert_eq!(result.materials.len(), 1);
        assert!(result.textures[0].bytes.len() > 0);
    }

    #[test]
    fn disabled_texturizing_yields_only_fallback_materials() {
        let (mut mesh, points) = colored_quad();
        let index = SpatialIndex::build(points.positions(), 20).unwrap();
        let config = TexturizerConfig::default();
        let result = texturize(&mut mesh, &points, &index, None, &config).unwrap();
        assert!(result.textures.is_empty());
        assert_eq!(result.materials.len(), 1);
        assert_eq!(result.materials[0].base_rgb, FALLBACK_RGB);
    }
}
