// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! The buffer-level contracts the core exposes to an external file-format
//! and rendering layer (§6). Neither format parsing nor rendering lives
//! here; these types are flat, channel-major arrays the core both consumes
//! (`PointBuffer`) and produces (`MeshBuffer`).

use crate::{ReconstructError, Result};
use vector_traits::glam::Vec3A;

/// A point cloud: interleaved positions plus optional named channels.
///
/// Invariant: every channel, when present, carries exactly `len()` entries
/// worth of data (3 floats per point for `normals`, `w` bytes per point for
/// `colors`, `spectral_channels_per_point` bytes per point for
/// `spectral_channels`).
#[derive(Debug, Clone, Default)]
pub struct PointBuffer {
    positions: Vec<Vec3A>,
    normals: Option<Vec<Vec3A>>,
    /// `w` in {3, 4}; stored row-major, `w` bytes per point.
    colors: Option<(u8, Vec<u8>)>,
    spectral_channels: Option<SpectralChannels>,
}

#[derive(Debug, Clone)]
pub struct SpectralChannels {
    pub channels_per_point: u32,
    pub wavelength_min: i32,
    pub wavelength_max: i32,
    pub data: Vec<u8>,
}

impl PointBuffer {
    pub fn from_positions(positions: Vec<Vec3A>) -> Self {
        Self {
            positions,
            normals: None,
            colors: None,
            spectral_channels: None,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[Vec3A] {
        &self.positions
    }

    pub fn normals(&self) -> Option<&[Vec3A]> {
        self.normals.as_deref()
    }

    pub fn colors(&self) -> Option<(u8, &[u8])> {
        self.colors.as_ref().map(|(w, data)| (*w, data.as_slice()))
    }

    pub fn spectral_channels(&self) -> Option<&SpectralChannels> {
        self.spectral_channels.as_ref()
    }

    /// Attaches (or overwrites) the `normals` channel. Errs if the channel
    /// length does not match the point count.
    pub fn set_normals(&mut self, normals: Vec<Vec3A>) -> Result<()> {
        if normals.len() != self.positions.len() {
            return Err(ReconstructError::InvalidArgument(format!(
                "normals channel has {} entries, expected {}",
                normals.len(),
                self.positions.len()
            )));
        }
        self.normals = Some(normals);
        Ok(())
    }

    pub fn set_colors(&mut self, width: u8, data: Vec<u8>) -> Result<()> {
        if !(3..=4).contains(&width) {
            return Err(ReconstructError::InvalidArgument(format!(
                "color channel width must be 3 or 4, got {width}"
            )));
        }
        if data.len() != self.positions.len() * width as usize {
            return Err(ReconstructError::InvalidArgument(
                "color channel length does not match point count".to_string(),
            ));
        }
        self.colors = Some((width, data));
        Ok(())
    }

    pub fn set_spectral_channels(&mut self, channels: SpectralChannels) -> Result<()> {
        if channels.wavelength_min >= channels.wavelength_max {
            return Err(ReconstructError::InvalidArgument(format!(
                "spectral_wavelength_min ({}) must be < spectral_wavelength_max ({})",
                channels.wavelength_min, channels.wavelength_max
            )));
        }
        if channels.data.len() != self.positions.len() * channels.channels_per_point as usize {
            return Err(ReconstructError::InvalidArgument(
                "spectral channel length does not match point count".to_string(),
            ));
        }
        self.spectral_channels = Some(channels);
        Ok(())
    }
}

/// One output material: a flat base color plus an optional texture index
/// into `MeshBuffer::textures`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Material {
    pub base_rgb: [u8; 3],
    pub texture_index: Option<u32>,
}

/// One rasterized per-cluster texture (§3 "Texture", §4.6).
#[derive(Debug, Clone)]
pub struct Texture {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub meters_per_texel: f32,
    pub bytes: Vec<u8>,
}

/// The flat output contract consumed by file-writers (§6.2). Triangles
/// only: callers needing polygons export from `HalfEdgeMesh` directly.
#[derive(Debug, Clone, Default)]
pub struct MeshBuffer {
    pub vertices: Vec<Vec3A>,
    pub vertex_normals: Option<Vec<Vec3A>>,
    pub vertex_colors: Option<Vec<[u8; 3]>>,
    pub face_indices: Vec<u32>,
    pub face_material_index: Option<Vec<u32>>,
    pub materials: Vec<Material>,
    pub textures: Vec<Texture>,
}

impl MeshBuffer {
    pub fn face_count(&self) -> usize {
        self.face_indices.len() / 3
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }
}

/// A 4x4 double-precision affine transform, produced by loaders and
/// consumed by `PointSetSurface` (flip point / scan pose transforms) and
/// `MeshBuffer` writers.
#[derive(Debug, Clone, Copy)]
pub struct Transform(pub [[f64; 4]; 4]);

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub fn identity() -> Self {
        let mut m = [[0.0; 4]; 4];
        for i in 0..4 {
            m[i][i] = 1.0;
        }
        Self(m)
    }

    pub fn transform_point(&self, p: Vec3A) -> Vec3A {
        let (x, y, z) = (p.x as f64, p.y as f64, p.z as f64);
        let m = &self.0;
        let tx = m[0][0] * x + m[0][1] * y + m[0][2] * z + m[0][3];
        let ty = m[1][0] * x + m[1][1] * y + m[1][2] * z + m[1][3];
        let tz = m[2][0] * x + m[2][1] * y + m[2][2] * z + m[2][3];
        Vec3A::new(tx as f32, ty as f32, tz as f32)
    }
}
