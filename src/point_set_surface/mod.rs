// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! §4.2 PointSetSurface: normal estimation, global orientation, normal
//! interpolation and the signed-distance evaluation the voxel grid samples.

#[cfg(test)]
mod tests;

mod normals;

use crate::config::{OrientationReference, SurfaceConfig};
use crate::spatial_index::SpatialIndex;
use crate::{ReconstructError, Result};
pub(crate) use normals::fit_plane_pca;
use normals::fit_plane_ransac;
use rayon::prelude::*;
use vector_traits::glam::Vec3A;

/// An oriented point cloud with its spatial index, ready to answer
/// `distance` queries. Build order is `estimate_normals` →
/// `orient_normals` → (optionally) `interpolate_normals`.
pub struct PointSetSurface<'p> {
    points: &'p [Vec3A],
    normals: Vec<Vec3A>,
    index: SpatialIndex<'p>,
}

impl<'p> PointSetSurface<'p> {
    /// Estimates one normal per point from its `kn` nearest neighbors,
    /// via PCA or RANSAC per `config.use_ransac` (§4.2 `estimate_normals`).
    ///
    /// Points with fewer than `kn` + 1 neighbors available (including
    /// themselves) still get a normal: the degenerate raw-displacement
    /// fallback for neighborhoods under 3 points, or a plane fit over
    /// whatever was found otherwise. A point with zero neighbors (`kn ==
    /// 0` or an empty cloud) is `InsufficientSupport`.
    pub fn estimate_normals(
        points: &'p [Vec3A],
        index: SpatialIndex<'p>,
        config: &SurfaceConfig,
    ) -> Result<Self> {
        if points.is_empty() {
            return Err(ReconstructError::InsufficientSupport(
                "point cloud is empty".to_string(),
            ));
        }
        let kn = config.kn.max(1);
        let use_ransac = config.use_ransac;

        let normals: Result<Vec<Vec3A>> = points
            .par_iter()
            .enumerate()
            .map(|(i, &p)| -> Result<Vec3A> {
                let neighbors = index.k_search(p, kn + 1)?;
                if neighbors.is_empty() {
                    return Err(ReconstructError::InsufficientSupport(format!(
                        "point {i} has no neighbors within kn={kn}"
                    )));
                }
                let neighbor_positions: Vec<Vec3A> = neighbors
                    .iter()
                    .map(|n| points[n.index as usize])
                    .collect();
                let fit = if use_ransac && neighbor_positions.len() >= 3 {
                    fit_plane_ransac(&neighbor_positions, i as u64)
                } else {
                    fit_plane_pca(p, &neighbor_positions)
                };
                Ok(fit.normal)
            })
            .collect();

        Ok(Self {
            points,
            normals: normals?,
            index,
        })
    }

    /// Globally orients every normal against `reference` so that
    /// `dot(n, q - p) >= 0` holds for the chosen reference point `q`
    /// (§4.2 `orient_normals`).
    pub fn orient_normals(&mut self, reference: &OrientationReference) -> Result<()> {
        match reference {
            OrientationReference::FlipPoint(flip) => {
                for (p, n) in self.points.iter().zip(self.normals.iter_mut()) {
                    if n.dot(*flip - *p) < 0.0 {
                        *n = -*n;
                    }
                }
            }
            OrientationReference::ScanPoses(poses) => {
                if poses.is_empty() {
                    return Err(ReconstructError::InvalidArgument(
                        "scan pose orientation requires at least one pose".to_string(),
                    ));
                }
                for (p, n) in self.points.iter().zip(self.normals.iter_mut()) {
                    let nearest = poses
                        .iter()
                        .copied()
                        .min_by(|&a, &b| {
                            (a - *p)
                                .length_squared()
                                .partial_cmp(&(b - *p).length_squared())
                                .unwrap_or(std::cmp::Ordering::Equal)
                        })
                        .expect("poses checked non-empty above");
                    if n.dot(nearest - *p) < 0.0 {
                        *n = -*n;
                    }
                }
            }
        }
        Ok(())
    }

    /// Replaces every normal with the unweighted arithmetic mean of its
    /// `ki` nearest normals, renormalized (§4.2 `interpolate_normals`).
    /// Idempotent under fixed topology: a second pass moves each normal
    /// by a vanishing amount (§8 round-trip law).
    pub fn interpolate_normals(&mut self, ki: usize) -> Result<()> {
        if ki == 0 {
            return Err(ReconstructError::InvalidArgument(
                "interpolate_normals requires ki > 0".to_string(),
            ));
        }
        let smoothed: Result<Vec<Vec3A>> = self
            .points
            .par_iter()
            .map(|&p| -> Result<Vec3A> {
                let neighbors = self.index.k_search(p, ki)?;
                let sum: Vec3A = neighbors
                    .iter()
                    .map(|n| self.normals[n.index as usize])
                    .sum();
                if sum.length_squared() > 0.0 {
                    Ok(sum.normalize())
                } else {
                    Ok(Vec3A::Z)
                }
            })
            .collect();
        self.normals = smoothed?;
        Ok(())
    }

    /// Evaluates the signed distance at `q`: the mean of
    /// `dot(n_i, q - x_i)` over the `kd` nearest points, together with the
    /// mean sample point used as the reference (§4.2 `distance`).
    pub fn distance(&self, q: Vec3A, kd: usize) -> Result<(f32, Vec3A)> {
        if kd == 0 {
            return Err(ReconstructError::InvalidArgument(
                "distance requires kd > 0".to_string(),
            ));
        }
        let neighbors = self.index.k_search(q, kd)?;
        if neighbors.is_empty() {
            return Err(ReconstructError::InsufficientSupport(
                "distance query found no neighbors".to_string(),
            ));
        }
        let mut d_sum = 0.0f32;
        let mut p_sum = Vec3A::ZERO;
        for n in &neighbors {
            let x = self.points[n.index as usize];
            let normal = self.normals[n.index as usize];
            d_sum += normal.dot(q - x);
            p_sum += x;
        }
        let count = neighbors.len() as f32;
        Ok((d_sum / count, p_sum / count))
    }

    pub fn normals(&self) -> &[Vec3A] {
        &self.normals
    }

    pub fn points(&self) -> &[Vec3A] {
        self.points
    }

    pub fn index(&self) -> &SpatialIndex<'p> {
        &self.index
    }
}
