// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! Typed configuration for every pipeline stage. Field names and defaults
//! mirror the informative CLI surface of §6.3 and the threshold table of
//! §4.5.2; the driver binary that would parse `--voxelsize` et al. is out
//! of scope (§1), but its flags are documented here 1:1 so a thin CLI
//! wrapper has nothing left to decide.

use vector_traits::glam::Vec3A;

/// `--decomposition {MC,PMC,MT,SF}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decomposition {
    /// Standard Marching Cubes, 256-case edge table.
    Mc,
    /// MC topology with coplanar-vertex snapping to suppress staircasing.
    Pmc,
    /// Marching Tetrahedra: six tetrahedra per cell, 16-case table each.
    Mt,
    /// MC augmented with an interior feature vertex on sharp cells.
    Sf,
}

impl Default for Decomposition {
    fn default() -> Self {
        Decomposition::Mc
    }
}

/// The reference used to globally orient normals (§4.2 `orient_normals`).
#[derive(Debug, Clone)]
pub enum OrientationReference {
    /// `--flip-point X Y Z`
    FlipPoint(Vec3A),
    /// One or more scan poses; each point is oriented against its nearest
    /// pose.
    ScanPoses(Vec<Vec3A>),
}

/// `--ki`, `--kn`, `--kd` and the RANSAC switch for `PointSetSurface`.
#[derive(Debug, Clone)]
pub struct SurfaceConfig {
    /// `--kn`, neighborhood size used by `estimate_normals`.
    pub kn: usize,
    /// `--ki`, neighborhood size used by `interpolate_normals`.
    pub ki: usize,
    /// `--kd`, neighborhood size used by `distance`.
    pub kd: usize,
    /// `--ransac`, use RANSAC plane fitting instead of PCA.
    pub use_ransac: bool,
    pub orientation: OrientationReference,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            kn: 10,
            ki: 5,
            kd: 5,
            use_ransac: false,
            orientation: OrientationReference::FlipPoint(Vec3A::ZERO),
        }
    }
}

/// `--voxelsize`/`--intersections` and the iso-extraction variant.
#[derive(Debug, Clone)]
pub struct VoxelConfig {
    /// `--voxelsize`, cell size `s` in meters. Mutually exclusive with
    /// `intersections` at the CLI layer; the core only ever takes a
    /// resolved cell size.
    pub cell_size: f32,
    /// `--decomposition`
    pub decomposition: Decomposition,
    /// narrow-band radius multiplier `c` in `r = c * s` (§4.3.1); fixed at
    /// 1.5 in the spec, exposed here so tests can shrink it.
    pub band_multiplier: f32,
    /// pad the bounding box by one cell on each side when requested.
    pub extrude: bool,
    /// PMC snapping tolerance as a multiple of cell size (1e-3 in spec).
    pub pmc_snap_tolerance: f32,
    /// SF cosine threshold for emitting a feature vertex (`sft`, default 0.9).
    pub sf_feature_cosine: f32,
}

impl Default for VoxelConfig {
    fn default() -> Self {
        Self {
            cell_size: 0.1,
            decomposition: Decomposition::default(),
            band_multiplier: 1.5,
            extrude: false,
            pmc_snap_tolerance: 1e-3,
            sf_feature_cosine: 0.9,
        }
    }
}

/// The §4.5.2 threshold table, one field per row, plus the boolean stage
/// toggles of §6.3 (`--optimize-planes`, `--retesselate`).
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// `--rda`, minimum connected-component size to keep (dangling
    /// artifact removal). Default 0 (disabled).
    pub dangling_artifacts: usize,
    /// `--clean-contours`, number of contour-cleaning passes. Default 0.
    pub clean_contour_iterations: usize,
    /// `--fill-holes`, maximum boundary loop length to fill. Default 30.
    pub fill_holes: usize,
    /// `--optimize-planes`
    pub planar_cluster_growing: bool,
    /// cosine threshold for joining a face to a cluster. Default 0.85.
    pub normal_threshold: f32,
    /// minimum inlier count for the RANSAC cluster variant. Default 7.
    pub min_plane_size: usize,
    /// use the RANSAC cluster-growing variant instead of greedy BFS.
    pub use_ransac_clustering: bool,
    /// minimum cluster face count to keep. Default 10.
    pub small_region_threshold: usize,
    /// `--retesselate`
    pub retesselate: bool,
    /// collinear-edge fusion angle, radians. Default 0.01.
    pub line_fusion_threshold: f32,
    /// `--reduction-ratio`, target fraction of faces to remove, `[0, 1]`.
    pub reduction_ratio: f32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            dangling_artifacts: 0,
            clean_contour_iterations: 0,
            fill_holes: 30,
            planar_cluster_growing: false,
            normal_threshold: 0.85,
            min_plane_size: 7,
            use_ransac_clustering: false,
            small_region_threshold: 10,
            retesselate: false,
            line_fusion_threshold: 0.01,
            reduction_ratio: 0.0,
        }
    }
}

/// `--generate-textures`, `--texel-size`.
#[derive(Debug, Clone)]
pub struct TexturizerConfig {
    pub enabled: bool,
    pub texel_size: f32,
    pub min_cluster_size: usize,
    pub max_cluster_size: usize,
    /// when true, a texel's color is the mean of all points projecting
    /// into it; when false, the nearest point's color (§4.6).
    pub average_texels: bool,
}

impl Default for TexturizerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            texel_size: 0.01,
            min_cluster_size: 100,
            max_cluster_size: 2_000_000,
            average_texels: false,
        }
    }
}

/// Top-level configuration threaded through `pipeline::reconstruct`.
#[derive(Debug, Clone)]
pub struct ReconstructionConfig {
    pub surface: SurfaceConfig,
    pub voxel: VoxelConfig,
    pub optimizer: OptimizerConfig,
    pub texturizer: TexturizerConfig,
    /// `--threads`, `None` uses rayon's default global parallelism.
    pub threads: Option<usize>,
    /// `max_leaf_size` for the spatial index (default 20, §4.1).
    pub max_leaf_size: usize,
    /// gates the stage-timing/diagnostic `println!`s that mirror the
    /// teacher crate's own verbose mode.
    pub verbose: bool,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            surface: SurfaceConfig::default(),
            voxel: VoxelConfig::default(),
            optimizer: OptimizerConfig::default(),
            texturizer: TexturizerConfig::default(),
            threads: None,
            max_leaf_size: 20,
            verbose: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_threshold_table() {
        let cfg = OptimizerConfig::default();
        assert_eq!(cfg.normal_threshold, 0.85);
        assert_eq!(cfg.min_plane_size, 7);
        assert_eq!(cfg.small_region_threshold, 10);
        assert_eq!(cfg.fill_holes, 30);
        assert_eq!(cfg.line_fusion_threshold, 0.01);
        assert_eq!(cfg.clean_contour_iterations, 0);
        assert_eq!(cfg.dangling_artifacts, 0);
    }

    #[test]
    fn default_max_leaf_size_is_20() {
        assert_eq!(ReconstructionConfig::default().max_leaf_size, 20);
    }
}
