// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! The error taxonomy shared by every stage of the reconstruction pipeline.
//!
//! Propagation policy (see each variant's doc comment for the detail):
//! `InsufficientSupport` and `Numeric` are locally recoverable — the caller
//! marks the offending entity and keeps going. `TopologyException` and
//! `AllocationFailed` abort the current stage. `InvalidArgument` always
//! aborts.

use std::fmt;

/// The largest index value any handle-sized quantity in this crate is
/// allowed to reach before an operation reports `AllocationFailed`.
pub const MAX_INDEX: u32 = u32::MAX - 1;

#[derive(thiserror::Error, Debug)]
pub enum ReconstructError {
    /// Caller-supplied parameter outside its domain, e.g. `k = 0` to a k-NN
    /// query, or NaN coordinates. Always aborts the calling stage.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Not enough neighbors were available to estimate a normal or fit a
    /// plane. Locally recoverable: the offending point may be dropped or
    /// given a degenerate fallback normal by the caller.
    #[error("Insufficient neighborhood support: {0}")]
    InsufficientSupport(String),

    /// A half-edge mesh edit would violate manifoldness or face
    /// orientation, or a circulator detected a cycle that revisited its
    /// start without hitting the loop-detector bound. Aborts the stage.
    #[error("Topology exception: {0}")]
    TopologyException(String),

    /// A handle or property-array index would exceed `MAX_INDEX`. Aborts
    /// the stage.
    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    /// Degenerate geometry detected by an optimizer (zero-area face,
    /// coincident vertices in a hole loop). Locally recoverable.
    #[error("Numeric degeneracy: {0}")]
    Numeric(String),

    /// Propagated verbatim from an external collaborator (file I/O layer).
    /// The core never originates this variant itself.
    #[error("I/O error: {0}")]
    IoError(String),
}

/// The stage a non-fatal error was raised in, for driver-level reporting
/// (see §7 "User-visible behavior": the driver logs stage, entity index and
/// kind, then still emits the partial mesh).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SpatialIndex,
    PointSetSurface,
    VoxelGrid,
    HalfEdgeMesh,
    MeshOptimizer,
    Texturizer,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::SpatialIndex => "spatial_index",
            Stage::PointSetSurface => "point_set_surface",
            Stage::VoxelGrid => "voxel_grid",
            Stage::HalfEdgeMesh => "half_edge_mesh",
            Stage::MeshOptimizer => "mesh_optimizer",
            Stage::Texturizer => "texturizer",
        };
        write!(f, "{name}")
    }
}

/// A non-fatal diagnostic raised by a recoverable error: which entity, in
/// which stage, failed with which kind, and why. The driver collects these
/// instead of aborting for `InsufficientSupport`/`Numeric` failures.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub stage: Stage,
    pub entity_index: u64,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] entity {}: {}",
            self.stage, self.entity_index, self.message
        )
    }
}

pub type Result<T> = std::result::Result<T, ReconstructError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_stage_and_entity() {
        let d = Diagnostic {
            stage: Stage::PointSetSurface,
            entity_index: 42,
            message: "fewer than 3 neighbors".to_string(),
        };
        let s = d.to_string();
        assert!(s.contains("point_set_surface"));
        assert!(s.contains("42"));
    }
}
