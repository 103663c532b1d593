#![deny(
    rust_2018_compatibility,
    rust_2018_idioms,
    nonstandard_style,
    future_incompatible,
    non_camel_case_types,
    unused_parens,
    non_upper_case_globals,
    bare_trait_objects,
    ellipsis_inclusive_range_patterns,
    elided_lifetimes_in_paths
)]
#![warn(clippy::explicit_into_iter_loop)]

//! Point-cloud-to-mesh reconstruction core: a balanced k-d tree spatial
//! index, an oriented point-set surface, a sparse signed-distance voxel
//! grid with four interchangeable iso-extraction decompositions, a
//! half-edge mesh with a property store, and a post-processing optimizer
//! and per-cluster texturizer. See `pipeline::reconstruct` for the driver
//! that wires every stage together; each stage is also usable on its own.
//!
//! This crate has no file-format, rendering or FFI layer: it exposes and
//! consumes the flat buffer contracts in [`buffers`] and lets an external
//! loader/writer own everything outside that boundary.

pub mod buffers;
pub mod config;
pub mod error;
pub mod half_edge_mesh;
pub mod mesh_optimizer;
pub mod pipeline;
pub mod point_set_surface;
pub mod progress;
pub mod spatial_index;
pub mod texturizer;
pub mod voxel_grid;

pub use error::{ReconstructError, Result};

pub mod prelude {
    pub use crate::buffers::{Material, MeshBuffer, PointBuffer, SpectralChannels, Texture, Transform};
    pub use crate::config::{Decomposition, OrientationReference, ReconstructionConfig};
    pub use crate::error::{Diagnostic, ReconstructError, Result, Stage};
    pub use crate::pipeline::{reconstruct, PipelineOutput};
}
