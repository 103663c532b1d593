// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! Per-cell iso-extraction (§4.3.3): `Mc` is the textbook edge-table
//! algorithm against [`mc_table`]; `Pmc` is `Mc` with its edge vertices
//! snapped onto a per-cell best-fit plane when within tolerance; `Sf` is
//! `Mc` augmented with an interior feature vertex, fanned in, on cells
//! whose corner normals disagree past a cosine threshold; `Mt` decomposes
//! the cell into six tetrahedra (the Freudenthal/Kuhn triangulation lvr2's
//! `TetraederBox` also uses) and linearly interpolates each one's zero
//! crossing directly.
//!
//! Every vertex a cell proposes is keyed by [`VertexKey`] rather than by a
//! local index, so `mod::assemble` can recognize when two cells are
//! proposing the same shared-edge vertex.

use super::corner_table::{interpolate_edge, Corner, CornerHandle, CornerTable};
use super::{mc_table, CellId};
use crate::config::{Decomposition, VoxelConfig};
use crate::point_set_surface::{fit_plane_pca, PointSetSurface};
use crate::Result;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use vector_traits::glam::{Mat3A, Vec3A};

/// Identifies one candidate vertex across cells. `Edge` is shared by every
/// cell touching that lattice edge; `Feature` is private to the one cell
/// that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum VertexKey {
    Edge(CornerHandle, CornerHandle),
    Feature(CellId),
}

impl VertexKey {
    fn edge(a: CornerHandle, b: CornerHandle) -> Self {
        let (lo, hi) = CornerHandle::edge_key(a, b);
        VertexKey::Edge(lo, hi)
    }
}

/// One cell's proposed contribution to the final mesh: its triangles (as
/// vertex keys) and the position it computed for each key it touched.
pub(super) struct CellProposal {
    pub cell_id: CellId,
    pub triangles: Vec<[VertexKey; 3]>,
    pub positions: FxHashMap<VertexKey, Vec3A>,
}

pub(super) fn process_cell(
    cell_id: CellId,
    table: &CornerTable,
    surface: &PointSetSurface<'_>,
    kd: usize,
    config: &VoxelConfig,
) -> Result<Option<CellProposal>> {
    match config.decomposition {
        Decomposition::Mc => marching_cubes(cell_id, table, surface, kd, None),
        Decomposition::Pmc => {
            let tolerance = config.pmc_snap_tolerance * table.cell_size();
            marching_cubes(cell_id, table, surface, kd, Some(tolerance))
        }
        Decomposition::Sf => sharp_features(cell_id, table, surface, kd, config.sf_feature_cosine),
        Decomposition::Mt => marching_tetrahedra(cell_id, table, surface, kd),
    }
}

/// Fetches (or lazily computes) the 8 corners of `cell_id` in
/// [`mc_table::CORNER_OFFSET`] order.
pub(super) fn mc_corners(
    cell_id: CellId,
    table: &CornerTable,
    surface: &PointSetSurface<'_>,
    kd: usize,
) -> Result<[(CornerHandle, Corner); 8]> {
    let mut corners = [(CornerHandle::default(), Corner::default()); 8];
    for (i, &(dx, dy, dz)) in mc_table::CORNER_OFFSET.iter().enumerate() {
        let key = (cell_id.0 + dx, cell_id.1 + dy, cell_id.2 + dz);
        let handle = table.get_or_insert(key, surface, kd)?;
        corners[i] = (handle, table.get(handle));
    }
    Ok(corners)
}

fn cube_index(corners: &[(CornerHandle, Corner); 8]) -> u8 {
    let mut index = 0u8;
    for (i, &(_, corner)) in corners.iter().enumerate() {
        if corner.distance <= 0.0 {
            index |= 1 << i;
        }
    }
    index
}

/// Builds every edge-vertex this cell's MC case needs, un-snapped.
fn mc_triangles(
    corners: &[(CornerHandle, Corner); 8],
) -> Option<(Vec<[VertexKey; 3]>, FxHashMap<VertexKey, Vec3A>)> {
    let index = cube_index(corners);
    if index == 0 || index == 0xFF {
        return None;
    }
    let row = mc_table::TRI_TABLE[index as usize];
    let mut triangles = Vec::new();
    let mut positions = FxHashMap::default();
    for chunk in row.chunks_exact(3) {
        if chunk[0] < 0 {
            break;
        }
        let mut tri = [VertexKey::Feature(CellId(0, 0, 0)); 3];
        for (slot, &edge_idx) in chunk.iter().enumerate() {
            let (a, b) = mc_table::EDGES[edge_idx as usize];
            let (ha, ca) = corners[a];
            let (hb, cb) = corners[b];
            let key = VertexKey::edge(ha, hb);
            positions.entry(key).or_insert_with(|| interpolate_edge(ca, cb));
            tri[slot] = key;
        }
        triangles.push(tri);
    }
    Some((triangles, positions))
}

/// MC, optionally followed by PMC's best-fit-plane snap (§4.3.3).
///
/// The plane is fit once per cell over all of the cell's own proposed
/// vertices (`fit_plane_pca`, shared with `PointSetSurface::estimate_normals`);
/// any vertex within `snap_tolerance` of that plane is projected onto it.
/// A shared edge vertex two neighboring cells disagree about is resolved
/// later, by `mod::assemble`, in favor of the smaller `CellId`.
pub(super) fn marching_cubes(
    cell_id: CellId,
    table: &CornerTable,
    surface: &PointSetSurface<'_>,
    kd: usize,
    snap_tolerance: Option<f32>,
) -> Result<Option<CellProposal>> {
    let corners = mc_corners(cell_id, table, surface, kd)?;
    let Some((triangles, mut positions)) = mc_triangles(&corners) else {
        return Ok(None);
    };

    if let Some(tolerance) = snap_tolerance {
        if tolerance > 0.0 && positions.len() >= 3 {
            let raw: Vec<Vec3A> = positions.values().copied().collect();
            let centroid = raw.iter().copied().sum::<Vec3A>() / raw.len() as f32;
            let plane = fit_plane_pca(centroid, &raw);
            for position in positions.values_mut() {
                let d = plane.normal.dot(*position - plane.centroid);
                if d.abs() <= tolerance {
                    *position -= plane.normal * d;
                }
            }
        }
    }

    Ok(Some(CellProposal {
        cell_id,
        triangles,
        positions,
    }))
}

/// Central-difference gradient of the signed-distance field at lattice
/// corner `key`, normalized. Used only by `Sf` to estimate per-corner
/// normals without re-running `PointSetSurface::estimate_normals`.
fn corner_normal(
    table: &CornerTable,
    surface: &PointSetSurface<'_>,
    kd: usize,
    key: (i32, i32, i32),
) -> Result<Vec3A> {
    let cell_size = table.cell_size();
    let sample = |offset: (i32, i32, i32)| -> Result<f32> {
        let k = (key.0 + offset.0, key.1 + offset.1, key.2 + offset.2);
        Ok(table.get(table.get_or_insert(k, surface, kd)?).distance)
    };
    let dx = (sample((1, 0, 0))? - sample((-1, 0, 0))?) / (2.0 * cell_size);
    let dy = (sample((0, 1, 0))? - sample((0, -1, 0))?) / (2.0 * cell_size);
    let dz = (sample((0, 0, 1))? - sample((0, 0, -1))?) / (2.0 * cell_size);
    let grad = Vec3A::new(dx, dy, dz);
    Ok(if grad.length_squared() > 1e-20 {
        grad.normalize()
    } else {
        Vec3A::Z
    })
}

/// MC, augmented with an interior feature vertex on cells whose active
/// corners' estimated normals disagree by more than `feature_cosine`
/// (§4.3.3 SF). The feature vertex is the least-squares point minimizing
/// the sum of squared distances to each crossing edge's tangent plane (a
/// QEF over the edge positions and their averaged corner normals); each of
/// the cell's base MC triangles is then replaced by three triangles
/// fanned from that feature vertex, per spec.
pub(super) fn sharp_features(
    cell_id: CellId,
    table: &CornerTable,
    surface: &PointSetSurface<'_>,
    kd: usize,
    feature_cosine: f32,
) -> Result<Option<CellProposal>> {
    let corners = mc_corners(cell_id, table, surface, kd)?;
    let Some((triangles, positions)) = mc_triangles(&corners) else {
        return Ok(None);
    };

    let index = cube_index(&corners);
    let row = mc_table::TRI_TABLE[index as usize];
    let mut active_corners: SmallVec<[usize; 8]> = SmallVec::new();
    for &edge_idx in row.iter() {
        if edge_idx < 0 {
            break;
        }
        let (a, b) = mc_table::EDGES[edge_idx as usize];
        if !active_corners.contains(&a) {
            active_corners.push(a);
        }
        if !active_corners.contains(&b) {
            active_corners.push(b);
        }
    }

    let mut normals: FxHashMap<usize, Vec3A> = FxHashMap::default();
    for &c in &active_corners {
        let (dx, dy, dz) = mc_table::CORNER_OFFSET[c];
        let key = (cell_id.0 + dx, cell_id.1 + dy, cell_id.2 + dz);
        normals.insert(c, corner_normal(table, surface, kd, key)?);
    }

    let mut min_dot = 1.0f32;
    for i in 0..active_corners.len() {
        for j in (i + 1)..active_corners.len() {
            let dot = normals[&active_corners[i]].dot(normals[&active_corners[j]]);
            min_dot = min_dot.min(dot);
        }
    }

    if active_corners.len() < 2 || min_dot >= feature_cosine {
        return Ok(Some(CellProposal {
            cell_id,
            triangles,
            positions,
        }));
    }

    // QEF: minimize sum_i (n_i . (x - p_i))^2 over edge crossing points p_i
    // with edge normal n_i (mean of its two endpoint corner normals).
    let mut ata = Mat3A::ZERO;
    let mut atb = Vec3A::ZERO;
    for chunk in row.chunks_exact(3) {
        if chunk[0] < 0 {
            break;
        }
        for &edge_idx in chunk {
            let (a, b) = mc_table::EDGES[edge_idx as usize];
            let (ha, ca) = corners[a];
            let (hb, cb) = corners[b];
            let key = VertexKey::edge(ha, hb);
            let Some(&p) = positions.get(&key) else { continue };
            let n = (normals[&a] + normals[&b]).normalize_or_zero();
            if n.length_squared() == 0.0 {
                continue;
            }
            ata += Mat3A::from_cols(n.x * n, n.y * n, n.z * n);
            atb += n * n.dot(p);
        }
    }
    let feature_position = if ata.determinant().abs() > 1e-9 {
        ata.inverse() * atb
    } else {
        let raw: Vec<Vec3A> = positions.values().copied().collect();
        raw.iter().copied().sum::<Vec3A>() / raw.len().max(1) as f32
    };

    let feature_key = VertexKey::Feature(cell_id);
    let mut fanned_triangles = Vec::with_capacity(triangles.len() * 3);
    for tri in &triangles {
        fanned_triangles.push([feature_key, tri[0], tri[1]]);
        fanned_triangles.push([feature_key, tri[1], tri[2]]);
        fanned_triangles.push([feature_key, tri[2], tri[0]]);
    }

    let mut positions = positions;
    positions.insert(feature_key, feature_position);

    Ok(Some(CellProposal {
        cell_id,
        triangles: fanned_triangles,
        positions,
    }))
}

/// Bit-encoded local corner ordering for `Mt`'s tetrahedra table: bit0=x,
/// bit1=y, bit2=z. Independent of `mc_table::CORNER_OFFSET`; self-contained
/// as long as it is used consistently within this function.
const TET_CORNER_OFFSET: [(i32, i32, i32); 8] = [
    (0, 0, 0),
    (1, 0, 0),
    (0, 1, 0),
    (1, 1, 0),
    (0, 0, 1),
    (1, 0, 1),
    (0, 1, 1),
    (1, 1, 1),
];

/// The Freudenthal/Kuhn six-tetrahedra cube decomposition, sharing the
/// `0..7` main diagonal. Translation-invariant (no checkerboard flip needed
/// between adjacent cells), so all cells use the same table.
const TETS: [[usize; 4]; 6] = [
    [0, 1, 3, 7],
    [0, 1, 5, 7],
    [0, 2, 3, 7],
    [0, 2, 6, 7],
    [0, 4, 5, 7],
    [0, 4, 6, 7],
];

fn marching_tetrahedra(
    cell_id: CellId,
    table: &CornerTable,
    surface: &PointSetSurface<'_>,
    kd: usize,
) -> Result<Option<CellProposal>> {
    let mut corners = [(CornerHandle::default(), Corner::default()); 8];
    for (i, &(dx, dy, dz)) in TET_CORNER_OFFSET.iter().enumerate() {
        let key = (cell_id.0 + dx, cell_id.1 + dy, cell_id.2 + dz);
        let handle = table.get_or_insert(key, surface, kd)?;
        corners[i] = (handle, table.get(handle));
    }

    let mut triangles = Vec::new();
    let mut positions = FxHashMap::default();
    for tet in TETS {
        let c = [
            corners[tet[0]],
            corners[tet[1]],
            corners[tet[2]],
            corners[tet[3]],
        ];
        for tri in tet_triangles(c) {
            for &key in &tri {
                positions.entry(key).or_insert_with(|| {
                    let (a, b) = match key {
                        VertexKey::Edge(a, b) => (a, b),
                        VertexKey::Feature(_) => unreachable!("Mt never emits Feature keys"),
                    };
                    interpolate_edge(table.get(a), table.get(b))
                });
            }
            triangles.push(tri);
        }
    }

    if triangles.is_empty() {
        Ok(None)
    } else {
        Ok(Some(CellProposal {
            cell_id,
            triangles,
            positions,
        }))
    }
}

/// Triangulates one tetrahedron's zero crossing as edge-vertex keys.
/// Corners with `distance <= 0.0` count as inside. Orientation is corrected
/// so the face normal points toward the outside (positive) side.
fn tet_triangles(c: [(CornerHandle, Corner); 4]) -> SmallVec<[[VertexKey; 3]; 2]> {
    let mut mask = 0u8;
    for (i, &(_, corner)) in c.iter().enumerate() {
        if corner.distance <= 0.0 {
            mask |= 1 << i;
        }
    }
    let mut out = SmallVec::new();
    let inside_count = mask.count_ones();
    if inside_count == 0 || inside_count == 4 {
        return out;
    }

    let position_of = |h: CornerHandle, corner: Corner| (h, corner);
    let edge_pos = |x: (CornerHandle, Corner), y: (CornerHandle, Corner)| -> (VertexKey, Vec3A) {
        (VertexKey::edge(x.0, y.0), interpolate_edge(x.1, y.1))
    };

    let orient = |tri: [(VertexKey, Vec3A); 3], outside_ref: Vec3A| -> [VertexKey; 3] {
        let n = (tri[1].1 - tri[0].1).cross(tri[2].1 - tri[0].1);
        if n.dot(outside_ref - tri[0].1) > 0.0 {
            [tri[0].0, tri[2].0, tri[1].0]
        } else {
            [tri[0].0, tri[1].0, tri[2].0]
        }
    };

    if inside_count == 1 || inside_count == 3 {
        let lone_sign = if inside_count == 1 { 1 } else { 0 };
        let Some(lone) = (0..4).find(|&i| ((mask >> i) & 1) == lone_sign) else {
            return out;
        };
        let others: SmallVec<[usize; 3]> = (0..4).filter(|&i| i != lone).collect();
        let lone_c = position_of(c[lone].0, c[lone].1);
        let e0 = edge_pos(lone_c, position_of(c[others[0]].0, c[others[0]].1));
        let e1 = edge_pos(lone_c, position_of(c[others[1]].0, c[others[1]].1));
        let e2 = edge_pos(lone_c, position_of(c[others[2]].0, c[others[2]].1));
        let outside_ref = if inside_count == 1 {
            c[others[0]].1.position
        } else {
            c[lone].1.position
        };
        out.push(orient([e0, e1, e2], outside_ref));
        return out;
    }

    let inside: SmallVec<[usize; 2]> = (0..4).filter(|&i| ((mask >> i) & 1) == 1).collect();
    let outside: SmallVec<[usize; 2]> = (0..4).filter(|&i| ((mask >> i) & 1) == 0).collect();
    let (i0, i1) = (inside[0], inside[1]);
    let (o0, o1) = (outside[0], outside[1]);
    let a = edge_pos(position_of(c[i0].0, c[i0].1), position_of(c[o0].0, c[o0].1));
    let b = edge_pos(position_of(c[i0].0, c[i0].1), position_of(c[o1].0, c[o1].1));
    let d = edge_pos(position_of(c[i1].0, c[i1].1), position_of(c[o0].0, c[o0].1));
    let e = edge_pos(position_of(c[i1].0, c[i1].1), position_of(c[o1].0, c[o1].1));
    let outside_ref = c[o0].1.position;
    out.push(orient([a, b, d], outside_ref));
    out.push(orient([b, e, d], outside_ref));
    out
}
