// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

use super::*;
use crate::config::SurfaceConfig;
use crate::spatial_index::SpatialIndex;

fn plane_points() -> Vec<Vec3A> {
    let mut pts = Vec::new();
    for x in -3..=3 {
        for y in -3..=3 {
            pts.push(Vec3A::new(x as f32, y as f32, 0.0));
        }
    }
    pts
}

#[test]
fn estimate_normals_recovers_plane_orientation_up_to_sign() {
    let pts = plane_points();
    let index = SpatialIndex::build(&pts, 20).unwrap();
    let config = SurfaceConfig {
        kn: 8,
        ..SurfaceConfig::default()
    };
    let surface = PointSetSurface::estimate_normals(&pts, index, &config).unwrap();
    for n in surface.normals() {
        assert!(n.z.abs() > 0.9, "expected near-vertical normal, got {n:?}");
    }
}

#[test]
fn orient_normals_with_flip_point_satisfies_the_sign_invariant() {
    let pts = plane_points();
    let index = SpatialIndex::build(&pts, 20).unwrap();
    let config = SurfaceConfig {
        kn: 8,
        ..SurfaceConfig::default()
    };
    let mut surface = PointSetSurface::estimate_normals(&pts, index, &config).unwrap();
    let flip = Vec3A::new(0.0, 0.0, 10.0);
    surface
        .orient_normals(&OrientationReference::FlipPoint(flip))
        .unwrap();
    for (&p, &n) in surface.points().iter().zip(surface.normals()) {
        assert!(n.dot(flip - p) >= -1e-5);
    }
}

#[test]
fn orient_normals_rejects_empty_scan_poses() {
    let pts = plane_points();
    let index = SpatialIndex::build(&pts, 20).unwrap();
    let mut surface =
        PointSetSurface::estimate_normals(&pts, index, &SurfaceConfig::default()).unwrap();
    let err = surface.orient_normals(&OrientationReference::ScanPoses(vec![]));
    assert!(err.is_err());
}

#[test]
fn interpolate_normals_is_idempotent_on_a_flat_plane() {
    let pts = plane_points();
    let index = SpatialIndex::build(&pts, 20).unwrap();
    let mut surface =
        PointSetSurface::estimate_normals(&pts, index, &SurfaceConfig::default()).unwrap();
    surface
        .orient_normals(&OrientationReference::FlipPoint(Vec3A::new(0.0, 0.0, 10.0)))
        .unwrap();
    surface.interpolate_normals(5).unwrap();
    let before: Vec<Vec3A> = surface.normals().to_vec();
    surface.interpolate_normals(5).unwrap();
    for (a, b) in before.iter().zip(surface.normals()) {
        let cos = a.dot(*b).clamp(-1.0, 1.0);
        assert!(cos.acos() < 1e-3, "normal drifted by more than 1e-3 rad");
    }
}

#[test]
fn interpolate_normals_rejects_ki_zero() {
    let pts = plane_points();
    let index = SpatialIndex::build(&pts, 20).unwrap();
    let mut surface =
        PointSetSurface::estimate_normals(&pts, index, &SurfaceConfig::default()).unwrap();
    assert!(surface.interpolate_normals(0).is_err());
}

#[test]
fn distance_is_near_zero_on_the_plane_and_signed_off_it() {
    let pts = plane_points();
    let index = SpatialIndex::build(&pts, 20).unwrap();
    let config = SurfaceConfig {
        kn: 8,
        ..SurfaceConfig::default()
    };
    let mut surface = PointSetSurface::estimate_normals(&pts, index, &config).unwrap();
    surface
        .orient_normals(&OrientationReference::FlipPoint(Vec3A::new(0.0, 0.0, 10.0)))
        .unwrap();

    let (d_on, _) = surface.distance(Vec3A::new(0.0, 0.0, 0.0), 5).unwrap();
    assert!(d_on.abs() < 0.25);

    let (d_above, _) = surface.distance(Vec3A::new(0.0, 0.0, 2.0), 5).unwrap();
    assert!(d_above > 1.0);
}

#[test]
fn distance_rejects_kd_zero() {
    let pts = plane_points();
    let index = SpatialIndex::build(&pts, 20).unwrap();
    let surface =
        PointSetSurface::estimate_normals(&pts, index, &SurfaceConfig::default()).unwrap();
    assert!(surface.distance(Vec3A::ZERO, 0).is_err());
}

#[test]
fn estimate_normals_rejects_an_empty_cloud() {
    let pts: Vec<Vec3A> = Vec::new();
    let index = SpatialIndex::build(&pts, 20).unwrap();
    let err = PointSetSurface::estimate_normals(&pts, index, &SurfaceConfig::default());
    assert!(err.is_err());
}

#[test]
fn degenerate_two_point_neighborhood_still_yields_a_unit_normal() {
    let pts = vec![Vec3A::new(0.0, 0.0, 0.0), Vec3A::new(1.0, 0.0, 0.0)];
    let index = SpatialIndex::build(&pts, 20).unwrap();
    let config = SurfaceConfig {
        kn: 1,
        ..SurfaceConfig::default()
    };
    let surface = PointSetSurface::estimate_normals(&pts, index, &config).unwrap();
    for n in surface.normals() {
        assert!((n.length() - 1.0).abs() < 1e-5);
    }
}
