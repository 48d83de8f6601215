//! Two-view relative pose from the essential matrix.
//!
//! RANSAC over 8-point minimal samples in normalized camera coordinates,
//! Sampson-distance inlier test, refinement on the consensus set, then
//! decomposition into `(R, t)` with the cheirality check picking one of the
//! four candidates. The returned pose maps reference-camera points into the
//! current camera: `x_cur = R * x_ref + t`, with `|t| = 1`.

use nalgebra::{Matrix3, Matrix3x4, Point2, SMatrix, Vector3};
use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SlamError};
use crate::geometry::triangulation::triangulate_dlt;
use crate::geometry::SE3;
use crate::tracking::frame::CameraModel;

const SAMPLE_SIZE: usize = 8;
/// Raw estimates with `s2 / s1` below this are rank-one and rejected.
const MIN_SINGULAR_RATIO: f64 = 1e-6;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EpipolarConfig {
    /// Fewer correspondences than this fail with `InsufficientMatches`.
    pub min_matches: usize,
    /// Sampson distance threshold in pixels.
    pub threshold_px: f64,
    /// Desired probability of drawing at least one all-inlier sample.
    pub confidence: f64,
    pub max_iterations: usize,
    /// Minimum consensus size, also applied after the cheirality check.
    pub min_inliers: usize,
    /// Median inlier displacement (pixels) below which the motion is
    /// considered parallax-free.
    pub min_parallax_px: f64,
    pub seed: u64,
}

impl Default for EpipolarConfig {
    fn default() -> Self {
        Self {
            min_matches: 15,
            threshold_px: 1.0,
            confidence: 0.999,
            max_iterations: 1000,
            min_inliers: 10,
            min_parallax_px: 1.0,
            seed: 42,
        }
    }
}

/// Successful two-view estimate.
#[derive(Debug, Clone)]
pub struct TwoViewGeometry {
    /// Current camera from reference camera, unit-norm translation.
    pub relative: SE3,
    pub essential: Matrix3<f64>,
    /// Per input pair: consensus member and in front of both cameras.
    pub inlier_mask: Vec<bool>,
    pub num_inliers: usize,
}

pub trait EpipolarSolver {
    /// Estimate the relative pose from pixel pairs `(reference[i], current[i])`.
    fn estimate(
        &self,
        camera: &CameraModel,
        reference: &[Point2<f64>],
        current: &[Point2<f64>],
    ) -> Result<TwoViewGeometry>;
}

pub struct RansacEssentialSolver {
    config: EpipolarConfig,
}

impl RansacEssentialSolver {
    pub fn new(config: EpipolarConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EpipolarConfig {
        &self.config
    }
}

impl Default for RansacEssentialSolver {
    fn default() -> Self {
        Self::new(EpipolarConfig::default())
    }
}

impl EpipolarSolver for RansacEssentialSolver {
    fn estimate(
        &self,
        camera: &CameraModel,
        reference: &[Point2<f64>],
        current: &[Point2<f64>],
    ) -> Result<TwoViewGeometry> {
        let cfg = &self.config;
        let n = reference.len().min(current.len());
        let required = cfg.min_matches.max(SAMPLE_SIZE);
        if n < required {
            return Err(SlamError::InsufficientMatches { found: n, required });
        }

        let n1: Vec<Point2<f64>> = reference[..n].iter().map(|p| camera.unproject(p)).collect();
        let n2: Vec<Point2<f64>> = current[..n].iter().map(|p| camera.unproject(p)).collect();

        let thresh = cfg.threshold_px / camera.mean_focal();
        let thresh2 = thresh * thresh;

        let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
        let mut best: Option<(Matrix3<f64>, Vec<bool>, usize)> = None;
        let mut iterations = cfg.max_iterations;
        let mut iter = 0;

        while iter < iterations {
            iter += 1;
            let sample = index::sample(&mut rng, n, SAMPLE_SIZE);
            let s1: Vec<Point2<f64>> = sample.iter().map(|i| n1[i]).collect();
            let s2: Vec<Point2<f64>> = sample.iter().map(|i| n2[i]).collect();

            let Some(e) = eight_point(&s1, &s2) else {
                continue;
            };
            let (mask, count) = score(&e, &n1, &n2, thresh2);
            if best.as_ref().map_or(true, |b| count > b.2) {
                let ratio = count as f64 / n as f64;
                iterations = adaptive_iterations(ratio, cfg.confidence, cfg.max_iterations);
                best = Some((e, mask, count));
            }
        }

        let (mut essential, mut mask, mut count) = best.ok_or_else(|| {
            SlamError::DegenerateGeometry("no valid minimal sample".to_string())
        })?;

        if count >= SAMPLE_SIZE {
            let (in1, in2) = select(&n1, &n2, &mask);
            if let Some(refined) = eight_point(&in1, &in2) {
                let (refined_mask, refined_count) = score(&refined, &n1, &n2, thresh2);
                if refined_count >= count {
                    essential = refined;
                    mask = refined_mask;
                    count = refined_count;
                }
            }
        }
        debug!(iterations = iter, inliers = count, total = n, "essential ransac");

        if count < cfg.min_inliers {
            return Err(SlamError::DegenerateGeometry(format!(
                "{count} inliers, need {}",
                cfg.min_inliers
            )));
        }

        let parallax = median_displacement(&reference[..n], &current[..n], &mask);
        if parallax < cfg.min_parallax_px {
            return Err(SlamError::DegenerateGeometry(format!(
                "median parallax {parallax:.3} px"
            )));
        }

        let (rotation, translation, front) = decompose(&essential, &n1, &n2, &mask)
            .ok_or_else(|| SlamError::DegenerateGeometry("singular essential matrix".to_string()))?;

        let inlier_mask: Vec<bool> = mask.iter().zip(&front).map(|(&m, &f)| m && f).collect();
        let num_inliers = inlier_mask.iter().filter(|&&m| m).count();
        if num_inliers < cfg.min_inliers {
            return Err(SlamError::DegenerateGeometry(format!(
                "{num_inliers} points pass cheirality"
            )));
        }

        Ok(TwoViewGeometry {
            relative: SE3::from_rt(rotation, translation),
            essential,
            inlier_mask,
            num_inliers,
        })
    }
}

/// Number of RANSAC iterations for the observed inlier ratio.
fn adaptive_iterations(inlier_ratio: f64, confidence: f64, max_iterations: usize) -> usize {
    let p_good = inlier_ratio.powi(SAMPLE_SIZE as i32);
    if p_good <= f64::EPSILON {
        return max_iterations;
    }
    if p_good >= 1.0 - f64::EPSILON {
        return 1;
    }
    let k = (1.0 - confidence).ln() / (1.0 - p_good).ln();
    if !k.is_finite() {
        return max_iterations;
    }
    (k.ceil() as usize).clamp(1, max_iterations)
}

/// Linear 8-point estimate followed by projection onto the essential
/// manifold (singular values `(1, 1, 0)`).
///
/// The null vector is taken from the eigen-decomposition of `AᵀA`, which is
/// well defined for any number of rows.
fn eight_point(x1: &[Point2<f64>], x2: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    if x1.len() < SAMPLE_SIZE {
        return None;
    }

    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (p1, p2) in x1.iter().zip(x2) {
        let row = SMatrix::<f64, 9, 1>::from_column_slice(&[
            p2.x * p1.x,
            p2.x * p1.y,
            p2.x,
            p2.y * p1.x,
            p2.y * p1.y,
            p2.y,
            p1.x,
            p1.y,
            1.0,
        ]);
        ata += row * row.transpose();
    }

    let eigen = ata.symmetric_eigen();
    let (min_idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let e = eigen.eigenvectors.column(min_idx);
    #[rustfmt::skip]
    let raw = Matrix3::new(
        e[0], e[1], e[2],
        e[3], e[4], e[5],
        e[6], e[7], e[8],
    );

    let (u, s, v_t) = sorted_svd(&raw)?;
    if s[0] <= f64::EPSILON || s[1] / s[0] < MIN_SINGULAR_RATIO {
        return None;
    }
    let essential = u * Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, 0.0)) * v_t;
    essential.iter().all(|v| v.is_finite()).then_some(essential)
}

/// SVD with singular values in descending order.
fn sorted_svd(m: &Matrix3<f64>) -> Option<(Matrix3<f64>, Vector3<f64>, Matrix3<f64>)> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let s = svd.singular_values;

    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| s[b].total_cmp(&s[a]));

    let mut u_sorted = Matrix3::zeros();
    let mut v_t_sorted = Matrix3::zeros();
    let mut s_sorted = Vector3::zeros();
    for (dst, &src) in order.iter().enumerate() {
        u_sorted.set_column(dst, &u.column(src));
        v_t_sorted.set_row(dst, &v_t.row(src));
        s_sorted[dst] = s[src];
    }
    Some((u_sorted, s_sorted, v_t_sorted))
}

/// Squared Sampson distance of `x2ᵀ E x1 = 0`.
fn sampson_error(e: &Matrix3<f64>, p1: &Point2<f64>, p2: &Point2<f64>) -> f64 {
    let x1 = Vector3::new(p1.x, p1.y, 1.0);
    let x2 = Vector3::new(p2.x, p2.y, 1.0);
    let ex1 = e * x1;
    let etx2 = e.transpose() * x2;
    let residual = x2.dot(&ex1);
    let denom = ex1.x * ex1.x + ex1.y * ex1.y + etx2.x * etx2.x + etx2.y * etx2.y;
    if denom <= 1e-18 {
        f64::INFINITY
    } else {
        residual * residual / denom
    }
}

fn score(
    e: &Matrix3<f64>,
    n1: &[Point2<f64>],
    n2: &[Point2<f64>],
    thresh2: f64,
) -> (Vec<bool>, usize) {
    let mask: Vec<bool> = n1
        .iter()
        .zip(n2)
        .map(|(a, b)| sampson_error(e, a, b) <= thresh2)
        .collect();
    let count = mask.iter().filter(|&&m| m).count();
    (mask, count)
}

fn select(
    n1: &[Point2<f64>],
    n2: &[Point2<f64>],
    mask: &[bool],
) -> (Vec<Point2<f64>>, Vec<Point2<f64>>) {
    n1.iter()
        .zip(n2)
        .zip(mask)
        .filter(|(_, m)| **m)
        .map(|((a, b), _)| (*a, *b))
        .unzip()
}

/// Median pixel displacement over the masked pairs.
fn median_displacement(reference: &[Point2<f64>], current: &[Point2<f64>], mask: &[bool]) -> f64 {
    let mut d: Vec<f64> = reference
        .iter()
        .zip(current)
        .zip(mask)
        .filter(|(_, m)| **m)
        .map(|((a, b), _)| (b - a).norm())
        .collect();
    if d.is_empty() {
        return 0.0;
    }
    d.sort_by(|a, b| a.total_cmp(b));
    d[d.len() / 2]
}

/// Split E into the four `(R, ±t)` candidates and keep the one with the
/// most masked points in front of both cameras.
///
/// Returns the rotation, unit translation and the per-pair cheirality flags.
fn decompose(
    essential: &Matrix3<f64>,
    n1: &[Point2<f64>],
    n2: &[Point2<f64>],
    mask: &[bool],
) -> Option<(Matrix3<f64>, Vector3<f64>, Vec<bool>)> {
    let (mut u, s, mut v_t) = sorted_svd(essential)?;
    if s[0] <= f64::EPSILON || s[1] / s[0] < MIN_SINGULAR_RATIO {
        return None;
    }
    if u.determinant() < 0.0 {
        u = -u;
    }
    if v_t.determinant() < 0.0 {
        v_t = -v_t;
    }

    #[rustfmt::skip]
    let w = Matrix3::new(
        0.0, -1.0, 0.0,
        1.0, 0.0, 0.0,
        0.0, 0.0, 1.0,
    );
    let r1 = u * w * v_t;
    let r2 = u * w.transpose() * v_t;
    let t: Vector3<f64> = u.column(2).normalize();

    let mut p1 = Matrix3x4::zeros();
    p1.fixed_view_mut::<3, 3>(0, 0).copy_from(&Matrix3::identity());

    let mut best: Option<(Matrix3<f64>, Vector3<f64>, Vec<bool>, usize)> = None;
    for (r, t) in [(r1, t), (r1, -t), (r2, t), (r2, -t)] {
        let mut p2 = Matrix3x4::zeros();
        p2.fixed_view_mut::<3, 3>(0, 0).copy_from(&r);
        p2.set_column(3, &t);

        let front: Vec<bool> = n1
            .iter()
            .zip(n2)
            .zip(mask)
            .map(|((a, b), &m)| {
                m && triangulate_dlt(&p1, &p2, a, b).is_some_and(|x| {
                    let z2 = (r * x + t).z;
                    x.z > 0.0 && z2 > 0.0 && x.z.is_finite() && z2.is_finite()
                })
            })
            .collect();
        let count = front.iter().filter(|&&f| f).count();
        if best.as_ref().map_or(true, |b| count > b.3) {
            best = Some((r, t, front, count));
        }
    }

    best.map(|(r, t, front, _)| (r, t, front))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;
    use rand::Rng;

    use super::*;

    fn camera() -> CameraModel {
        CameraModel::new(500.0, 500.0, 320.0, 240.0)
    }

    fn motion() -> SE3 {
        SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.02, -0.04, 0.03),
            translation: Vector3::new(-0.3, 0.05, 0.02),
        }
    }

    /// Random points in front of both cameras, observed in pixels.
    fn scene(n: usize, seed: u64) -> (Vec<Point2<f64>>, Vec<Point2<f64>>) {
        let cam = camera();
        let relative = motion();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut reference = Vec::new();
        let mut current = Vec::new();
        while reference.len() < n {
            let p = Vector3::new(
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-1.5..1.5),
                rng.gen_range(4.0..10.0),
            );
            if let (Some(a), Some(b)) = (cam.project(&p), cam.project(&relative.transform_point(&p))) {
                reference.push(a);
                current.push(b);
            }
        }
        (reference, current)
    }

    #[test]
    fn test_too_few_matches() {
        let (reference, current) = scene(14, 1);
        let err = RansacEssentialSolver::default()
            .estimate(&camera(), &reference, &current)
            .unwrap_err();
        assert!(matches!(
            err,
            SlamError::InsufficientMatches {
                found: 14,
                required: 15
            }
        ));
    }

    #[test]
    fn test_recovers_motion_with_sixteen_points() {
        let (reference, current) = scene(16, 2);
        let geometry = RansacEssentialSolver::default()
            .estimate(&camera(), &reference, &current)
            .unwrap();

        let truth = motion();
        assert_eq!(geometry.num_inliers, 16);
        assert_relative_eq!(
            geometry.relative.rotation_matrix(),
            truth.rotation_matrix(),
            epsilon = 1e-5
        );
        assert_relative_eq!(
            geometry.relative.translation,
            truth.translation.normalize(),
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_rejects_outliers() {
        let (mut reference, mut current) = scene(60, 3);
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        for _ in 0..15 {
            reference.push(Point2::new(rng.gen_range(0.0..640.0), rng.gen_range(0.0..480.0)));
            current.push(Point2::new(rng.gen_range(0.0..640.0), rng.gen_range(0.0..480.0)));
        }

        let geometry = RansacEssentialSolver::default()
            .estimate(&camera(), &reference, &current)
            .unwrap();
        assert!(geometry.inlier_mask[..60].iter().all(|&m| m));
        assert!(geometry.num_inliers >= 60 && geometry.num_inliers < 75);
        assert_relative_eq!(
            geometry.relative.translation,
            motion().translation.normalize(),
            epsilon = 1e-2
        );
        assert!(geometry.relative.orthonormality_error() < 1e-9);
    }

    #[test]
    fn test_zero_parallax_is_degenerate() {
        let (reference, _) = scene(30, 4);
        let err = RansacEssentialSolver::default()
            .estimate(&camera(), &reference, &reference)
            .unwrap_err();
        assert!(matches!(err, SlamError::DegenerateGeometry(_)));
    }

    #[test]
    fn test_deterministic() {
        let (reference, current) = scene(40, 5);
        let solver = RansacEssentialSolver::default();
        let a = solver.estimate(&camera(), &reference, &current).unwrap();
        let b = solver.estimate(&camera(), &reference, &current).unwrap();
        assert_eq!(a.inlier_mask, b.inlier_mask);
        assert_eq!(a.essential, b.essential);
    }

    #[test]
    fn test_adaptive_iterations() {
        assert_eq!(adaptive_iterations(1.0, 0.999, 1000), 1);
        assert_eq!(adaptive_iterations(0.0, 0.999, 1000), 1000);
        let half = adaptive_iterations(0.5, 0.999, 100_000);
        assert!(half > 1000 && half < 2000);
    }
}
