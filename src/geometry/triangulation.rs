//! Two-view linear triangulation.
//!
//! The reference camera sits at the origin (`P1 = K[I|0]`) and the current
//! camera at the relative pose returned by the epipolar solver
//! (`P2 = K[R|t]`, with `x_cur = R * x_ref + t`).

use nalgebra::{Matrix3, Matrix3x4, Matrix4, Point2, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geometry::SE3;
use crate::tracking::frame::CameraModel;

/// Homogeneous coordinates this close to zero are treated as points at infinity.
const MIN_HOMOGENEOUS_W: f64 = 1e-12;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriangulationConfig {
    /// Points at or beyond this depth (reference camera) are dropped.
    pub max_range: f64,
}

impl Default for TriangulationConfig {
    fn default() -> Self {
        Self { max_range: 50.0 }
    }
}

/// A point in the reference camera frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangulatedPoint {
    pub position: Vector3<f64>,
    /// Index into the input pair list the point was built from.
    pub correspondence: usize,
}

pub trait Triangulator {
    /// Triangulate pixel pairs `(reference[i], current[i])`.
    ///
    /// Returns only points passing the depth filter; never fails.
    fn triangulate(
        &self,
        camera: &CameraModel,
        relative: &SE3,
        reference: &[Point2<f64>],
        current: &[Point2<f64>],
    ) -> Vec<TriangulatedPoint>;
}

pub struct DltTriangulator {
    config: TriangulationConfig,
}

impl DltTriangulator {
    pub fn new(config: TriangulationConfig) -> Self {
        Self { config }
    }
}

impl Default for DltTriangulator {
    fn default() -> Self {
        Self::new(TriangulationConfig::default())
    }
}

impl Triangulator for DltTriangulator {
    fn triangulate(
        &self,
        camera: &CameraModel,
        relative: &SE3,
        reference: &[Point2<f64>],
        current: &[Point2<f64>],
    ) -> Vec<TriangulatedPoint> {
        let k = camera.k();
        let p1 = projection_matrix(&k, &Matrix3::identity(), &Vector3::zeros());
        let p2 = projection_matrix(&k, &relative.rotation_matrix(), &relative.translation);

        let points: Vec<TriangulatedPoint> = reference
            .iter()
            .zip(current)
            .enumerate()
            .filter_map(|(i, (x1, x2))| {
                let position = triangulate_dlt(&p1, &p2, x1, x2)?;
                let depth = position.z;
                let valid = position.iter().all(|v| v.is_finite())
                    && depth > 0.0
                    && depth < self.config.max_range;
                valid.then_some(TriangulatedPoint {
                    position,
                    correspondence: i,
                })
            })
            .collect();

        debug!(
            input = reference.len().min(current.len()),
            kept = points.len(),
            "triangulated"
        );
        points
    }
}

/// `K [R | t]`.
pub fn projection_matrix(k: &Matrix3<f64>, r: &Matrix3<f64>, t: &Vector3<f64>) -> Matrix3x4<f64> {
    let mut rt = Matrix3x4::zeros();
    rt.fixed_view_mut::<3, 3>(0, 0).copy_from(r);
    rt.set_column(3, t);
    k * rt
}

/// Linear triangulation of one correspondence.
///
/// Each view contributes `x * P[2] - P[0]` and `y * P[2] - P[1]`; the point
/// is the right singular vector of the smallest singular value. Returns `None`
/// for points at infinity or when the SVD fails.
pub fn triangulate_dlt(
    p1: &Matrix3x4<f64>,
    p2: &Matrix3x4<f64>,
    x1: &Point2<f64>,
    x2: &Point2<f64>,
) -> Option<Vector3<f64>> {
    let mut a = Matrix4::<f64>::zeros();
    for j in 0..4 {
        a[(0, j)] = x1.x * p1[(2, j)] - p1[(0, j)];
        a[(1, j)] = x1.y * p1[(2, j)] - p1[(1, j)];
        a[(2, j)] = x2.x * p2[(2, j)] - p2[(0, j)];
        a[(3, j)] = x2.y * p2[(2, j)] - p2[(1, j)];
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let h = v_t.row(min_idx);

    if h[3].abs() < MIN_HOMOGENEOUS_W {
        return None;
    }
    Some(Vector3::new(h[0] / h[3], h[1] / h[3], h[2] / h[3]))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    use super::*;

    fn setup() -> (CameraModel, SE3) {
        let camera = CameraModel::new(500.0, 500.0, 320.0, 240.0);
        let relative = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.01, -0.05, 0.02),
            translation: Vector3::new(-0.5, 0.02, 0.01),
        };
        (camera, relative)
    }

    fn observe(camera: &CameraModel, relative: &SE3, p: &Vector3<f64>) -> (Point2<f64>, Point2<f64>) {
        let x1 = camera.project(p).unwrap();
        let x2 = camera.project(&relative.transform_point(p)).unwrap();
        (x1, x2)
    }

    #[test]
    fn test_recovers_points() {
        let (camera, relative) = setup();
        let truth = [
            Vector3::new(0.5, -0.3, 4.0),
            Vector3::new(-1.0, 0.2, 6.0),
            Vector3::new(0.1, 0.7, 9.0),
        ];
        let (reference, current): (Vec<_>, Vec<_>) =
            truth.iter().map(|p| observe(&camera, &relative, p)).unzip();

        let points = DltTriangulator::default().triangulate(&camera, &relative, &reference, &current);
        assert_eq!(points.len(), 3);
        for (pt, expected) in points.iter().zip(&truth) {
            assert_relative_eq!(pt.position, *expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_depth_filter_keeps_correspondence_index() {
        let (camera, relative) = setup();
        let far = Vector3::new(0.0, 0.0, 80.0);
        let near = Vector3::new(0.2, 0.1, 5.0);
        let (f1, f2) = observe(&camera, &relative, &far);
        let (n1, n2) = observe(&camera, &relative, &near);

        let points =
            DltTriangulator::default().triangulate(&camera, &relative, &[f1, n1], &[f2, n2]);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].correspondence, 1);
        assert!(points[0].position.z > 0.0 && points[0].position.z < 50.0);
    }

    #[test]
    fn test_point_behind_camera_rejected() {
        let (camera, relative) = setup();
        // Pinhole projection without the z > 0 guard.
        let pixel = |p: &Vector3<f64>| {
            Point2::new(
                camera.fx * p.x / p.z + camera.cx,
                camera.fy * p.y / p.z + camera.cy,
            )
        };
        let behind = Vector3::new(0.5, 0.1, -5.0);
        let x1 = pixel(&behind);
        let x2 = pixel(&relative.transform_point(&behind));

        let points = DltTriangulator::default().triangulate(&camera, &relative, &[x1], &[x2]);
        assert!(points.is_empty());
    }
}
