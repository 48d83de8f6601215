//! Pinhole camera intrinsics.

use nalgebra::{Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics, fixed for the lifetime of a session.
///
/// Distortion is assumed to be removed upstream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraModel {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Build from a 3x3 K matrix, ignoring skew.
    pub fn from_k(k: &Matrix3<f64>) -> Self {
        Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)])
    }

    #[rustfmt::skip]
    pub fn k(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx,
            0.0, self.fy, self.cy,
            0.0, 0.0, 1.0,
        )
    }

    /// Mean focal length, used to convert pixel thresholds to normalized units.
    pub fn mean_focal(&self) -> f64 {
        0.5 * (self.fx + self.fy)
    }

    /// Pixel -> normalized image plane (z = 1).
    pub fn unproject(&self, p: &Point2<f64>) -> Point2<f64> {
        Point2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }

    /// Camera-frame point -> pixel. `None` for points at or behind the camera.
    pub fn project(&self, p: &Vector3<f64>) -> Option<Point2<f64>> {
        if p.z <= 0.0 {
            return None;
        }
        Some(Point2::new(
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        ))
    }

    pub fn is_valid(&self) -> bool {
        self.fx.is_finite()
            && self.fy.is_finite()
            && self.cx.is_finite()
            && self.cy.is_finite()
            && self.fx > 0.0
            && self.fy > 0.0
    }
}

impl Default for CameraModel {
    /// 640x480 webcam with a 700 px focal length.
    fn default() -> Self {
        Self::new(700.0, 700.0, 320.0, 240.0)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_project_unproject() {
        let cam = CameraModel::new(500.0, 510.0, 320.0, 240.0);
        let p = Vector3::new(0.4, -0.2, 2.0);
        let px = cam.project(&p).unwrap();
        let n = cam.unproject(&px);
        assert_relative_eq!(n.x, 0.2, epsilon = 1e-12);
        assert_relative_eq!(n.y, -0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_behind_camera_does_not_project() {
        let cam = CameraModel::default();
        assert!(cam.project(&Vector3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn test_k_round_trip() {
        let cam = CameraModel::new(700.0, 690.0, 321.0, 239.5);
        assert_eq!(CameraModel::from_k(&cam.k()), cam);
    }
}
