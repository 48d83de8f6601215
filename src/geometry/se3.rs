//! Rigid-body transform in 3D (SE(3)).
//!
//! Poses are stored as world-from-camera (T_wc): `p_world = R * p_cam + t`.
//! The rotation is kept as a unit quaternion so that composition cannot drift
//! far from SO(3); it is renormalized after every product anyway.

use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};

/// Below this `sqrt(R00² + R10²)` the Euler decomposition is in gimbal lock.
const GIMBAL_LOCK_THRESHOLD: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Build from a (possibly slightly non-orthonormal) rotation matrix.
    ///
    /// The matrix is projected onto SO(3) first, so noisy solver output is
    /// safe to pass in.
    pub fn from_rt(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rot = Rotation3::from_matrix_eps(&rotation, 1e-12, 100, Rotation3::identity());
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot),
            translation,
        }
    }

    /// Build from a 4x4 homogeneous matrix (only the top 3x4 block is used).
    pub fn from_matrix(m: Matrix4<f64>) -> Self {
        let r = m.fixed_view::<3, 3>(0, 0).into_owned();
        let t = m.fixed_view::<3, 1>(0, 3).into_owned();
        Self::from_rt(r, t)
    }

    /// Build from a w-first quaternion and a translation.
    pub fn from_quaternion(qw: f64, qx: f64, qy: f64, qz: f64, translation: Vector3<f64>) -> Self {
        let q = nalgebra::Quaternion::new(qw, qx, qy, qz);
        Self {
            rotation: UnitQuaternion::from_quaternion(q),
            translation,
        }
    }

    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            translation: -(rot_inv * self.translation),
            rotation: rot_inv,
        }
    }

    /// `self * other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &SE3) -> Self {
        let mut rotation = self.rotation * other.rotation;
        rotation.renormalize();
        Self {
            rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    /// Homogeneous 4x4 representation.
    pub fn to_matrix(&self) -> Matrix4<f64> {
        self.rotation.to_homogeneous().append_translation(&self.translation)
    }

    /// Roll, pitch, yaw in degrees (ZYX convention).
    ///
    /// When `sqrt(R00² + R10²)` vanishes the yaw is unobservable; it is set to
    /// zero and the roll absorbs the remaining rotation.
    pub fn euler_angles_deg(&self) -> (f64, f64, f64) {
        let r = self.rotation_matrix();
        let sy = (r[(0, 0)] * r[(0, 0)] + r[(1, 0)] * r[(1, 0)]).sqrt();

        let (roll, pitch, yaw) = if sy > GIMBAL_LOCK_THRESHOLD {
            (
                r[(2, 1)].atan2(r[(2, 2)]),
                (-r[(2, 0)]).atan2(sy),
                r[(1, 0)].atan2(r[(0, 0)]),
            )
        } else {
            ((-r[(1, 2)]).atan2(r[(1, 1)]), (-r[(2, 0)]).atan2(sy), 0.0)
        };

        (roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees())
    }

    /// Frobenius norm of `RᵀR - I`, a measure of how far R is from SO(3).
    pub fn orthonormality_error(&self) -> f64 {
        let r = self.rotation_matrix();
        (r.transpose() * r - Matrix3::identity()).norm()
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::FRAC_PI_2;

    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_compose_with_inverse_is_identity() {
        let pose = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.1, -0.2, 0.3),
            translation: Vector3::new(1.0, 2.0, 3.0),
        };
        let id = pose.compose(&pose.inverse());
        assert_relative_eq!(id.translation, Vector3::zeros(), epsilon = 1e-12);
        assert_relative_eq!(id.rotation_matrix(), Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_matrix_round_trip() {
        let pose = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.4, 0.0, -0.7),
            translation: Vector3::new(-1.0, 0.5, 2.0),
        };
        let back = SE3::from_matrix(pose.to_matrix());
        assert_relative_eq!(back.translation, pose.translation, epsilon = 1e-12);
        assert_relative_eq!(back.rotation_matrix(), pose.rotation_matrix(), epsilon = 1e-9);
    }

    #[test]
    fn test_from_rt_projects_noisy_rotation() {
        let mut r = Rotation3::from_euler_angles(0.2, 0.1, 0.3).into_inner();
        r[(0, 1)] += 1e-3;
        let pose = SE3::from_rt(r, Vector3::zeros());
        assert!(pose.orthonormality_error() < 1e-9);
        assert_relative_eq!(pose.rotation_matrix().determinant(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_euler_regular_branch() {
        let pose = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
            translation: Vector3::zeros(),
        };
        let (roll, pitch, yaw) = pose.euler_angles_deg();
        assert_relative_eq!(roll, 0.1f64.to_degrees(), epsilon = 1e-9);
        assert_relative_eq!(pitch, 0.2f64.to_degrees(), epsilon = 1e-9);
        assert_relative_eq!(yaw, 0.3f64.to_degrees(), epsilon = 1e-9);
    }

    #[test]
    fn test_euler_gimbal_lock_branch() {
        // Pitch of +90 degrees puts R00 and R10 at zero.
        let pose = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.0, FRAC_PI_2, 0.0),
            translation: Vector3::zeros(),
        };
        let (_, pitch, yaw) = pose.euler_angles_deg();
        assert_relative_eq!(pitch, 90.0, epsilon = 1e-6);
        assert_eq!(yaw, 0.0);
    }

    #[test]
    fn test_euler_gimbal_lock_keeps_roll() {
        for pitch in [FRAC_PI_2, -FRAC_PI_2] {
            let pose = SE3 {
                rotation: UnitQuaternion::from_euler_angles(0.3, pitch, 0.0),
                translation: Vector3::zeros(),
            };
            let (roll, pitch_deg, yaw) = pose.euler_angles_deg();
            assert_relative_eq!(roll, 0.3f64.to_degrees(), epsilon = 1e-6);
            assert_relative_eq!(pitch_deg, pitch.to_degrees(), epsilon = 1e-6);
            assert_eq!(yaw, 0.0);
        }
    }
}
