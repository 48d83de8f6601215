//! SO(3) helpers shared by the epipolar solver and the pose tracker.

use nalgebra::{Matrix3, Vector3};

/// Constructs the skew-symmetric matrix [v]× such that [v]× u = v × u.
///
/// ```text
/// [v]× = |  0   -v_z   v_y |
///        |  v_z   0   -v_x |
///        | -v_y  v_x    0  |
/// ```
#[inline]
#[rustfmt::skip]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Nearest rotation matrix (Frobenius sense) via SVD: R = U · diag(1, 1, det(UVᵀ)) · Vᵀ.
///
/// Returns `None` if the decomposition does not converge.
pub fn project_to_so3(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let d = (u * v_t).determinant().signum();
    let fix = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, d));
    Some(u * fix * v_t)
}

/// Whether `r` is a proper rotation within `eps`.
pub fn is_rotation(r: &Matrix3<f64>, eps: f64) -> bool {
    (r.transpose() * r - Matrix3::identity()).norm() < eps && (r.determinant() - 1.0).abs() < eps
}
