//! Geometry: rigid transforms, two-view epipolar geometry and triangulation.

pub mod epipolar;
pub mod se3;
pub mod so3;
pub mod triangulation;

pub use epipolar::{EpipolarConfig, EpipolarSolver, RansacEssentialSolver, TwoViewGeometry};
pub use se3::SE3;
pub use triangulation::{DltTriangulator, TriangulatedPoint, TriangulationConfig, Triangulator};
