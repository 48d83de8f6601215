//! MapPoint - a triangulated 3D landmark.

use nalgebra::Vector3;

use super::types::MapPointId;
use crate::tracking::frame::Descriptor;

/// A 3D landmark in world coordinates.
///
/// Created once from a triangulated correspondence and never modified.
#[derive(Debug, Clone, PartialEq)]
pub struct MapPoint {
    pub id: MapPointId,
    /// Position in the world frame.
    pub position: Vector3<f64>,
    /// Descriptor of the feature that created the point.
    pub descriptor: Descriptor,
}

impl MapPoint {
    pub fn new(id: MapPointId, position: Vector3<f64>, descriptor: Descriptor) -> Self {
        Self {
            id,
            position,
            descriptor,
        }
    }
}
