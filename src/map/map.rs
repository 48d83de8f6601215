//! Map - container for landmarks, the camera trajectory and intrinsics.
//!
//! The map only grows: points are appended in creation order and are never
//! merged, culled or moved. It is the unit saved and restored by
//! [`crate::io::persistence`].

use nalgebra::Vector3;
use tracing::debug;

use crate::geometry::SE3;
use crate::tracking::frame::{CameraModel, Descriptor};
use crate::tracking::Trajectory;

use super::map_point::MapPoint;
use super::types::MapPointId;

#[derive(Debug, Clone)]
pub struct Map {
    /// All MapPoints, in insertion order.
    map_points: Vec<MapPoint>,
    trajectory: Trajectory,
    camera: CameraModel,
    /// Counter for generating unique MapPoint IDs.
    next_mp_id: u64,
}

impl Map {
    pub fn new(camera: CameraModel, trajectory_capacity: usize) -> Self {
        Self {
            map_points: Vec::new(),
            trajectory: Trajectory::new(trajectory_capacity),
            camera,
            next_mp_id: 0,
        }
    }

    /// Assemble a map from restored parts.
    ///
    /// The id counter resumes after the largest stored id.
    pub fn from_parts(camera: CameraModel, map_points: Vec<MapPoint>, trajectory: Trajectory) -> Self {
        let next_mp_id = map_points.iter().map(|mp| mp.id.0 + 1).max().unwrap_or(0);
        Self {
            map_points,
            trajectory,
            camera,
            next_mp_id,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // MapPoints
    // ─────────────────────────────────────────────────────────────────────────

    pub fn create_map_point(&mut self, position: Vector3<f64>, descriptor: Descriptor) -> MapPointId {
        let id = MapPointId::new(self.next_mp_id);
        self.next_mp_id += 1;
        self.map_points.push(MapPoint::new(id, position, descriptor));
        id
    }

    /// Add camera-frame points observed from `pose` (T_wc).
    ///
    /// Each point is stored at `R * p + t`. Returns the number added.
    pub fn insert_points(
        &mut self,
        pose: &SE3,
        points: impl IntoIterator<Item = (Vector3<f64>, Descriptor)>,
    ) -> usize {
        let before = self.map_points.len();
        for (p_cam, descriptor) in points {
            self.create_map_point(pose.transform_point(&p_cam), descriptor);
        }
        let added = self.map_points.len() - before;
        debug!(added, total = self.map_points.len(), "map points inserted");
        added
    }

    pub fn map_points(&self) -> &[MapPoint] {
        &self.map_points
    }

    pub fn num_map_points(&self) -> usize {
        self.map_points.len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Trajectory and camera
    // ─────────────────────────────────────────────────────────────────────────

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    pub fn trajectory_mut(&mut self) -> &mut Trajectory {
        &mut self.trajectory
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    /// Drop all points and poses; intrinsics and capacity are kept.
    pub fn clear(&mut self) {
        self.map_points.clear();
        self.trajectory.clear();
        self.next_mp_id = 0;
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    use super::*;

    #[test]
    fn test_insert_uses_pose() {
        let mut map = Map::new(CameraModel::default(), 10);
        let pose = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2),
            translation: Vector3::new(1.0, 2.0, 3.0),
        };

        let added = map.insert_points(
            &pose,
            vec![
                (Vector3::new(1.0, 0.0, 0.0), Descriptor::zeros()),
                (Vector3::new(0.0, 0.0, 5.0), Descriptor([0xaa; 32])),
            ],
        );

        assert_eq!(added, 2);
        let points = map.map_points();
        assert_relative_eq!(points[0].position, Vector3::new(1.0, 3.0, 3.0), epsilon = 1e-12);
        assert_relative_eq!(points[1].position, Vector3::new(1.0, 2.0, 8.0), epsilon = 1e-12);
        assert_eq!(points[1].descriptor, Descriptor([0xaa; 32]));
    }

    #[test]
    fn test_ids_are_sequential_and_resume() {
        let mut map = Map::new(CameraModel::default(), 10);
        let a = map.create_map_point(Vector3::zeros(), Descriptor::zeros());
        let b = map.create_map_point(Vector3::zeros(), Descriptor::zeros());
        assert_eq!((a.0, b.0), (0, 1));

        let mut restored = Map::from_parts(
            *map.camera(),
            map.map_points().to_vec(),
            map.trajectory().clone(),
        );
        assert_eq!(restored.create_map_point(Vector3::zeros(), Descriptor::zeros()).0, 2);
    }

    #[test]
    fn test_clear() {
        let mut map = Map::new(CameraModel::default(), 10);
        map.create_map_point(Vector3::zeros(), Descriptor::zeros());
        map.trajectory_mut().push(SE3::identity());
        map.clear();
        assert_eq!(map.num_map_points(), 0);
        assert!(map.trajectory().is_empty());
        assert_eq!(map.trajectory().capacity(), 10);
    }
}
