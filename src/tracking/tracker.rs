//! Global pose accumulation.
//!
//! Each successful two-view estimate is chained onto the running pose,
//! `global = global * relative`, and the result is appended to the
//! trajectory. The relative transform is composed exactly as the epipolar
//! solver returns it (current-from-reference, unit translation), so the
//! accumulated trajectory is defined only up to scale.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::geometry::SE3;
use crate::tracking::trajectory::Trajectory;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Trajectory capacity; the oldest poses are evicted beyond it.
    pub max_trajectory_length: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_trajectory_length: 1000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PoseTracker {
    /// Current pose (T_wc).
    pose: SE3,
    /// Number of updates since construction or the last reset.
    updates: u64,
}

impl PoseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pose(&self) -> &SE3 {
        &self.pose
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Compose `relative` onto the global pose and record the result.
    pub fn update(&mut self, relative: &SE3, trajectory: &mut Trajectory) -> &SE3 {
        self.pose = self.pose.compose(relative);
        self.updates += 1;
        trajectory.push(self.pose.clone());
        trace!(
            updates = self.updates,
            x = self.pose.translation.x,
            y = self.pose.translation.y,
            z = self.pose.translation.z,
            "pose updated"
        );
        &self.pose
    }

    pub fn reset(&mut self) {
        self.pose = SE3::identity();
        self.updates = 0;
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::{UnitQuaternion, Vector3};

    use super::*;

    #[test]
    fn test_trajectory_capped_at_capacity() {
        let mut tracker = PoseTracker::new();
        let mut trajectory = Trajectory::new(1000);
        let step = SE3 {
            translation: Vector3::new(1.0, 0.0, 0.0),
            ..SE3::identity()
        };

        for _ in 0..1500 {
            tracker.update(&step, &mut trajectory);
            assert!(trajectory.len() <= 1000);
        }

        assert_eq!(trajectory.len(), 1000);
        // Most recent 1000 poses: x = 501 ..= 1500.
        assert_relative_eq!(trajectory.iter().next().unwrap().translation.x, 501.0);
        assert_relative_eq!(trajectory.latest().unwrap().translation.x, 1500.0);
        assert_eq!(tracker.pose(), trajectory.latest().unwrap());
    }

    #[test]
    fn test_rotation_stays_orthonormal() {
        let mut tracker = PoseTracker::new();
        let mut trajectory = Trajectory::new(50);
        let step = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.013, -0.021, 0.037),
            translation: Vector3::new(0.1, -0.05, 0.3),
        };

        for _ in 0..2000 {
            let pose = tracker.update(&step, &mut trajectory);
            assert!(pose.orthonormality_error() < 1e-9);
            assert_relative_eq!(pose.rotation_matrix().determinant(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_composition_order() {
        let mut tracker = PoseTracker::new();
        let mut trajectory = Trajectory::new(10);
        let turn = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.0, 0.0, std::f64::consts::FRAC_PI_2),
            translation: Vector3::zeros(),
        };
        let forward = SE3 {
            translation: Vector3::new(1.0, 0.0, 0.0),
            ..SE3::identity()
        };

        tracker.update(&turn, &mut trajectory);
        tracker.update(&forward, &mut trajectory);
        // Moving along local x after a 90 degree yaw moves along world y.
        assert_relative_eq!(tracker.pose().translation, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_reset() {
        let mut tracker = PoseTracker::new();
        let mut trajectory = Trajectory::new(10);
        tracker.update(
            &SE3 {
                translation: Vector3::new(0.0, 2.0, 0.0),
                ..SE3::identity()
            },
            &mut trajectory,
        );
        tracker.reset();
        assert_eq!(tracker.pose(), &SE3::identity());
        assert_eq!(tracker.updates(), 0);
    }
}
