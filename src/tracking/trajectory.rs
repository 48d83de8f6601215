//! Bounded history of global poses.

use std::collections::VecDeque;

use nalgebra::Vector3;

use crate::geometry::SE3;

/// Insertion-ordered poses with FIFO eviction.
///
/// `len() <= capacity()` holds after every push.
#[derive(Debug, Clone)]
pub struct Trajectory {
    poses: VecDeque<SE3>,
    capacity: usize,
}

impl Trajectory {
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            poses: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    /// Rebuild from stored poses, keeping the most recent `capacity` of them.
    pub fn from_poses(capacity: usize, poses: impl IntoIterator<Item = SE3>) -> Self {
        let mut trajectory = Self::new(capacity);
        for pose in poses {
            trajectory.push(pose);
        }
        trajectory
    }

    pub fn push(&mut self, pose: SE3) {
        if self.poses.len() >= self.capacity {
            self.poses.pop_front();
        }
        self.poses.push_back(pose);
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &SE3> {
        self.poses.iter()
    }

    pub fn positions(&self) -> impl Iterator<Item = Vector3<f64>> + '_ {
        self.poses.iter().map(|p| p.translation)
    }

    pub fn latest(&self) -> Option<&SE3> {
        self.poses.back()
    }

    pub fn clear(&mut self) {
        self.poses.clear();
    }
}

impl Default for Trajectory {
    fn default() -> Self {
        Self::new(1000)
    }
}
