//! Keypoints and binary descriptors.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Length of an ORB descriptor in bytes (256 bits).
pub const DESCRIPTOR_BYTES: usize = 32;

/// A detected corner, in level-0 pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Pyramid level the corner was detected on.
    pub octave: u8,
    /// Dominant orientation in radians.
    pub angle: f32,
    /// Harris corner response (larger is stronger).
    pub response: f32,
    /// Diameter of the described patch at level 0.
    pub size: f32,
}

impl Keypoint {
    pub fn pt(&self) -> Point2<f64> {
        Point2::new(self.x as f64, self.y as f64)
    }
}

/// Fixed-length 256-bit binary descriptor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor(pub [u8; DESCRIPTOR_BYTES]);

impl Descriptor {
    pub fn zeros() -> Self {
        Self([0; DESCRIPTOR_BYTES])
    }

    /// Number of differing bits.
    #[inline]
    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    #[inline]
    pub(crate) fn set_bit(&mut self, bit: usize) {
        self.0[bit / 8] |= 1 << (bit % 8);
    }

    pub fn as_bytes(&self) -> &[u8; DESCRIPTOR_BYTES] {
        &self.0
    }
}

impl std::fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "..")
    }
}

/// A set of ORB features extracted from an image.
///
/// `keypoints[i]` is described by `descriptors[i]`.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hamming_distance() {
        let a = Descriptor::zeros();
        let mut b = Descriptor::zeros();
        assert_eq!(a.hamming(&b), 0);

        b.set_bit(0);
        b.set_bit(9);
        b.set_bit(255);
        assert_eq!(a.hamming(&b), 3);
        assert_eq!(b.hamming(&a), 3);
    }

    #[test]
    fn test_all_bits_differ() {
        let a = Descriptor::zeros();
        let b = Descriptor([0xff; DESCRIPTOR_BYTES]);
        assert_eq!(a.hamming(&b), 256);
    }
}
