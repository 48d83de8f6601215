//! Frame-level processing: camera model and ORB feature extraction.

pub mod camera;
pub mod features;
pub mod orb;

pub use camera::CameraModel;
pub use features::{Descriptor, FeatureSet, Keypoint, DESCRIPTOR_BYTES};
pub use orb::{OrbConfig, OrbExtractor};

/// A processed frame: sequence index, raster size and extracted features.
///
/// The pixels are not retained once features have been extracted.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub features: FeatureSet,
}

impl Frame {
    pub fn new(index: usize, (width, height): (u32, u32), features: FeatureSet) -> Self {
        Self {
            index,
            width,
            height,
            features,
        }
    }
}
