//! Raster visualization: top-down map view and keypoint overlay.

pub mod overlay;
pub mod projector;

pub use overlay::draw_keypoints;
pub use projector::{MapProjector, ProjectorConfig};
