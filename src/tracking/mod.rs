//! Tracking: per-frame feature extraction, temporal matching and pose
//! accumulation.

pub mod frame;
pub mod matching;
pub mod result;
pub mod state;
pub mod tracker;
pub mod trajectory;

pub use matching::{Correspondence, DescriptorMetric, FeatureMatcher, Hamming, MatcherConfig};
pub use result::FrameResult;
pub use state::TrackingState;
pub use tracker::{PoseTracker, TrackerConfig};
pub use trajectory::Trajectory;
