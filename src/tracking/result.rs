//! Per-frame processing summary.

use crate::geometry::SE3;
use crate::tracking::TrackingState;

/// What happened while processing one frame.
///
/// Counts and pose reflect the session state after the frame was applied.
#[derive(Debug, Clone)]
pub struct FrameResult {
    /// Keypoints extracted from this frame.
    pub num_features: usize,
    /// Total map points after this frame.
    pub num_map_points: usize,
    /// Global pose after this frame (T_wc).
    pub pose: SE3,
    pub trajectory_length: usize,
    /// A relative motion was estimated and applied.
    pub motion_estimated: bool,
    /// Matching against the previous frame produced too few correspondences
    /// for motion estimation. Always false on a session's first frame.
    pub insufficient_matches: bool,
    pub state: TrackingState,
    /// Ratio-test correspondences against the previous frame.
    pub num_matches: usize,
    /// Correspondences consistent with the estimated motion.
    pub num_inliers: usize,
    /// Map points added by this frame.
    pub num_new_points: usize,
}
