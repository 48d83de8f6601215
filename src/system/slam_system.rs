//! SLAM System - session state and the per-frame pipeline.
//!
//! `SlamSystem` owns everything a monocular session needs: the feature
//! extractor and matcher, the geometric solvers, the pose tracker, the map
//! and the previous frame. All work happens synchronously inside
//! [`SlamSystem::process_frame`]; callers sharing a session across threads
//! must wrap it in their own lock.

use std::path::Path;

use image::{GrayImage, RgbImage};
use nalgebra::{Point2, Vector3};
use tracing::{debug, info, warn};

use crate::config::SlamConfig;
use crate::error::{Result, SlamError};
use crate::geometry::{
    DltTriangulator, EpipolarSolver, RansacEssentialSolver, Triangulator, SE3,
};
use crate::io::persistence;
use crate::map::Map;
use crate::tracking::frame::{CameraModel, Frame, OrbExtractor};
use crate::tracking::{
    Correspondence, FeatureMatcher, FrameResult, PoseTracker, TrackingState, Trajectory,
};
use crate::viz::MapProjector;

/// Outcome of relating the current frame to the previous one.
#[derive(Debug, Default)]
struct MotionOutcome {
    motion_estimated: bool,
    insufficient_matches: bool,
    num_matches: usize,
    num_inliers: usize,
    num_new_points: usize,
}

/// Monocular visual-odometry session.
pub struct SlamSystem {
    config: SlamConfig,
    extractor: OrbExtractor,
    matcher: FeatureMatcher,
    solver: Box<dyn EpipolarSolver + Send>,
    triangulator: Box<dyn Triangulator + Send>,
    projector: MapProjector,

    tracker: PoseTracker,
    /// Map points, trajectory and intrinsics.
    map: Map,
    /// Features of the last processed frame.
    previous: Option<Frame>,
    state: TrackingState,
    /// Frames processed since construction or the last reset.
    frame_count: usize,
}

impl SlamSystem {
    /// Create a session with validated configuration.
    pub fn new(camera: CameraModel, config: SlamConfig) -> Result<Self> {
        config.validate()?;
        if !camera.is_valid() {
            return Err(SlamError::InvalidConfig(format!(
                "invalid camera intrinsics {:?}",
                camera
            )));
        }
        Ok(Self::build(camera, config))
    }

    /// Create a session with default parameters.
    pub fn with_defaults(camera: CameraModel) -> Self {
        Self::build(camera, SlamConfig::default())
    }

    fn build(camera: CameraModel, config: SlamConfig) -> Self {
        info!(
            fx = camera.fx,
            fy = camera.fy,
            cx = camera.cx,
            cy = camera.cy,
            "SLAM session created"
        );
        Self {
            extractor: OrbExtractor::new(config.orb.clone()),
            matcher: FeatureMatcher::new(config.matcher.clone()),
            solver: Box::new(RansacEssentialSolver::new(config.epipolar.clone())),
            triangulator: Box::new(DltTriangulator::new(config.triangulation.clone())),
            projector: MapProjector::new(config.projector.clone()),
            tracker: PoseTracker::new(),
            map: Map::new(camera, config.tracker.max_trajectory_length),
            previous: None,
            state: TrackingState::NotInitialized,
            frame_count: 0,
            config,
        }
    }

    /// Swap in other geometric back ends.
    pub fn with_solvers(
        mut self,
        solver: Box<dyn EpipolarSolver + Send>,
        triangulator: Box<dyn Triangulator + Send>,
    ) -> Self {
        self.solver = solver;
        self.triangulator = triangulator;
        self
    }

    /// Run the full pipeline on one grayscale frame.
    ///
    /// Recoverable failures (too few matches, degenerate motion) leave pose,
    /// trajectory and map untouched and mark the session `Lost`; the frame
    /// still becomes the reference for the next one.
    pub fn process_frame(&mut self, image: &GrayImage) -> FrameResult {
        let features = self.extractor.detect_and_compute(image);
        let frame = Frame::new(self.frame_count, image.dimensions(), features);
        self.frame_count += 1;

        let outcome = match self.previous.take() {
            None => {
                debug!(features = frame.features.len(), "first frame stored as reference");
                MotionOutcome::default()
            }
            Some(previous) => {
                let outcome = self.track(&previous, &frame);
                self.state = if outcome.motion_estimated {
                    TrackingState::Ok
                } else {
                    TrackingState::Lost
                };
                outcome
            }
        };

        let num_features = frame.features.len();
        self.previous = Some(frame);

        debug!(
            frame = self.frame_count - 1,
            features = num_features,
            matches = outcome.num_matches,
            inliers = outcome.num_inliers,
            new_points = outcome.num_new_points,
            state = %self.state,
            "frame processed"
        );

        FrameResult {
            num_features,
            num_map_points: self.map.num_map_points(),
            pose: self.tracker.pose().clone(),
            trajectory_length: self.map.trajectory().len(),
            motion_estimated: outcome.motion_estimated,
            insufficient_matches: outcome.insufficient_matches,
            state: self.state,
            num_matches: outcome.num_matches,
            num_inliers: outcome.num_inliers,
            num_new_points: outcome.num_new_points,
        }
    }

    /// Match, estimate relative motion, update the pose and grow the map.
    fn track(&mut self, previous: &Frame, current: &Frame) -> MotionOutcome {
        let matches = self.matcher.match_descriptors(
            &previous.features.descriptors,
            &current.features.descriptors,
        );
        let (reference, observed) = matched_points(previous, current, &matches);
        let camera = *self.map.camera();

        let geometry = match self.solver.estimate(&camera, &reference, &observed) {
            Ok(geometry) => geometry,
            Err(e) => {
                if e.is_recoverable() {
                    debug!("motion not estimated: {}", e);
                } else {
                    warn!("motion estimation failed: {}", e);
                }
                return MotionOutcome {
                    insufficient_matches: matches!(e, SlamError::InsufficientMatches { .. }),
                    num_matches: matches.len(),
                    ..MotionOutcome::default()
                };
            }
        };

        let inliers: Vec<usize> = (0..matches.len())
            .filter(|&i| geometry.inlier_mask.get(i).copied().unwrap_or(false))
            .collect();
        let ref_in: Vec<Point2<f64>> = inliers.iter().map(|&i| reference[i]).collect();
        let cur_in: Vec<Point2<f64>> = inliers.iter().map(|&i| observed[i]).collect();

        let points = self
            .triangulator
            .triangulate(&camera, &geometry.relative, &ref_in, &cur_in);
        if points.is_empty() {
            debug!("{}", SlamError::InvalidTriangulation);
        }

        let pose = self
            .tracker
            .update(&geometry.relative, self.map.trajectory_mut())
            .clone();

        let descriptors = &current.features.descriptors;
        let num_new_points = self.map.insert_points(
            &pose,
            points.iter().map(|p| {
                let m = &matches[inliers[p.correspondence]];
                (p.position, descriptors[m.query_idx])
            }),
        );

        MotionOutcome {
            motion_estimated: true,
            insufficient_matches: false,
            num_matches: matches.len(),
            num_inliers: geometry.num_inliers,
            num_new_points,
        }
    }

    /// Current camera position in world coordinates.
    pub fn current_position(&self) -> Vector3<f64> {
        self.tracker.pose().translation
    }

    /// Current (roll, pitch, yaw) in degrees.
    pub fn current_orientation(&self) -> (f64, f64, f64) {
        self.tracker.pose().euler_angles_deg()
    }

    /// Top-down raster of map points, trajectory and current pose.
    ///
    /// `canvas_size` is `(width, height)`; `scale` is pixels per world unit.
    pub fn visualize_map(&self, canvas_size: (u32, u32), scale: f64) -> RgbImage {
        self.projector
            .render(&self.map, self.tracker.pose(), canvas_size, scale)
    }

    pub fn save_map<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        persistence::save_map(&self.map, path)
    }

    /// Replace map points, trajectory and intrinsics with the file contents.
    ///
    /// The current pose and the reference frame are kept, and the trajectory
    /// is trimmed to this session's capacity. On error nothing changes.
    pub fn load_map<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        match persistence::load_map(path) {
            Ok(mut map) => {
                let capacity = self.config.tracker.max_trajectory_length;
                if map.trajectory().capacity() != capacity {
                    debug!(
                        stored = map.trajectory().capacity(),
                        capacity, "rebuilding loaded trajectory"
                    );
                    let trajectory =
                        Trajectory::from_poses(capacity, map.trajectory().iter().cloned());
                    *map.trajectory_mut() = trajectory;
                }
                self.map = map;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to load map from {}: {}", path.display(), e);
                Err(e)
            }
        }
    }

    /// Back to a fresh session: empty map, identity pose, no reference frame.
    pub fn reset(&mut self) {
        self.map.clear();
        self.tracker.reset();
        self.previous = None;
        self.state = TrackingState::NotInitialized;
        self.frame_count = 0;
        info!("SLAM session reset");
    }

    pub fn pose(&self) -> &SE3 {
        self.tracker.pose()
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn map(&self) -> &Map {
        &self.map
    }

    pub fn trajectory(&self) -> &Trajectory {
        self.map.trajectory()
    }

    pub fn camera(&self) -> &CameraModel {
        self.map.camera()
    }

    pub fn config(&self) -> &SlamConfig {
        &self.config
    }

    pub fn has_reference_frame(&self) -> bool {
        self.previous.is_some()
    }

    /// Features of the last processed frame.
    pub fn last_frame(&self) -> Option<&Frame> {
        self.previous.as_ref()
    }
}

/// Pixel pairs `(previous, current)` for each correspondence.
fn matched_points(
    previous: &Frame,
    current: &Frame,
    matches: &[Correspondence],
) -> (Vec<Point2<f64>>, Vec<Point2<f64>>) {
    matches
        .iter()
        .map(|m| {
            (
                previous.features.keypoints[m.train_idx].pt(),
                current.features.keypoints[m.query_idx].pt(),
            )
        })
        .unzip()
}
