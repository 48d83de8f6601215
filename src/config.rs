//! Aggregated runtime configuration.
//!
//! Every component keeps its own config struct next to the code that uses it;
//! `SlamConfig` just bundles them so a single YAML document can tune the whole
//! pipeline. Missing keys fall back to the defaults.

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SlamError};
use crate::geometry::epipolar::EpipolarConfig;
use crate::geometry::triangulation::TriangulationConfig;
use crate::tracking::frame::OrbConfig;
use crate::tracking::matching::MatcherConfig;
use crate::tracking::tracker::TrackerConfig;
use crate::viz::projector::ProjectorConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlamConfig {
    pub orb: OrbConfig,
    pub matcher: MatcherConfig,
    pub epipolar: EpipolarConfig,
    pub triangulation: TriangulationConfig,
    pub tracker: TrackerConfig,
    pub projector: ProjectorConfig,
}

impl SlamConfig {
    /// Load a configuration from a YAML file and validate it.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let config: SlamConfig = serde_yaml::from_reader(file)
            .map_err(|e| SlamError::InvalidConfig(format!("{}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a component misbehave.
    pub fn validate(&self) -> Result<()> {
        let orb = &self.orb;
        if orb.n_features == 0 {
            return invalid("orb.n_features must be > 0");
        }
        if orb.n_levels == 0 {
            return invalid("orb.n_levels must be > 0");
        }
        if !(orb.scale_factor > 1.0) {
            return invalid("orb.scale_factor must be > 1.0");
        }
        if orb.edge_threshold < crate::tracking::frame::orb::MIN_EDGE_THRESHOLD {
            return invalid("orb.edge_threshold too small for the descriptor patch");
        }

        if !(self.matcher.ratio > 0.0 && self.matcher.ratio <= 1.0) {
            return invalid("matcher.ratio must be in (0, 1]");
        }

        let epi = &self.epipolar;
        if epi.min_matches < 8 {
            return invalid("epipolar.min_matches must be >= 8");
        }
        if !(epi.threshold_px > 0.0) {
            return invalid("epipolar.threshold_px must be > 0");
        }
        if !(epi.confidence > 0.0 && epi.confidence < 1.0) {
            return invalid("epipolar.confidence must be in (0, 1)");
        }
        if epi.max_iterations == 0 {
            return invalid("epipolar.max_iterations must be > 0");
        }

        if !(self.triangulation.max_range > 0.0) {
            return invalid("triangulation.max_range must be > 0");
        }
        if self.tracker.max_trajectory_length == 0 {
            return invalid("tracker.max_trajectory_length must be > 0");
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> Result<()> {
    Err(SlamError::InvalidConfig(msg.to_string()))
}
