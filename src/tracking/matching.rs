//! Temporal feature matching between consecutive frames.
//!
//! Brute-force 2-nearest-neighbour search with Lowe's ratio test. Several
//! query features may end up matched to the same reference feature; no
//! one-to-one filtering is applied.

use serde::{Deserialize, Serialize};

use crate::tracking::frame::Descriptor;

/// Ratio test threshold (best / second best).
pub const NN_RATIO: f32 = 0.75;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Accept the best candidate only if `best < ratio * second`.
    pub ratio: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self { ratio: NN_RATIO }
    }
}

/// A putative match between the current frame and the reference frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    /// Feature index in the current (query) frame.
    pub query_idx: usize,
    /// Feature index in the reference (previous) frame.
    pub train_idx: usize,
    pub distance: f32,
}

/// Distance between two descriptors of one kind.
pub trait DescriptorMetric {
    type Descriptor;

    fn distance(&self, a: &Self::Descriptor, b: &Self::Descriptor) -> f32;
}

/// Bit count of the XOR of two binary descriptors.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hamming;

impl DescriptorMetric for Hamming {
    type Descriptor = Descriptor;

    #[inline]
    fn distance(&self, a: &Descriptor, b: &Descriptor) -> f32 {
        a.hamming(b) as f32
    }
}

pub struct FeatureMatcher<M: DescriptorMetric = Hamming> {
    config: MatcherConfig,
    metric: M,
}

impl FeatureMatcher<Hamming> {
    pub fn new(config: MatcherConfig) -> Self {
        Self::with_metric(config, Hamming)
    }
}

impl Default for FeatureMatcher<Hamming> {
    fn default() -> Self {
        Self::new(MatcherConfig::default())
    }
}

impl<M: DescriptorMetric> FeatureMatcher<M> {
    pub fn with_metric(config: MatcherConfig, metric: M) -> Self {
        Self { config, metric }
    }

    /// Match every query descriptor against the reference set.
    ///
    /// Output is ordered by `query_idx`.
    pub fn match_descriptors(
        &self,
        reference: &[M::Descriptor],
        query: &[M::Descriptor],
    ) -> Vec<Correspondence> {
        if reference.len() < 2 {
            return Vec::new();
        }

        let mut matches = Vec::new();
        for (query_idx, q) in query.iter().enumerate() {
            let mut best = (usize::MAX, f32::INFINITY);
            let mut second = f32::INFINITY;

            for (train_idx, r) in reference.iter().enumerate() {
                let d = self.metric.distance(q, r);
                if d < best.1 {
                    second = best.1;
                    best = (train_idx, d);
                } else if d < second {
                    second = d;
                }
            }

            if best.1 < self.config.ratio * second {
                matches.push(Correspondence {
                    query_idx,
                    train_idx: best.0,
                    distance: best.1,
                });
            }
        }
        matches
    }
}
