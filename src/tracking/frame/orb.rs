//! ORB feature extraction: FAST-9 corners ranked by Harris response over a
//! scale pyramid, intensity-centroid orientation and steered BRIEF descriptors.
//!
//! The extractor is deterministic: the BRIEF sampling pattern comes from a
//! fixed-seed ChaCha stream and every selection step breaks ties by raster
//! order.

use image::imageops::{self, FilterType};
use image::GrayImage;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::features::{Descriptor, FeatureSet, Keypoint, DESCRIPTOR_BYTES};

/// Radius of the patch used for orientation.
const HALF_PATCH: i32 = 15;
/// BRIEF test points are drawn from a disc of this radius.
const PATTERN_RADIUS: i32 = 13;
/// Harris window is 7x7 on top of a 3x3 Sobel.
const HARRIS_HALF_BLOCK: i32 = 3;
const HARRIS_K: f32 = 0.04;
/// Sigma of the smoothing applied before the binary tests.
const BRIEF_SIGMA: f32 = 2.0;
const PATTERN_SEED: u64 = 0x0_4b1d_5eed;
const N_TESTS: usize = DESCRIPTOR_BYTES * 8;

/// Smallest border that keeps orientation and descriptor sampling in bounds.
pub const MIN_EDGE_THRESHOLD: u32 = (HALF_PATCH + 1) as u32;

/// Bresenham circle of radius 3, clockwise from 12 o'clock.
const FAST_RING: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// FAST-9: nine contiguous ring pixels must agree.
const FAST_ARC: u32 = 9;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbConfig {
    /// Upper bound on keypoints returned per image.
    pub n_features: usize,
    /// Downscale between consecutive pyramid levels.
    pub scale_factor: f64,
    pub n_levels: usize,
    /// Border (in level pixels) where no keypoint is kept.
    pub edge_threshold: u32,
    /// Intensity difference for the FAST segment test.
    pub fast_threshold: u8,
}

impl Default for OrbConfig {
    fn default() -> Self {
        Self {
            n_features: 2000,
            scale_factor: 1.2,
            n_levels: 8,
            edge_threshold: 31,
            fast_threshold: 20,
        }
    }
}

/// Pair of BRIEF sample offsets relative to the keypoint.
#[derive(Debug, Clone, Copy)]
struct BriefTest {
    a: (f32, f32),
    b: (f32, f32),
}

pub struct OrbExtractor {
    config: OrbConfig,
    /// Keypoint quota per pyramid level, summing to `n_features`.
    features_per_level: Vec<usize>,
    scale_per_level: Vec<f64>,
    pattern: Vec<BriefTest>,
    /// Half-widths of the circular orientation patch, indexed by |dy|.
    umax: Vec<i32>,
}

impl OrbExtractor {
    pub fn new(config: OrbConfig) -> Self {
        let n_levels = config.n_levels.max(1);
        let scale_per_level: Vec<f64> = (0..n_levels)
            .map(|level| config.scale_factor.powi(level as i32))
            .collect();

        let features_per_level = level_quotas(config.n_features, config.scale_factor, n_levels);
        let pattern = brief_pattern();
        let umax = (0..=HALF_PATCH)
            .map(|v| (((HALF_PATCH * HALF_PATCH - v * v) as f64).sqrt()).round() as i32)
            .collect();

        Self {
            config,
            features_per_level,
            scale_per_level,
            pattern,
            umax,
        }
    }

    pub fn config(&self) -> &OrbConfig {
        &self.config
    }

    /// Detect keypoints and compute descriptors.
    ///
    /// Never returns more than `n_features` keypoints; a textureless image
    /// yields an empty set.
    pub fn detect_and_compute(&self, image: &GrayImage) -> FeatureSet {
        let mut features = FeatureSet::default();
        let edge = self.config.edge_threshold.max(MIN_EDGE_THRESHOLD);
        let (width, height) = image.dimensions();

        for (level, &quota) in self.features_per_level.iter().enumerate() {
            if quota == 0 {
                continue;
            }
            let scale = self.scale_per_level[level];
            let w = (width as f64 / scale).round() as u32;
            let h = (height as f64 / scale).round() as u32;
            if w <= 2 * edge || h <= 2 * edge {
                break;
            }

            let level_img = if level == 0 {
                image.clone()
            } else {
                imageops::resize(image, w, h, FilterType::Triangle)
            };

            let corners = detect_corners(&level_img, edge, self.config.fast_threshold, quota);
            if corners.is_empty() {
                continue;
            }

            let smoothed = imageops::blur(&level_img, BRIEF_SIGMA);
            let size = (2 * HALF_PATCH + 1) as f64 * scale;

            for corner in &corners {
                let angle = self.intensity_centroid_angle(&level_img, corner.x, corner.y);
                let descriptor = self.describe(&smoothed, corner.x, corner.y, angle);
                features.keypoints.push(Keypoint {
                    x: (corner.x as f64 * scale) as f32,
                    y: (corner.y as f64 * scale) as f32,
                    octave: level as u8,
                    angle,
                    response: corner.response,
                    size: size as f32,
                });
                features.descriptors.push(descriptor);
            }
            trace!(level, kept = corners.len(), quota, "orb level done");
        }

        features.keypoints.truncate(self.config.n_features);
        features.descriptors.truncate(self.config.n_features);
        features
    }

    /// Orientation of the intensity centroid in a circular patch.
    fn intensity_centroid_angle(&self, img: &GrayImage, x: i32, y: i32) -> f32 {
        let width = img.width() as i32;
        let data = img.as_raw();
        let at = |px: i32, py: i32| data[(py * width + px) as usize] as i64;

        let mut m01: i64 = 0;
        let mut m10: i64 = 0;
        for u in -HALF_PATCH..=HALF_PATCH {
            m10 += u as i64 * at(x + u, y);
        }
        for v in 1..=HALF_PATCH {
            let d = self.umax[v as usize];
            for u in -d..=d {
                let below = at(x + u, y + v);
                let above = at(x + u, y - v);
                m01 += v as i64 * (below - above);
                m10 += u as i64 * (below + above);
            }
        }
        (m01 as f32).atan2(m10 as f32)
    }

    /// Steered BRIEF: rotate the sampling pattern by the keypoint angle.
    fn describe(&self, smoothed: &GrayImage, x: i32, y: i32, angle: f32) -> Descriptor {
        let width = smoothed.width() as i32;
        let data = smoothed.as_raw();
        let (sin, cos) = angle.sin_cos();
        let sample = |(px, py): (f32, f32)| {
            let rx = (px * cos - py * sin).round() as i32;
            let ry = (px * sin + py * cos).round() as i32;
            data[((y + ry) * width + (x + rx)) as usize]
        };

        let mut desc = Descriptor::zeros();
        for (bit, test) in self.pattern.iter().enumerate() {
            if sample(test.a) < sample(test.b) {
                desc.set_bit(bit);
            }
        }
        desc
    }
}

impl Default for OrbExtractor {
    fn default() -> Self {
        Self::new(OrbConfig::default())
    }
}

/// Split the feature budget geometrically across levels, finer levels first.
fn level_quotas(n_features: usize, scale_factor: f64, n_levels: usize) -> Vec<usize> {
    let factor = 1.0 / scale_factor;
    let mut desired = if (1.0 - factor.powi(n_levels as i32)).abs() > f64::EPSILON {
        n_features as f64 * (1.0 - factor) / (1.0 - factor.powi(n_levels as i32))
    } else {
        n_features as f64 / n_levels as f64
    };

    let mut quotas = Vec::with_capacity(n_levels);
    let mut assigned = 0usize;
    for _ in 0..n_levels.saturating_sub(1) {
        let n = (desired.round() as usize).min(n_features - assigned);
        quotas.push(n);
        assigned += n;
        desired *= factor;
    }
    quotas.push(n_features - assigned);
    quotas
}

fn brief_pattern() -> Vec<BriefTest> {
    let mut rng = ChaCha8Rng::seed_from_u64(PATTERN_SEED);
    let point = |rng: &mut ChaCha8Rng| loop {
        let x = rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
        let y = rng.gen_range(-PATTERN_RADIUS..=PATTERN_RADIUS);
        if x * x + y * y <= PATTERN_RADIUS * PATTERN_RADIUS {
            return (x as f32, y as f32);
        }
    };

    let mut tests = Vec::with_capacity(N_TESTS);
    while tests.len() < N_TESTS {
        let a = point(&mut rng);
        let b = point(&mut rng);
        if a != b {
            tests.push(BriefTest { a, b });
        }
    }
    tests
}

#[derive(Debug, Clone, Copy)]
struct Corner {
    x: i32,
    y: i32,
    response: f32,
}

/// FAST-9 detection, Harris scoring, 3x3 non-maximum suppression and
/// retention of the `max_corners` strongest responses.
fn detect_corners(img: &GrayImage, edge: u32, threshold: u8, max_corners: usize) -> Vec<Corner> {
    let (w, h) = (img.width() as i32, img.height() as i32);
    let edge = edge as i32;
    let data = img.as_raw();
    let t = threshold as i16;

    let mut scores = vec![f32::NEG_INFINITY; (w * h) as usize];
    let mut candidates = Vec::new();

    for y in edge..h - edge {
        for x in edge..w - edge {
            if is_fast_corner(data, w, x, y, t) {
                let response = harris_response(data, w, x, y);
                scores[(y * w + x) as usize] = response;
                candidates.push(Corner { x, y, response });
            }
        }
    }

    // Strict maximum over the 3x3 neighbourhood; on equal scores the
    // earlier corner in raster order survives.
    let mut corners: Vec<Corner> = candidates
        .into_iter()
        .filter(|c| {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let s = scores[((c.y + dy) * w + (c.x + dx)) as usize];
                    let earlier = dy < 0 || (dy == 0 && dx < 0);
                    if s > c.response || (s == c.response && earlier) {
                        return false;
                    }
                }
            }
            true
        })
        .collect();

    // Stable sort keeps raster order among equal responses.
    corners.sort_by(|a, b| b.response.total_cmp(&a.response));
    corners.truncate(max_corners);
    corners
}

fn is_fast_corner(data: &[u8], w: i32, x: i32, y: i32, t: i16) -> bool {
    let p = data[(y * w + x) as usize] as i16;
    let ring = |i: usize| {
        let (dx, dy) = FAST_RING[i];
        data[((y + dy) * w + (x + dx)) as usize] as i16
    };

    // Any arc of nine covers at least two of the four compass pixels.
    let compass = [ring(0), ring(4), ring(8), ring(12)];
    let brighter = compass.iter().filter(|&&v| v > p + t).count();
    let darker = compass.iter().filter(|&&v| v < p - t).count();
    if brighter < 2 && darker < 2 {
        return false;
    }

    let mut bright_mask: u32 = 0;
    let mut dark_mask: u32 = 0;
    for i in 0..16 {
        let v = ring(i);
        if v > p + t {
            bright_mask |= 1 << i;
        } else if v < p - t {
            dark_mask |= 1 << i;
        }
    }
    has_arc(bright_mask) || has_arc(dark_mask)
}

/// Whether the 16-bit circular mask has `FAST_ARC` contiguous set bits.
fn has_arc(mask: u32) -> bool {
    if mask.count_ones() < FAST_ARC {
        return false;
    }
    let doubled = mask | (mask << 16);
    let mut run = 0;
    for i in 0..32 {
        if doubled & (1 << i) != 0 {
            run += 1;
            if run >= FAST_ARC {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

fn harris_response(data: &[u8], w: i32, x: i32, y: i32) -> f32 {
    let at = |px: i32, py: i32| data[(py * w + px) as usize] as f32;
    let (mut a, mut b, mut c) = (0.0f32, 0.0f32, 0.0f32);

    for dy in -HARRIS_HALF_BLOCK..=HARRIS_HALF_BLOCK {
        for dx in -HARRIS_HALF_BLOCK..=HARRIS_HALF_BLOCK {
            let (px, py) = (x + dx, y + dy);
            let ix = (at(px + 1, py - 1) + 2.0 * at(px + 1, py) + at(px + 1, py + 1))
                - (at(px - 1, py - 1) + 2.0 * at(px - 1, py) + at(px - 1, py + 1));
            let iy = (at(px - 1, py + 1) + 2.0 * at(px, py + 1) + at(px + 1, py + 1))
                - (at(px - 1, py - 1) + 2.0 * at(px, py - 1) + at(px + 1, py - 1));
            a += ix * ix;
            b += iy * iy;
            c += ix * iy;
        }
    }

    // Normalise so responses are comparable across image contrast scales.
    let scale = 1.0 / (4.0 * 255.0 * ((2 * HARRIS_HALF_BLOCK + 1) as f32));
    let (a, b, c) = (a * scale * scale, b * scale * scale, c * scale * scale);
    a * b - c * c - HARRIS_K * (a + b) * (a + b)
}

#[cfg(test)]
mod tests {
    use image::Luma;
    use rand::Rng;

    use super::*;

    /// Random 4x4-pixel checker cells on a grey background.
    fn textured_image(width: u32, height: u32, seed: u64) -> GrayImage {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut img = GrayImage::from_pixel(width, height, Luma([128]));
        let cells_x = (width - 80) / 4;
        let cells_y = (height - 80) / 4;
        for cy in 0..cells_y {
            for cx in 0..cells_x {
                let v: u8 = rng.gen();
                for dy in 0..4 {
                    for dx in 0..4 {
                        img.put_pixel(40 + cx * 4 + dx, 40 + cy * 4 + dy, Luma([v]));
                    }
                }
            }
        }
        img
    }

    #[test]
    fn test_level_quotas_sum_to_budget() {
        let quotas = level_quotas(2000, 1.2, 8);
        assert_eq!(quotas.len(), 8);
        assert_eq!(quotas.iter().sum::<usize>(), 2000);
        assert!(quotas[0] > quotas[7]);
    }

    #[test]
    fn test_has_arc_wraps_around() {
        // Bits 12..15 and 0..4 form a nine-long arc across the wrap point.
        let mask = 0b1111_0000_0000_0000 | 0b1_1111;
        assert!(has_arc(mask));
        assert!(!has_arc(0b1111_1111));
    }

    #[test]
    fn test_blank_image_has_no_features() {
        let img = GrayImage::from_pixel(320, 240, Luma([90]));
        let features = OrbExtractor::default().detect_and_compute(&img);
        assert!(features.is_empty());
    }

    #[test]
    fn test_respects_feature_budget() {
        let img = textured_image(640, 480, 7);
        for budget in [1, 50, 500] {
            let config = OrbConfig {
                n_features: budget,
                ..OrbConfig::default()
            };
            let features = OrbExtractor::new(config).detect_and_compute(&img);
            assert!(features.len() <= budget);
            assert_eq!(features.keypoints.len(), features.descriptors.len());
        }
    }

    #[test]
    fn test_textured_image_yields_features_inside_margin() {
        let img = textured_image(640, 480, 11);
        let extractor = OrbExtractor::default();
        let features = extractor.detect_and_compute(&img);
        assert!(features.len() > 100);

        for kp in &features.keypoints {
            let scale = extractor.scale_per_level[kp.octave as usize] as f32;
            let margin = extractor.config.edge_threshold as f32 * scale - 1.0;
            assert!(kp.x >= margin && kp.x <= 640.0 - margin, "x = {}", kp.x);
            assert!(kp.y >= margin && kp.y <= 480.0 - margin, "y = {}", kp.y);
        }
    }

    #[test]
    fn test_deterministic() {
        let img = textured_image(400, 300, 3);
        let extractor = OrbExtractor::default();
        let a = extractor.detect_and_compute(&img);
        let b = extractor.detect_and_compute(&img);
        assert_eq!(a.keypoints, b.keypoints);
        assert_eq!(a.descriptors, b.descriptors);
    }
}
