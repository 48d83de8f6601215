//! Monocular image sequence loading.
//!
//! Two layouts are understood:
//! - EuRoC MAV: `<root>/cam0/data.csv` (timestamp, filename) with images under
//!   `<root>/cam0/data/` and intrinsics in `<root>/cam0/sensor.yaml`. A
//!   `mav0/` level above `cam0/` is also accepted.
//! - A plain directory of PNG/JPEG images, ordered by file name.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use image::GrayImage;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::tracking::frame::CameraModel;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Debug, Clone)]
pub struct ImageEntry {
    /// Capture time; the sequence index for plain directories.
    pub timestamp_ns: u64,
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct ImageSequence {
    pub entries: Vec<ImageEntry>,
    /// Intrinsics read from the dataset, if it carries any.
    pub camera: Option<CameraModel>,
}

impl ImageSequence {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            bail!("{} is not a directory", root.display());
        }

        for cam_dir in [root.join("cam0"), root.join("mav0/cam0")] {
            if cam_dir.join("data.csv").is_file() {
                return Self::open_euroc(&cam_dir);
            }
        }
        Self::open_directory(root)
    }

    fn open_euroc(cam_dir: &Path) -> Result<Self> {
        let entries = load_image_list(&cam_dir.join("data.csv"), &cam_dir.join("data"))?;
        let yaml = cam_dir.join("sensor.yaml");
        let camera = if yaml.is_file() {
            Some(load_camera(&yaml)?)
        } else {
            warn!("No sensor.yaml in {}; intrinsics must be supplied", cam_dir.display());
            None
        };
        debug!(frames = entries.len(), dir = %cam_dir.display(), "opened EuRoC sequence");
        Ok(Self { entries, camera })
    }

    fn open_directory(dir: &Path) -> Result<Self> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if path.is_file() && is_image {
                paths.push(path);
            }
        }
        paths.sort();

        let entries = paths
            .into_iter()
            .enumerate()
            .map(|(i, path)| ImageEntry {
                timestamp_ns: i as u64,
                path,
            })
            .collect::<Vec<_>>();
        debug!(frames = entries.len(), dir = %dir.display(), "opened image directory");
        Ok(Self {
            entries,
            camera: None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode frame `idx` as 8-bit grayscale.
    pub fn load_gray(&self, idx: usize) -> Result<GrayImage> {
        let entry = self
            .entries
            .get(idx)
            .with_context(|| format!("No frame at index {}", idx))?;
        let img = image::open(&entry.path)
            .with_context(|| format!("Failed to read image {:?}", entry.path))?;
        Ok(img.to_luma8())
    }
}

fn load_image_list(csv_path: &Path, image_dir: &Path) -> Result<Vec<ImageEntry>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .from_path(csv_path)
        .with_context(|| format!("Failed to open {}", csv_path.display()))?;

    let mut entries = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        if rec.len() < 2 {
            continue;
        }
        let ts: u64 = rec[0]
            .trim()
            .parse()
            .with_context(|| format!("Bad timestamp {:?} in {}", &rec[0], csv_path.display()))?;
        entries.push(ImageEntry {
            timestamp_ns: ts,
            path: image_dir.join(rec[1].trim()),
        });
    }
    Ok(entries)
}

/// EuRoC camera sensor.yaml (only the fields used here).
#[derive(Debug, Deserialize)]
struct CameraYaml {
    /// [fx, fy, cx, cy]
    intrinsics: Vec<f64>,
}

fn load_camera(path: &Path) -> Result<CameraModel> {
    let yaml: CameraYaml = serde_yaml::from_reader(
        File::open(path).with_context(|| format!("Failed to open {:?}", path))?,
    )
    .with_context(|| format!("Failed to parse {:?}", path))?;

    let [fx, fy, cx, cy] = yaml.intrinsics[..] else {
        bail!(
            "Expected 4 intrinsics [fx, fy, cx, cy], got {}",
            yaml.intrinsics.len()
        );
    };
    let camera = CameraModel::new(fx, fy, cx, cy);
    if !camera.is_valid() {
        bail!("Invalid intrinsics in {:?}: {:?}", path, yaml.intrinsics);
    }
    Ok(camera)
}
