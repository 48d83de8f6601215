//! Map file serialization.
//!
//! A map is stored as a single JSON document carrying a format tag and
//! version. Saving goes through a sibling temporary file that is renamed
//! over the target once fully written; loading validates the whole document
//! before building a [`Map`].

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SlamError};
use crate::geometry::SE3;
use crate::map::{Map, MapPoint, MapPointId};
use crate::tracking::frame::{CameraModel, Descriptor, DESCRIPTOR_BYTES};
use crate::tracking::Trajectory;

// Map file format constants
pub const MAP_FORMAT: &str = "mono-slam-map";
pub const MAP_VERSION: u32 = 1;

/// Quaternions whose norm is below this cannot be normalised.
const MIN_QUATERNION_NORM: f64 = 1e-6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseRecord {
    pub translation: [f64; 3],
    /// `[x, y, z, w]`.
    pub rotation: [f64; 4],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapPointRecord {
    pub id: u64,
    pub position: [f64; 3],
    pub descriptor: Vec<u8>,
}

/// On-disk representation of a [`Map`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapSnapshot {
    pub format: String,
    pub version: u32,
    pub camera: CameraModel,
    pub trajectory_capacity: usize,
    pub trajectory: Vec<PoseRecord>,
    pub map_points: Vec<MapPointRecord>,
}

impl MapSnapshot {
    pub fn from_map(map: &Map) -> Self {
        let trajectory = map
            .trajectory()
            .iter()
            .map(|pose| {
                let q = pose.rotation.quaternion();
                PoseRecord {
                    translation: pose.translation.into(),
                    rotation: [q.i, q.j, q.k, q.w],
                }
            })
            .collect();

        let map_points = map
            .map_points()
            .iter()
            .map(|mp| MapPointRecord {
                id: mp.id.0,
                position: mp.position.into(),
                descriptor: mp.descriptor.as_bytes().to_vec(),
            })
            .collect();

        Self {
            format: MAP_FORMAT.to_string(),
            version: MAP_VERSION,
            camera: *map.camera(),
            trajectory_capacity: map.trajectory().capacity(),
            trajectory,
            map_points,
        }
    }

    /// Validate every field and build the map.
    pub fn into_map(self) -> Result<Map> {
        if self.format != MAP_FORMAT {
            return Err(corrupted(format!("unknown format tag {:?}", self.format)));
        }
        if self.version != MAP_VERSION {
            return Err(corrupted(format!("unsupported version {}", self.version)));
        }
        if !self.camera.is_valid() {
            return Err(corrupted("invalid camera intrinsics".to_string()));
        }
        if self.trajectory_capacity == 0 {
            return Err(corrupted("zero trajectory capacity".to_string()));
        }
        if self.trajectory.len() > self.trajectory_capacity {
            return Err(corrupted(format!(
                "{} poses exceed capacity {}",
                self.trajectory.len(),
                self.trajectory_capacity
            )));
        }

        let poses = self
            .trajectory
            .iter()
            .enumerate()
            .map(|(i, record)| pose_from_record(record).ok_or_else(|| corrupted(format!("pose {i} is invalid"))))
            .collect::<Result<Vec<SE3>>>()?;

        let mut seen = HashSet::with_capacity(self.map_points.len());
        let mut map_points = Vec::with_capacity(self.map_points.len());
        for record in self.map_points {
            if !seen.insert(record.id) {
                return Err(corrupted(format!("duplicate map point id {}", record.id)));
            }
            if !record.position.iter().all(|v| v.is_finite()) {
                return Err(corrupted(format!("map point {} has a non-finite position", record.id)));
            }
            let bytes: [u8; DESCRIPTOR_BYTES] = record.descriptor.as_slice().try_into().map_err(|_| {
                corrupted(format!(
                    "map point {} descriptor has {} bytes, expected {DESCRIPTOR_BYTES}",
                    record.id,
                    record.descriptor.len()
                ))
            })?;
            map_points.push(MapPoint::new(
                MapPointId::new(record.id),
                Vector3::from(record.position),
                Descriptor(bytes),
            ));
        }

        let trajectory = Trajectory::from_poses(self.trajectory_capacity, poses);
        Ok(Map::from_parts(self.camera, map_points, trajectory))
    }
}

fn corrupted(msg: String) -> SlamError {
    SlamError::CorruptedMapFile(msg)
}

fn pose_from_record(record: &PoseRecord) -> Option<SE3> {
    if !record.translation.iter().chain(&record.rotation).all(|v| v.is_finite()) {
        return None;
    }
    let [x, y, z, w] = record.rotation;
    let q = Quaternion::new(w, x, y, z);
    if q.norm() < MIN_QUATERNION_NORM {
        return None;
    }
    Some(SE3 {
        rotation: UnitQuaternion::from_quaternion(q),
        translation: Vector3::from(record.translation),
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Save the map to `path`, replacing any existing file only on success.
///
/// Missing parent directories are created.
pub fn save_map<P: AsRef<Path>>(map: &Map, path: P) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);
    let snapshot = MapSnapshot::from_map(map);

    let written = write_snapshot(&snapshot, &tmp).and_then(|()| fs::rename(&tmp, path).map_err(SlamError::from));
    if let Err(e) = written {
        if tmp.exists() {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                warn!("Failed to remove {}: {}", tmp.display(), cleanup);
            }
        }
        return Err(e);
    }

    info!(
        path = %path.display(),
        points = snapshot.map_points.len(),
        poses = snapshot.trajectory.len(),
        "map saved"
    );
    Ok(())
}

fn write_snapshot(snapshot: &MapSnapshot, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, snapshot).map_err(std::io::Error::from)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Read and validate a map file.
pub fn load_map<P: AsRef<Path>>(path: P) -> Result<Map> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let snapshot: MapSnapshot = serde_json::from_reader(reader).map_err(|e| {
        if e.is_io() {
            SlamError::Io(e.into())
        } else {
            corrupted(e.to_string())
        }
    })?;
    let map = snapshot.into_map()?;

    info!(
        path = %path.display(),
        points = map.num_map_points(),
        poses = map.trajectory().len(),
        "map loaded"
    );
    Ok(map)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    use super::*;

    fn sample_map() -> Map {
        let mut map = Map::new(CameraModel::new(520.0, 515.0, 318.0, 242.0), 5);
        for i in 0..4 {
            map.create_map_point(Vector3::new(i as f64, 1.0, 4.0), Descriptor([i as u8; DESCRIPTOR_BYTES]));
        }
        for i in 0..7 {
            map.trajectory_mut().push(SE3 {
                rotation: UnitQuaternion::from_euler_angles(0.0, 0.1 * i as f64, 0.0),
                translation: Vector3::new(i as f64, 0.0, 0.5),
            });
        }
        map
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("map.json");
        let map = sample_map();

        save_map(&map, &path).unwrap();
        assert!(!temp_path(&path).exists());

        let loaded = load_map(&path).unwrap();
        assert_eq!(loaded.num_map_points(), 4);
        assert_eq!(loaded.camera(), map.camera());
        assert_eq!(loaded.trajectory().len(), 5);
        assert_eq!(loaded.trajectory().capacity(), 5);
        for (a, b) in loaded.map_points().iter().zip(map.map_points()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.descriptor, b.descriptor);
            assert_relative_eq!(a.position, b.position);
        }
        for (a, b) in loaded.trajectory().iter().zip(map.trajectory().iter()) {
            assert_relative_eq!(a.translation, b.translation);
            assert_relative_eq!(a.rotation_matrix(), b.rotation_matrix(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_save_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("map.json");
        fs::write(&path, b"old contents").unwrap();

        save_map(&sample_map(), &path).unwrap();
        assert_eq!(load_map(&path).unwrap().num_map_points(), 4);
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runs").join("mh01").join("map.json");
        save_map(&sample_map(), &path).unwrap();
        assert!(!temp_path(&path).exists());
        assert_eq!(load_map(&path).unwrap().num_map_points(), 4);
    }

    #[test]
    fn test_save_under_a_file_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"file").unwrap();
        let path = blocker.join("map.json");
        let err = save_map(&sample_map(), &path).unwrap_err();
        assert!(matches!(err, SlamError::Io(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = load_map(dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, SlamError::Io(_)));
    }

    #[test]
    fn test_garbage_is_corrupted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("map.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(load_map(&path).unwrap_err(), SlamError::CorruptedMapFile(_)));
    }

    #[test]
    fn test_validation_rejects_bad_snapshots() {
        let good = MapSnapshot::from_map(&sample_map());

        let mut bad = good.clone();
        bad.format = "something-else".to_string();
        assert!(matches!(bad.into_map(), Err(SlamError::CorruptedMapFile(_))));

        let mut bad = good.clone();
        bad.version = MAP_VERSION + 1;
        assert!(bad.into_map().is_err());

        let mut bad = good.clone();
        bad.map_points[0].descriptor.pop();
        assert!(bad.into_map().is_err());

        let mut bad = good.clone();
        bad.map_points[1].id = bad.map_points[0].id;
        assert!(bad.into_map().is_err());

        let mut bad = good.clone();
        bad.map_points[2].position[1] = f64::NAN;
        assert!(bad.into_map().is_err());

        let mut bad = good.clone();
        bad.trajectory[0].rotation = [0.0; 4];
        assert!(bad.into_map().is_err());

        let mut bad = good.clone();
        bad.trajectory_capacity = 2;
        assert!(bad.into_map().is_err());

        let mut bad = good.clone();
        bad.camera.fx = -1.0;
        assert!(bad.into_map().is_err());

        assert!(good.into_map().is_ok());
    }
}
