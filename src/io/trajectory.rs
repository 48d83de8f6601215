//! Trajectory export as CSV: `index,tx,ty,tz,qx,qy,qz,qw`.

use std::path::Path;

use anyhow::{Context, Result};
use csv::WriterBuilder;

use crate::tracking::Trajectory;

pub fn write_trajectory_csv<P: AsRef<Path>>(trajectory: &Trajectory, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut wtr = WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    wtr.write_record(["index", "tx", "ty", "tz", "qx", "qy", "qz", "qw"])?;
    for (i, pose) in trajectory.iter().enumerate() {
        let t = &pose.translation;
        let q = pose.rotation.quaternion();
        wtr.serialize((i, t.x, t.y, t.z, q.i, q.j, q.k, q.w))?;
    }
    wtr.flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
