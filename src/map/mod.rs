//! Sparse map: landmarks plus the trajectory that observed them.

pub mod map;
pub mod map_point;
pub mod types;

pub use map::Map;
pub use map_point::MapPoint;
pub use types::MapPointId;
