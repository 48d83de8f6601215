//! Input and output: image sequences, map files and trajectory export.

pub mod euroc;
pub mod persistence;
pub mod trajectory;

pub use euroc::ImageSequence;
pub use persistence::{load_map, save_map, MapSnapshot};
pub use trajectory::write_trajectory_csv;
