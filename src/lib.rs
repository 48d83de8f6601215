pub mod config;
pub mod error;
pub mod geometry;
pub mod io;
pub mod map;
pub mod system;
pub mod tracking;
pub mod viz;

pub use config::SlamConfig;
pub use error::{Result, SlamError};
pub use geometry::SE3;
pub use system::SlamSystem;
pub use tracking::frame::CameraModel;
pub use tracking::{FrameResult, TrackingState};
