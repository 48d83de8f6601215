//! Session orchestration.
//!
//! `SlamSystem` runs the whole monocular pipeline on the caller's thread and
//! owns all session state.

mod slam_system;

pub use slam_system::SlamSystem;
