//! Tracking state machine.

use serde::{Deserialize, Serialize};

/// State of the tracker after the latest frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackingState {
    /// No frame pair has been evaluated yet (fresh or reset session).
    #[default]
    NotInitialized,
    /// The last frame produced a motion estimate.
    Ok,
    /// The last frame could not be related to its predecessor.
    Lost,
}

impl TrackingState {
    pub fn is_tracking(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl std::fmt::Display for TrackingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::Ok => "OK",
            Self::Lost => "LOST",
        };
        f.write_str(s)
    }
}
