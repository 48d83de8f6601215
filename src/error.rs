//! Error taxonomy for the SLAM core.
//!
//! Per-frame conditions (`InsufficientMatches`, `DegenerateGeometry`,
//! `InvalidTriangulation`) are recoverable: the session folds them into the
//! frame result and keeps the previous pose. Persistence conditions are
//! returned to the caller and never touch the in-memory map.

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, SlamError>;

#[derive(Debug, thiserror::Error)]
pub enum SlamError {
    /// Fewer correspondences than the solver needs.
    #[error("insufficient matches: {found} found, {required} required")]
    InsufficientMatches { found: usize, required: usize },

    /// Essential matrix is singular, the scene has no parallax, or too few
    /// inliers survived RANSAC / cheirality.
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// Every triangulated point was rejected by the depth filter.
    #[error("no valid triangulated points")]
    InvalidTriangulation,

    /// Map blob could not be parsed or failed validation.
    #[error("corrupted map file: {0}")]
    CorruptedMapFile(String),

    /// Storage could not be read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration values out of range or unparsable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SlamError {
    /// Whether the per-frame pipeline may continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InsufficientMatches { .. } | Self::DegenerateGeometry(_) | Self::InvalidTriangulation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_frame_errors_are_recoverable() {
        assert!(SlamError::InsufficientMatches { found: 3, required: 15 }.is_recoverable());
        assert!(SlamError::DegenerateGeometry("no parallax".into()).is_recoverable());
        assert!(SlamError::InvalidTriangulation.is_recoverable());
        assert!(!SlamError::CorruptedMapFile("bad magic".into()).is_recoverable());
    }

    #[test]
    fn test_display_mentions_counts() {
        let err = SlamError::InsufficientMatches { found: 14, required: 15 };
        assert_eq!(err.to_string(), "insufficient matches: 14 found, 15 required");
    }
}
