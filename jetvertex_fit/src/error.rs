//! Error types for the vertex-fit collaborator layer.

use thiserror::Error;

/// Errors a [`VertexFitService`](crate::VertexFitService) can report.
///
/// The vertexing engine treats every variant the same way: the candidate
/// being fitted simply does not exist.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    /// Normal equations could not be inverted (parallel tracks, zero weights)
    #[error("Singular matrix in vertex fit")]
    SingularMatrix,

    /// Not enough tracks for the requested operation
    #[error("Too few tracks: need {needed}, got {got}")]
    TooFewTracks { needed: usize, got: usize },

    /// Fast fit could not produce any seed position
    #[error("No seed position could be estimated")]
    NoSeed,

    /// Track parameters or errors are unusable
    #[error("Degenerate track: {0}")]
    DegenerateTrack(String),

    /// Iterative fit did not settle
    #[error("Fit did not converge after {0} iterations")]
    NonConvergence(u32),
}

impl FitError {
    /// Creates a too-few-tracks error.
    pub fn too_few(needed: usize, got: usize) -> Self {
        Self::TooFewTracks { needed, got }
    }

    /// Creates a degenerate-track error.
    pub fn degenerate(msg: impl Into<String>) -> Self {
        Self::DegenerateTrack(msg.into())
    }
}
