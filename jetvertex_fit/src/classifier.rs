//! Per-track probabilistic classifier and detector material lookup.

use crate::kinematics::FourMomentum;
use crate::track::Track;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Class probabilities for one track; the three weights sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackWeights {
    /// Track from a heavy-flavour decay
    pub signal: f64,
    /// Prompt fragmentation track
    pub fragmentation: f64,
    /// Pileup or material interaction
    pub pileup: f64,
}

impl TrackWeights {
    pub fn new(signal: f64, fragmentation: f64, pileup: f64) -> Self {
        Self { signal, fragmentation, pileup }
    }

    /// Weights that pass every gating cut.
    pub fn neutral() -> Self {
        Self::new(1.0, 0.0, 0.0)
    }

    /// Combined heavy-flavour score of a track pair:
    /// `s_i s_j (1 - f_i)(1 - f_j)(1 - p_i)(1 - p_j)`.
    pub fn pair_score(&self, other: &TrackWeights) -> f64 {
        self.signal
            * other.signal
            * (1.0 - self.fragmentation)
            * (1.0 - other.fragmentation)
            * (1.0 - self.pileup)
            * (1.0 - other.pileup)
    }
}

/// Primary vertex as seen by collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrimaryVertex {
    pub position: Vector3<f64>,
    pub covariance: Matrix3<f64>,
}

impl PrimaryVertex {
    pub fn new(position: Vector3<f64>, covariance: Matrix3<f64>) -> Self {
        Self { position, covariance }
    }
}

/// Track classifier (e.g. a boosted decision tree).
pub trait TrackClassifier: Send + Sync {
    fn classify(&self, track: &Track, primary: &PrimaryVertex, jet: &FourMomentum) -> TrackWeights;
}

/// Lookup of regions dominated by hadronic interactions in detector material.
pub trait MaterialVetoMap: Send + Sync {
    fn is_interaction_region(&self, position: &Vector3<f64>) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pair_score() {
        let a = TrackWeights::new(0.8, 0.1, 0.1);
        let b = TrackWeights::new(0.5, 0.5, 0.0);
        assert_relative_eq!(a.pair_score(&b), 0.8 * 0.5 * 0.9 * 0.5 * 0.9 * 1.0);
        assert_relative_eq!(TrackWeights::neutral().pair_score(&TrackWeights::neutral()), 1.0);
    }
}
