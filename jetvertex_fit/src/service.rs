//! The vertex fit service contract.
//!
//! The vertexing engine never fits anything itself. It asks a
//! [`VertexFitService`] for fits, quick seed estimates and impact
//! parameters, passing an explicit [`FitState`] per attempt.

use crate::error::FitError;
use crate::kinematics::{FourMomentum, PION_MASS};
use crate::track::Track;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

// ============================================================================
// PACKED COVARIANCE
// ============================================================================

/// Symmetric 3x3 covariance stored as (xx, xy, yy, xz, yz, zz).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PackedCovariance(pub [f64; 6]);

impl PackedCovariance {
    pub fn from_matrix(m: &Matrix3<f64>) -> Self {
        Self([m[(0, 0)], m[(0, 1)], m[(1, 1)], m[(0, 2)], m[(1, 2)], m[(2, 2)]])
    }

    pub fn to_matrix(&self) -> Matrix3<f64> {
        let c = &self.0;
        Matrix3::new(
            c[0], c[1], c[3], //
            c[1], c[2], c[4], //
            c[3], c[4], c[5],
        )
    }

    pub fn xx(&self) -> f64 {
        self.0[0]
    }

    pub fn yy(&self) -> f64 {
        self.0[2]
    }

    pub fn zz(&self) -> f64 {
        self.0[5]
    }
}

// ============================================================================
// FIT STATE
// ============================================================================

/// Kinematic constraint applied during a fit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Constraint {
    #[default]
    None,
    /// Invariant mass of the fitted tracks fixed to the value (MeV)
    Mass(f64),
    /// Two tracks with zero opening angle (photon conversion)
    ZeroOpeningAngle,
}

/// Mutable per-attempt fit configuration.
///
/// One value per fit attempt; never share a state between concurrent fits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitState {
    /// Linearization point; the origin when unset
    pub approximate_vertex: Option<Vector3<f64>>,
    /// Per-track mass hypotheses; pions when empty
    pub masses: Vec<f64>,
    pub constraint: Constraint,
    /// 0 = plain least squares, higher values down-weight outliers harder
    pub robustness: u32,
    /// Per-track weights written back by robust fits
    pub track_weights: Vec<f64>,
}

impl Default for FitState {
    fn default() -> Self {
        Self::new()
    }
}

impl FitState {
    pub fn new() -> Self {
        Self {
            approximate_vertex: None,
            masses: Vec::new(),
            constraint: Constraint::None,
            robustness: 0,
            track_weights: Vec::new(),
        }
    }

    pub fn with_approximate_vertex(mut self, position: Vector3<f64>) -> Self {
        self.approximate_vertex = Some(position);
        self
    }

    pub fn with_masses(mut self, masses: Vec<f64>) -> Self {
        self.masses = masses;
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = constraint;
        self
    }

    pub fn with_robustness(mut self, robustness: u32) -> Self {
        self.robustness = robustness;
        self
    }

    /// Mass hypothesis for track `i`.
    pub fn mass(&self, i: usize) -> f64 {
        self.masses.get(i).copied().unwrap_or(PION_MASS)
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// Fitted track parameters at the vertex.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackAtVertex {
    pub phi: f64,
    pub theta: f64,
    pub qoverp: f64,
}

impl TrackAtVertex {
    pub fn momentum(&self, mass: f64) -> FourMomentum {
        FourMomentum::from_track_params(self.phi, self.theta, self.qoverp, mass)
    }
}

/// Result of a successful vertex fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexFit {
    pub position: Vector3<f64>,
    pub covariance: PackedCovariance,
    pub momentum: FourMomentum,
    pub charge: i32,
    pub chi2: f64,
    /// Chi2 contribution of each input track, in input order
    pub chi2_per_track: Vec<f64>,
    /// Track parameters at the vertex, in input order
    pub track_params: Vec<TrackAtVertex>,
}

impl VertexFit {
    pub fn ndf(&self) -> i32 {
        2 * self.chi2_per_track.len() as i32 - 3
    }
}

/// Impact parameters of a track (or neutral candidate) w.r.t. a point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Impact {
    /// Transverse impact parameter
    pub d0: f64,
    /// Longitudinal impact parameter
    pub z0: f64,
    pub sigma_d0: f64,
    pub sigma_z0: f64,
    /// Combined 3D significance
    pub significance: f64,
}

// ============================================================================
// SERVICE TRAIT
// ============================================================================

/// Non-linear vertex fitting service.
///
/// Implementations must be pure with respect to `self`: all mutable state
/// lives in the caller-supplied [`FitState`].
pub trait VertexFitService: Send + Sync {
    /// Full vertex fit of the given tracks.
    fn fit(&self, tracks: &[&Track], state: &mut FitState) -> Result<VertexFit, FitError>;

    /// Cheap position estimate used to seed [`fit`](Self::fit).
    fn fast_fit(&self, tracks: &[&Track], state: &mut FitState) -> Result<Vector3<f64>, FitError>;

    /// Impact parameters of a charged track w.r.t. `point`.
    fn impact(&self, track: &Track, point: &Vector3<f64>) -> Result<Impact, FitError>;

    /// Impact parameters of the neutral particle reconstructed by `vertex`
    /// (a line through the vertex along its total momentum) w.r.t. `point`.
    fn neutral_impact(&self, vertex: &VertexFit, point: &Vector3<f64>) -> Result<Impact, FitError>;
}
