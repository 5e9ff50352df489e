//! Reference vertex fitter treating tracks as straight lines.
//!
//! Near the interaction region the curvature of a track over a few
//! centimetres is small compared to its impact-parameter resolution, so each
//! track is modelled as the line through its perigee point along its
//! momentum. A vertex is the point minimizing
//!
//! ```text
//! chi2(x) = Σ_i w_i (x - a_i)ᵀ W_i (x - a_i)
//! W_i     = e1 e1ᵀ / σ_d0² + e2 e2ᵀ / (σ_z0 sinθ)²
//! ```
//!
//! where `a_i` is the perigee point, `e1`/`e2` span the plane orthogonal to
//! the track direction and `w_i` are robust weights (all 1 unless the fit
//! state asks for robustness). The minimum is linear: `x = A⁻¹ b` with
//! `A = Σ w_i W_i`, `b = Σ w_i W_i a_i`, and `A⁻¹` is the position covariance.

use crate::error::FitError;
use crate::kinematics::FourMomentum;
use crate::service::{
    Constraint, FitState, Impact, PackedCovariance, TrackAtVertex, VertexFit, VertexFitService,
};
use crate::track::Track;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Tuning of the straight-line fitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StraightLineConfig {
    /// Maximum reweighting iterations in robust mode (default: 50)
    pub max_iterations: u32,

    /// Position change below which a robust fit is settled (default: 1e-5 mm)
    pub convergence_tolerance: f64,

    /// Cauchy scale for robust down-weighting, in chi2 units (default: 9.0)
    pub robust_scale: f64,

    /// Mass resolution used by mass constraints (default: 10 MeV)
    pub mass_resolution: f64,

    /// Opening-angle resolution used by conversion constraints (default: 5 mrad)
    pub opening_angle_resolution: f64,

    /// Relative determinant floor below which the normal matrix is singular
    pub singularity_threshold: f64,
}

impl Default for StraightLineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            convergence_tolerance: 1e-5,
            robust_scale: 9.0,
            mass_resolution: 10.0,
            opening_angle_resolution: 0.005,
            singularity_threshold: 1e-14,
        }
    }
}

// ============================================================================
// LINE MODEL
// ============================================================================

/// One track linearized as a weighted line.
struct LineTerm {
    point: Vector3<f64>,
    weight: Matrix3<f64>,
}

impl LineTerm {
    fn from_track(track: &Track) -> Result<Self, FitError> {
        let sin_theta = track.perigee.theta.sin();
        if !(sin_theta > 1e-6) {
            return Err(FitError::degenerate("theta outside (0, pi)"));
        }
        if !(track.errors.sigma_d0 > 0.0 && track.errors.sigma_z0 > 0.0) {
            return Err(FitError::degenerate("non-positive impact parameter error"));
        }

        let u = track.direction();
        let (sp, cp) = track.perigee.phi.sin_cos();
        let e1 = Vector3::new(-sp, cp, 0.0);
        let e2 = u.cross(&e1);

        let s1 = track.errors.sigma_d0;
        let s2 = track.errors.sigma_z0 * sin_theta;
        let weight = e1 * e1.transpose() / (s1 * s1) + e2 * e2.transpose() / (s2 * s2);

        Ok(Self {
            point: track.perigee_point(),
            weight,
        })
    }

    #[inline]
    fn chi2(&self, x: &Vector3<f64>) -> f64 {
        let r = x - self.point;
        (r.transpose() * self.weight * r)[(0, 0)]
    }
}

// ============================================================================
// FITTER
// ============================================================================

/// Linear least-squares vertex fitter on straight-line tracks.
#[derive(Debug, Clone, Default)]
pub struct StraightLineFitter {
    config: StraightLineConfig,
}

impl StraightLineFitter {
    pub fn new(config: StraightLineConfig) -> Self {
        Self { config }
    }

    /// Creates a fitter with default tuning.
    pub fn with_defaults() -> Self {
        Self::new(StraightLineConfig::default())
    }

    pub fn config(&self) -> &StraightLineConfig {
        &self.config
    }

    /// Solves the weighted normal equations.
    fn solve(
        &self,
        terms: &[LineTerm],
        weights: &[f64],
    ) -> Result<(Vector3<f64>, Matrix3<f64>), FitError> {
        let mut a = Matrix3::zeros();
        let mut b = Vector3::zeros();
        for (term, w) in terms.iter().zip(weights) {
            let ww = term.weight * *w;
            a += ww;
            b += ww * term.point;
        }

        // Rank-deficient systems (parallel tracks) can survive Cholesky
        // through rounding, so test the conditioning first.
        let scale = a.trace() / 3.0;
        if !(scale > 0.0) || a.determinant() <= self.config.singularity_threshold * scale.powi(3) {
            return Err(FitError::SingularMatrix);
        }
        let chol = a.cholesky().ok_or(FitError::SingularMatrix)?;
        let x = chol.solve(&b);
        let cov = chol.inverse();
        if !x.iter().all(|v| v.is_finite()) {
            return Err(FitError::SingularMatrix);
        }
        Ok((x, cov))
    }

    /// Cauchy weight of a track with the given chi2.
    #[inline]
    fn robust_weight(&self, chi2: f64) -> f64 {
        1.0 / (1.0 + chi2 / self.config.robust_scale)
    }

    fn constraint_chi2(&self, tracks: &[&Track], state: &FitState, momentum: &FourMomentum) -> f64 {
        match state.constraint {
            Constraint::None => 0.0,
            Constraint::Mass(m) => {
                let pull = (momentum.mass() - m) / self.config.mass_resolution;
                pull * pull
            }
            Constraint::ZeroOpeningAngle => {
                if tracks.len() != 2 {
                    return 0.0;
                }
                let cos = tracks[0].direction().dot(&tracks[1].direction()).clamp(-1.0, 1.0);
                let pull = cos.acos() / self.config.opening_angle_resolution;
                pull * pull
            }
        }
    }
}

impl VertexFitService for StraightLineFitter {
    fn fit(&self, tracks: &[&Track], state: &mut FitState) -> Result<VertexFit, FitError> {
        if tracks.len() < 2 {
            return Err(FitError::too_few(2, tracks.len()));
        }
        let terms = tracks
            .iter()
            .map(|t| LineTerm::from_track(t))
            .collect::<Result<Vec<_>, _>>()?;

        // Step 1: plain least-squares solution
        let mut weights = vec![1.0; terms.len()];
        let (mut x, mut cov) = self.solve(&terms, &weights)?;

        // Step 2: iteratively reweighted solution in robust mode
        if state.robustness > 0 {
            let mut settled = false;
            for _ in 0..self.config.max_iterations {
                for (w, term) in weights.iter_mut().zip(&terms) {
                    *w = self.robust_weight(term.chi2(&x));
                }
                let (x_new, cov_new) = self.solve(&terms, &weights)?;
                let step = (x_new - x).norm();
                x = x_new;
                cov = cov_new;
                if step < self.config.convergence_tolerance {
                    settled = true;
                    break;
                }
            }
            if !settled {
                return Err(FitError::NonConvergence(self.config.max_iterations));
            }
        }

        // Step 3: per-track chi2, kinematics and constraint penalty
        let chi2_per_track: Vec<f64> = terms.iter().map(|t| t.chi2(&x)).collect();
        let track_params: Vec<TrackAtVertex> = tracks
            .iter()
            .map(|t| TrackAtVertex {
                phi: t.perigee.phi,
                theta: t.perigee.theta,
                qoverp: t.perigee.qoverp,
            })
            .collect();
        let momentum: FourMomentum = track_params
            .iter()
            .enumerate()
            .map(|(i, p)| p.momentum(state.mass(i)))
            .sum();
        let charge = tracks.iter().map(|t| t.charge()).sum();

        let chi2 = chi2_per_track
            .iter()
            .zip(&weights)
            .map(|(c, w)| c * w)
            .sum::<f64>()
            + self.constraint_chi2(tracks, state, &momentum);

        state.track_weights = weights;

        Ok(VertexFit {
            position: x,
            covariance: PackedCovariance::from_matrix(&cov),
            momentum,
            charge,
            chi2,
            chi2_per_track,
            track_params,
        })
    }

    fn fast_fit(&self, tracks: &[&Track], _state: &mut FitState) -> Result<Vector3<f64>, FitError> {
        if tracks.len() < 2 {
            return Err(FitError::too_few(2, tracks.len()));
        }

        // Average of the pairwise points of closest approach.
        let mut sum = Vector3::zeros();
        let mut count = 0usize;
        for i in 0..tracks.len() {
            for j in (i + 1)..tracks.len() {
                if let Some(mid) = closest_approach_midpoint(tracks[i], tracks[j]) {
                    sum += mid;
                    count += 1;
                }
            }
        }
        if count == 0 {
            return Err(FitError::NoSeed);
        }
        Ok(sum / count as f64)
    }

    fn impact(&self, track: &Track, point: &Vector3<f64>) -> Result<Impact, FitError> {
        let sin_theta = track.perigee.theta.sin();
        if !(sin_theta > 1e-6) || !(track.errors.sigma_d0 > 0.0 && track.errors.sigma_z0 > 0.0) {
            return Err(FitError::degenerate("cannot extrapolate track"));
        }
        let u = track.direction();
        let (sp, cp) = track.perigee.phi.sin_cos();
        let e1 = Vector3::new(-sp, cp, 0.0);
        let e2 = u.cross(&e1);

        let v = track.perigee_point() - point;
        let v_perp = v - u * v.dot(&u);
        let d0 = v_perp.dot(&e1);
        let l = v_perp.dot(&e2);

        let sigma_d0 = track.errors.sigma_d0;
        let sigma_z0 = track.errors.sigma_z0;
        let sig_l = sigma_z0 * sin_theta;
        let significance = ((d0 / sigma_d0).powi(2) + (l / sig_l).powi(2)).sqrt();

        Ok(Impact {
            d0,
            z0: l / sin_theta,
            sigma_d0,
            sigma_z0,
            significance,
        })
    }

    fn neutral_impact(&self, vertex: &VertexFit, point: &Vector3<f64>) -> Result<Impact, FitError> {
        let p = vertex.momentum.vect();
        let norm = p.norm();
        if !(norm > 0.0) {
            return Err(FitError::degenerate("neutral candidate without momentum"));
        }
        let u = p / norm;
        let v = vertex.position - point;
        let v_perp = v - u * v.dot(&u);
        let dist = v_perp.norm();

        let cov = vertex.covariance.to_matrix();
        let sigma_xy = (cov[(0, 0)] + cov[(1, 1)]).max(0.0).sqrt();
        let sigma_z = cov[(2, 2)].max(0.0).sqrt();
        if dist < 1e-12 {
            return Ok(Impact {
                d0: 0.0,
                z0: 0.0,
                sigma_d0: sigma_xy,
                sigma_z0: sigma_z,
                significance: 0.0,
            });
        }

        let n = v_perp / dist;
        let variance = (n.transpose() * cov * n)[(0, 0)];
        if !(variance > 0.0) {
            return Err(FitError::SingularMatrix);
        }

        Ok(Impact {
            d0: v_perp.x.hypot(v_perp.y),
            z0: v_perp.z,
            sigma_d0: sigma_xy,
            sigma_z0: sigma_z,
            significance: dist / variance.sqrt(),
        })
    }
}

/// Midpoint of the shortest segment between two track lines, `None` when the
/// lines are (nearly) parallel.
fn closest_approach_midpoint(a: &Track, b: &Track) -> Option<Vector3<f64>> {
    let (p1, u1) = (a.perigee_point(), a.direction());
    let (p2, u2) = (b.perigee_point(), b.direction());
    let w = p1 - p2;
    let c = u1.dot(&u2);
    let denom = 1.0 - c * c;
    if denom < 1e-10 {
        return None;
    }
    let d = u1.dot(&w);
    let e = u2.dot(&w);
    let s = (c * e - d) / denom;
    let t = (e - c * d) / denom;
    Some(0.5 * ((p1 + u1 * s) + (p2 + u2 * t)))
}
