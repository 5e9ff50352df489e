//! Four-momenta and particle masses (MeV).

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Charged pion mass
pub const PION_MASS: f64 = 139.5702;
/// Proton mass
pub const PROTON_MASS: f64 = 938.272;
/// Electron mass
pub const ELECTRON_MASS: f64 = 0.510999;
/// Neutral kaon mass
pub const K0_MASS: f64 = 497.648;
/// Lambda baryon mass
pub const LAMBDA_MASS: f64 = 1115.683;
/// B meson mass
pub const B_MASS: f64 = 5279.4;

/// A Lorentz four-vector (px, py, pz, E).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FourMomentum {
    pub px: f64,
    pub py: f64,
    pub pz: f64,
    pub e: f64,
}

impl FourMomentum {
    pub fn new(px: f64, py: f64, pz: f64, e: f64) -> Self {
        Self { px, py, pz, e }
    }

    /// Builds the four-momentum of a particle with the given mass from
    /// helix-style parameters (phi, theta, q/p).
    pub fn from_track_params(phi: f64, theta: f64, qoverp: f64, mass: f64) -> Self {
        let p = if qoverp.abs() > 0.0 { 1.0 / qoverp.abs() } else { 0.0 };
        let pt = p * theta.sin();
        let px = pt * phi.cos();
        let py = pt * phi.sin();
        let pz = p * theta.cos();
        Self::new(px, py, pz, (p * p + mass * mass).sqrt())
    }

    /// Three-momentum.
    #[inline]
    pub fn vect(&self) -> Vector3<f64> {
        Vector3::new(self.px, self.py, self.pz)
    }

    pub fn p(&self) -> f64 {
        self.vect().norm()
    }

    pub fn pt(&self) -> f64 {
        self.px.hypot(self.py)
    }

    /// Invariant mass; negative mass squared from rounding is clamped to zero.
    pub fn mass(&self) -> f64 {
        let m2 = self.e * self.e - self.vect().norm_squared();
        if m2 > 0.0 {
            m2.sqrt()
        } else {
            0.0
        }
    }

    pub fn phi(&self) -> f64 {
        vector_phi(&self.vect())
    }

    pub fn eta(&self) -> f64 {
        vector_eta(&self.vect())
    }

    /// Angular distance in (eta, phi) to another direction.
    pub fn delta_r(&self, direction: &Vector3<f64>) -> f64 {
        delta_r(&self.vect(), direction)
    }
}

impl Add for FourMomentum {
    type Output = FourMomentum;

    fn add(self, rhs: FourMomentum) -> FourMomentum {
        FourMomentum::new(
            self.px + rhs.px,
            self.py + rhs.py,
            self.pz + rhs.pz,
            self.e + rhs.e,
        )
    }
}

impl AddAssign for FourMomentum {
    fn add_assign(&mut self, rhs: FourMomentum) {
        *self = *self + rhs;
    }
}

impl Sum for FourMomentum {
    fn sum<I: Iterator<Item = FourMomentum>>(iter: I) -> Self {
        iter.fold(FourMomentum::default(), |acc, p| acc + p)
    }
}

/// Azimuth of a vector, in (-pi, pi].
pub fn vector_phi(v: &Vector3<f64>) -> f64 {
    if v.x == 0.0 && v.y == 0.0 {
        0.0
    } else {
        v.y.atan2(v.x)
    }
}

/// Pseudorapidity of a vector. Vectors along the beam get a large finite value.
pub fn vector_eta(v: &Vector3<f64>) -> f64 {
    let pt = v.x.hypot(v.y);
    if pt < 1e-12 {
        return if v.z >= 0.0 { 1e10 } else { -1e10 };
    }
    (v.z / pt).asinh()
}

/// Wraps an azimuthal difference into [-pi, pi].
pub fn wrap_phi(mut dphi: f64) -> f64 {
    while dphi > PI {
        dphi -= 2.0 * PI;
    }
    while dphi < -PI {
        dphi += 2.0 * PI;
    }
    dphi
}

/// Angular distance sqrt(deta^2 + dphi^2) between two directions.
pub fn delta_r(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let deta = vector_eta(a) - vector_eta(b);
    let dphi = wrap_phi(vector_phi(a) - vector_phi(b));
    (deta * deta + dphi * dphi).sqrt()
}
