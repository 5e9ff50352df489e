//! Track representation.
//!
//! A [`Track`] is an immutable, caller-owned trajectory described by its
//! perigee parameters with respect to the global origin, together with the
//! hit summary used by the detector-level cleaning cuts.

use crate::kinematics::{FourMomentum, PION_MASS};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Bit positions inside [`HitSummary::hit_pattern`].
pub mod hit_bits {
    pub const PIXEL_BARREL_0: u32 = 0;
    pub const PIXEL_BARREL_1: u32 = 1;
    pub const PIXEL_BARREL_2: u32 = 2;
    pub const PIXEL_BARREL_3: u32 = 3;
    pub const PIXEL_ENDCAP_0: u32 = 4;
    pub const PIXEL_ENDCAP_1: u32 = 5;
    pub const PIXEL_ENDCAP_2: u32 = 6;
}

/// Perigee parameters (d0, z0, phi, theta, q/p) at the global origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Perigee {
    /// Signed transverse impact parameter (mm)
    pub d0: f64,
    /// Longitudinal impact parameter (mm)
    pub z0: f64,
    /// Azimuth of the momentum at the perigee
    pub phi: f64,
    /// Polar angle of the momentum
    pub theta: f64,
    /// Charge over momentum (1/MeV)
    pub qoverp: f64,
}

/// One-sigma errors on the impact parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerigeeErrors {
    pub sigma_d0: f64,
    pub sigma_z0: f64,
}

/// Silicon hit content of a track.
///
/// Counts of `-1` style "not expected" conditions are expressed through the
/// `expect_*` flags instead.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HitSummary {
    pub pixel_hits: u8,
    pub sct_hits: u8,
    pub pixel_holes: u8,
    /// Hits on the innermost pixel layer
    pub innermost_hits: u8,
    /// Hits on the next-to-innermost pixel layer
    pub next_innermost_hits: u8,
    pub expect_innermost: bool,
    pub expect_next_innermost: bool,
    pub innermost_shared: u8,
    pub innermost_split: u8,
    pub next_innermost_shared: u8,
    pub next_innermost_split: u8,
    /// Number of pixel layers contributing hits
    pub contributing_pixel_layers: u8,
    /// Bit-packed pattern of crossed layers, see [`hit_bits`]
    pub hit_pattern: u32,
    /// Transverse radius of the first measured point (mm)
    pub first_hit_radius: f64,
}

impl HitSummary {
    /// A track with hits on every pixel layer plus a full SCT segment.
    pub fn full_barrel() -> Self {
        use hit_bits::*;
        Self {
            pixel_hits: 4,
            sct_hits: 8,
            pixel_holes: 0,
            innermost_hits: 1,
            next_innermost_hits: 1,
            expect_innermost: true,
            expect_next_innermost: true,
            innermost_shared: 0,
            innermost_split: 0,
            next_innermost_shared: 0,
            next_innermost_split: 0,
            contributing_pixel_layers: 4,
            hit_pattern: (1 << PIXEL_BARREL_0)
                | (1 << PIXEL_BARREL_1)
                | (1 << PIXEL_BARREL_2)
                | (1 << PIXEL_BARREL_3),
            first_hit_radius: 33.25,
        }
    }

    #[inline]
    pub fn has_bit(&self, bit: u32) -> bool {
        self.hit_pattern & (1 << bit) != 0
    }

    pub fn silicon_hits(&self) -> u32 {
        self.pixel_hits as u32 + self.sct_hits as u32
    }
}

/// A reconstructed charged-particle trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub perigee: Perigee,
    pub errors: PerigeeErrors,
    /// Track fit chi2
    pub fit_chi2: f64,
    /// Track fit degrees of freedom
    pub ndf: u32,
    pub hits: HitSummary,
}

impl Track {
    pub fn new(perigee: Perigee, errors: PerigeeErrors, hits: HitSummary) -> Self {
        Self {
            perigee,
            errors,
            fit_chi2: 0.0,
            ndf: 1,
            hits,
        }
    }

    /// Builds the straight-line track that passes through `point` along the
    /// direction (phi, theta).
    pub fn through_point(
        point: &Vector3<f64>,
        phi: f64,
        theta: f64,
        qoverp: f64,
        errors: PerigeeErrors,
    ) -> Self {
        let t = Vector3::new(phi.cos(), phi.sin(), 0.0);
        let e1 = Vector3::new(-phi.sin(), phi.cos(), 0.0);
        // Move back along the line to the transverse point of closest approach.
        let s_t = point.x * t.x + point.y * t.y;
        let d0 = point.dot(&e1);
        let z0 = point.z - s_t * theta.cos() / theta.sin();
        Self::new(
            Perigee { d0, z0, phi, theta, qoverp },
            errors,
            HitSummary::full_barrel(),
        )
    }

    /// Replaces the hit summary.
    pub fn with_hits(mut self, hits: HitSummary) -> Self {
        self.hits = hits;
        self
    }

    /// Sets the track fit quality.
    pub fn with_fit_quality(mut self, chi2: f64, ndf: u32) -> Self {
        self.fit_chi2 = chi2;
        self.ndf = ndf;
        self
    }

    pub fn charge(&self) -> i32 {
        if self.perigee.qoverp >= 0.0 {
            1
        } else {
            -1
        }
    }

    pub fn p(&self) -> f64 {
        if self.perigee.qoverp == 0.0 {
            0.0
        } else {
            1.0 / self.perigee.qoverp.abs()
        }
    }

    pub fn pt(&self) -> f64 {
        self.p() * self.perigee.theta.sin()
    }

    pub fn eta(&self) -> f64 {
        -(0.5 * self.perigee.theta).tan().ln()
    }

    /// Fit chi2 per degree of freedom; tracks without dof count as perfect.
    pub fn chi2_per_ndf(&self) -> f64 {
        if self.ndf == 0 {
            0.0
        } else {
            self.fit_chi2 / self.ndf as f64
        }
    }

    /// Four-momentum under a mass hypothesis.
    pub fn momentum(&self, mass: f64) -> FourMomentum {
        FourMomentum::from_track_params(
            self.perigee.phi,
            self.perigee.theta,
            self.perigee.qoverp,
            mass,
        )
    }

    /// Four-momentum under the pion hypothesis.
    pub fn pion_momentum(&self) -> FourMomentum {
        self.momentum(PION_MASS)
    }

    /// Unit direction of flight.
    pub fn direction(&self) -> Vector3<f64> {
        let (st, ct) = self.perigee.theta.sin_cos();
        let (sp, cp) = self.perigee.phi.sin_cos();
        Vector3::new(st * cp, st * sp, ct)
    }

    /// Perigee point in global coordinates.
    pub fn perigee_point(&self) -> Vector3<f64> {
        let (sp, cp) = self.perigee.phi.sin_cos();
        Vector3::new(-self.perigee.d0 * sp, self.perigee.d0 * cp, self.perigee.z0)
    }
}
