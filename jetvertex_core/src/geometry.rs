//! Vertex geometry: distances, significances and V0 masses.

use jetvertex_fit::{delta_r, FourMomentum, PackedCovariance, PrimaryVertex, TrackAtVertex};
use nalgebra::{Matrix3, Vector3};

/// Distance returned when a significance cannot be computed.
pub const INVALID_DISTANCE: f64 = 1e10;

/// Inverts a combined covariance, rejecting non-positive weights.
fn weight_matrix(cov: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let w = cov.try_inverse()?;
    if w[(0, 0)] <= 0.0 || w[(1, 1)] <= 0.0 || w[(2, 2)] <= 0.0 {
        return None;
    }
    Some(w)
}

fn significance(diff: &Vector3<f64>, cov: &Matrix3<f64>) -> Option<f64> {
    let w = weight_matrix(cov)?;
    let s2 = (diff.transpose() * w * diff)[(0, 0)];
    if s2 <= 0.0 {
        return None;
    }
    let s = s2.sqrt();
    Some(if s.is_nan() { 0.0 } else { s })
}

/// 3D distance and its significance between the primary and a vertex.
///
/// On a degenerate covariance the distance is [`INVALID_DISTANCE`] and the
/// significance zero.
pub fn primary_distance(
    primary: &PrimaryVertex,
    position: &Vector3<f64>,
    cov: &PackedCovariance,
) -> (f64, f64) {
    let diff = primary.position - position;
    match significance(&diff, &(primary.covariance + cov.to_matrix())) {
        Some(s) => (diff.norm(), s),
        None => (INVALID_DISTANCE, 0.0),
    }
}

/// Significance of the vertex displacement projected on the jet axis,
/// negative when the vertex lies behind the primary.
pub fn projected_significance(
    primary: &PrimaryVertex,
    position: &Vector3<f64>,
    cov: &PackedCovariance,
    jet: &FourMomentum,
) -> f64 {
    let p = jet.vect();
    let norm = p.norm();
    if norm <= 0.0 {
        return INVALID_DISTANCE;
    }
    let dir = p / norm;
    let proj = (position - primary.position).dot(&dir);
    let diff = dir * proj;
    match significance(&diff, &(primary.covariance + cov.to_matrix())) {
        Some(s) if proj < 0.0 => -s,
        Some(s) => s,
        None => INVALID_DISTANCE,
    }
}

/// Distance significance between two vertices.
pub fn vertex_vertex_significance(
    pos1: &Vector3<f64>,
    cov1: &PackedCovariance,
    pos2: &Vector3<f64>,
    cov2: &PackedCovariance,
) -> f64 {
    significance(&(pos1 - pos2), &(cov1.to_matrix() + cov2.to_matrix())).unwrap_or(INVALID_DISTANCE)
}

/// Error on the transverse radius of a vertex.
pub fn radius_error(position: &Vector3<f64>, cov: &PackedCovariance) -> f64 {
    let (x, y) = (position.x, position.y);
    let r2 = x * x + y * y;
    if r2 <= 0.0 {
        return 0.0;
    }
    let c = &cov.0;
    let var = (x * c[0] * x + 2.0 * x * c[1] * y + y * c[2] * y) / r2;
    let err = var.sqrt();
    if err.is_nan() {
        0.0
    } else {
        err
    }
}

/// Signed distance of the vertex from the primary along the jet axis.
pub fn projected_distance(position: &Vector3<f64>, primary: &PrimaryVertex, jet: &FourMomentum) -> f64 {
    let p = jet.p();
    if p <= 0.0 {
        return 0.0;
    }
    (position - primary.position).dot(&jet.vect()) / p
}

/// Cosine between the jet axis and the primary-to-vertex direction.
pub fn direction_cosine(position: &Vector3<f64>, primary: &PrimaryVertex, jet: &FourMomentum) -> f64 {
    let d = position - primary.position;
    let (dn, jn) = (d.norm(), jet.p());
    if dn <= 0.0 || jn <= 0.0 {
        return 0.0;
    }
    d.dot(&jet.vect()) / (dn * jn)
}

/// ΔR between the jet and the primary-to-vertex line, oriented along the jet.
pub fn cone_distance(position: &Vector3<f64>, primary: &PrimaryVertex, jet: &FourMomentum) -> f64 {
    let d = position - primary.position;
    if d.dot(&jet.vect()) > 0.0 {
        delta_r(&jet.vect(), &d)
    } else {
        delta_r(&jet.vect(), &(-d))
    }
}

/// ΔR between the jet and the primary-to-vertex vector, unoriented.
pub fn vertex_delta_r(position: &Vector3<f64>, primary: &PrimaryVertex, jet: &FourMomentum) -> f64 {
    delta_r(&jet.vect(), &(position - primary.position))
}

/// Two-track invariant mass assigning `heavy_mass` to the harder track.
pub fn mass_v0(params: &[TrackAtVertex], heavy_mass: f64, light_mass: f64) -> f64 {
    if params.len() < 2 {
        return 0.0;
    }
    let ap1 = 1.0 / params[0].qoverp.abs();
    let ap2 = 1.0 / params[1].qoverp.abs();
    let (m1, m2) = if ap1 > ap2 {
        (heavy_mass, light_mass)
    } else {
        (light_mass, heavy_mass)
    };
    let total = params[0].momentum(m1) + params[1].momentum(m2);
    total.mass()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use jetvertex_fit::{ELECTRON_MASS, PION_MASS, PROTON_MASS};

    fn primary() -> PrimaryVertex {
        PrimaryVertex::new(Vector3::zeros(), Matrix3::identity() * 1e-4)
    }

    fn cov(sigma: f64) -> PackedCovariance {
        let s2 = sigma * sigma;
        PackedCovariance([s2, 0.0, s2, 0.0, 0.0, s2])
    }

    #[test]
    fn test_primary_distance_significance() {
        let (dist, sig) = primary_distance(&primary(), &Vector3::new(3.0, 4.0, 0.0), &cov(0.1));
        assert_relative_eq!(dist, 5.0);
        let sigma = (0.01f64 + 1e-4).sqrt();
        assert_relative_eq!(sig, 5.0 / sigma, max_relative = 1e-9);
    }

    #[test]
    fn test_projected_significance_sign() {
        let jet = FourMomentum::new(100.0, 0.0, 0.0, 100.0);
        let ahead = projected_significance(&primary(), &Vector3::new(2.0, 1.0, 0.0), &cov(0.1), &jet);
        let behind = projected_significance(&primary(), &Vector3::new(-2.0, 1.0, 0.0), &cov(0.1), &jet);
        assert!(ahead > 0.0);
        assert_relative_eq!(ahead, -behind, max_relative = 1e-12);
    }

    #[test]
    fn test_degenerate_covariance() {
        let zero = PackedCovariance::default();
        let p = PrimaryVertex::new(Vector3::zeros(), Matrix3::zeros());
        let (dist, sig) = primary_distance(&p, &Vector3::new(1.0, 0.0, 0.0), &zero);
        assert_eq!(dist, INVALID_DISTANCE);
        assert_eq!(sig, 0.0);
        assert_eq!(
            vertex_vertex_significance(&Vector3::zeros(), &zero, &Vector3::x(), &zero),
            INVALID_DISTANCE
        );
    }

    #[test]
    fn test_radius_error_along_x() {
        let c = PackedCovariance([0.04, 0.0, 0.09, 0.0, 0.0, 1.0]);
        assert_relative_eq!(radius_error(&Vector3::new(10.0, 0.0, 5.0), &c), 0.2);
        assert_relative_eq!(radius_error(&Vector3::new(0.0, -3.0, 0.0), &c), 0.3);
    }

    #[test]
    fn test_projected_distance_and_cone() {
        let jet = FourMomentum::new(0.0, 50.0, 0.0, 60.0);
        let pos = Vector3::new(0.0, 7.0, 0.0);
        assert_relative_eq!(projected_distance(&pos, &primary(), &jet), 7.0);
        assert_relative_eq!(direction_cosine(&pos, &primary(), &jet), 1.0);
        assert!(cone_distance(&pos, &primary(), &jet) < 1e-9);
        assert!(cone_distance(&(-pos), &primary(), &jet) < 1e-9);
        assert!(vertex_delta_r(&(-pos), &primary(), &jet) > 3.0);
    }

    #[test]
    fn test_mass_v0_assigns_heavy_to_harder_track() {
        let soft = TrackAtVertex { phi: 0.2, theta: 1.5, qoverp: -1.0 / 400.0 };
        let hard = TrackAtVertex { phi: 0.0, theta: 1.6, qoverp: 1.0 / 3000.0 };
        let forward = mass_v0(&[hard, soft], PROTON_MASS, PION_MASS);
        let backward = mass_v0(&[soft, hard], PROTON_MASS, PION_MASS);
        assert_relative_eq!(forward, backward, max_relative = 1e-12);
        assert!(forward > PROTON_MASS + PION_MASS);

        let ee = mass_v0(&[hard, soft], ELECTRON_MASS, ELECTRON_MASS);
        assert!(ee < forward);
    }
}
