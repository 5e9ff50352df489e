//! One candidate vertex per maximal clique.

use crate::context::JetContext;
use crate::vertex::{TrackIndex, WorkingSet};
use tracing::{debug, trace};

/// Fits every clique and collects the survivors into a fresh working set.
///
/// Failed fits and two-track cliques above the seed chi2 cut produce no
/// candidate.
pub fn seed_vertices(ctx: &JetContext<'_>, cliques: &[Vec<TrackIndex>]) -> WorkingSet {
    let max_pair_chi2 = ctx.config.reducer.seed_pair_chi2;
    let mut set = WorkingSet::new();
    for clique in cliques {
        let vertex = match ctx.fit_candidate(clique.clone(), 0) {
            Ok(v) => v,
            Err(e) => {
                trace!("clique {:?} not fitted: {}", clique, e);
                continue;
            }
        };
        if clique.len() == 2 && vertex.chi2 > max_pair_chi2 {
            continue;
        }
        set.push(vertex);
    }
    debug!("{} cliques seeded {} candidate vertices", cliques.len(), set.len());
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VertexingConfig;
    use jetvertex_fit::{FourMomentum, PerigeeErrors, PrimaryVertex, StraightLineFitter, Track};
    use nalgebra::{Matrix3, Vector3};

    #[test]
    fn test_cliques_become_candidates() {
        let pv = PrimaryVertex::new(Vector3::zeros(), Matrix3::identity() * 1e-4);
        let jet = FourMomentum::new(80_000.0, 0.0, 0.0, 80_500.0);
        let cfg = VertexingConfig::default();
        let fitter = StraightLineFitter::with_defaults();
        let err = PerigeeErrors { sigma_d0: 0.01, sigma_z0: 0.02 };
        let sv = Vector3::new(4.0, 0.2, 0.0);
        let tracks = [
            Track::through_point(&sv, 0.1, 1.5, 1.0 / 5000.0, err),
            Track::through_point(&sv, -0.15, 1.6, 1.0 / 4000.0, err),
            Track::through_point(&sv, 0.25, 1.45, 1.0 / 3000.0, err),
            Track::through_point(&Vector3::new(0.0, 0.0, 40.0), 1.0, 0.5, 1.0 / 3000.0, err),
        ];
        let refs: Vec<&Track> = tracks.iter().collect();
        let ctx = JetContext::new(refs, vec![0, 1, 2, 3], &pv, &jet, &cfg, &fitter, None, None);

        let set = seed_vertices(&ctx, &[vec![0, 1, 2], vec![0, 3]]);
        assert_eq!(set.len(), 1);
        let v = &set[0];
        assert_eq!(v.tracks, vec![0, 1, 2]);
        assert!((v.position - sv).norm() < 1e-3);
        assert!((v.projected_distance - 4.0).abs() < 1e-3);
    }
}
