//! Two-track vertex scan.
//!
//! Fits every pair of selected tracks, keeps the pairs that look like a
//! displaced heavy-flavour decay and records them as edges of the
//! [`CompatibilityGraph`]. Pairs consistent with a V0 decay, a photon
//! conversion or a material interaction are flagged and their tracks
//! remembered.

use crate::context::JetContext;
use crate::geometry::{cone_distance, mass_v0, primary_distance, radius_error};
use crate::graph::CompatibilityGraph;
use crate::pixel::{check_first_hits, check_two_track_vertex};
use crate::vertex::TrackIndex;
use jetvertex_fit::{
    Constraint, FitState, PackedCovariance, TrackAtVertex, ELECTRON_MASS, K0_MASS, LAMBDA_MASS,
    PION_MASS, PROTON_MASS,
};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Why an accepted pair is considered background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairFlag {
    Clean,
    K0,
    Lambda,
    Conversion,
    Material,
}

impl PairFlag {
    pub fn is_clean(self) -> bool {
        self == PairFlag::Clean
    }
}

/// An accepted two-track vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoTrackVertex {
    pub i: TrackIndex,
    pub j: TrackIndex,
    pub position: Vector3<f64>,
    pub covariance: PackedCovariance,
    pub chi2: f64,
    pub mass: f64,
    pub charge: i32,
    /// 3D distance significance from the primary vertex
    pub significance: f64,
    pub flag: PairFlag,
    /// Whether the pair became a graph edge
    pub in_graph: bool,
}

/// Result of the pair scan.
#[derive(Debug, Clone, Default)]
pub struct PairScan {
    pub graph: CompatibilityGraph,
    pub pairs: Vec<TwoTrackVertex>,
    /// Tracks of flagged pairs, unique and pt ordered
    pub tracks_from_v0: Vec<TrackIndex>,
    /// Tracks used by at least one graph edge, unique and pt ordered
    pub second_tracks: Vec<TrackIndex>,
    /// Number of graph edges per track
    pub multiplicity: Vec<usize>,
}

impl PairScan {
    /// Number of pairs that became graph edges.
    pub fn n_graph_pairs(&self) -> usize {
        self.pairs.iter().filter(|p| p.in_graph).count()
    }
}

/// Classifier gating of a single track.
fn track_usable(ctx: &JetContext<'_>, t: TrackIndex) -> bool {
    match ctx.weights_of(t) {
        None => true,
        Some(w) if ctx.near_primary() => w.pileup <= ctx.config.pairs.max_pileup_weight,
        Some(w) => w.signal != 0.0,
    }
}

/// Classifier gating of a pair.
fn pair_usable(ctx: &JetContext<'_>, i: TrackIndex, j: TrackIndex) -> bool {
    if !track_usable(ctx, j) {
        return false;
    }
    if ctx.near_primary() {
        return true;
    }
    match (ctx.weights_of(i), ctx.weights_of(j)) {
        (Some(a), Some(b)) => a.pair_score(b) >= ctx.config.pairs.min_classifier_score,
        _ => true,
    }
}

/// Mass-constraint hypothesis used to confirm a V0 candidate.
fn v0_hypothesis(flag: PairFlag, params: &[TrackAtVertex]) -> (Vec<f64>, Constraint) {
    match flag {
        PairFlag::K0 => (vec![PION_MASS, PION_MASS], Constraint::Mass(K0_MASS)),
        PairFlag::Lambda => {
            // proton on the harder track
            let masses = if params[0].qoverp.abs() < params[1].qoverp.abs() {
                vec![PROTON_MASS, PION_MASS]
            } else {
                vec![PION_MASS, PROTON_MASS]
            };
            (masses, Constraint::Mass(LAMBDA_MASS))
        }
        _ => (vec![ELECTRON_MASS, ELECTRON_MASS], Constraint::ZeroOpeningAngle),
    }
}

/// Scans all track pairs of the jet.
pub fn scan_pairs(ctx: &JetContext<'_>) -> PairScan {
    let n = ctx.n_tracks();
    let cfg = ctx.config;
    let cuts = &cfg.pairs;
    let v0 = &cfg.v0;
    let mut scan = PairScan {
        graph: CompatibilityGraph::new(n),
        multiplicity: vec![0; n],
        ..PairScan::default()
    };

    for i in 0..n.saturating_sub(1) {
        if !track_usable(ctx, i) {
            continue;
        }
        for j in i + 1..n {
            if !pair_usable(ctx, i, j) {
                continue;
            }

            let seed = ctx.seed_position(&[i, j]);
            let mut state = FitState::new()
                .with_approximate_vertex(seed)
                .with_robustness(cuts.robustness);
            let fit = match ctx.fit(&[i, j], &mut state) {
                Ok(fit) => fit,
                Err(e) => {
                    trace!("pair ({}, {}) fit failed: {}", i, j, e);
                    continue;
                }
            };

            let pos = fit.position;
            let perp = pos.x.hypot(pos.y);
            let mass = fit.momentum.mass();
            if fit.chi2 > cuts.max_chi2
                || pos.z.abs() > cfg.detector.pixel_half_length
                || perp > cuts.max_radius
                || mass > cuts.max_mass
            {
                continue;
            }

            let (_, significance) = primary_distance(ctx.primary, &pos, &fit.covariance);
            if cone_distance(&pos, ctx.primary, ctx.jet) > cfg.cone_for_tag {
                continue;
            }
            let sv_pv = pos - ctx.primary.position;
            if !ctx.near_primary() && sv_pv.dot(&ctx.jet.vect()) < 0.0 {
                continue;
            }
            let p_pair = fit.momentum.p();
            if p_pair > 0.0 && sv_pv.dot(&fit.momentum.vect()) / p_pair < cuts.min_momentum_projection {
                continue;
            }

            let (ti, tj) = (ctx.track(i), ctx.track(j));
            if cuts.pixel_cleaning && !check_two_track_vertex(ti, tj, &pos, &fit.covariance, &cfg.detector) {
                continue;
            }
            if cuts.first_hit_cleaning
                && !check_first_hits(ti, tj, &pos, &fit.covariance, cuts.first_hit_radius_gap)
            {
                continue;
            }

            let mut flag = PairFlag::Clean;
            if !ctx.near_primary() {
                if fit.charge == 0 && significance > v0.min_significance && mass < v0.max_mass {
                    let mass_ee = mass_v0(&fit.track_params, ELECTRON_MASS, ELECTRON_MASS);
                    if mass_ee < v0.conversion_mass {
                        flag = PairFlag::Conversion;
                    } else {
                        if (mass - K0_MASS).abs() < v0.k0_window {
                            flag = PairFlag::K0;
                        }
                        let mass_ppi = mass_v0(&fit.track_params, PROTON_MASS, PION_MASS);
                        if (mass_ppi - LAMBDA_MASS).abs() < v0.lambda_window {
                            flag = PairFlag::Lambda;
                        }
                    }

                    if !flag.is_clean() {
                        let (masses, constraint) = v0_hypothesis(flag, &fit.track_params);
                        let mut v0_state = FitState::new()
                            .with_approximate_vertex(pos)
                            .with_masses(masses)
                            .with_constraint(constraint);
                        if let Ok(v0_fit) = ctx.fit(&[i, j], &mut v0_state) {
                            match ctx.fitter.neutral_impact(&v0_fit, &ctx.primary.position) {
                                Ok(imp) if imp.significance <= v0.impact_significance => {}
                                _ => flag = PairFlag::Clean,
                            }
                        }
                    }
                }

                if let Some(map) = ctx.material {
                    if map.is_interaction_region(&pos) {
                        flag = PairFlag::Material;
                    }
                } else {
                    // without a classifier every track counts as pileup-like
                    let min_pileup = match (ctx.weights_of(i), ctx.weights_of(j)) {
                        (Some(a), Some(b)) => a.pileup.min(b.pileup),
                        _ => 1.0,
                    };
                    let inner = cfg.detector.beampipe.radius - radius_error(&pos, &fit.covariance);
                    if min_pileup > cuts.material_pileup_weight && perp > inner {
                        flag = PairFlag::Material;
                    }
                }
            }

            // a material map makes every flagged pair unusable
            let in_graph = flag.is_clean() || !(cuts.reject_flagged || ctx.material.is_some());
            if !flag.is_clean() {
                scan.tracks_from_v0.push(i);
                scan.tracks_from_v0.push(j);
            }
            if in_graph {
                scan.graph.add_edge(i, j);
                scan.multiplicity[i] += 1;
                scan.multiplicity[j] += 1;
            }
            scan.pairs.push(TwoTrackVertex {
                i,
                j,
                position: pos,
                covariance: fit.covariance,
                chi2: fit.chi2,
                mass,
                charge: fit.charge,
                significance,
                flag,
                in_graph,
            });
        }
    }

    scan.tracks_from_v0.sort_unstable();
    scan.tracks_from_v0.dedup();
    scan.second_tracks = (0..n).filter(|&t| scan.multiplicity[t] > 0).collect();
    debug!(
        "pair scan: {} accepted pairs, {} graph edges, {} second tracks, {} V0 tracks",
        scan.pairs.len(),
        scan.graph.edge_count(),
        scan.second_tracks.len(),
        scan.tracks_from_v0.len()
    );
    scan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VertexingConfig;
    use jetvertex_fit::{FourMomentum, PerigeeErrors, PrimaryVertex, StraightLineFitter, Track};
    use nalgebra::Matrix3;

    fn errors() -> PerigeeErrors {
        PerigeeErrors { sigma_d0: 0.01, sigma_z0: 0.02 }
    }

    fn setup() -> (PrimaryVertex, FourMomentum, VertexingConfig, StraightLineFitter) {
        (
            PrimaryVertex::new(Vector3::zeros(), Matrix3::identity() * 1e-4),
            FourMomentum::new(100_000.0, 0.0, 0.0, 100_500.0),
            VertexingConfig::default(),
            StraightLineFitter::with_defaults(),
        )
    }

    #[test]
    fn test_displaced_pair_becomes_edge() {
        let (pv, jet, cfg, fitter) = setup();
        let sv = Vector3::new(5.0, 0.3, 0.2);
        let tracks = [
            Track::through_point(&sv, 0.15, 1.5, 1.0 / 6000.0, errors()),
            Track::through_point(&sv, -0.2, 1.6, 1.0 / 4000.0, errors()),
            Track::through_point(&Vector3::zeros(), 0.4, 1.3, -1.0 / 3000.0, errors()),
        ];
        let refs: Vec<&Track> = tracks.iter().collect();
        let ctx = JetContext::new(refs, vec![0, 1, 2], &pv, &jet, &cfg, &fitter, None, None);
        let scan = scan_pairs(&ctx);

        assert!(scan.graph.has_edge(0, 1));
        let pair = scan.pairs.iter().find(|p| (p.i, p.j) == (0, 1)).map(|p| p.flag);
        assert_eq!(pair, Some(PairFlag::Clean));
        assert!(scan.second_tracks.contains(&0) && scan.second_tracks.contains(&1));
        assert!(scan.tracks_from_v0.is_empty());
    }

    #[test]
    fn test_pair_behind_primary_is_rejected() {
        let (pv, jet, cfg, fitter) = setup();
        let sv = Vector3::new(-5.0, 0.0, 0.0);
        let tracks = [
            Track::through_point(&sv, 0.15, 1.5, 1.0 / 6000.0, errors()),
            Track::through_point(&sv, -0.2, 1.6, 1.0 / 4000.0, errors()),
        ];
        let refs: Vec<&Track> = tracks.iter().collect();
        let ctx = JetContext::new(refs, vec![0, 1], &pv, &jet, &cfg, &fitter, None, None);
        let scan = scan_pairs(&ctx);
        assert!(scan.pairs.is_empty());
        assert_eq!(scan.graph.edge_count(), 0);
    }

    #[test]
    fn test_near_primary_mode_ignores_direction() {
        let (pv, jet, mut cfg, fitter) = setup();
        cfg.multi_with_primary = true;
        let sv = Vector3::new(-5.0, 0.0, 0.0);
        let tracks = [
            Track::through_point(&sv, 0.15, 1.5, 1.0 / 6000.0, errors()),
            Track::through_point(&sv, -0.2, 1.6, 1.0 / 4000.0, errors()),
        ];
        let refs: Vec<&Track> = tracks.iter().collect();
        let ctx = JetContext::new(refs, vec![0, 1], &pv, &jet, &cfg, &fitter, None, None);
        let scan = scan_pairs(&ctx);
        assert!(scan.graph.has_edge(0, 1));
        assert_eq!(scan.pairs[0].flag, PairFlag::Clean);
    }

    #[test]
    fn test_material_map_removes_edge() {
        struct Everywhere;
        impl jetvertex_fit::MaterialVetoMap for Everywhere {
            fn is_interaction_region(&self, _: &Vector3<f64>) -> bool {
                true
            }
        }
        let (pv, jet, cfg, fitter) = setup();
        let sv = Vector3::new(5.0, 0.3, 0.2);
        let tracks = [
            Track::through_point(&sv, 0.15, 1.5, 1.0 / 6000.0, errors()),
            Track::through_point(&sv, -0.2, 1.6, 1.0 / 4000.0, errors()),
        ];
        let refs: Vec<&Track> = tracks.iter().collect();
        let map = Everywhere;
        let ctx = JetContext::new(refs, vec![0, 1], &pv, &jet, &cfg, &fitter, None, Some(&map));
        let scan = scan_pairs(&ctx);
        assert_eq!(scan.pairs.len(), 1);
        assert_eq!(scan.pairs[0].flag, PairFlag::Material);
        assert!(!scan.pairs[0].in_graph);
        assert_eq!(scan.tracks_from_v0, vec![0, 1]);
        assert!(scan.second_tracks.is_empty());
    }

    #[test]
    fn test_pair_beyond_beampipe_is_material_without_classifier() {
        let (pv, jet, cfg, fitter) = setup();
        let sv = Vector3::new(30.0, 1.0, 0.5);
        let tracks = [
            Track::through_point(&sv, 0.15, 1.5, 1.0 / 6000.0, errors()),
            Track::through_point(&sv, -0.2, 1.6, 1.0 / 4000.0, errors()),
        ];
        let refs: Vec<&Track> = tracks.iter().collect();
        let ctx = JetContext::new(refs, vec![0, 1], &pv, &jet, &cfg, &fitter, None, None);
        let scan = scan_pairs(&ctx);

        assert_eq!(scan.pairs.len(), 1);
        assert_eq!(scan.pairs[0].flag, PairFlag::Material);
        // flagged pairs stay in the graph unless rejection is requested
        assert!(scan.pairs[0].in_graph);
        assert_eq!(scan.tracks_from_v0, vec![0, 1]);

        let mut strict = cfg.clone();
        strict.pairs.reject_flagged = true;
        let refs: Vec<&Track> = tracks.iter().collect();
        let ctx = JetContext::new(refs, vec![0, 1], &pv, &jet, &strict, &fitter, None, None);
        assert_eq!(scan_pairs(&ctx).graph.edge_count(), 0);
    }

    #[test]
    fn test_lambda_hypothesis_puts_proton_on_harder_track() {
        let soft = TrackAtVertex { phi: 0.0, theta: 1.5, qoverp: 1.0 / 500.0 };
        let hard = TrackAtVertex { phi: 0.1, theta: 1.5, qoverp: -1.0 / 5000.0 };
        let (masses, c) = v0_hypothesis(PairFlag::Lambda, &[soft, hard]);
        assert_eq!(masses, vec![PION_MASS, PROTON_MASS]);
        assert_eq!(c, Constraint::Mass(LAMBDA_MASS));
        let (_, c) = v0_hypothesis(PairFlag::Conversion, &[soft, hard]);
        assert_eq!(c, Constraint::ZeroOpeningAngle);
    }
}
