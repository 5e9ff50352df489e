//! Single inclusive vertex per jet.
//!
//! Instead of resolving several vertices, all tracks of accepted two-track
//! vertices are fitted to one common vertex, dropping outliers one at a
//! time until the fit is acceptable.

use crate::context::JetContext;
use crate::geometry::{mass_v0, primary_distance, projected_significance};
use crate::pair_scan::PairScan;
use crate::pixel::{check_first_hits, check_two_track_vertex};
use crate::result::{InclusiveSearch, InclusiveVertexResult, SecondaryVertex};
use crate::vertex::{CandidateVertex, TrackIndex};
use jetvertex_fit::{FitState, FourMomentum, VertexFit, B_MASS, ELECTRON_MASS, K0_MASS, PION_MASS};
use nalgebra::Vector3;
use tracing::{debug, trace};

/// Largest distance reported to a material layer.
const MAX_MATERIAL_DISTANCE: f64 = 39.9;

/// Median of a non-empty list.
pub(crate) fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

/// Index of the largest rank-weighted chi2.
fn rank_weighted_worst(chi2_per_track: &[f64], ranks: &[f64]) -> Option<usize> {
    let mut best = None;
    let mut max = 0.0;
    for (i, &c) in chi2_per_track.iter().enumerate() {
        let weighted = c / ranks.get(i).copied().unwrap_or(1.0).max(0.1);
        if weighted > max {
            max = weighted;
            best = Some(i);
        }
    }
    best
}

fn without(tracks: &[TrackIndex], slot: usize) -> Vec<TrackIndex> {
    let mut list = tracks.to_vec();
    list.remove(slot);
    list
}

/// Fits of every one-track-removed subset, in slot order.
fn leave_one_out(ctx: &JetContext<'_>, tracks: &[TrackIndex], seed: Vector3<f64>) -> Vec<(usize, VertexFit)> {
    (0..tracks.len())
        .filter_map(|slot| {
            let mut state = FitState::new().with_approximate_vertex(seed);
            ctx.fit(&without(tracks, slot), &mut state).ok().map(|fit| (slot, fit))
        })
        .collect()
}

/// Common vertex of `tracks`, removing outliers until the fit is acceptable.
///
/// `tracks` and `ranks` shrink in place. Returns `None` when no acceptable
/// vertex exists.
pub fn fit_common_vertex(
    ctx: &JetContext<'_>,
    tracks: &mut Vec<TrackIndex>,
    ranks: &mut Vec<f64>,
) -> Option<CandidateVertex> {
    let cfg = ctx.config;
    let cuts = &cfg.inclusive;
    if tracks.len() < 2 {
        return None;
    }

    let mut seed = {
        let list: Vec<_> = tracks.iter().map(|&t| ctx.track(t)).collect();
        let mut state = FitState::new();
        match ctx.fitter.fast_fit(&list, &mut state) {
            Ok(p) if p.x.hypot(p.y) <= 2.0 * cfg.detector.layer2.radius => p,
            _ => ctx.primary.position,
        }
    };

    let (vertex, outlier) = loop {
        let mut state = FitState::new()
            .with_approximate_vertex(seed)
            .with_robustness(cuts.robustness);
        let fit = match ctx.fit(tracks, &mut state) {
            Ok(fit) if fit.chi2 <= 1e6 => fit,
            _ => return None,
        };
        let vertex = CandidateVertex::from_fit(tracks.clone(), fit);

        let mut outlier = if cuts.robustness > 0 {
            state
                .track_weights
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)?
        } else {
            rank_weighted_worst(&vertex.chi2_per_track, ranks).unwrap_or(0)
        };

        if tracks.len() == 2 {
            break (vertex, outlier);
        }

        // behind the primary: drop the track whose removal moves it furthest forward
        if projected_significance(ctx.primary, &vertex.position, &vertex.covariance, ctx.jet) < 0.0 {
            let mut best_dist = -1e12;
            let mut best_chi2 = 1e12;
            let mut chosen = None;
            for (slot, fit) in leave_one_out(ctx, tracks, seed) {
                let dist = projected_significance(ctx.primary, &fit.position, &fit.covariance, ctx.jet);
                if dist > best_dist && best_dist < 10.0 {
                    best_dist = dist;
                    best_chi2 = fit.chi2;
                    chosen = Some(slot);
                } else if dist > 0.0 && best_dist > 10.0 && fit.chi2 < best_chi2 {
                    best_chi2 = fit.chi2;
                    chosen = Some(slot);
                }
            }
            if let Some(slot) = chosen {
                trace!("removing backward outlier {} of {}", tracks[slot], tracks.len());
                tracks.remove(slot);
                ranks.remove(slot);
                seed = vertex.position;
                continue;
            }
        }

        if vertex.probability() > cuts.min_probability {
            if vertex.mass() < cfg.b_mass_limit {
                let worst = vertex.chi2_per_track.get(outlier).copied().unwrap_or(0.0);
                if worst < cuts.max_track_chi2 {
                    break (vertex, outlier);
                }
            } else {
                // too heavy: drop the track that brings the mass down best
                let mut min_mass = 1e12;
                let mut min_chi2 = 1e12;
                let mut chosen = None;
                for (slot, fit) in leave_one_out(ctx, tracks, seed) {
                    if ctx.projected(&fit.position) < 0.0 {
                        continue;
                    }
                    let mut chi2 = fit.chi2;
                    if ctx.weights.is_some() {
                        chi2 += ranks[slot];
                    }
                    let mass = fit.momentum.mass();
                    if mass < min_mass && min_mass > cfg.b_mass_limit {
                        min_mass = mass;
                        min_chi2 = chi2;
                        chosen = Some(slot);
                    } else if mass < cfg.b_mass_limit && min_mass < cfg.b_mass_limit && chi2 < min_chi2 {
                        min_chi2 = chi2;
                        chosen = Some(slot);
                    }
                }
                if let Some(slot) = chosen {
                    outlier = slot;
                }
            }
        }

        let outlier = outlier.min(tracks.len() - 1);
        trace!("removing track {} of {}", tracks[outlier], tracks.len());
        tracks.remove(outlier);
        ranks.remove(outlier);
        seed = vertex.position;
    };

    if tracks.len() == 2 {
        let worst = vertex.chi2_per_track.get(outlier).copied().unwrap_or(0.0);
        if vertex.mass() > cfg.b_mass_limit
            || vertex.probability() < cuts.min_probability
            || worst > cuts.max_track_chi2
        {
            return None;
        }
        if vertex.perp() > cfg.v0.final_conversion_radius
            && vertex.charge == 0
            && mass_v0(&vertex.track_params, ELECTRON_MASS, ELECTRON_MASS) < cfg.v0.conversion_mass
        {
            trace!("common vertex rejected as conversion");
            return None;
        }
    }
    Some(vertex)
}

/// Nearest material layer in the transverse plane.
fn material_distance(ctx: &JetContext<'_>, position: &Vector3<f64>) -> f64 {
    let d = &ctx.config.detector;
    let mut layers = vec![d.beampipe, d.innermost, d.layer1, d.layer2];
    if d.has_insertable_layer {
        layers.push(d.layer3);
    }
    layers
        .iter()
        .map(|l| (l.distance(position.x, position.y) - l.radius).abs())
        .fold(MAX_MATERIAL_DISTANCE, f64::min)
}

/// Energy of `momentum` transverse to `axis`.
fn transverse_energy(momentum: &FourMomentum, axis: &Vector3<f64>) -> f64 {
    let p = momentum.vect();
    let (pn, an) = (p.norm(), axis.norm());
    if pn <= 0.0 || an <= 0.0 {
        return 0.0;
    }
    let along = p.dot(axis) / an;
    let perp = (pn * pn - along * along).max(0.0).sqrt();
    momentum.e * perp / pn
}

/// Sorted caller indices of `tracks`.
fn caller_indices(ctx: &JetContext<'_>, tracks: &[TrackIndex]) -> Vec<usize> {
    let mut indices: Vec<usize> = tracks.iter().map(|&t| ctx.input_index[t]).collect();
    indices.sort_unstable();
    indices.dedup();
    indices
}

/// Searches the single inclusive vertex of a scanned jet.
pub fn find_inclusive(ctx: &JetContext<'_>, scan: &PairScan, jet_tracks: &FourMomentum) -> InclusiveSearch {
    let mut v0_tracks = scan.tracks_from_v0.clone();
    let vertex = inclusive_vertex(ctx, scan, jet_tracks, &mut v0_tracks);
    InclusiveSearch {
        vertex,
        tracks_from_v0: caller_indices(ctx, &v0_tracks),
    }
}

/// Common-vertex search proper. A vertex vetoed as K0 adds its tracks to
/// `v0_tracks`.
fn inclusive_vertex(
    ctx: &JetContext<'_>,
    scan: &PairScan,
    jet_tracks: &FourMomentum,
    v0_tracks: &mut Vec<TrackIndex>,
) -> Option<InclusiveVertexResult> {
    let cfg = ctx.config;
    let cuts = &cfg.inclusive;
    let classified = ctx.weights.is_some();
    let signal = |t: TrackIndex| ctx.weights_of(t).map(|w| w.signal);

    let mut tracks: Vec<TrackIndex> = scan
        .second_tracks
        .iter()
        .copied()
        .filter(|t| !scan.tracks_from_v0.contains(t))
        .collect();
    if tracks.len() < 2 {
        return None;
    }
    let mut ranks: Vec<f64> = tracks
        .iter()
        .map(|&t| signal(t).unwrap_or(scan.multiplicity[t] as f64))
        .collect();
    if classified {
        while median(&ranks) < cuts.median_rank_cut && ranks.len() > 3 {
            let lowest = ranks
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map_or(0, |(i, _)| i);
            tracks.remove(lowest);
            ranks.remove(lowest);
        }
    }

    let mut vertex = fit_common_vertex(ctx, &mut tracks, &mut ranks);
    if vertex.is_none() && tracks.len() > 2 {
        let hardest = tracks
            .iter()
            .enumerate()
            .fold((0, 0.0), |best, (slot, &t)| {
                let pt = ctx.track(t).pt();
                if pt > best.1 {
                    (slot, pt)
                } else {
                    best
                }
            })
            .0;
        tracks.remove(hardest);
        ranks.remove(hardest);
        vertex = fit_common_vertex(ctx, &mut tracks, &mut ranks);
        debug!("second common fit with {} tracks: {}", tracks.len(), vertex.is_some());
    }
    let mut vertex = vertex?;

    // recover displaced tracks the pair scan missed
    let (_, significance) = primary_distance(ctx.primary, &vertex.position, &vertex.covariance);
    if significance > cuts.additional_vertex_significance {
        let mut extra: Vec<(f64, TrackIndex)> = Vec::new();
        for t in 0..ctx.n_tracks() {
            if tracks.contains(&t) || scan.tracks_from_v0.contains(&t) {
                continue;
            }
            if signal(t).is_some_and(|s| s < cuts.additional_min_signal) {
                continue;
            }
            let track = ctx.track(t);
            let Ok(to_sv) = ctx.fitter.impact(track, &vertex.position) else {
                continue;
            };
            if to_sv.significance > cuts.additional_max_sv_significance {
                continue;
            }
            if track.hits.innermost_hits == 0 && track.hits.next_innermost_hits == 0 {
                continue;
            }
            let Ok(to_pv) = ctx.fitter.impact(track, &ctx.primary.position) else {
                continue;
            };
            if to_pv.significance < cuts.additional_min_pv_significance {
                continue;
            }
            let gain = to_pv.significance - to_sv.significance;
            if gain > cuts.additional_min_gain {
                extra.push((gain, t));
            }
        }
        if !extra.is_empty() {
            extra.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
            tracks.extend(extra.iter().take(cuts.additional_max_tracks).map(|&(_, t)| t));
            ranks = tracks.iter().map(|&t| signal(t).unwrap_or(1.0)).collect();
            vertex = fit_common_vertex(ctx, &mut tracks, &mut ranks)?;
            debug!("common vertex refitted with additional tracks: {:?}", tracks);
        }
    }

    if vertex.n_tracks() == 2 {
        let (t1, t2) = (ctx.track(vertex.tracks[0]), ctx.track(vertex.tracks[1]));
        let pairs = &cfg.pairs;
        if pairs.pixel_cleaning
            && !check_two_track_vertex(t1, t2, &vertex.position, &vertex.covariance, &cfg.detector)
        {
            return None;
        }
        if pairs.first_hit_cleaning
            && !check_first_hits(t1, t2, &vertex.position, &vertex.covariance, pairs.first_hit_radius_gap)
        {
            return None;
        }
        if t1.charge() + t2.charge() == 0 && (vertex.mass() - K0_MASS).abs() < cuts.k0_window {
            debug!("inclusive vertex rejected as K0: tracks {:?}", vertex.tracks);
            v0_tracks.extend_from_slice(&vertex.tracks);
            return None;
        }
    }

    let direction = ctx.projected(&vertex.position);
    if direction < 0.0 {
        return None;
    }
    vertex.projected_distance = direction;

    let (_, significance) = primary_distance(ctx.primary, &vertex.position, &vertex.covariance);
    let momentum = vertex.momentum;
    let mass = momentum.mass();
    let e_ratio = if jet_tracks.e > 0.0 { momentum.e / jet_tracks.e } else { 0.0 };
    let jet_track_pt = jet_tracks.pt();
    let n_ratio = if jet_track_pt > 0.0 {
        transverse_energy(&momentum, &ctx.jet.vect()) / jet_track_pt.sqrt()
    } else {
        0.0
    };
    let boost = if mass > 0.0 && ctx.jet.pt() > 0.0 {
        (momentum.pt() / mass) * (B_MASS / ctx.jet.pt())
    } else {
        0.0
    };

    Some(InclusiveVertexResult {
        vertex: SecondaryVertex::from_candidate(ctx, &vertex),
        mass,
        energy_fraction: e_ratio.min(0.99999),
        n_two_track_vertices: scan.pairs.len(),
        n_selected_tracks: ctx.n_tracks(),
        n_vertex_tracks: vertex.n_tracks(),
        signed_significance: significance,
        jet_track_energy: jet_tracks.e,
        material_distance: material_distance(ctx, &vertex.position),
        transverse_energy_ratio: n_ratio / (n_ratio + 4.0),
        product: (mass - 2.0 * PION_MASS) * e_ratio / B_MASS,
        boost,
        tracks_from_v0: caller_indices(ctx, v0_tracks),
    })
}
