//! Final vertex selection, ordering and recovery of unused tracks.

use crate::config::SelectionCuts;
use crate::context::JetContext;
use crate::geometry::{mass_v0, primary_distance, projected_significance, vertex_delta_r};
use crate::pixel::{check_first_hits, check_one_track_vertex, check_two_track_vertex};
use crate::vertex::{CandidateVertex, TrackIndex, WorkingSet};
use jetvertex_fit::{chi2_prob, ELECTRON_MASS, K0_MASS, LAMBDA_MASS, PION_MASS, PROTON_MASS};
use std::cmp::Ordering;
use tracing::{debug, trace};

/// Refits `base` with `track` added. Returns the extended vertex if its
/// p-value exceeds the merge threshold.
fn extended(ctx: &JetContext<'_>, base: &CandidateVertex, track: TrackIndex) -> Option<CandidateVertex> {
    if base.contains(track) {
        return None;
    }
    let mut trial = base.clone();
    trial.tracks.push(track);
    match ctx.refit(&mut trial, 0) {
        Ok(p) if p > ctx.config.merge_probability => Some(trial),
        _ => None,
    }
}

fn is_single(v: &CandidateVertex) -> bool {
    v.good && v.n_tracks() == 1
}

fn is_multi(v: &CandidateVertex) -> bool {
    v.good && v.n_tracks() > 1
}

/// Re-attaches one-track vertices to the vertex their track was detached
/// from, or that was detached from them.
pub fn reattach_detached(ctx: &JetContext<'_>, set: &mut WorkingSet) {
    let n = set.len();

    // multi-track vertex <- one-track vertex holding its detached track
    for iv in 0..n {
        if !is_multi(&set[iv]) {
            continue;
        }
        let Some(detached) = set[iv].detached_track else {
            continue;
        };
        let Some(jv) = (0..n).find(|&jv| is_single(&set[jv]) && set[jv].tracks[0] == detached) else {
            continue;
        };
        if let Some(mut merged) = extended(ctx, &set[iv], detached) {
            trace!("track {} re-attached to vertex {}", detached, iv);
            merged.detached_track = None;
            set[iv] = merged;
            set[jv].good = false;
        }
    }

    // one-track <- one-track
    for iv in 0..n {
        if !is_single(&set[iv]) {
            continue;
        }
        let Some(detached) = set[iv].detached_track else {
            continue;
        };
        let Some(jv) =
            (0..n).find(|&jv| jv != iv && is_single(&set[jv]) && set[jv].tracks[0] == detached)
        else {
            continue;
        };
        if let Some(mut merged) = extended(ctx, &set[iv], detached) {
            merged.detached_track = None;
            set[iv] = merged;
            set[jv].good = false;
        }
    }

    // multi-track vertex <- one-track vertices detached from one of its tracks
    for iv in 0..n {
        if !is_multi(&set[iv]) {
            continue;
        }
        let members = set[iv].tracks.clone();
        for track in members {
            for jv in 0..n {
                if jv == iv || !is_single(&set[jv]) || set[jv].detached_track != Some(track) {
                    continue;
                }
                if !is_multi(&set[iv]) {
                    break;
                }
                let lone = set[jv].tracks[0];
                if let Some(merged) = extended(ctx, &set[iv], lone) {
                    set[iv] = merged;
                    set[jv].good = false;
                }
            }
        }
    }
}

/// Quality test of a one-track vertex.
fn accept_one_track(ctx: &JetContext<'_>, v: &CandidateVertex) -> bool {
    let cuts = &ctx.config.selection;
    let track = ctx.track(v.tracks[0]);
    // chi2 is still that of the former two-track fit
    if chi2_prob(v.chi2, 1) <= cuts.one_track_probability
        || !check_one_track_vertex(track, &v.position, &v.covariance, &ctx.config.detector)
    {
        return false;
    }
    let (_, significance) = primary_distance(ctx.primary, &v.position, &v.covariance);
    let track_significance = ctx
        .fitter
        .impact(track, &ctx.primary.position)
        .map_or(0.0, |imp| imp.significance);
    track_significance > 2.0 * cuts.track_significance && significance > cuts.vertex_significance
}

/// Quality test of a multi-track vertex.
fn accept_multi_track(ctx: &JetContext<'_>, v: &CandidateVertex) -> bool {
    let cfg = ctx.config;
    let (pairs, v0) = (&cfg.pairs, &cfg.v0);

    if v.projected_distance < 0.0 || v.probability() < cfg.selection.min_probability {
        return false;
    }
    if v.perp() > cfg.detector.layer3.radius + cfg.reducer.prune_radius_margin
        || vertex_delta_r(&v.position, ctx.primary, ctx.jet) > cfg.cone_for_tag
    {
        return false;
    }

    if v.n_tracks() == 2 {
        let (t1, t2) = (ctx.track(v.tracks[0]), ctx.track(v.tracks[1]));
        if pairs.pixel_cleaning && !check_two_track_vertex(t1, t2, &v.position, &v.covariance, &cfg.detector) {
            return false;
        }
        if pairs.first_hit_cleaning
            && !check_first_hits(t1, t2, &v.position, &v.covariance, pairs.first_hit_radius_gap)
        {
            return false;
        }
    }

    if ctx.material.is_some_and(|map| map.is_interaction_region(&v.position)) {
        return false;
    }

    if v.n_tracks() == 2 && v.charge == 0 && v.detached_track.is_none() {
        let mass_pipi = v.mass();
        let mass_ppi = mass_v0(&v.track_params, PROTON_MASS, PION_MASS);
        let mass_ee = mass_v0(&v.track_params, ELECTRON_MASS, ELECTRON_MASS);
        if (mass_pipi - K0_MASS).abs() < v0.k0_window
            || (mass_ppi - LAMBDA_MASS).abs() < v0.lambda_window
            || (mass_ee < v0.final_conversion_mass && v.perp() > v0.final_conversion_radius)
        {
            return false;
        }
    }

    let (_, significance) = primary_distance(ctx.primary, &v.position, &v.covariance);
    significance >= cfg.selection.vertex_significance
}

/// Applies the final quality cuts, retiring every failing vertex.
pub fn apply_final_cuts(ctx: &JetContext<'_>, set: &mut WorkingSet) {
    let cfg = ctx.config;
    for iv in 0..set.len() {
        let v = &set[iv];
        if !v.good || v.n_tracks() == 0 {
            continue;
        }
        let keep = if v.position.z.abs() > cfg.detector.pixel_half_length {
            false
        } else if v.n_tracks() == 1 {
            cfg.multi_with_one_track_vertex && accept_one_track(ctx, v)
        } else {
            accept_multi_track(ctx, v)
        };
        set[iv].good = keep;
    }
}

/// Keeps at most one one-track vertex per multi-track vertex containing its
/// detached track: the one giving the lowest combined mass, if below the
/// b-hadron limit. Unlinked one-track vertices are retired.
pub fn clean_one_track_vertices(set: &mut WorkingSet, b_mass_limit: f64) {
    let n = set.len();
    let mut linked: Vec<Option<usize>> = vec![None; n];
    for i1 in 0..n {
        if !is_single(&set[i1]) {
            continue;
        }
        let owner = set[i1].detached_track.and_then(|track| {
            (0..n)
                .filter(|&m| is_multi(&set[m]) && set[m].contains(track))
                .last()
        });
        match owner {
            Some(m) => linked[i1] = Some(m),
            None => set[i1].good = false,
        }
    }

    for m in 0..n {
        if !is_multi(&set[m]) {
            continue;
        }
        let mut best: Option<(usize, f64)> = None;
        for i1 in 0..n {
            if linked[i1] != Some(m) || !is_single(&set[i1]) {
                continue;
            }
            let mass = (set[m].momentum + set[i1].momentum).mass();
            if best.map_or(true, |(_, b)| mass < b) {
                best = Some((i1, mass));
            }
            set[i1].good = false;
        }
        if let Some((i1, mass)) = best {
            if mass < b_mass_limit {
                set[i1].good = true;
            }
        }
    }
}

fn order(a: &CandidateVertex, b: &CandidateVertex, radius: f64) -> Ordering {
    let (outer_a, outer_b) = (a.perp() > radius, b.perp() > radius);
    outer_a
        .cmp(&outer_b)
        .then_with(|| {
            if outer_a {
                Ordering::Equal
            } else {
                a.projected_distance.total_cmp(&b.projected_distance)
            }
        })
        .then_with(|| a.perp().total_cmp(&b.perp()))
        .then_with(|| a.tracks.cmp(&b.tracks))
}

/// Output ordering: vertices near the beam line by projected distance, the
/// rest by transverse radius. A second vertex much heavier than the first
/// is moved to the front.
pub fn order_vertices(vertices: &mut [CandidateVertex], cuts: &SelectionCuts) {
    vertices.sort_by(|a, b| order(a, b, cuts.projected_sort_radius));
    if vertices.len() > 1 && vertices[1].mass() - vertices[0].mass() > cuts.mass_swap_gap {
        vertices.swap(0, 1);
    }
}

/// Attaches tracks used by no vertex to their nearest well separated
/// multi-track vertex.
pub fn attach_unused_tracks(ctx: &JetContext<'_>, vertices: &mut [CandidateVertex]) {
    let cfg = ctx.config;
    let cuts = &cfg.selection;
    let unused: Vec<TrackIndex> = (0..ctx.n_tracks())
        .filter(|&t| !vertices.iter().any(|v| v.contains(t)))
        .collect();

    let hosts: Vec<bool> = vertices
        .iter()
        .map(|v| {
            v.n_tracks() >= 2
                && projected_significance(ctx.primary, &v.position, &v.covariance, ctx.jet)
                    >= cuts.attach_vertex_significance
        })
        .collect();

    let mut candidates: Vec<Vec<(f64, TrackIndex)>> = vec![Vec::new(); vertices.len()];
    for track in unused {
        let mut nearest: Option<(usize, f64)> = None;
        for (iv, v) in vertices.iter().enumerate() {
            if !hosts[iv] {
                continue;
            }
            let Ok(imp) = ctx.fitter.impact(ctx.track(track), &v.position) else {
                continue;
            };
            if nearest.map_or(true, |(_, s)| imp.significance < s) {
                nearest = Some((iv, imp.significance));
            }
        }
        if let Some((iv, s)) = nearest {
            if s < cuts.attach_impact_significance {
                candidates[iv].push((s, track));
            }
        }
    }

    for (iv, mut list) in candidates.into_iter().enumerate() {
        if list.is_empty() {
            continue;
        }
        list.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let mut trial = vertices[iv].clone();
        trial
            .tracks
            .extend(list.iter().take(cuts.attach_max_tracks).map(|&(_, t)| t));
        let Ok(prob) = ctx.refit(&mut trial, 0) else {
            continue;
        };
        if prob > cfg.merge_probability || ctx.improve_chi2(&mut trial) > cfg.merge_probability {
            trace!("vertex {} grew to {:?}", iv, trial.tracks);
            vertices[iv] = trial;
        }
    }
}

/// Runs the final selection and returns the ordered output vertices.
///
/// Empty when no multi-track vertex survives.
pub fn select_vertices(ctx: &JetContext<'_>, set: &mut WorkingSet) -> Vec<CandidateVertex> {
    let cfg = ctx.config;
    reattach_detached(ctx, set);
    apply_final_cuts(ctx, set);
    if cfg.multi_with_one_track_vertex {
        clean_one_track_vertices(set, cfg.b_mass_limit);
    }

    let mut kept: Vec<CandidateVertex> = set
        .iter()
        .filter(|v| v.good && v.n_tracks() >= 2)
        .cloned()
        .collect();
    if kept.is_empty() {
        debug!("no multi-track vertex passed the final selection");
        return Vec::new();
    }
    for v in set.iter().filter(|v| is_single(v)) {
        if !kept.iter().any(|k| k.contains(v.tracks[0])) {
            kept.push(v.clone());
        }
    }

    order_vertices(&mut kept, &cfg.selection);
    attach_unused_tracks(ctx, &mut kept);
    order_vertices(&mut kept, &cfg.selection);
    debug!("{} vertices selected", kept.len());
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::one_track_vertex;
    use crate::context::tests::{displaced, three_from_displaced, track_from, TestJet};
    use crate::vertex::tests::sample_vertex;
    use jetvertex_fit::FourMomentum;
    use nalgebra::Vector3;

    fn placed(tracks: &[TrackIndex], x: f64, projected: f64) -> CandidateVertex {
        let mut v = sample_vertex(tracks, 1.0, Vector3::new(x, 0.0, 0.0));
        v.projected_distance = projected;
        v
    }

    #[test]
    fn test_order_by_region() {
        let cuts = SelectionCuts::default();
        let mut list = vec![
            placed(&[0, 1], 60.0, 55.0),
            placed(&[2, 3], 8.0, 9.0),
            placed(&[4, 5], 30.0, 31.0),
            placed(&[6, 7], 10.0, 4.0),
        ];
        order_vertices(&mut list, &cuts);
        let firsts: Vec<TrackIndex> = list.iter().map(|v| v.tracks[0]).collect();
        assert_eq!(firsts, vec![6, 2, 4, 0]);
    }

    #[test]
    fn test_heavy_second_vertex_moves_first() {
        let cuts = SelectionCuts::default();
        let light = placed(&[0, 1], 3.0, 3.0);
        let mut heavy = placed(&[2, 3], 6.0, 6.0);
        heavy.momentum = FourMomentum::new(0.0, 0.0, 1000.0, 7000.0);
        let mut list = vec![heavy.clone(), light.clone()];
        order_vertices(&mut list, &cuts);
        assert_eq!(list[0], heavy);

        let again = list.clone();
        order_vertices(&mut list, &cuts);
        assert_eq!(list, again);
    }

    #[test]
    fn test_one_track_cleaning_keeps_lightest_linked() {
        let mut set = WorkingSet::new();
        set.push(sample_vertex(&[0, 1, 2], 1.0, Vector3::new(5.0, 0.0, 0.0)));

        let mut near = sample_vertex(&[5], 1.0, Vector3::new(5.0, 0.0, 0.0));
        near.detached_track = Some(1);
        set.push(near);

        let mut heavy = sample_vertex(&[6], 1.0, Vector3::new(5.0, 0.0, 0.0));
        heavy.detached_track = Some(2);
        heavy.momentum = FourMomentum::new(0.0, 3000.0, 0.0, 9000.0);
        set.push(heavy);

        let mut orphan = sample_vertex(&[7], 1.0, Vector3::new(5.0, 0.0, 0.0));
        orphan.detached_track = Some(9);
        set.push(orphan);

        clean_one_track_vertices(&mut set, 5500.0);
        assert_eq!(set.good_indices(), vec![0, 1]);
    }

    #[test]
    fn test_one_track_cleaning_drops_heavy_only_choice() {
        let mut set = WorkingSet::new();
        set.push(sample_vertex(&[0, 1], 1.0, Vector3::new(5.0, 0.0, 0.0)));
        let mut heavy = sample_vertex(&[6], 1.0, Vector3::new(5.0, 0.0, 0.0));
        heavy.detached_track = Some(0);
        heavy.momentum = FourMomentum::new(0.0, 3000.0, 0.0, 9000.0);
        set.push(heavy);

        clean_one_track_vertices(&mut set, 5500.0);
        assert_eq!(set.good_indices(), vec![0]);
    }

    #[test]
    fn test_detached_track_rejoins_its_vertex() {
        let jet = TestJet::new(three_from_displaced());
        let ctx = jet.context();

        let mut set = WorkingSet::new();
        let mut pair = ctx.fit_candidate(vec![0, 1], 0).unwrap();
        pair.detached_track = Some(2);
        set.push(pair);
        let cut = ctx.fit_candidate(vec![2, 0], 0).unwrap();
        set.push(one_track_vertex(cut, 2, 0));

        reattach_detached(&ctx, &mut set);
        assert!(set[0].good);
        assert_eq!(set[0].tracks, vec![0, 1, 2]);
        assert_eq!(set[0].detached_track, None);
        assert!(!set[1].good);
    }

    #[test]
    fn test_unused_track_near_vertex_is_attached() {
        let mut tracks = three_from_displaced();
        tracks.push(track_from(displaced(), 0.3, 1.55, 2500.0));
        tracks.push(track_from(Vector3::zeros(), 0.35, 1.3, 2000.0));
        let jet = TestJet::new(tracks);
        let ctx = jet.context();

        let mut vertices = vec![ctx.fit_candidate(vec![0, 1, 2], 0).unwrap()];
        attach_unused_tracks(&ctx, &mut vertices);
        assert_eq!(vertices[0].tracks, vec![0, 1, 2, 3]);
        assert!(!vertices[0].contains(4));
        assert!(vertices[0].good);
    }
}
