//! Shared-track disambiguation.
//!
//! After reduction a track may still belong to several multi-track
//! vertices. The resolver repeatedly picks the most-shared track and either
//! merges two close vertices that share it or detaches it from its worst
//! vertex, until every track belongs to at most one good multi-track vertex.

use crate::context::JetContext;
use crate::geometry::vertex_vertex_significance;
use crate::vertex::{TrackIndex, TrackMembership, WorkingSet, NO_CLOSE_DISTANCE};
use jetvertex_fit::{chi2_prob, PION_MASS};
use tracing::{debug, trace, warn};

/// The (track, vertex) link chosen for resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SharedChoice {
    pub track: TrackIndex,
    pub vertex: usize,
    /// Representative reduced chi2 of the track in the vertex
    pub reduced_chi2: f64,
}

/// Parameters of the shared-track choice.
#[derive(Debug, Clone, Copy)]
pub struct ShareRules {
    pub heavy_vertex_chi2: f64,
    pub healthy_probability: f64,
    pub two_vertex_probability: f64,
    pub b_mass_limit: f64,
}

impl ShareRules {
    pub fn from_context(ctx: &JetContext<'_>) -> Self {
        let r = &ctx.config.resolver;
        Self {
            heavy_vertex_chi2: r.heavy_vertex_chi2,
            healthy_probability: r.healthy_probability,
            two_vertex_probability: r.two_vertex_probability,
            b_mass_limit: ctx.config.b_mass_limit,
        }
    }
}

/// Picks the most-shared track and the vertex to break it from.
///
/// Among the tracks with maximal sharing, the (track, vertex) pair with the
/// largest reduced chi2 wins. Two-track vertices use chi2/2, replaced by the
/// heavy sentinel above the b-hadron mass. When a track sits in both
/// two-track and multi-track vertices only the two-track ones compete. A
/// healthy vertex is not chosen over an unhealthy one already selected.
/// Exact ties go to the track of lower rank. Returns `None` when no track is
/// shared.
pub fn max_of_shared(
    set: &WorkingSet,
    membership: &TrackMembership,
    ranks: &[f64],
    rules: &ShareRules,
) -> Option<SharedChoice> {
    let max_share = membership.max_sharing();
    if max_share <= 1 {
        return None;
    }
    let rank = |t: TrackIndex| ranks.get(t).copied().unwrap_or(0.0);

    let mut best: Option<SharedChoice> = None;
    let mut best_prob = -1.0;
    for track in 0..membership.n_tracks() {
        let list = membership.vertices_of(track);
        if list.len() <= 1 || list.len() < max_share {
            continue;
        }
        let n_two = list.iter().filter(|&&iv| set[iv].n_tracks() == 2).count();

        for &iv in list {
            let v = &set[iv];
            if !v.good || v.n_tracks() <= 1 {
                continue;
            }
            if n_two > 0 && n_two < max_share && v.n_tracks() > 2 {
                continue;
            }
            let Some(slot) = v.slot(track) else {
                continue;
            };
            let mut reduced = v.chi2_per_track.get(slot).copied().unwrap_or(0.0);
            if v.n_tracks() == 2 {
                reduced = v.chi2 / 2.0;
                if v.mass() > rules.b_mass_limit {
                    reduced = rules.heavy_vertex_chi2;
                }
            }
            let prob = v.probability();

            let take = match best {
                None => true,
                Some(b) if reduced > b.reduced_chi2 => {
                    !(b.reduced_chi2 > 0.0
                        && prob > rules.healthy_probability
                        && best_prob < rules.healthy_probability)
                }
                Some(b) => reduced == b.reduced_chi2 && rank(track) < rank(b.track),
            };
            if take {
                best = Some(SharedChoice {
                    track,
                    vertex: iv,
                    reduced_chi2: reduced,
                });
                best_prob = prob;
            }
        }
    }

    let mut choice = best?;
    if let [v1, v2] = membership.vertices_of(choice.track) {
        let (v1, v2) = (*v1, *v2);
        let (a, b) = (&set[v1], &set[v2]);
        if a.probability() > rules.two_vertex_probability && b.probability() > rules.two_vertex_probability {
            let (d1, d2) = (a.projected_distance, b.projected_distance);
            if a.n_tracks() == 2 && b.n_tracks() == 2 {
                // break the one closer to the primary
                if choice.vertex == v1 && d2 < d1 {
                    choice.vertex = v2;
                } else if choice.vertex == v2 && d1 < d2 {
                    choice.vertex = v1;
                }
                let (m1, m2) = (a.mass(), b.mass());
                if m1 > rules.b_mass_limit && m2 < rules.b_mass_limit {
                    choice.vertex = v1;
                }
                if m1 < rules.b_mass_limit && m2 > rules.b_mass_limit {
                    choice.vertex = v2;
                }
            }
            if a.n_tracks() + b.n_tracks() > 4 {
                if a.n_tracks() == 2 && d1 > d2 {
                    choice.vertex = v2;
                }
                if b.n_tracks() == 2 && d2 > d1 {
                    choice.vertex = v1;
                }
            }
        }
    }
    Some(choice)
}

/// Closest pair of good multi-track vertices by distance significance.
///
/// Pairs further apart than `window` in L1 distance are skipped. Refreshes
/// every vertex's nearest-neighbour cache.
pub fn closest_pair(set: &mut WorkingSet, window: f64) -> Option<(usize, usize, f64)> {
    for v in set.iter_mut() {
        v.reset_close_cache();
    }
    let mut found: Option<(usize, usize, f64)> = None;
    let n = set.len();
    for iv in 0..n {
        if !set[iv].good || set[iv].n_tracks() < 2 {
            continue;
        }
        for jv in iv + 1..n {
            if !set[jv].good || set[jv].n_tracks() < 2 {
                continue;
            }
            let (vi, vj) = set.pair_mut(iv, jv);
            let l1 = (vi.position - vj.position).abs().sum();
            if l1 > window {
                continue;
            }
            let d = vertex_vertex_significance(&vi.position, &vi.covariance, &vj.position, &vj.covariance);
            if found.map_or(d < NO_CLOSE_DISTANCE, |(_, _, best)| d < best) {
                found = Some((iv, jv, d));
            }
            if d < vi.close_distance {
                vi.close_distance = d;
                vi.close_index = Some(jv);
            }
            if d < vj.close_distance {
                vj.close_distance = d;
                vj.close_index = Some(iv);
            }
        }
    }
    found
}

/// Next closest pair from the caches, skipping pairs whose partner cache was
/// invalidated.
pub fn next_closest_pair(set: &WorkingSet) -> Option<(usize, usize, f64)> {
    let mut found: Option<(usize, usize, f64)> = None;
    for (iv, v) in set.iter().enumerate() {
        if v.n_tracks() < 2 {
            continue;
        }
        let Some(jv) = v.close_index else {
            continue;
        };
        if found.map_or(v.close_distance < NO_CLOSE_DISTANCE, |(_, _, best)| v.close_distance < best) {
            if set[jv].close_index.is_none() {
                continue;
            }
            found = Some((iv, jv, v.close_distance));
        }
    }
    found
}

/// Tries joint refits of successively closest vertex pairs below the merge
/// cut. The higher index keeps the merged vertex. Returns true if anything
/// merged.
fn merge_close_vertices(ctx: &JetContext<'_>, set: &mut WorkingSet, first: (usize, usize, f64)) -> bool {
    let cfg = ctx.config;
    let mut merged_any = false;
    let mut next = Some(first);
    while let Some((a, b, dist)) = next {
        if dist >= cfg.resolver.vertex_merge_cut {
            break;
        }
        let (v1, v2) = if a < b { (b, a) } else { (a, b) };
        if let Some((prob, merged)) = ctx.merge_and_refit(set, v1, v2) {
            if prob > cfg.merge_probability && merged.mass() < cfg.b_mass_limit && merged.projected_distance > 0.0 {
                trace!("close vertices {} and {} merged into {:?}", v1, v2, merged.tracks);
                set[v1] = merged;
                set[v2].good = false;
                set[v2].tracks.clear();
                merged_any = true;
            }
        }
        set[v1].reset_close_cache();
        set[v2].reset_close_cache();
        next = next_closest_pair(set);
    }
    merged_any
}

/// Detaches `track` from `vertex` and refits what is left.
///
/// A vertex reduced to one track keeps its former two-track fit and stays
/// good only if the remaining track is free, the former fit was acceptable
/// and not too heavy. The detached track is remembered for re-attachment.
pub fn detach_track(
    ctx: &JetContext<'_>,
    set: &mut WorkingSet,
    membership: &mut TrackMembership,
    track: TrackIndex,
    vertex: usize,
) {
    let cfg = ctx.config;
    membership.remove(track, vertex);
    let v = &mut set[vertex];
    if !v.remove_track(track) {
        return;
    }
    v.detached_track = Some(track);

    if v.n_tracks() == 1 {
        let left = v.tracks[0];
        membership.remove(left, vertex);
        let acceptable = chi2_prob(v.chi2, 1) >= cfg.resolver.one_track_probability
            && v.mass() <= cfg.b_mass_limit;
        if let Some(params) = v.track_params.first() {
            v.momentum = params.momentum(PION_MASS);
        }
        if !acceptable || !membership.vertices_of(left).is_empty() {
            v.good = false;
        }
    } else if ctx.refit(v, 0).is_ok() && v.n_tracks() == 2 && v.projected_distance < 0.0 {
        v.good = false;
    }

    if !set[vertex].good || set[vertex].n_tracks() < 2 {
        membership.purge_vertex(vertex);
    }
}

/// Resolves all shared tracks, then merges close vertices and improves the
/// remaining bad fits.
pub fn resolve(ctx: &JetContext<'_>, set: &mut WorkingSet, ranks: &[f64]) {
    let cfg = ctx.config;
    let rules = ShareRules::from_context(ctx);
    let window = cfg.resolver.pair_window;
    let mut membership = TrackMembership::build(set, ctx.n_tracks());

    let mut iterations = 0;
    while let Some(choice) = max_of_shared(set, &membership, ranks, &rules) {
        iterations += 1;
        if iterations > cfg.reducer.max_passes {
            warn!("shared-track resolution stopped after {} iterations", iterations - 1);
            break;
        }

        if choice.reduced_chi2 < cfg.resolver.track_detach_cut {
            if let Some((v1, v2, d)) = closest_pair(set, window) {
                if d < cfg.resolver.vertex_merge_cut
                    && set.n_common(v1, v2) > 0
                    && merge_close_vertices(ctx, set, (v1, v2, d))
                {
                    membership = TrackMembership::build(set, ctx.n_tracks());
                    continue;
                }
            }
        }

        trace!("detaching track {} from vertex {}", choice.track, choice.vertex);
        detach_track(ctx, set, &mut membership, choice.track, choice.vertex);
    }

    if let Some(first) = closest_pair(set, window) {
        merge_close_vertices(ctx, set, first);
    }

    let threshold = cfg.resolver.improve_threshold;
    for iv in 0..set.len() {
        let v = &mut set[iv];
        if !v.good || v.n_tracks() < 3 || v.probability() >= threshold {
            continue;
        }
        if ctx.improve_chi2(v) < threshold {
            v.good = false;
        }
    }
    debug!("{} good vertices after shared-track resolution", set.n_good());
}
