//! First clean-up of the seeded vertex set.
//!
//! Runs three passes to a fixed point: split badly fitted vertices, drop
//! vertices whose tracks are a subset of another vertex, and merge vertices
//! sharing tracks. Vertices outside the pixel volume or the jet cone are
//! then pruned and the set is compacted.

use crate::context::JetContext;
use crate::geometry::vertex_delta_r;
use crate::vertex::WorkingSet;
use tracing::{debug, trace, warn};

/// Splits every bad-probability vertex with three or more tracks until none
/// is left.
pub fn disassemble_bad_vertices(ctx: &JetContext<'_>, set: &mut WorkingSet) {
    let cuts = &ctx.config.reducer;
    for pass in 0.. {
        if pass >= cuts.max_passes {
            warn!("disassembly stopped after {} passes", pass);
            return;
        }
        let mut disassembled = false;
        let n = set.len();
        for iv in 0..n {
            let v = &set[iv];
            if !v.good || v.n_tracks() < 3 {
                continue;
            }
            if v.probability() < cuts.disassembly_probability {
                ctx.disassemble(set, iv);
                disassembled = true;
            }
        }
        if !disassembled {
            return;
        }
    }
}

/// Retires every vertex whose tracks all belong to another good vertex.
/// Of two identical vertices the earlier one is retired.
pub fn remove_subsets(set: &mut WorkingSet) {
    let n = set.len();
    for iv in 0..n {
        if !set[iv].good {
            continue;
        }
        for jv in iv + 1..n {
            if !set[jv].good {
                continue;
            }
            let common = set.n_common(iv, jv);
            if common == 0 {
                continue;
            }
            if common == set[iv].n_tracks() {
                set[iv].good = false;
                break;
            } else if common == set[jv].n_tracks() {
                set[jv].good = false;
            }
        }
    }
}

/// Merges vertices sharing tracks, most-shared pairs first.
///
/// A joint fit replaces both vertices when acceptable. Otherwise two
/// multi-track vertices with a large overlap are merged greedily. The
/// candidate list is rebuilt after every structural change.
pub fn merge_shared(ctx: &JetContext<'_>, set: &mut WorkingSet) {
    let cfg = ctx.config;
    for pass in 0.. {
        if pass >= cfg.reducer.max_passes {
            warn!("shared-track merging stopped after {} passes", pass);
            return;
        }

        let n = set.len();
        let mut candidates = Vec::new();
        for iv in 0..n {
            for jv in iv + 1..n {
                if !set[iv].good || !set[jv].good {
                    continue;
                }
                let common = set.n_common(iv, jv);
                if common > 0 {
                    candidates.push((common, iv, jv));
                }
            }
        }
        candidates.sort_unstable_by(|a, b| b.cmp(a));

        let mut changed = false;
        for (common, iv, jv) in candidates {
            let (ni, nj) = (set[iv].n_tracks(), set[jv].n_tracks());
            if let Some((prob, merged)) = ctx.merge_and_refit(set, iv, jv) {
                if prob >= cfg.merge_probability && merged.mass() < cfg.b_mass_limit {
                    trace!("merged {} and {} into {:?}", iv, jv, merged.tracks);
                    set.push(merged);
                    set[iv].good = false;
                    set[jv].good = false;
                    changed = true;
                    break;
                }
            }
            if ni == 2 || nj == 2 || common < 2 {
                continue;
            }
            if common > ni - common || common > nj - common {
                trace!("overlap merge of {} and {}", iv, jv);
                ctx.merge_overlap(set, iv, jv);
                changed = true;
                break;
            }
        }
        if !changed {
            return;
        }
    }
}

/// Retires vertices outside the pixel volume or the jet cone, then
/// compacts the set and refreshes projected distances.
pub fn prune(ctx: &JetContext<'_>, set: &mut WorkingSet) {
    let cfg = ctx.config;
    let max_radius = cfg.detector.layer3.radius + cfg.reducer.prune_radius_margin;
    for v in set.iter_mut() {
        if v.perp() > max_radius || vertex_delta_r(&v.position, ctx.primary, ctx.jet) > cfg.cone_for_tag {
            v.good = false;
        }
    }
    set.compact();
    for v in set.iter_mut() {
        v.projected_distance = ctx.projected(&v.position);
    }
}

/// Runs the full reduction. Returns false when no vertex survives.
pub fn reduce(ctx: &JetContext<'_>, set: &mut WorkingSet) -> bool {
    disassemble_bad_vertices(ctx, set);
    remove_subsets(set);
    merge_shared(ctx, set);
    prune(ctx, set);
    debug!("{} vertices after reduction", set.len());
    !set.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::{displaced, three_from_displaced, track_from, TestJet};
    use crate::vertex::tests::sample_vertex;
    use nalgebra::Vector3;

    #[test]
    fn test_subset_is_retired() {
        let mut set = WorkingSet::new();
        set.push(sample_vertex(&[0, 1], 1.0, Vector3::zeros()));
        set.push(sample_vertex(&[0, 1, 2], 1.0, Vector3::zeros()));
        set.push(sample_vertex(&[3, 4], 1.0, Vector3::zeros()));
        set.push(sample_vertex(&[2, 1, 0], 1.0, Vector3::zeros()));
        remove_subsets(&mut set);
        assert_eq!(set.good_indices(), vec![2, 3]);
    }

    #[test]
    fn test_disjoint_sets_untouched() {
        let mut set = WorkingSet::new();
        set.push(sample_vertex(&[0, 1, 2], 1.0, Vector3::zeros()));
        set.push(sample_vertex(&[2, 3, 4], 1.0, Vector3::zeros()));
        remove_subsets(&mut set);
        assert_eq!(set.n_good(), 2);
    }

    #[test]
    fn test_bad_vertex_loses_outlier() {
        let b = Vector3::new(11.0, 1.2, 1.0);
        let mut tracks = three_from_displaced();
        tracks.push(track_from(displaced() + Vector3::new(0.0, 0.5, 0.0), 0.3, 1.55, 2500.0));
        tracks.push(track_from(b, 0.25, 1.52, 5000.0));
        tracks.push(track_from(b, -0.1, 1.62, 3500.0));
        let jet = TestJet::new(tracks);
        let ctx = jet.context();

        let mut set = WorkingSet::new();
        set.push(ctx.fit_candidate(vec![0, 1, 2, 3], 0).unwrap());
        set.push(ctx.fit_candidate(vec![4, 5], 0).unwrap());
        let clean = set[1].clone();

        disassemble_bad_vertices(&ctx, &mut set);
        assert!(set[0].good);
        assert_eq!(set[0].tracks, vec![0, 1, 2]);
        assert!(set[0].probability() > 0.5);
        assert_eq!(set[1], clean);
        assert!(set.iter().skip(2).all(|v| v.n_tracks() == 2 && v.contains(3)));
    }

    #[test]
    fn test_pairs_sharing_a_track_merge() {
        let jet = TestJet::new(three_from_displaced());
        let ctx = jet.context();

        let mut set = WorkingSet::new();
        set.push(ctx.fit_candidate(vec![0, 1], 0).unwrap());
        set.push(ctx.fit_candidate(vec![1, 2], 0).unwrap());
        merge_shared(&ctx, &mut set);

        assert_eq!(set.good_indices(), vec![2]);
        assert_eq!(set[2].tracks, vec![0, 1, 2]);
        assert!(set[2].mass() < jet.config.b_mass_limit);
    }

    #[test]
    fn test_failed_joint_fit_falls_back_to_overlap_merge() {
        let mut tracks = three_from_displaced();
        tracks.push(track_from(displaced() + Vector3::new(0.0, 1.0, 0.5), 0.3, 1.55, 2500.0));
        let jet = TestJet::new(tracks);
        let ctx = jet.context();

        let mut set = WorkingSet::new();
        set.push(ctx.fit_candidate_at(vec![0, 1, 2], displaced(), 0).unwrap());
        set.push(ctx.fit_candidate_at(vec![0, 1, 3], displaced(), 0).unwrap());
        assert!(ctx.merge_and_refit(&set, 0, 1).is_none());

        merge_shared(&ctx, &mut set);
        assert_eq!(set.len(), 3);
        assert!(set[0].good);
        assert_eq!(set[0].tracks, vec![0, 1, 2]);
        assert!(!set[1].good);
        // the rejected track survives as a one-track vertex remembering a partner
        assert!(set[2].good);
        assert_eq!(set[2].tracks, vec![3]);
        assert!(matches!(set[2].detached_track, Some(0) | Some(1)));
    }
}
