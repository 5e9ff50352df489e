//! Per-jet state shared by every pipeline stage.
//!
//! A [`JetContext`] borrows the selected tracks, the primary vertex, the jet
//! axis, the configuration and the collaborators for the duration of one
//! call. It owns no mutable state: stages pass the [`WorkingSet`] explicitly
//! and every fit gets a fresh [`FitState`].

use crate::config::VertexingConfig;
use crate::geometry::{direction_cosine, projected_distance};
use crate::vertex::{CandidateVertex, TrackIndex, WorkingSet};
use jetvertex_fit::{
    chi2_prob, FitError, FitState, FourMomentum, MaterialVetoMap, PrimaryVertex, Track,
    TrackClassifier, TrackWeights, VertexFit, VertexFitService, PION_MASS,
};
use nalgebra::Vector3;
use tracing::trace;

/// Borrowed view of one jet and the services used to vertex it.
pub struct JetContext<'a> {
    /// Selected tracks, ordered by descending pt
    pub tracks: Vec<&'a Track>,
    /// Position of each selected track in the caller's input slice
    pub input_index: Vec<usize>,
    pub primary: &'a PrimaryVertex,
    pub jet: &'a FourMomentum,
    pub config: &'a VertexingConfig,
    pub fitter: &'a dyn VertexFitService,
    pub material: Option<&'a dyn MaterialVetoMap>,
    /// Classifier output per selected track, `None` when no classifier is set
    pub weights: Option<Vec<TrackWeights>>,
}

impl<'a> JetContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tracks: Vec<&'a Track>,
        input_index: Vec<usize>,
        primary: &'a PrimaryVertex,
        jet: &'a FourMomentum,
        config: &'a VertexingConfig,
        fitter: &'a dyn VertexFitService,
        classifier: Option<&'a dyn TrackClassifier>,
        material: Option<&'a dyn MaterialVetoMap>,
    ) -> Self {
        let weights = classifier.map(|c| {
            tracks
                .iter()
                .map(|t| c.classify(t, primary, jet))
                .collect::<Vec<_>>()
        });
        Self {
            tracks,
            input_index,
            primary,
            jet,
            config,
            fitter,
            material,
            weights,
        }
    }

    pub fn n_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, index: TrackIndex) -> &'a Track {
        self.tracks[index]
    }

    /// Classifier weights of a track, if a classifier is configured.
    pub fn weights_of(&self, index: TrackIndex) -> Option<&TrackWeights> {
        self.weights.as_ref().and_then(|w| w.get(index))
    }

    pub fn near_primary(&self) -> bool {
        self.config.multi_with_primary
    }

    /// Signed distance of `position` from the primary along the jet axis.
    pub fn projected(&self, position: &Vector3<f64>) -> f64 {
        projected_distance(position, self.primary, self.jet)
    }

    fn gather(&self, indices: &[TrackIndex]) -> Vec<&'a Track> {
        indices.iter().map(|&i| self.tracks[i]).collect()
    }

    /// Raw service fit of the given tracks.
    pub fn fit(&self, indices: &[TrackIndex], state: &mut FitState) -> Result<VertexFit, FitError> {
        let list = self.gather(indices);
        self.fitter.fit(&list, state)
    }

    /// Linearization point for a fresh fit of `indices`.
    ///
    /// Uses the fast fit when it lands inside twice the second pixel layer
    /// radius and in front of the primary vertex, the primary vertex
    /// otherwise (the origin when seeking the primary itself).
    pub fn seed_position(&self, indices: &[TrackIndex]) -> Vector3<f64> {
        let fallback = if self.near_primary() {
            Vector3::zeros()
        } else {
            self.primary.position
        };
        let list = self.gather(indices);
        let mut state = FitState::new();
        let estimate = match self.fitter.fast_fit(&list, &mut state) {
            Ok(p) if p.x.hypot(p.y) <= 2.0 * self.config.detector.layer2.radius => p,
            _ => return fallback,
        };
        let mut cosine = direction_cosine(&estimate, self.primary, self.jet);
        if self.near_primary() {
            cosine = cosine.abs();
        }
        if cosine > 0.0 {
            estimate
        } else {
            self.primary.position
        }
    }

    /// Fits `indices` as a new candidate, seeded by [`seed_position`](Self::seed_position).
    pub fn fit_candidate(
        &self,
        indices: Vec<TrackIndex>,
        robustness: u32,
    ) -> Result<CandidateVertex, FitError> {
        let seed = self.seed_position(&indices);
        self.fit_candidate_at(indices, seed, robustness)
    }

    /// Fits `indices` as a new candidate linearized at `seed`.
    pub fn fit_candidate_at(
        &self,
        indices: Vec<TrackIndex>,
        seed: Vector3<f64>,
        robustness: u32,
    ) -> Result<CandidateVertex, FitError> {
        let mut state = FitState::new()
            .with_approximate_vertex(seed)
            .with_robustness(robustness);
        let fit = self.fit(&indices, &mut state)?;
        let mut vertex = CandidateVertex::from_fit(indices, fit);
        vertex.projected_distance = self.projected(&vertex.position);
        Ok(vertex)
    }

    /// Refits a vertex in place, seeded at its current position.
    ///
    /// Returns the new p-value. A failed fit leaves the vertex not-good.
    pub fn refit(&self, vertex: &mut CandidateVertex, robustness: u32) -> Result<f64, FitError> {
        if vertex.n_tracks() < 2 {
            return Err(FitError::too_few(2, vertex.n_tracks()));
        }
        let mut state = FitState::new()
            .with_approximate_vertex(vertex.position)
            .with_robustness(robustness);
        match self.fit(&vertex.tracks, &mut state) {
            Ok(fit) => {
                vertex.apply_fit(fit);
                vertex.good = true;
                vertex.projected_distance = self.projected(&vertex.position);
                Ok(vertex.probability())
            }
            Err(e) => {
                trace!("refit of {:?} failed: {}", vertex.tracks, e);
                vertex.good = false;
                Err(e)
            }
        }
    }

    /// Joint fit of the union of two vertices, seeded at their midpoint.
    ///
    /// Returns `None` if either vertex is retired, the fit fails or its chi2
    /// exceeds the merge ceiling; otherwise the merged vertex and its p-value.
    pub fn merge_and_refit(&self, set: &WorkingSet, i: usize, j: usize) -> Option<(f64, CandidateVertex)> {
        let (v1, v2) = (&set[i], &set[j]);
        if !v1.good || !v2.good {
            return None;
        }
        let mut tracks: Vec<TrackIndex> = v1.tracks.iter().chain(&v2.tracks).copied().collect();
        tracks.sort_unstable();
        tracks.dedup();

        let seed = (v1.position + v2.position) * 0.5;
        let merged = self.fit_candidate_at(tracks, seed, 0).ok()?;
        if merged.chi2 > self.config.reducer.merge_max_chi2 {
            return None;
        }
        Some((merged.probability(), merged))
    }

    /// Greedy merge of two vertices with at least two shared tracks.
    ///
    /// The vertex with more tracks (then lower chi2) absorbs the other's
    /// non-common tracks one by one; additions that spoil the fit are
    /// detached and spun off as a new small vertex. The absorbed vertex is
    /// retired.
    pub fn merge_overlap(&self, set: &mut WorkingSet, i: usize, j: usize) {
        if !set[i].good || !set[j].good || set.n_common(i, j) < 2 {
            return;
        }
        let (base, other) = {
            let (a, b) = (&set[i], &set[j]);
            if a.n_tracks() < b.n_tracks() || (a.n_tracks() == b.n_tracks() && a.chi2 > b.chi2) {
                (j, i)
            } else {
                (i, j)
            }
        };

        let seed = set[base].position;
        let non_common: Vec<TrackIndex> = set[other]
            .tracks
            .iter()
            .copied()
            .filter(|t| !set[base].contains(*t))
            .collect();

        let min_prob = self.config.reducer.overlap_add_probability;
        let mut grown: Option<CandidateVertex> = None;
        let mut members = set[base].tracks.clone();
        let mut detached = Vec::new();
        for track in non_common {
            let mut trial = members.clone();
            trial.push(track);
            match self.fit_candidate_at(trial.clone(), seed, 0) {
                Ok(v) if chi2_prob(v.chi2, 2 * trial.len() as i32 - 3) >= min_prob => {
                    members = trial;
                    grown = Some(v);
                }
                _ => detached.push(track),
            }
        }

        if let Some(v) = grown {
            let slot = &mut set[base];
            let detached_track = slot.detached_track;
            *slot = v;
            slot.detached_track = detached_track;
        }
        set[other].good = false;
        let other_seed = set[other].position;
        let other_tracks = set[other].tracks.clone();

        if detached.len() > 1 {
            if let Ok(v) = self.fit_candidate_at(detached, other_seed, 0) {
                set.push(v);
            }
        } else if let [lone] = detached[..] {
            let used = set
                .iter()
                .any(|v| v.good && v.n_tracks() >= 2 && v.contains(lone));
            if !used {
                let best = other_tracks
                    .iter()
                    .filter(|&&t| t != lone)
                    .filter_map(|&t| {
                        self.fit_candidate_at(vec![lone, t], other_seed, 0)
                            .ok()
                            .map(|v| (t, v))
                    })
                    .fold(None::<(TrackIndex, CandidateVertex)>, |best, (t, v)| match best {
                        Some((_, ref b)) if b.chi2 <= v.chi2 => best,
                        _ => Some((t, v)),
                    });
                if let Some((partner, v)) = best {
                    set.push(one_track_vertex(v, lone, partner));
                }
            }
        }
    }

    /// Removes the worst track until the p-value reaches the improvement
    /// target or two tracks remain. Returns the final p-value, zero when a
    /// refit fails.
    pub fn improve_chi2(&self, vertex: &mut CandidateVertex) -> f64 {
        if vertex.n_tracks() < 2 {
            return 0.0;
        }
        let target = self.config.resolver.improve_target;
        let mut prob = vertex.probability();
        while prob < target {
            if vertex.n_tracks() == 2 {
                return prob;
            }
            let Some(worst) = worst_slot(&vertex.chi2_per_track) else {
                return 0.0;
            };
            let track = vertex.tracks[worst];
            vertex.remove_track(track);
            vertex.detached_track = Some(track);
            prob = match self.refit(vertex, 0) {
                Ok(p) => p,
                Err(_) => return 0.0,
            };
        }
        prob
    }

    /// Splits the worst outlier off a badly fitted multi-track vertex.
    ///
    /// A robust refit identifies the outlier; the best two-track combination
    /// of the outlier with a former partner becomes a new candidate, and the
    /// vertex is refitted without it.
    pub fn disassemble(&self, set: &mut WorkingSet, iv: usize) {
        if set[iv].n_tracks() < 3 {
            return;
        }
        let cuts = &self.config.reducer;
        if self.refit(&mut set[iv], cuts.disassembly_robustness).is_err() {
            return;
        }
        let Some(worst) = worst_slot(&set[iv].chi2_per_track) else {
            return;
        };
        let outlier = set[iv].tracks[worst];

        let partners: Vec<TrackIndex> = set[iv].tracks.iter().copied().filter(|&t| t != outlier).collect();
        let mut best: Option<CandidateVertex> = None;
        for partner in partners {
            let pair = vec![partner, outlier];
            let list = self.gather(&pair);
            let mut state = FitState::new();
            let Ok(mut seed) = self.fitter.fast_fit(&list, &mut state) else {
                continue;
            };
            if seed.x.hypot(seed.y) > 2.0 * self.config.detector.layer2.radius {
                seed = Vector3::zeros();
            }
            let Ok(v) = self.fit_candidate_at(pair, seed, 0) else {
                continue;
            };
            if v.chi2 > cuts.seed_pair_chi2 {
                continue;
            }
            if best.as_ref().map_or(true, |b| v.chi2 <= b.chi2) {
                best = Some(v);
            }
        }
        if let Some(v) = best {
            trace!("disassembly of vertex {} spawned {:?}", iv, v.tracks);
            set.push(v);
        }

        set[iv].remove_track(outlier);
        // failure retires the vertex inside refit
        let _ = self.refit(&mut set[iv], 0);
    }
}

/// Slot of the largest positive per-track chi2.
pub(crate) fn worst_slot(chi2_per_track: &[f64]) -> Option<usize> {
    let mut best = None;
    let mut max = 0.0;
    for (i, &c) in chi2_per_track.iter().enumerate() {
        if c > max {
            max = c;
            best = Some(i);
        }
    }
    best
}

/// Turns the two-track fit of `(track, partner)` into a one-track vertex on
/// `track`, remembering `partner` for later re-attachment.
pub(crate) fn one_track_vertex(mut pair: CandidateVertex, track: TrackIndex, partner: TrackIndex) -> CandidateVertex {
    let slot = pair.slot(track).unwrap_or(0);
    if let Some(params) = pair.track_params.get(slot).copied() {
        pair.momentum = params.momentum(PION_MASS);
        pair.track_params = vec![params];
    }
    let chi2 = pair.chi2;
    pair.tracks = vec![track];
    pair.chi2_per_track = vec![chi2];
    pair.detached_track = Some(partner);
    pair
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::vertex::tests::sample_vertex;
    use approx::assert_relative_eq;
    use jetvertex_fit::{PerigeeErrors, StraightLineFitter};
    use nalgebra::Matrix3;

    /// A jet of straight-line tracks with default configuration, no
    /// classifier and no material map.
    pub(crate) struct TestJet {
        pub tracks: Vec<Track>,
        pub primary: PrimaryVertex,
        pub axis: FourMomentum,
        pub config: VertexingConfig,
        pub fitter: StraightLineFitter,
    }

    impl TestJet {
        pub fn new(tracks: Vec<Track>) -> Self {
            Self {
                tracks,
                primary: PrimaryVertex::new(Vector3::zeros(), Matrix3::identity() * 1e-4),
                axis: FourMomentum::new(100_000.0, 0.0, 0.0, 100_500.0),
                config: VertexingConfig::default(),
                fitter: StraightLineFitter::with_defaults(),
            }
        }

        /// Context over all tracks, in input order.
        pub fn context(&self) -> JetContext<'_> {
            JetContext::new(
                self.tracks.iter().collect(),
                (0..self.tracks.len()).collect(),
                &self.primary,
                &self.axis,
                &self.config,
                &self.fitter,
                None,
                None,
            )
        }
    }

    pub(crate) fn track_from(point: Vector3<f64>, phi: f64, theta: f64, p: f64) -> Track {
        Track::through_point(&point, phi, theta, 1.0 / p, PerigeeErrors { sigma_d0: 0.01, sigma_z0: 0.02 })
    }

    /// Decay point a few millimetres down the jet axis.
    pub(crate) fn displaced() -> Vector3<f64> {
        Vector3::new(5.0, 0.3, 0.2)
    }

    /// Three tracks meeting exactly at [`displaced`].
    pub(crate) fn three_from_displaced() -> Vec<Track> {
        let a = displaced();
        vec![
            track_from(a, 0.15, 1.5, 6000.0),
            track_from(a, -0.2, 1.6, 4000.0),
            track_from(a, -0.02, 1.45, 3000.0),
        ]
    }

    #[test]
    fn test_worst_slot() {
        assert_eq!(worst_slot(&[1.0, 4.0, 2.0]), Some(1));
        assert_eq!(worst_slot(&[0.0, 0.0]), None);
        assert_eq!(worst_slot(&[]), None);
    }

    #[test]
    fn test_one_track_vertex_keeps_partner() {
        let pair = sample_vertex(&[4, 7], 2.0, Vector3::new(3.0, 0.0, 0.0));
        let single = one_track_vertex(pair, 7, 4);
        assert_eq!(single.tracks, vec![7]);
        assert_eq!(single.detached_track, Some(4));
        assert_eq!(single.track_params.len(), 1);
        assert_eq!(single.chi2, 2.0);
        assert!(single.mass() < 200.0);
        assert_eq!(single.ndf(), 1);
        assert!(single.probability() > 0.0);
    }

    #[test]
    fn test_disassemble_splits_off_outlier() {
        let a = displaced();
        let mut tracks = three_from_displaced();
        tracks.push(track_from(a + Vector3::new(0.0, 0.5, 0.0), 0.3, 1.55, 2500.0));
        let jet = TestJet::new(tracks);
        let ctx = jet.context();

        let mut set = WorkingSet::new();
        set.push(ctx.fit_candidate(vec![0, 1, 2, 3], 0).unwrap());
        assert!(set[0].probability() < 1e-3);

        ctx.disassemble(&mut set, 0);
        assert!(set[0].good);
        assert_eq!(set[0].tracks, vec![0, 1, 2]);
        assert!(set[0].chi2 < 1e-6);
        assert_relative_eq!(set[0].position, a, epsilon = 1e-6);
        for v in set.iter().skip(1) {
            assert!(v.contains(3));
            assert!(v.chi2 <= jet.config.reducer.seed_pair_chi2);
        }
    }

    #[test]
    fn test_merge_overlap_spins_off_rejected_tracks() {
        let (a, b) = (displaced(), Vector3::new(11.0, 1.2, 1.0));
        let mut tracks = three_from_displaced();
        tracks.push(track_from(b, 0.25, 1.52, 5000.0));
        tracks.push(track_from(b, -0.1, 1.62, 3500.0));
        tracks.push(track_from(a, 0.3, 1.4, 2000.0));
        let jet = TestJet::new(tracks);
        let ctx = jet.context();

        let mut set = WorkingSet::new();
        set.push(ctx.fit_candidate_at(vec![0, 1, 2, 5], a, 0).unwrap());
        set.push(ctx.fit_candidate_at(vec![0, 1, 3, 4], b, 0).unwrap());
        ctx.merge_overlap(&mut set, 0, 1);

        assert_eq!(set.len(), 3);
        assert!(set[0].good);
        assert_eq!(set[0].tracks, vec![0, 1, 2, 5]);
        assert!(!set[1].good);
        assert!(set[2].good);
        assert_eq!(set[2].tracks, vec![3, 4]);
        assert!(set[2].chi2 < 1e-6);
        assert_relative_eq!(set[2].position, b, epsilon = 1e-6);
    }
}
