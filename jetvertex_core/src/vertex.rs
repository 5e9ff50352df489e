//! Candidate vertices and the working set they live in.
//!
//! All bookkeeping is index based: tracks are referred to by their
//! [`TrackIndex`] in the selected-track array, vertices by their position in
//! the [`WorkingSet`]. Vertices are retired by clearing their `good` flag, so
//! indices stay stable while the reducer and resolver iterate.

use jetvertex_fit::{chi2_prob, FourMomentum, PackedCovariance, TrackAtVertex, VertexFit};
use nalgebra::Vector3;
use std::ops::{Index, IndexMut};

/// Index into the jet's selected-track array.
pub type TrackIndex = usize;

/// Sentinel distance of an empty nearest-neighbour cache.
pub const NO_CLOSE_DISTANCE: f64 = 1_000_000.0;

// ============================================================================
// CANDIDATE VERTEX
// ============================================================================

/// A vertex hypothesis under consideration.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateVertex {
    /// Member tracks, unique
    pub tracks: Vec<TrackIndex>,
    pub position: Vector3<f64>,
    pub momentum: FourMomentum,
    pub charge: i32,
    pub covariance: PackedCovariance,
    /// Chi2 contribution per member, parallel to `tracks`
    pub chi2_per_track: Vec<f64>,
    /// Fitted parameters per member, parallel to `tracks`
    pub track_params: Vec<TrackAtVertex>,
    pub chi2: f64,
    pub good: bool,

    // === Scratch state used during resolution ===
    /// Distance significance to the nearest vertex
    pub close_distance: f64,
    /// Index of the nearest vertex, `None` when the cache is invalid
    pub close_index: Option<usize>,
    /// Signed distance from the primary vertex projected on the jet axis
    pub projected_distance: f64,
    /// Track most recently detached from this vertex
    pub detached_track: Option<TrackIndex>,
}

impl CandidateVertex {
    /// Builds a vertex from a fit of `tracks` (in the order they were fitted).
    ///
    /// Two-track vertices get their per-track chi2 equalized to chi2/2.
    pub fn from_fit(tracks: Vec<TrackIndex>, fit: VertexFit) -> Self {
        let mut vertex = Self {
            tracks,
            position: fit.position,
            momentum: fit.momentum,
            charge: fit.charge,
            covariance: fit.covariance,
            chi2_per_track: fit.chi2_per_track,
            track_params: fit.track_params,
            chi2: fit.chi2,
            good: true,
            close_distance: NO_CLOSE_DISTANCE,
            close_index: None,
            projected_distance: 0.0,
            detached_track: None,
        };
        vertex.equalize_two_track_chi2();
        vertex
    }

    /// Replaces the fit results, keeping the scratch fields.
    pub fn apply_fit(&mut self, fit: VertexFit) {
        self.position = fit.position;
        self.momentum = fit.momentum;
        self.charge = fit.charge;
        self.covariance = fit.covariance;
        self.chi2_per_track = fit.chi2_per_track;
        self.track_params = fit.track_params;
        self.chi2 = fit.chi2;
        self.equalize_two_track_chi2();
    }

    pub fn equalize_two_track_chi2(&mut self) {
        if self.tracks.len() == 2 && self.chi2_per_track.len() == 2 {
            let half = self.chi2 / 2.0;
            self.chi2_per_track[0] = half;
            self.chi2_per_track[1] = half;
        }
    }

    #[inline]
    pub fn n_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Degrees of freedom of the vertex fit, 2N - 3 and at least 1.
    ///
    /// A one-track vertex keeps the chi2 of the pair fit it was cut from,
    /// and with it that fit's single degree of freedom.
    pub fn ndf(&self) -> i32 {
        (2 * self.tracks.len() as i32 - 3).max(1)
    }

    /// Fit p-value with [`ndf`](Self::ndf) degrees of freedom.
    pub fn probability(&self) -> f64 {
        chi2_prob(self.chi2, self.ndf())
    }

    pub fn mass(&self) -> f64 {
        self.momentum.mass()
    }

    pub fn perp(&self) -> f64 {
        self.position.x.hypot(self.position.y)
    }

    pub fn contains(&self, track: TrackIndex) -> bool {
        self.tracks.contains(&track)
    }

    /// Position of `track` among the members.
    pub fn slot(&self, track: TrackIndex) -> Option<usize> {
        self.tracks.iter().position(|&t| t == track)
    }

    /// Removes `track` and its parallel entries. Returns false if absent.
    pub fn remove_track(&mut self, track: TrackIndex) -> bool {
        match self.slot(track) {
            Some(i) => {
                self.tracks.remove(i);
                if i < self.chi2_per_track.len() {
                    self.chi2_per_track.remove(i);
                }
                if i < self.track_params.len() {
                    self.track_params.remove(i);
                }
                true
            }
            None => false,
        }
    }

    /// Invalidates the nearest-neighbour cache.
    pub fn reset_close_cache(&mut self) {
        self.close_distance = NO_CLOSE_DISTANCE;
        self.close_index = None;
    }

    /// Number of tracks shared with `other`; zero unless both have ≥2 tracks.
    pub fn n_common(&self, other: &CandidateVertex) -> usize {
        if self.tracks.len() < 2 || other.tracks.len() < 2 {
            return 0;
        }
        self.tracks.iter().filter(|t| other.tracks.contains(t)).count()
    }
}

// ============================================================================
// WORKING SET
// ============================================================================

/// Ordered arena of all candidate vertices of one jet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkingSet {
    vertices: Vec<CandidateVertex>,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a vertex and returns its index.
    pub fn push(&mut self, vertex: CandidateVertex) -> usize {
        self.vertices.push(vertex);
        self.vertices.len() - 1
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CandidateVertex> {
        self.vertices.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut CandidateVertex> {
        self.vertices.iter_mut()
    }

    /// Indices of vertices still alive.
    pub fn good_indices(&self) -> Vec<usize> {
        (0..self.vertices.len()).filter(|&i| self.vertices[i].good).collect()
    }

    pub fn n_good(&self) -> usize {
        self.vertices.iter().filter(|v| v.good).count()
    }

    /// Shared-track count between two vertices.
    pub fn n_common(&self, i: usize, j: usize) -> usize {
        self.vertices[i].n_common(&self.vertices[j])
    }

    /// Mutable access to two distinct vertices at once.
    pub fn pair_mut(&mut self, i: usize, j: usize) -> (&mut CandidateVertex, &mut CandidateVertex) {
        assert_ne!(i, j, "pair_mut needs distinct indices");
        if i < j {
            let (lo, hi) = self.vertices.split_at_mut(j);
            (&mut lo[i], &mut hi[0])
        } else {
            let (lo, hi) = self.vertices.split_at_mut(i);
            (&mut hi[0], &mut lo[j])
        }
    }

    /// Physically drops retired vertices. Invalidates all indices.
    pub fn compact(&mut self) {
        self.vertices.retain(|v| v.good);
        for v in &mut self.vertices {
            v.reset_close_cache();
        }
    }

    pub fn into_vec(self) -> Vec<CandidateVertex> {
        self.vertices
    }
}

impl Index<usize> for WorkingSet {
    type Output = CandidateVertex;

    fn index(&self, i: usize) -> &CandidateVertex {
        &self.vertices[i]
    }
}

impl IndexMut<usize> for WorkingSet {
    fn index_mut(&mut self, i: usize) -> &mut CandidateVertex {
        &mut self.vertices[i]
    }
}

impl FromIterator<CandidateVertex> for WorkingSet {
    fn from_iter<I: IntoIterator<Item = CandidateVertex>>(iter: I) -> Self {
        Self {
            vertices: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// TRACK MEMBERSHIP
// ============================================================================

/// Per-track list of the good multi-track vertices containing it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMembership {
    per_track: Vec<Vec<usize>>,
}

impl TrackMembership {
    /// Rebuilds the lists from the working set.
    pub fn build(set: &WorkingSet, n_tracks: usize) -> Self {
        let mut per_track = vec![Vec::new(); n_tracks];
        for (iv, v) in set.iter().enumerate() {
            if !v.good || v.n_tracks() < 2 {
                continue;
            }
            for &t in &v.tracks {
                if t < n_tracks {
                    per_track[t].push(iv);
                }
            }
        }
        Self { per_track }
    }

    pub fn vertices_of(&self, track: TrackIndex) -> &[usize] {
        self.per_track.get(track).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Largest number of vertices sharing one track.
    pub fn max_sharing(&self) -> usize {
        self.per_track.iter().map(|v| v.len()).max().unwrap_or(0)
    }

    pub fn n_tracks(&self) -> usize {
        self.per_track.len()
    }

    /// Unlinks `vertex` from `track`.
    pub fn remove(&mut self, track: TrackIndex, vertex: usize) {
        if let Some(list) = self.per_track.get_mut(track) {
            list.retain(|&v| v != vertex);
        }
    }

    /// Unlinks `vertex` from every track.
    pub fn purge_vertex(&mut self, vertex: usize) {
        for list in &mut self.per_track {
            list.retain(|&v| v != vertex);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jetvertex_fit::PION_MASS;

    /// Hand-made vertex for bookkeeping tests.
    pub(crate) fn sample_vertex(tracks: &[TrackIndex], chi2: f64, position: Vector3<f64>) -> CandidateVertex {
        let params: Vec<TrackAtVertex> = tracks
            .iter()
            .map(|&t| TrackAtVertex {
                phi: 0.1 * t as f64,
                theta: 1.5,
                qoverp: 1.0 / 2000.0,
            })
            .collect();
        let momentum = params.iter().map(|p| p.momentum(PION_MASS)).sum();
        let n = tracks.len().max(1) as f64;
        CandidateVertex::from_fit(
            tracks.to_vec(),
            VertexFit {
                position,
                covariance: PackedCovariance([0.01, 0.0, 0.01, 0.0, 0.0, 0.01]),
                momentum,
                charge: tracks.len() as i32,
                chi2,
                chi2_per_track: vec![chi2 / n; tracks.len()],
                track_params: params,
            },
        )
    }

    #[test]
    fn test_two_track_chi2_is_equalized() {
        let mut v = sample_vertex(&[0, 1], 3.0, Vector3::new(1.0, 0.0, 0.0));
        assert_eq!(v.chi2_per_track, vec![1.5, 1.5]);

        v.chi2_per_track = vec![0.5, 2.5];
        v.equalize_two_track_chi2();
        assert_eq!(v.chi2_per_track[0], v.chi2_per_track[1]);
    }

    #[test]
    fn test_ndf_never_below_one() {
        let origin = Vector3::new(1.0, 0.0, 0.0);
        assert_eq!(sample_vertex(&[5], 0.5, origin).ndf(), 1);
        assert_eq!(sample_vertex(&[0, 1], 0.5, origin).ndf(), 1);
        assert_eq!(sample_vertex(&[0, 1, 2, 3], 0.5, origin).ndf(), 5);
    }

    #[test]
    fn test_remove_track_keeps_parallel_arrays() {
        let mut v = sample_vertex(&[3, 5, 7], 6.0, Vector3::zeros());
        assert!(v.remove_track(5));
        assert_eq!(v.tracks, vec![3, 7]);
        assert_eq!(v.chi2_per_track.len(), 2);
        assert_eq!(v.track_params.len(), 2);
        assert!(!v.remove_track(5));
    }

    #[test]
    fn test_common_tracks_need_two_each() {
        let a = sample_vertex(&[0, 1, 2], 1.0, Vector3::zeros());
        let b = sample_vertex(&[1, 2], 1.0, Vector3::zeros());
        let mut c = sample_vertex(&[2, 9], 1.0, Vector3::zeros());
        assert_eq!(a.n_common(&b), 2);
        c.remove_track(9);
        assert_eq!(a.n_common(&c), 0);
    }

    #[test]
    fn test_membership_skips_retired_and_single() {
        let mut set = WorkingSet::new();
        set.push(sample_vertex(&[0, 1], 1.0, Vector3::zeros()));
        set.push(sample_vertex(&[1, 2, 3], 1.0, Vector3::zeros()));
        let dead = set.push(sample_vertex(&[1, 4], 1.0, Vector3::zeros()));
        set[dead].good = false;

        let mut membership = TrackMembership::build(&set, 5);
        assert_eq!(membership.vertices_of(1), &[0, 1]);
        assert_eq!(membership.max_sharing(), 2);

        membership.purge_vertex(0);
        assert_eq!(membership.vertices_of(1), &[1]);
        assert_eq!(membership.vertices_of(0), &[] as &[usize]);
    }

    #[test]
    fn test_compact_drops_retired() {
        let mut set: WorkingSet = (0..4)
            .map(|i| sample_vertex(&[i, i + 10], 1.0, Vector3::zeros()))
            .collect();
        set[1].good = false;
        set[3].good = false;
        set.compact();
        assert_eq!(set.len(), 2);
        assert_eq!(set[1].tracks, vec![2, 12]);
    }
}
