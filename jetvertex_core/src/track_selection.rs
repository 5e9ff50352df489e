//! Quality and kinematic preselection of jet tracks.

use crate::config::TrackCuts;
use jetvertex_fit::{FourMomentum, PrimaryVertex, Track, VertexFitService};
use tracing::trace;

/// Tracks surviving preselection, ordered by descending pt.
#[derive(Debug, Clone, Default)]
pub struct SelectedTracks<'a> {
    pub tracks: Vec<&'a Track>,
    /// Position of each selected track in the caller's slice
    pub input_index: Vec<usize>,
    /// Selected tracks compatible with the primary vertex
    pub n_primary_compatible: usize,
}

impl<'a> SelectedTracks<'a> {
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Drops leading tracks harder than the jet itself.
    pub fn drop_leading_above(&mut self, jet_pt: f64) {
        let n = self.tracks.iter().take_while(|t| t.pt() > jet_pt).count();
        if n > 0 {
            trace!("dropping {} tracks above jet pt {:.0}", n, jet_pt);
            self.tracks.drain(..n);
            self.input_index.drain(..n);
        }
    }

    /// Summed pion four-momentum of the selected tracks.
    pub fn total_momentum(&self) -> FourMomentum {
        self.tracks.iter().map(|t| t.pion_momentum()).sum()
    }
}

/// True if `track` passes every cut not involving the primary vertex.
fn passes_quality(track: &Track, cuts: &TrackCuts) -> bool {
    let h = &track.hits;
    track.pt() >= cuts.min_pt
        && track.eta().abs() <= cuts.max_abs_eta
        && track.chi2_per_ndf() <= cuts.max_chi2_per_ndf
        && h.pixel_hits >= cuts.min_pixel_hits
        && h.sct_hits >= cuts.min_sct_hits
        && h.silicon_hits() >= cuts.min_silicon_hits
        && h.innermost_hits >= cuts.min_innermost_hits
}

/// Applies the track cuts and orders survivors by pt.
///
/// Impact parameters are taken from the fit service w.r.t. the primary
/// vertex; a track whose impact cannot be computed is dropped.
pub fn select_tracks<'a>(
    tracks: &'a [Track],
    primary: &PrimaryVertex,
    cuts: &TrackCuts,
    fitter: &dyn VertexFitService,
) -> SelectedTracks<'a> {
    let mut selected: Vec<(usize, &'a Track)> = Vec::with_capacity(tracks.len());
    let mut n_primary_compatible = 0;

    for (i, track) in tracks.iter().enumerate() {
        if !passes_quality(track, cuts) {
            continue;
        }
        let Ok(impact) = fitter.impact(track, &primary.position) else {
            continue;
        };
        let sin_theta = track.perigee.theta.sin();
        if impact.d0.abs() > cuts.max_d0
            || (impact.z0 * sin_theta).abs() > cuts.max_z0_sin_theta
            || impact.sigma_d0 > cuts.max_d0_error
            || impact.sigma_z0 > cuts.max_z0_error
        {
            continue;
        }
        if impact.significance < cuts.primary_compatible_significance {
            n_primary_compatible += 1;
        }
        selected.push((i, track));
    }

    // stable: equal pt keeps input order
    selected.sort_by(|a, b| b.1.pt().total_cmp(&a.1.pt()));

    let (input_index, tracks) = selected.into_iter().unzip();
    SelectedTracks {
        tracks,
        input_index,
        n_primary_compatible,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jetvertex_fit::{HitSummary, PerigeeErrors, StraightLineFitter};
    use nalgebra::{Matrix3, Vector3};

    fn errors() -> PerigeeErrors {
        PerigeeErrors { sigma_d0: 0.02, sigma_z0: 0.05 }
    }

    fn track_at(point: Vector3<f64>, phi: f64, p: f64) -> Track {
        Track::through_point(&point, phi, 1.4, 1.0 / p, errors())
    }

    fn primary() -> PrimaryVertex {
        PrimaryVertex::new(Vector3::zeros(), Matrix3::identity() * 1e-4)
    }

    #[test]
    fn test_orders_by_pt_and_keeps_input_index() {
        let fitter = StraightLineFitter::with_defaults();
        let tracks = vec![
            track_at(Vector3::new(1.0, 0.5, 0.0), 0.1, 2000.0),
            track_at(Vector3::new(1.0, 0.5, 0.0), 0.2, 9000.0),
            track_at(Vector3::new(1.0, 0.5, 0.0), 0.3, 4000.0),
        ];
        let sel = select_tracks(&tracks, &primary(), &TrackCuts::default(), &fitter);
        assert_eq!(sel.input_index, vec![1, 2, 0]);
        assert!(sel.tracks[0].pt() > sel.tracks[1].pt());
    }

    #[test]
    fn test_cuts_soft_and_displaced_tracks() {
        let fitter = StraightLineFitter::with_defaults();
        let tracks = vec![
            track_at(Vector3::new(0.5, 0.5, 0.0), 0.1, 300.0),
            track_at(Vector3::new(0.0, 30.0, 0.0), 0.1, 5000.0),
            track_at(Vector3::new(0.5, 0.5, 0.0), 0.1, 5000.0).with_hits(HitSummary {
                sct_hits: 1,
                ..HitSummary::full_barrel()
            }),
            track_at(Vector3::new(0.5, 0.5, 0.0), 0.1, 5000.0),
        ];
        let sel = select_tracks(&tracks, &primary(), &TrackCuts::default(), &fitter);
        assert_eq!(sel.input_index, vec![3]);
    }

    #[test]
    fn test_primary_compatible_count() {
        let fitter = StraightLineFitter::with_defaults();
        let tracks = vec![
            track_at(Vector3::zeros(), 0.1, 3000.0),
            track_at(Vector3::zeros(), 0.4, 3000.0),
            track_at(Vector3::new(2.0, 1.0, 0.0), 0.2, 3000.0),
        ];
        let sel = select_tracks(&tracks, &primary(), &TrackCuts::default(), &fitter);
        assert_eq!(sel.len(), 3);
        assert_eq!(sel.n_primary_compatible, 2);
    }

    #[test]
    fn test_drop_leading_above_jet() {
        let fitter = StraightLineFitter::with_defaults();
        let tracks = vec![
            track_at(Vector3::zeros(), 0.1, 80_000.0),
            track_at(Vector3::zeros(), 0.2, 3000.0),
        ];
        let mut sel = select_tracks(&tracks, &primary(), &TrackCuts::default(), &fitter);
        sel.drop_leading_above(50_000.0);
        assert_eq!(sel.input_index, vec![1]);
        assert_eq!(sel.tracks.len(), 1);
    }
}
