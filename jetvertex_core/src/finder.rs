//! The secondary-vertex finder: entry points and pipeline wiring.

use crate::config::{ConfigError, VertexingConfig};
use crate::context::JetContext;
use crate::graph::CompatibilityGraph;
use crate::inclusive::find_inclusive;
use crate::pair_scan::{scan_pairs, PairScan};
use crate::reduction::reduce;
use crate::resolver::resolve;
use crate::result::{InclusiveSearch, InclusiveVertexResult, MultiVertexResult, SecondaryVertex};
use crate::seeding::seed_vertices;
use crate::selection::select_vertices;
use crate::track_selection::{select_tracks, SelectedTracks};
use jetvertex_fit::{FourMomentum, MaterialVetoMap, PrimaryVertex, Track, TrackClassifier, VertexFitService};
use tracing::debug;

/// Finds secondary vertices inside jets.
///
/// Holds only immutable configuration and collaborators, so one finder can
/// serve many threads. Every call works on its own tracks and returns its
/// own result.
pub struct SecondaryVertexFinder<F: VertexFitService> {
    config: VertexingConfig,
    fitter: F,
    classifier: Option<Box<dyn TrackClassifier>>,
    material: Option<Box<dyn MaterialVetoMap>>,
}

impl<F: VertexFitService> SecondaryVertexFinder<F> {
    /// Creates a finder after validating the configuration.
    pub fn new(config: VertexingConfig, fitter: F) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            fitter,
            classifier: None,
            material: None,
        })
    }

    /// Uses a track classifier for pair gating and track ranking.
    pub fn with_classifier(mut self, classifier: impl TrackClassifier + 'static) -> Self {
        self.classifier = Some(Box::new(classifier));
        self
    }

    /// Vetoes vertices in material interaction regions.
    pub fn with_material_map(mut self, map: impl MaterialVetoMap + 'static) -> Self {
        self.material = Some(Box::new(map));
        self
    }

    pub fn config(&self) -> &VertexingConfig {
        &self.config
    }

    pub fn fitter(&self) -> &F {
        &self.fitter
    }

    fn context<'a>(
        &'a self,
        selected: SelectedTracks<'a>,
        primary: &'a PrimaryVertex,
        jet: &'a FourMomentum,
    ) -> JetContext<'a> {
        JetContext::new(
            selected.tracks,
            selected.input_index,
            primary,
            jet,
            &self.config,
            &self.fitter,
            self.classifier.as_deref(),
            self.material.as_deref(),
        )
    }

    // ========================================================================
    // MULTI-VERTEX SEARCH
    // ========================================================================

    /// Finds all secondary vertices of one jet.
    ///
    /// Never fails: degenerate input or failed fits give an empty result.
    pub fn find_secondary_vertices(
        &self,
        primary: &PrimaryVertex,
        jet: &FourMomentum,
        tracks: &[Track],
    ) -> MultiVertexResult {
        let mut result = MultiVertexResult::default();
        if tracks.len() < 2 {
            return result;
        }

        let mut selected = select_tracks(tracks, primary, &self.config.tracks, &self.fitter);
        selected.drop_leading_above(jet.pt());
        let jet_tracks = selected.total_momentum();
        let summary = &mut result.summary;
        summary.n_selected_tracks = selected.len();
        summary.n_primary_compatible = selected.n_primary_compatible;
        summary.jet_track_energy = jet_tracks.e;
        debug!("{} of {} jet tracks selected", selected.len(), tracks.len());
        if selected.len() < 2 {
            return result;
        }

        let ctx = self.context(selected, primary, jet);
        let scan = scan_pairs(&ctx);
        summary.n_two_track_vertices = scan.n_graph_pairs();
        summary.n_second_tracks = scan.second_tracks.len();
        if scan.graph.edge_count() == 0 {
            return result;
        }

        let cliques = scan.graph.maximal_cliques();
        let mut set = seed_vertices(&ctx, &cliques);
        summary.n_candidate_vertices = set.len();
        if !reduce(&ctx, &mut set) {
            return result;
        }

        let ranks = track_ranks(&ctx, &scan);
        resolve(&ctx, &mut set, &ranks);
        let vertices = select_vertices(&ctx, &mut set);
        if vertices.is_empty() {
            return result;
        }

        // the first vertex is the primary itself when seeking it
        let skip = usize::from(self.config.multi_with_primary);
        let momentum: FourMomentum = vertices.iter().skip(skip).map(|v| v.momentum).sum();
        summary.total_mass = momentum.mass();
        summary.energy_fraction = if jet_tracks.e > 0.0 {
            (momentum.e / jet_tracks.e).min(1.0)
        } else {
            0.0
        };
        result.vertices = vertices
            .iter()
            .map(|v| SecondaryVertex::from_candidate(&ctx, v))
            .collect();
        debug!(
            "{} secondary vertices, total mass {:.0} MeV",
            result.vertices.len(),
            result.summary.total_mass
        );
        result
    }

    // ========================================================================
    // INCLUSIVE SEARCH
    // ========================================================================

    /// Fits one inclusive secondary vertex to the displaced tracks of a jet.
    pub fn find_inclusive_vertex(
        &self,
        primary: &PrimaryVertex,
        jet: &FourMomentum,
        tracks: &[Track],
    ) -> Option<InclusiveVertexResult> {
        self.search_inclusive(primary, jet, tracks).vertex
    }

    /// Inclusive search that also reports the V0 tracks it set aside, even
    /// when no vertex is accepted.
    pub fn search_inclusive(&self, primary: &PrimaryVertex, jet: &FourMomentum, tracks: &[Track]) -> InclusiveSearch {
        if tracks.len() < 2 {
            return InclusiveSearch::default();
        }
        let selected = select_tracks(tracks, primary, &self.config.tracks, &self.fitter);
        if selected.len() < 2 {
            return InclusiveSearch::default();
        }
        let jet_tracks = selected.total_momentum();
        let ctx = self.context(selected, primary, jet);
        let scan = scan_pairs(&ctx);
        debug!(
            "inclusive search: {} pairs, {} second tracks",
            scan.pairs.len(),
            scan.second_tracks.len()
        );
        find_inclusive(&ctx, &scan, &jet_tracks)
    }

    /// Compatibility graph of a jet, for inspection.
    pub fn compatibility_graph(
        &self,
        primary: &PrimaryVertex,
        jet: &FourMomentum,
        tracks: &[Track],
    ) -> CompatibilityGraph {
        let selected = select_tracks(tracks, primary, &self.config.tracks, &self.fitter);
        let ctx = self.context(selected, primary, jet);
        scan_pairs(&ctx).graph
    }
}

/// Prior rank of each selected track: its classifier signal weight, or the
/// number of graph edges using it.
fn track_ranks(ctx: &JetContext<'_>, scan: &PairScan) -> Vec<f64> {
    (0..ctx.n_tracks())
        .map(|t| match ctx.weights_of(t) {
            Some(w) => w.signal,
            None => scan.multiplicity[t] as f64,
        })
        .collect()
}
