//! Output types of the finder.

use crate::context::JetContext;
use crate::geometry::primary_distance;
use crate::vertex::CandidateVertex;
use jetvertex_fit::{FourMomentum, PackedCovariance, TrackAtVertex};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// A reconstructed secondary vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondaryVertex {
    pub position: Vector3<f64>,
    pub covariance: PackedCovariance,
    pub chi2: f64,
    /// Degrees of freedom, 2N - 3 and at least 1
    pub ndf: i32,
    /// Member tracks as indices into the caller's track slice
    pub tracks: Vec<usize>,
    /// Fitted track parameters at the vertex, parallel to `tracks`
    pub track_params: Vec<TrackAtVertex>,
    pub momentum: FourMomentum,
    pub mass: f64,
    pub charge: i32,
    /// Signed distance from the primary along the jet axis
    pub projected_distance: f64,
    /// 3D distance significance from the primary vertex
    pub significance: f64,
}

impl SecondaryVertex {
    pub(crate) fn from_candidate(ctx: &JetContext<'_>, v: &CandidateVertex) -> Self {
        let (_, significance) = primary_distance(ctx.primary, &v.position, &v.covariance);
        Self {
            position: v.position,
            covariance: v.covariance,
            chi2: v.chi2,
            ndf: v.ndf(),
            tracks: v.tracks.iter().map(|&t| ctx.input_index[t]).collect(),
            track_params: v.track_params.clone(),
            momentum: v.momentum,
            mass: v.mass(),
            charge: v.charge,
            projected_distance: v.projected_distance,
            significance,
        }
    }

    pub fn n_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn perp(&self) -> f64 {
        self.position.x.hypot(self.position.y)
    }
}

/// Per-jet bookkeeping of the multi-vertex search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VertexingSummary {
    /// Invariant mass of all output vertices combined
    pub total_mass: f64,
    /// Energy of the output vertices over the selected-track energy, at most 1
    pub energy_fraction: f64,
    /// Two-track vertices that became graph edges
    pub n_two_track_vertices: usize,
    pub n_selected_tracks: usize,
    /// Tracks used by at least one accepted two-track vertex
    pub n_second_tracks: usize,
    /// Vertices seeded from cliques
    pub n_candidate_vertices: usize,
    /// Energy of the selected tracks under the pion hypothesis
    pub jet_track_energy: f64,
    pub n_primary_compatible: usize,
}

/// Result of [`find_secondary_vertices`](crate::SecondaryVertexFinder::find_secondary_vertices).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiVertexResult {
    pub vertices: Vec<SecondaryVertex>,
    pub summary: VertexingSummary,
}

impl MultiVertexResult {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// Outcome of [`search_inclusive`](crate::SecondaryVertexFinder::search_inclusive).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InclusiveSearch {
    pub vertex: Option<InclusiveVertexResult>,
    /// Tracks from V0 and conversion candidates, as sorted caller indices.
    /// Includes both tracks of a two-track vertex vetoed as K0.
    pub tracks_from_v0: Vec<usize>,
}

/// Result of [`find_inclusive_vertex`](crate::SecondaryVertexFinder::find_inclusive_vertex).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InclusiveVertexResult {
    pub vertex: SecondaryVertex,
    pub mass: f64,
    /// Vertex over selected-track energy, below 1
    pub energy_fraction: f64,
    /// Accepted two-track vertices, flagged ones included
    pub n_two_track_vertices: usize,
    pub n_selected_tracks: usize,
    pub n_vertex_tracks: usize,
    /// 3D significance signed by the jet-axis projection
    pub signed_significance: f64,
    pub jet_track_energy: f64,
    /// Transverse distance to the nearest material layer, capped at 39.9 mm
    pub material_distance: f64,
    /// Energy transverse to the jet axis scaled by the track pt, mapped into [0, 1)
    pub transverse_energy_ratio: f64,
    pub product: f64,
    pub boost: f64,
    /// Tracks from V0 and conversion candidates, as caller indices
    pub tracks_from_v0: Vec<usize>,
}
