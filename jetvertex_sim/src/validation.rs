//! Validation against generator truth.
//!
//! Every found vertex is matched to the truth vertex contributing most of
//! its tracks. Key metrics:
//! - Vertex efficiency (heavy-flavour truth vertices found)
//! - Fake rate (found vertices made mostly of prompt tracks)
//! - Track purity of matched vertices
//! - Position residual RMS
//! - Shared-track violations (must stay zero)

use crate::generator::GeneratedJet;
use jetvertex_core::{InclusiveVertexResult, MultiVertexResult, SecondaryVertex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// =============================================================================
// MATCHING
// =============================================================================

/// How a found vertex relates to the generator truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VertexMatch {
    /// Mostly tracks of this heavy-flavour truth vertex
    HeavyFlavour(usize),
    /// Mostly tracks of this K0 or conversion
    V0(usize),
    /// Mostly prompt tracks, or no truth vertex with two tracks in it
    Fake,
}

/// Truth vertex giving at least two tracks, and the most, to `vertex`.
fn dominant_origin(jet: &GeneratedJet, vertex: &SecondaryVertex) -> Option<(usize, usize)> {
    let mut counts: HashMap<Option<usize>, usize> = HashMap::new();
    for &t in &vertex.tracks {
        if let Some(origin) = jet.origins.get(t) {
            *counts.entry(*origin).or_default() += 1;
        }
    }
    let (origin, count) = counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))?;
    match origin {
        Some(v) if count >= 2 => Some((v, count)),
        _ => None,
    }
}

/// Classifies one found vertex.
pub fn match_vertex(jet: &GeneratedJet, vertex: &SecondaryVertex) -> VertexMatch {
    match dominant_origin(jet, vertex) {
        Some((v, _)) if jet.truth[v].kind.is_heavy_flavour() => VertexMatch::HeavyFlavour(v),
        Some((v, _)) => VertexMatch::V0(v),
        None => VertexMatch::Fake,
    }
}

/// Tracks used by more than one found vertex.
pub fn shared_tracks(result: &MultiVertexResult) -> usize {
    let mut uses: HashMap<usize, usize> = HashMap::new();
    for v in &result.vertices {
        for &t in &v.tracks {
            *uses.entry(t).or_default() += 1;
        }
    }
    uses.values().filter(|&&n| n > 1).count()
}

// =============================================================================
// REPORT
// =============================================================================

/// Aggregated validation metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub jets: usize,
    /// Heavy-flavour truth vertices with at least two tracks
    pub truth_vertices: usize,
    pub matched_vertices: usize,
    pub found_vertices: usize,
    pub fake_vertices: usize,
    /// Found vertices made of V0 or conversion tracks
    pub v0_vertices: usize,
    pub shared_track_violations: usize,
    /// Mean fraction of matched-vertex tracks from the matched truth vertex
    pub track_purity: f64,
    /// RMS 3D distance of matched vertices to their truth (mm)
    pub position_rms: f64,
    /// Jets with an inclusive vertex
    pub inclusive_found: usize,
}

impl ValidationReport {
    pub fn efficiency(&self) -> f64 {
        if self.truth_vertices > 0 {
            self.matched_vertices as f64 / self.truth_vertices as f64
        } else {
            0.0
        }
    }

    pub fn fake_rate(&self) -> f64 {
        if self.found_vertices > 0 {
            self.fake_vertices as f64 / self.found_vertices as f64
        } else {
            0.0
        }
    }

    /// Fake vertices per jet.
    pub fn fakes_per_jet(&self) -> f64 {
        if self.jets > 0 {
            self.fake_vertices as f64 / self.jets as f64
        } else {
            0.0
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Accumulates truth matching over many jets.
#[derive(Debug, Clone, Default)]
pub struct ValidationSession {
    report: ValidationReport,
    purity_sum: f64,
    residual_sum_squared: f64,
}

impl ValidationSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches the vertices found in one jet and returns the match of each.
    pub fn record_jet(
        &mut self,
        jet: &GeneratedJet,
        result: &MultiVertexResult,
        inclusive: Option<&InclusiveVertexResult>,
    ) -> Vec<VertexMatch> {
        let report = &mut self.report;
        report.jets += 1;
        report.truth_vertices += jet.heavy_flavour_vertices().filter(|v| v.tracks.len() >= 2).count();
        report.found_vertices += result.vertices.len();
        report.shared_track_violations += shared_tracks(result);
        if inclusive.is_some() {
            report.inclusive_found += 1;
        }

        let mut matched = vec![false; jet.truth.len()];
        let mut matches = Vec::with_capacity(result.vertices.len());
        for vertex in &result.vertices {
            let m = match_vertex(jet, vertex);
            match m {
                VertexMatch::HeavyFlavour(v) => {
                    // a truth vertex split in two is found once
                    if !matched[v] {
                        matched[v] = true;
                        report.matched_vertices += 1;
                        let from_truth = vertex
                            .tracks
                            .iter()
                            .filter(|&&t| jet.origins.get(t) == Some(&Some(v)))
                            .count();
                        self.purity_sum += from_truth as f64 / vertex.n_tracks() as f64;
                        self.residual_sum_squared += (vertex.position - jet.truth[v].position).norm_squared();
                    }
                }
                VertexMatch::V0(_) => report.v0_vertices += 1,
                VertexMatch::Fake => report.fake_vertices += 1,
            }
            matches.push(m);
        }
        matches
    }

    /// Current metrics.
    pub fn report(&self) -> ValidationReport {
        let mut report = self.report.clone();
        if report.matched_vertices > 0 {
            let n = report.matched_vertices as f64;
            report.track_purity = self.purity_sum / n;
            report.position_rms = (self.residual_sum_squared / n).sqrt();
        }
        report
    }
}
