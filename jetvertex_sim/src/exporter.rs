//! JSON exporter for offline inspection of simulated jets.

use crate::error::SimError;
use crate::generator::{GeneratedJet, TruthVertex};
use crate::validation::{ValidationReport, VertexMatch};
use jetvertex_core::{InclusiveVertexResult, MultiVertexResult};
use jetvertex_fit::FourMomentum;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// Everything known about one simulated jet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JetRecord {
    pub index: usize,

    /// Primary vertex position
    pub primary: Vector3<f64>,

    /// Jet axis four-momentum
    pub axis: FourMomentum,

    pub n_tracks: usize,

    /// Generated decay vertices
    pub truth: Vec<TruthVertex>,

    /// Multi-vertex finder output
    pub result: MultiVertexResult,

    /// Truth match of each found vertex
    pub matches: Vec<VertexMatch>,

    /// Inclusive finder output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inclusive: Option<InclusiveVertexResult>,
}

impl JetRecord {
    pub fn new(
        index: usize,
        jet: &GeneratedJet,
        result: MultiVertexResult,
        inclusive: Option<InclusiveVertexResult>,
        matches: Vec<VertexMatch>,
    ) -> Self {
        Self {
            index,
            primary: jet.primary.position,
            axis: jet.axis,
            n_tracks: jet.tracks.len(),
            truth: jet.truth.clone(),
            result,
            matches,
            inclusive,
        }
    }
}

/// Complete export of one scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JetExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// All jets
    pub jets: Vec<JetRecord>,

    /// Final results
    pub passed: bool,

    /// Validation metrics of the run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ValidationReport>,
}

impl JetExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            jets: Vec::new(),
            passed: false,
            report: None,
        }
    }

    /// Adds a jet.
    pub fn add_jet(&mut self, jet: JetRecord) {
        self.jets.push(jet);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, report: ValidationReport) {
        self.passed = passed;
        self.report = Some(report);
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
