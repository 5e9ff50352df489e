//! JetVertex Simulation Harness
//!
//! Generates synthetic jets with known decay vertices, runs the secondary
//! vertex finder on them and scores the output against the truth.
//!
//! All randomness derives from a single 64-bit seed, so every run is
//! reproducible.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   GeneratedJet   ┌───────────────────────┐
//! │ JetGenerator │ ───────────────► │ SecondaryVertexFinder │
//! │ (truth)      │                  └───────────┬───────────┘
//! └──────┬───────┘                              │ results
//!        │ truth                                ▼
//!        └────────────────────────► ┌───────────────────────┐
//!                                   │   ValidationSession   │
//!                                   └───────────┬───────────┘
//!                                               ▼
//!                                  ScenarioResult / JetExport
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use jetvertex_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let runner = ScenarioRunner::new(42).with_jets(200);
//! let result = runner.run(ScenarioId::CharmCascade)?;
//! println!("efficiency = {:.2}", result.metrics.vertex_efficiency);
//! ```

mod error;
mod exporter;
mod generator;
mod runner;
pub mod scenarios;
mod validation;

pub use error::SimError;
pub use exporter::{JetExport, JetRecord};
pub use generator::{DecayKind, GeneratedJet, GeneratorConfig, JetGenerator, JetRecipe, TruthVertex};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use validation::{match_vertex, shared_tracks, ValidationReport, ValidationSession, VertexMatch};
