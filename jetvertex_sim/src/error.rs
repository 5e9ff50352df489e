//! Error types for the simulation harness.

use jetvertex_core::ConfigError;
use thiserror::Error;

/// Errors raised while configuring, running or exporting a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    /// Reading a config file or writing an export failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The vertexing configuration was rejected
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No scenario with this name
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),
}

impl SimError {
    /// Creates an unknown-scenario error.
    pub fn unknown_scenario(name: impl Into<String>) -> Self {
        Self::UnknownScenario(name.into())
    }
}
