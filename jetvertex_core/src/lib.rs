//! JetVertex Core - Secondary Vertex Finding Inside Jets
//!
//! Given the tracks of one jet, its axis and the primary vertex, this library
//! finds the displaced decay vertices of heavy-flavour hadrons:
//! 1. **Multi-vertex search**: every pair of tracks is fitted, compatible
//!    pairs form a graph, its maximal cliques seed candidate vertices and an
//!    iterative cleaner leaves each track in at most one vertex
//! 2. **Inclusive search**: one common vertex is fitted to all displaced
//!    tracks, dropping the worst track until the fit is acceptable
//!
//! ```text
//!  tracks ──► track_selection ──► pair_scan ──► graph (Bron-Kerbosch)
//!                                     │                │
//!                                     │             seeding
//!                                     │                │
//!                                     ▼            reduction
//!                                 inclusive            │
//!                                     │            resolver
//!                                     │                │
//!                                     ▼            selection
//!                     InclusiveVertexResult     MultiVertexResult
//! ```
//!
//! Vertex fitting is delegated to a [`jetvertex_fit::VertexFitService`].

pub mod config;
pub mod context;
pub mod finder;
pub mod geometry;
pub mod graph;
pub mod inclusive;
pub mod material;
pub mod pair_scan;
pub mod pixel;
pub mod reduction;
pub mod resolver;
pub mod result;
pub mod seeding;
pub mod selection;
pub mod track_selection;
pub mod vertex;

// Re-export key types for convenience
pub use config::{
    ConfigError, DetectorLayout, InclusiveCuts, Layer, PairCuts, ReducerCuts, ResolverCuts,
    SelectionCuts, TrackCuts, V0Cuts, VertexingConfig,
};
pub use finder::SecondaryVertexFinder;
pub use graph::CompatibilityGraph;
pub use material::LayerMaterialMap;
pub use pair_scan::{PairFlag, TwoTrackVertex};
pub use result::{InclusiveSearch, InclusiveVertexResult, MultiVertexResult, SecondaryVertex, VertexingSummary};
pub use vertex::{CandidateVertex, TrackIndex};
