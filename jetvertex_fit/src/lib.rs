//! Jet Vertexing Collaborator Layer
//!
//! This crate holds everything the secondary-vertex engine consumes but does
//! not own:
//! - The [`Track`] model (perigee parameters, errors, hit summary)
//! - Four-momenta and particle masses
//! - The [`VertexFitService`] contract with its explicit [`FitState`]
//! - The [`TrackClassifier`] and [`MaterialVetoMap`] lookups
//! - [`chi2_prob`], the chi2 upper-tail probability used for every fit-quality cut
//!
//! A reference [`StraightLineFitter`] implements the fit service on
//! straight-line tracks so the engine runs end-to-end without an external
//! fitting package.
//!
//! # Example
//!
//! ```ignore
//! use jetvertex_fit::{FitState, StraightLineFitter, VertexFitService};
//!
//! let fitter = StraightLineFitter::with_defaults();
//! let mut state = FitState::new().with_robustness(6);
//! let fit = fitter.fit(&[&track_a, &track_b], &mut state)?;
//! println!("chi2 = {}", fit.chi2);
//! ```

mod classifier;
mod error;
mod kinematics;
mod probability;
mod service;
mod straight_line;
mod track;

pub use classifier::{MaterialVetoMap, PrimaryVertex, TrackClassifier, TrackWeights};
pub use error::FitError;
pub use kinematics::{
    delta_r, vector_eta, vector_phi, wrap_phi, FourMomentum, B_MASS, ELECTRON_MASS, K0_MASS,
    LAMBDA_MASS, PION_MASS, PROTON_MASS,
};
pub use probability::chi2_prob;
pub use service::{
    Constraint, FitState, Impact, PackedCovariance, TrackAtVertex, VertexFit, VertexFitService,
};
pub use straight_line::{StraightLineConfig, StraightLineFitter};
pub use track::{hit_bits, HitSummary, Perigee, PerigeeErrors, Track};
