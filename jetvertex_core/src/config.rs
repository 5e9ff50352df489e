//! Configuration for the secondary-vertex finder.
//!
//! Every numeric decision threshold of the pipeline is a named parameter
//! here. Defaults reproduce the tuned values of the reference tool; units are
//! millimetres and MeV.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

/// Configuration inconsistencies, reported before a finder is built.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A parameter is out of its allowed range
    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// Configuration text could not be parsed
    #[error("Config parse error: {0}")]
    Parse(String),
}

impl ConfigError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// DETECTOR LAYOUT
// ============================================================================

/// Transverse position and radius of a cylindrical layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

impl Layer {
    pub const fn centered(radius: f64) -> Self {
        Self { x: 0.0, y: 0.0, radius }
    }

    /// Transverse distance of a point from the layer axis.
    pub fn distance(&self, x: f64, y: f64) -> f64 {
        (x - self.x).hypot(y - self.y)
    }
}

/// Beampipe and pixel layer geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorLayout {
    pub beampipe: Layer,
    /// Innermost pixel layer ("b-layer")
    pub innermost: Layer,
    pub layer1: Layer,
    pub layer2: Layer,
    pub layer3: Layer,
    /// An insertable innermost layer exists; changes material tolerances
    pub has_insertable_layer: bool,
    /// Half-length of the pixel detector (default: 650 mm)
    pub pixel_half_length: f64,
    /// Half-length of the pixel barrel (default: 400 mm)
    pub barrel_half_length: f64,
}

impl Default for DetectorLayout {
    fn default() -> Self {
        Self {
            beampipe: Layer::centered(24.0),
            innermost: Layer::centered(34.0),
            layer1: Layer::centered(51.6),
            layer2: Layer::centered(89.3),
            layer3: Layer::centered(123.8),
            has_insertable_layer: true,
            pixel_half_length: 650.0,
            barrel_half_length: 400.0,
        }
    }
}

// ============================================================================
// CUT GROUPS
// ============================================================================

/// Track preselection cuts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackCuts {
    /// Minimum transverse momentum (default: 700 MeV)
    pub min_pt: f64,
    pub max_abs_eta: f64,
    /// Maximum |d0| w.r.t. the primary vertex (default: 5 mm)
    pub max_d0: f64,
    /// Maximum |z0 sinθ| w.r.t. the primary vertex (default: 15 mm)
    pub max_z0_sin_theta: f64,
    pub max_d0_error: f64,
    pub max_z0_error: f64,
    pub max_chi2_per_ndf: f64,
    pub min_pixel_hits: u8,
    pub min_sct_hits: u8,
    pub min_silicon_hits: u32,
    pub min_innermost_hits: u8,
    /// Impact significance below which a track counts as primary-compatible
    pub primary_compatible_significance: f64,
}

impl Default for TrackCuts {
    fn default() -> Self {
        Self {
            min_pt: 700.0,
            max_abs_eta: 2.5,
            max_d0: 5.0,
            max_z0_sin_theta: 15.0,
            max_d0_error: 1.0,
            max_z0_error: 5.0,
            max_chi2_per_ndf: 5.0,
            min_pixel_hits: 1,
            min_sct_hits: 4,
            min_silicon_hits: 7,
            min_innermost_hits: 0,
            primary_compatible_significance: 2.0,
        }
    }
}

/// Two-track vertex acceptance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairCuts {
    /// Maximum two-track fit chi2 (default: 10)
    pub max_chi2: f64,
    /// Maximum transverse radius (default: 180 mm)
    pub max_radius: f64,
    /// Maximum two-track invariant mass (default: 4000 MeV)
    pub max_mass: f64,
    /// Minimum projection of SV-PV on the pair momentum (default: -100 mm)
    pub min_momentum_projection: f64,
    /// Robustness of the pair fit (default: 6)
    pub robustness: u32,
    /// Minimum classifier pair score (default: 0.015)
    pub min_classifier_score: f64,
    /// Pileup weight above which a track is dropped near the primary (default: 0.75)
    pub max_pileup_weight: f64,
    /// Pileup weight above which both tracks flag a material interaction (default: 0.5)
    pub material_pileup_weight: f64,
    /// Exclude V0 / material flagged pairs from the compatibility graph
    pub reject_flagged: bool,
    /// Pixel hit-pattern consistency check for two-track vertices
    pub pixel_cleaning: bool,
    /// First-measured-point consistency check for two-track vertices
    pub first_hit_cleaning: bool,
    /// Maximum difference of first-hit radii (default: 25 mm)
    pub first_hit_radius_gap: f64,
}

impl Default for PairCuts {
    fn default() -> Self {
        Self {
            max_chi2: 10.0,
            max_radius: 180.0,
            max_mass: 4000.0,
            min_momentum_projection: -100.0,
            robustness: 6,
            min_classifier_score: 0.015,
            max_pileup_weight: 0.75,
            material_pileup_weight: 0.5,
            reject_flagged: false,
            pixel_cleaning: false,
            first_hit_cleaning: false,
            first_hit_radius_gap: 25.0,
        }
    }
}

/// Neutral long-lived particle (V0) and conversion identification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct V0Cuts {
    /// Minimum vertex significance to test the V0 hypotheses (default: 8)
    pub min_significance: f64,
    /// Maximum ππ mass to test the V0 hypotheses (default: 900 MeV)
    pub max_mass: f64,
    pub k0_window: f64,
    pub lambda_window: f64,
    /// ee mass below which a pair is a conversion (default: 40 MeV)
    pub conversion_mass: f64,
    /// V0 impact significance to the primary above which it is not a V0 (default: 3)
    pub impact_significance: f64,
    /// Final-selection conversion mass (default: 60 MeV)
    pub final_conversion_mass: f64,
    /// Final-selection conversion minimum radius (default: 20 mm)
    pub final_conversion_radius: f64,
}

impl Default for V0Cuts {
    fn default() -> Self {
        Self {
            min_significance: 8.0,
            max_mass: 900.0,
            k0_window: 22.0,
            lambda_window: 8.0,
            conversion_mass: 40.0,
            impact_significance: 3.0,
            final_conversion_mass: 60.0,
            final_conversion_radius: 20.0,
        }
    }
}

/// Seeding and vertex-set reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReducerCuts {
    /// Maximum chi2 of a seeded two-track vertex (default: 10)
    pub seed_pair_chi2: f64,
    /// P-value below which a vertex is disassembled (default: 1e-3)
    pub disassembly_probability: f64,
    pub disassembly_robustness: u32,
    /// Joint-refit chi2 above which a merge counts as failed (default: 500)
    pub merge_max_chi2: f64,
    /// P-value an overlap-merge addition must keep (default: 1e-3)
    pub overlap_add_probability: f64,
    /// Margin beyond the third pixel layer for volume pruning (default: 10 mm)
    pub prune_radius_margin: f64,
    /// Guard on the number of structural changes in the merge loop
    pub max_passes: usize,
}

impl Default for ReducerCuts {
    fn default() -> Self {
        Self {
            seed_pair_chi2: 10.0,
            disassembly_probability: 1e-3,
            disassembly_robustness: 5,
            merge_max_chi2: 500.0,
            overlap_add_probability: 1e-3,
            prune_radius_margin: 10.0,
            max_passes: 10_000,
        }
    }
}

/// Shared-track resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverCuts {
    /// Reduced chi2 given to heavy two-track vertices (default: 100)
    pub heavy_vertex_chi2: f64,
    /// P-value of a vertex considered healthy (default: 0.01)
    pub healthy_probability: f64,
    /// P-value both vertices need for the two-vertex special case (default: 0.05)
    pub two_vertex_probability: f64,
    /// Track chi2 below which a merge is tried before detaching (default: 6)
    pub track_detach_cut: f64,
    /// Vertex-vertex significance below which vertices merge (default: 3)
    pub vertex_merge_cut: f64,
    /// L1 distance beyond which vertex pairs are not compared (default: 20 mm)
    pub pair_window: f64,
    /// 1-dof p-value a leftover one-track vertex needs (default: 0.05)
    pub one_track_probability: f64,
    /// P-value below which a multi-track vertex is improved (default: 1e-3)
    pub improve_threshold: f64,
    /// P-value the improvement loop aims for (default: 0.01)
    pub improve_target: f64,
}

impl Default for ResolverCuts {
    fn default() -> Self {
        Self {
            heavy_vertex_chi2: 100.0,
            healthy_probability: 0.01,
            two_vertex_probability: 0.05,
            track_detach_cut: 6.0,
            vertex_merge_cut: 3.0,
            pair_window: 20.0,
            one_track_probability: 0.05,
            improve_threshold: 1e-3,
            improve_target: 0.01,
        }
    }
}

/// Final vertex selection and output ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionCuts {
    /// Minimum p-value of an accepted multi-track vertex (default: 1e-3)
    pub min_probability: f64,
    /// Track impact significance cut (default: 2)
    pub track_significance: f64,
    /// Minimum vertex significance from the primary (default: 4)
    pub vertex_significance: f64,
    /// 1-dof p-value a one-track vertex needs (default: 0.01)
    pub one_track_probability: f64,
    /// Radius below which vertices are ordered by projected distance (default: 20 mm)
    pub projected_sort_radius: f64,
    /// Mass difference that moves the heavier of the first two vertices first (default: 5000 MeV)
    pub mass_swap_gap: f64,
    /// Minimum projected significance of a vertex receiving tracks (default: 10)
    pub attach_vertex_significance: f64,
    /// Maximum impact significance of an attached track (default: 4)
    pub attach_impact_significance: f64,
    pub attach_max_tracks: usize,
}

impl Default for SelectionCuts {
    fn default() -> Self {
        Self {
            min_probability: 1e-3,
            track_significance: 2.0,
            vertex_significance: 4.0,
            one_track_probability: 0.01,
            projected_sort_radius: 20.0,
            mass_swap_gap: 5000.0,
            attach_vertex_significance: 10.0,
            attach_impact_significance: 4.0,
            attach_max_tracks: 2,
        }
    }
}

/// Single inclusive vertex fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InclusiveCuts {
    /// Robustness of the common fit; non-zero selects outliers by weight
    pub robustness: u32,
    /// Worst-track chi2 below which the common fit is accepted (default: 10)
    pub max_track_chi2: f64,
    pub min_probability: f64,
    /// Median classifier rank below which low-ranked tracks are dropped (default: 0.3)
    pub median_rank_cut: f64,
    /// Vertex significance above which additional tracks are sought (default: 8)
    pub additional_vertex_significance: f64,
    pub additional_max_sv_significance: f64,
    pub additional_min_pv_significance: f64,
    /// Minimum PV/SV significance gain of an additional track (default: 4)
    pub additional_min_gain: f64,
    pub additional_max_tracks: usize,
    pub additional_min_signal: f64,
    /// Tighter K0 window on the final two-track vertex (default: 15 MeV)
    pub k0_window: f64,
}

impl Default for InclusiveCuts {
    fn default() -> Self {
        Self {
            robustness: 0,
            max_track_chi2: 10.0,
            min_probability: 1e-3,
            median_rank_cut: 0.3,
            additional_vertex_significance: 8.0,
            additional_max_sv_significance: 10.0,
            additional_min_pv_significance: 1.0,
            additional_min_gain: 4.0,
            additional_max_tracks: 3,
            additional_min_signal: 0.1,
            k0_window: 15.0,
        }
    }
}

// ============================================================================
// TOP-LEVEL CONFIG
// ============================================================================

/// Complete configuration of the secondary-vertex finder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VertexingConfig {
    pub detector: DetectorLayout,
    pub tracks: TrackCuts,
    pub pairs: PairCuts,
    pub v0: V0Cuts,
    pub reducer: ReducerCuts,
    pub resolver: ResolverCuts,
    pub selection: SelectionCuts,
    pub inclusive: InclusiveCuts,

    /// Jet cone half-width in ΔR (default: 0.4)
    pub cone_for_tag: f64,

    /// b-hadron mass ceiling (default: 5500 MeV)
    pub b_mass_limit: f64,

    /// P-value a merged or re-attached vertex must exceed (default: 0.01)
    pub merge_probability: f64,

    /// Look for a vertex compatible with the primary instead of displaced ones
    pub multi_with_primary: bool,

    /// Keep qualified one-track vertices in the output (default: true)
    pub multi_with_one_track_vertex: bool,
}

impl Default for VertexingConfig {
    fn default() -> Self {
        Self {
            detector: DetectorLayout::default(),
            tracks: TrackCuts::default(),
            pairs: PairCuts::default(),
            v0: V0Cuts::default(),
            reducer: ReducerCuts::default(),
            resolver: ResolverCuts::default(),
            selection: SelectionCuts::default(),
            inclusive: InclusiveCuts::default(),
            cone_for_tag: 0.4,
            b_mass_limit: 5500.0,
            merge_probability: 0.01,
            multi_with_primary: false,
            multi_with_one_track_vertex: true,
        }
    }
}

fn check_probability(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(name, format!("{value} is not a probability in (0, 1)")))
    }
}

fn check_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(name, format!("{value} must be positive")))
    }
}

impl VertexingConfig {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks parameter ranges and detector consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_probability("merge_probability", self.merge_probability)?;
        check_probability("reducer.disassembly_probability", self.reducer.disassembly_probability)?;
        check_probability("reducer.overlap_add_probability", self.reducer.overlap_add_probability)?;
        check_probability("resolver.healthy_probability", self.resolver.healthy_probability)?;
        check_probability("resolver.two_vertex_probability", self.resolver.two_vertex_probability)?;
        check_probability("resolver.one_track_probability", self.resolver.one_track_probability)?;
        check_probability("resolver.improve_threshold", self.resolver.improve_threshold)?;
        check_probability("resolver.improve_target", self.resolver.improve_target)?;
        check_probability("selection.min_probability", self.selection.min_probability)?;
        check_probability("selection.one_track_probability", self.selection.one_track_probability)?;
        check_probability("inclusive.min_probability", self.inclusive.min_probability)?;

        check_positive("cone_for_tag", self.cone_for_tag)?;
        check_positive("b_mass_limit", self.b_mass_limit)?;
        check_positive("pairs.max_chi2", self.pairs.max_chi2)?;
        check_positive("pairs.max_radius", self.pairs.max_radius)?;
        check_positive("pairs.max_mass", self.pairs.max_mass)?;
        check_positive("reducer.seed_pair_chi2", self.reducer.seed_pair_chi2)?;
        check_positive("resolver.vertex_merge_cut", self.resolver.vertex_merge_cut)?;
        check_positive("resolver.track_detach_cut", self.resolver.track_detach_cut)?;

        if self.resolver.improve_target < self.resolver.improve_threshold {
            return Err(ConfigError::invalid(
                "resolver.improve_target",
                "must not be below resolver.improve_threshold",
            ));
        }
        if self.reducer.max_passes == 0 {
            return Err(ConfigError::invalid("reducer.max_passes", "must be at least 1"));
        }

        let d = &self.detector;
        let radii = [
            d.beampipe.radius,
            d.innermost.radius,
            d.layer1.radius,
            d.layer2.radius,
            d.layer3.radius,
        ];
        check_positive("detector.beampipe.radius", radii[0])?;
        if radii.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::invalid(
                "detector",
                "layer radii must increase from the beampipe outwards",
            ));
        }
        check_positive("detector.pixel_half_length", d.pixel_half_length)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(VertexingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_probability() {
        let mut config = VertexingConfig::default();
        config.merge_probability = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter { name: "merge_probability", .. })
        ));
    }

    #[test]
    fn test_rejects_unordered_layers() {
        let mut config = VertexingConfig::default();
        config.detector.layer2.radius = 40.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config = VertexingConfig::from_json(r#"{ "cone_for_tag": 0.3, "pairs": { "max_chi2": 8.0 } }"#)
            .unwrap();
        assert_eq!(config.cone_for_tag, 0.3);
        assert_eq!(config.pairs.max_chi2, 8.0);
        assert_eq!(config.pairs.max_radius, 180.0);
        assert_eq!(config.b_mass_limit, 5500.0);
    }

    #[test]
    fn test_bad_json_is_parse_error() {
        assert!(matches!(VertexingConfig::from_json("{ nope"), Err(ConfigError::Parse(_))));
    }
}
