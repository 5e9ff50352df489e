//! Jet scenarios for validation runs.

use crate::error::SimError;
use crate::generator::JetRecipe;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// b-hadron decay in a jet of prompt tracks
    BJet,

    /// b-hadron with a displaced charm vertex downstream
    CharmCascade,

    /// Prompt tracks only
    LightJet,

    /// Prompt tracks and a K0 decay
    V0Jet,

    /// Prompt tracks and a photon conversion in the inner layers
    ConversionJet,

    /// High-multiplicity b-jet with a charm cascade and a K0
    BusyBJet,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::BJet,
            ScenarioId::CharmCascade,
            ScenarioId::LightJet,
            ScenarioId::V0Jet,
            ScenarioId::ConversionJet,
            ScenarioId::BusyBJet,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::BJet => "b_jet",
            ScenarioId::CharmCascade => "charm_cascade",
            ScenarioId::LightJet => "light_jet",
            ScenarioId::V0Jet => "v0_jet",
            ScenarioId::ConversionJet => "conversion_jet",
            ScenarioId::BusyBJet => "busy_b_jet",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::BJet => "4-prong b-hadron decay among 6 prompt tracks",
            ScenarioId::CharmCascade => "b -> c cascade, 2 + 3 prongs, among 6 prompt tracks",
            ScenarioId::LightJet => "8 prompt tracks, every vertex found is fake",
            ScenarioId::V0Jet => "K0 -> pi pi among 6 prompt tracks",
            ScenarioId::ConversionJet => "photon conversion on a pixel layer among 6 prompt tracks",
            ScenarioId::BusyBJet => "b -> c cascade, a K0 and 14 prompt tracks",
        }
    }

    /// Returns the jet content of the scenario.
    pub fn recipe(&self) -> JetRecipe {
        match self {
            ScenarioId::BJet => JetRecipe {
                prompt_tracks: 6,
                bottom_tracks: 4,
                ..JetRecipe::default()
            },
            ScenarioId::CharmCascade => JetRecipe {
                prompt_tracks: 6,
                bottom_tracks: 2,
                charm_tracks: 3,
                ..JetRecipe::default()
            },
            ScenarioId::LightJet => JetRecipe {
                prompt_tracks: 8,
                ..JetRecipe::default()
            },
            ScenarioId::V0Jet => JetRecipe {
                prompt_tracks: 6,
                k0_decays: 1,
                ..JetRecipe::default()
            },
            ScenarioId::ConversionJet => JetRecipe {
                prompt_tracks: 6,
                conversions: 1,
                ..JetRecipe::default()
            },
            ScenarioId::BusyBJet => JetRecipe {
                prompt_tracks: 14,
                bottom_tracks: 3,
                charm_tracks: 3,
                k0_decays: 1,
                conversions: 0,
            },
        }
    }

    /// Returns true if the jet contains a heavy-flavour decay.
    pub fn has_heavy_flavour(&self) -> bool {
        let recipe = self.recipe();
        recipe.bottom_tracks > 0 || recipe.charm_tracks > 0
    }

    /// Factor applied to the runner's fake-vertex limit.
    ///
    /// Without a track classifier, prompt tracks in a crowded jet pair up
    /// near the primary vertex, so the busy jet tolerates more fakes.
    pub fn fake_allowance(&self) -> f64 {
        match self {
            ScenarioId::BusyBJet => 3.0,
            _ => 1.0,
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "b_jet" | "bjet" => Ok(ScenarioId::BJet),
            "charm_cascade" | "charmcascade" => Ok(ScenarioId::CharmCascade),
            "light_jet" | "lightjet" => Ok(ScenarioId::LightJet),
            "v0_jet" | "v0jet" => Ok(ScenarioId::V0Jet),
            "conversion_jet" | "conversionjet" => Ok(ScenarioId::ConversionJet),
            "busy_b_jet" | "busybjet" => Ok(ScenarioId::BusyBJet),
            _ => Err(SimError::unknown_scenario(s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>().ok(), Some(id));
        }
        assert!(matches!(
            "dark_matter".parse::<ScenarioId>(),
            Err(SimError::UnknownScenario(_))
        ));
    }

    #[test]
    fn test_heavy_flavour_scenarios() {
        assert!(ScenarioId::BJet.has_heavy_flavour());
        assert!(ScenarioId::BusyBJet.has_heavy_flavour());
        assert!(!ScenarioId::LightJet.has_heavy_flavour());
        assert!(!ScenarioId::V0Jet.has_heavy_flavour());
    }

    #[test]
    fn test_only_busy_jet_widens_fake_allowance() {
        for id in ScenarioId::all() {
            let expected = if id == ScenarioId::BusyBJet { 3.0 } else { 1.0 };
            assert_eq!(id.fake_allowance(), expected, "{}", id);
        }
    }
}
