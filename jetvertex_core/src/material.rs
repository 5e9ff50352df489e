//! Material-layer veto built from the detector layout.

use crate::config::DetectorLayout;
use jetvertex_fit::MaterialVetoMap;
use nalgebra::Vector3;

/// Flags transverse radii close to the beampipe and the inner pixel layers,
/// where hadronic interactions fake displaced vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerMaterialMap {
    /// (radius, half-width) of every vetoed shell
    shells: Vec<(f64, f64)>,
}

impl LayerMaterialMap {
    pub fn from_layout(layout: &DetectorLayout) -> Self {
        let tolerances = if layout.has_insertable_layer {
            [1.0, 2.5, 3.0, 3.0]
        } else {
            [1.5, 3.5, 4.0, 5.0]
        };
        let radii = [
            layout.beampipe.radius,
            layout.innermost.radius,
            layout.layer1.radius,
            layout.layer2.radius,
        ];
        Self {
            shells: radii.into_iter().zip(tolerances).collect(),
        }
    }

    /// True if a transverse position lies inside a vetoed shell.
    pub fn inside_layer(&self, x: f64, y: f64) -> bool {
        let r = x.hypot(y);
        self.shells.iter().any(|&(radius, tol)| (r - radius).abs() < tol)
    }
}

impl MaterialVetoMap for LayerMaterialMap {
    fn is_interaction_region(&self, position: &Vector3<f64>) -> bool {
        self.inside_layer(position.x, position.y)
    }
}
