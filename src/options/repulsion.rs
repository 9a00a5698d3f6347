use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "Repulsion", inline)]
#[serde(default)]
/// Short-range repulsion between particles.
pub struct RepulsionOptions {
    /// Repulsion strength.
    #[schemars(title = "c_rep", range(min = 0.0, max = 10.0), extend("step" = 0.05))]
    pub c_rep: f32,
    /// Pairs closer than this are treated as the same particle.
    #[schemars(skip)]
    pub r_distance: f32,
}

impl Default for RepulsionOptions {
    fn default() -> Self {
        Self {
            c_rep: 1.0,
            r_distance: 1e-10,
        }
    }
}
