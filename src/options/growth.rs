use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "Growth", inline)]
#[serde(default)]
/// Growth mapping applied to the kernel field.
pub struct GrowthOptions {
    /// Field value with maximal growth.
    #[schemars(title = "mu_g", range(min = 0.0, max = 10.0), extend("step" = 0.01))]
    pub mu_g: f32,
    /// Growth width, squared.
    #[schemars(title = "sigma_g^2", range(min = 0.0, max = 3.0), extend("step" = 0.001))]
    pub sigma_g2: f32,
}

impl Default for GrowthOptions {
    fn default() -> Self {
        Self {
            mu_g: 0.6,
            sigma_g2: 0.15 * 0.15,
        }
    }
}
