use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "Kernel", inline)]
#[serde(default)]
/// Shape of the ring kernel each particle contributes to the field.
pub struct KernelOptions {
    /// Kernel weight.
    #[schemars(title = "w_k", range(min = 0.0, max = 1.0), extend("step" = 0.001))]
    pub w_k: f32,
    /// Ring radius.
    #[schemars(title = "mu_k", range(min = 0.0, max = 20.0), extend("step" = 0.1))]
    pub mu_k: f32,
    /// Ring width, squared.
    #[schemars(title = "sigma_k^2", range(min = 0.0, max = 10.0), extend("step" = 0.05))]
    pub sigma_k2: f32,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            w_k: 0.022,
            mu_k: 4.0,
            sigma_k2: 1.0,
        }
    }
}
