use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::volume::Dimensions;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "Simulation", inline)]
#[serde(default)]
/// Population, integration, and stepping controls.
pub struct RunOptions {
    /// Planar or volume particles. Changing it requires a new `init`.
    #[schemars(title = "Dimensions")]
    pub dimensions: Dimensions,
    /// Particle count the simulation should have.
    #[schemars(title = "Number of Particles", range(min = 0, max = 2500))]
    pub num_particles: usize,
    /// Compute steps per displayed frame.
    #[schemars(title = "Steps per frame", range(min = 1, max = 1000))]
    pub steps_per_frame: u32,
    /// Integration time step.
    #[schemars(title = "dt", range(min = 0.0, max = 3.0), extend("step" = 0.01))]
    pub dt: f32,
    /// Finite-difference distance for gradients.
    #[schemars(title = "h (gradient evaluation distance)", range(min = 0.0, max = 0.1), extend("step" = 0.001))]
    pub h: f32,
    /// Steps still run but never advance the state.
    #[schemars(title = "Pause")]
    pub paused: bool,
    /// Reseed the population whenever a field parameter changes.
    #[schemars(title = "Reset particles on settings change")]
    pub reset_on_change: bool,
    /// Render into an off-screen image and copy it to the window.
    #[schemars(title = "Off-screen rendering")]
    pub offscreen: bool,
}

impl RunOptions {
    /// Central-difference denominator, always `2 h`.
    pub fn h2(&self) -> f32 {
        2.0 * self.h
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dimensions: Dimensions::Planar,
            num_particles: 300,
            steps_per_frame: 10,
            dt: 0.1,
            h: 0.01,
            paused: false,
            reset_on_change: false,
            offscreen: false,
        }
    }
}
