use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Coordinates per particle.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Dimensions {
    /// Particles on the plane, drawn as the field over the window.
    #[default]
    Planar,
    /// Particles in space, drawn as one slice of the field.
    Volume,
}

impl Dimensions {
    /// Scalars stored per particle.
    #[must_use]
    pub fn components(self) -> usize {
        match self {
            Self::Planar => 2,
            Self::Volume => 3,
        }
    }

    /// The other variant.
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Planar => Self::Volume,
            Self::Volume => Self::Planar,
        }
    }
}

/// Half-extent of the cube volume particles spawn in.
pub const VOLUME_SPAWN_EXTENT: f32 = 10.0;

/// Degrees of orbit per window pixel of drag.
const ORBIT_DEGREES_PER_PIXEL: f32 = 0.25;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "Volume", inline)]
#[serde(default)]
/// Camera for the volume slice: orientation, position, zoom and the
/// distance of the slice plane in front of the camera.
pub struct VolumeOptions {
    /// Rotation about the vertical axis, in degrees.
    #[schemars(title = "Yaw", range(min = -180.0, max = 180.0))]
    pub yaw: f32,
    /// Rotation about the horizontal axis, in degrees.
    #[schemars(title = "Pitch", range(min = -90.0, max = 90.0))]
    pub pitch: f32,
    /// Camera position in domain units.
    #[schemars(skip)]
    pub translate: [f32; 3],
    /// Window NDC units per domain unit, per axis.
    #[schemars(title = "Scale")]
    pub scale: [f32; 3],
    /// Distance from the camera to the drawn slice.
    #[schemars(title = "Depth", range(min = 0.0, max = 20.0), extend("step" = 0.1))]
    pub depth: f32,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.0,
            translate: [0.0; 3],
            scale: [0.1; 3],
            depth: 3.0,
        }
    }
}

impl VolumeOptions {
    /// Camera-to-domain rotation.
    #[must_use]
    pub fn rotation(&self) -> glam::Mat3 {
        glam::Mat3::from_euler(
            glam::EulerRot::YXZ,
            self.yaw.to_radians(),
            self.pitch.to_radians(),
            0.0,
        )
    }

    /// Domain point shown at window NDC `(x, y)` on the slice plane.
    #[must_use]
    pub fn slice_point(&self, ndc_x: f32, ndc_y: f32) -> glam::Vec3 {
        let [sx, sy, _] = self.scale;
        let local = glam::Vec3::new(ndc_x / sx, ndc_y / sy, self.depth);
        self.rotation() * local + glam::Vec3::from_array(self.translate)
    }

    /// Orbit by a window-pixel drag of `(dx, dy)`. Pitch stops at the poles.
    pub fn orbit(&mut self, dx: f32, dy: f32) {
        self.yaw = (self.yaw + dx * ORBIT_DEGREES_PER_PIXEL + 180.0).rem_euclid(360.0) - 180.0;
        self.pitch = (self.pitch + dy * ORBIT_DEGREES_PER_PIXEL).clamp(-90.0, 90.0);
    }

    /// Move the camera by `delta` given in camera axes.
    pub fn move_camera(&mut self, delta: [f32; 3]) {
        let moved = glam::Vec3::from_array(self.translate)
            + self.rotation() * glam::Vec3::from_array(delta);
        self.translate = moved.to_array();
    }
}
