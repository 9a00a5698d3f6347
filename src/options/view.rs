use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Scalar field a color channel visualises.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Nothing.
    None,
    /// Kernel field `U`.
    #[default]
    U,
    /// Repulsion potential.
    Repulsion,
    /// Growth `G(U)`.
    Growth,
    /// Absolute energy `|R - G|`.
    Energy,
}

impl RenderMode {
    /// Integer code the field kernel switches on.
    pub fn code(self) -> i32 {
        match self {
            Self::None => 0,
            Self::U => 1,
            Self::Repulsion => 2,
            Self::Growth => 3,
            Self::Energy => 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[schemars(title = "View", inline)]
#[serde(default)]
/// Domain extent, window size, panning, and field colors.
pub struct ViewOptions {
    /// Half-width of the visible domain.
    #[schemars(title = "Width", range(min = 1.0, max = 200.0), extend("step" = 0.5))]
    pub internal_width: f32,
    /// Half-height of the visible domain.
    #[schemars(title = "Height", range(min = 1.0, max = 200.0), extend("step" = 0.5))]
    pub internal_height: f32,
    /// Keep `internal_width / internal_height` fixed when one changes.
    #[schemars(title = "Keep Aspect Ratio")]
    pub keep_aspect_ratio: bool,
    /// Window width in pixels.
    #[schemars(skip)]
    pub view_width: u32,
    /// Window height in pixels.
    #[schemars(skip)]
    pub view_height: u32,
    /// Horizontal pan offset in domain units.
    #[schemars(skip)]
    pub translate_x: f32,
    /// Vertical pan offset in domain units.
    #[schemars(skip)]
    pub translate_y: f32,
    /// RGBA background.
    #[schemars(title = "Background Color")]
    pub background_color: [f32; 4],
    /// RGBA for the first channel.
    #[schemars(title = "Color 1")]
    pub color_1: [f32; 4],
    /// RGBA for the second channel.
    #[schemars(title = "Color 2")]
    pub color_2: [f32; 4],
    /// Field shown with `color_1`.
    #[schemars(title = "Render 1")]
    pub render_1: RenderMode,
    /// Field shown with `color_2`.
    #[schemars(title = "Render 2")]
    pub render_2: RenderMode,
}

impl ViewOptions {
    /// Set the domain half-width, adjusting the height when the aspect
    /// ratio is locked.
    pub fn set_internal_width(&mut self, width: f32) {
        if self.keep_aspect_ratio && self.internal_width > 0.0 {
            self.internal_height *= width / self.internal_width;
        }
        self.internal_width = width;
    }

    /// Set the domain half-height, adjusting the width when the aspect
    /// ratio is locked.
    pub fn set_internal_height(&mut self, height: f32) {
        if self.keep_aspect_ratio && self.internal_height > 0.0 {
            self.internal_width *= height / self.internal_height;
        }
        self.internal_height = height;
    }
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            internal_width: 30.0,
            internal_height: 30.0,
            keep_aspect_ratio: true,
            view_width: 900,
            view_height: 900,
            translate_x: 0.0,
            translate_y: 0.0,
            background_color: [1.0 / 255.0, 23.0 / 255.0, 47.0 / 255.0, 1.0],
            color_1: [46.0 / 255.0, 134.0 / 255.0, 171.0 / 255.0, 1.0],
            color_2: [241.0 / 255.0, 143.0 / 255.0, 1.0 / 255.0, 1.0],
            render_1: RenderMode::U,
            render_2: RenderMode::Growth,
        }
    }
}
