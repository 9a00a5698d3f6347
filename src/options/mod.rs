//! Simulation parameters with TOML preset support.
//!
//! [`Options`] is plain data owned by the caller. A control panel edits it
//! between frames and the simulation reads it on every `step`/`display`;
//! the simulation keeps no copy of its own. Presets live in
//! `assets/presets/`.

mod growth;
mod kernel;
mod repulsion;
mod run;
mod view;
mod volume;

use std::path::Path;

pub use growth::GrowthOptions;
pub use kernel::KernelOptions;
pub use repulsion::RepulsionOptions;
pub use run::RunOptions;
pub use view::{RenderMode, ViewOptions};
pub use volume::{Dimensions, VolumeOptions, VOLUME_SPAWN_EXTENT};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// Fraction of the domain half-width new random particles are spread over.
pub const SPAWN_FRACTION: f32 = 0.3;

/// Top-level options container. All sub-structs use `#[serde(default)]` so
/// partial TOML files (e.g. only overriding `[kernel]`) work correctly.
#[derive(
    Debug, Clone, Serialize, Deserialize, PartialEq, Default, JsonSchema,
)]
#[serde(default)]
pub struct Options {
    /// Kernel shape.
    pub kernel: KernelOptions,
    /// Growth mapping.
    pub growth: GrowthOptions,
    /// Repulsion.
    pub repulsion: RepulsionOptions,
    /// Domain, window, and colors.
    pub view: ViewOptions,
    /// Population and stepping.
    pub run: RunOptions,
    /// Slice camera used when `run.dimensions` is `volume`.
    pub volume: VolumeOptions,
}

impl Options {
    /// Generate JSON Schema describing the UI-exposed options.
    #[must_use]
    pub fn json_schema() -> schemars::Schema {
        schemars::schema_for!(Options)
    }

    /// Load options from a TOML file. Missing fields use defaults.
    pub fn load(path: &Path) -> Result<Self, SimError> {
        let content = std::fs::read_to_string(path).map_err(SimError::Io)?;
        toml::from_str(&content)
            .map_err(|e| SimError::OptionsParse(e.to_string()))
    }

    /// Save options to a TOML file (pretty-printed).
    pub fn save(&self, path: &Path) -> Result<(), SimError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SimError::OptionsParse(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(SimError::Io)?;
        }
        std::fs::write(path, content).map_err(SimError::Io)
    }

    /// List available preset names (TOML file stems) in a directory.
    #[must_use]
    pub fn list_presets(dir: &Path) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) =
                        path.file_stem().and_then(|s| s.to_str())
                    {
                        names.push(stem.to_owned());
                    }
                }
            }
        }
        names.sort();
        names
    }

    /// Follow a window resize to `width × height`: the domain grows or
    /// shrinks with the window so the on-screen scale stays put. Returns
    /// `false` if the size did not change or is degenerate.
    pub fn apply_window_size(&mut self, width: u32, height: u32) -> bool {
        let view = &mut self.view;
        if width == 0 || height == 0 || (width, height) == (view.view_width, view.view_height) {
            return false;
        }
        if view.view_width > 0 && view.view_height > 0 {
            view.internal_width *= width as f32 / view.view_width as f32;
            view.internal_height *= height as f32 / view.view_height as f32;
        }
        view.view_width = width;
        view.view_height = height;
        true
    }

    /// Map a window pixel (origin top-left) to domain coordinates, with
    /// the pan offset applied when `include_translate` is set.
    pub fn cursor_to_domain(&self, x: f32, y: f32, include_translate: bool) -> [f32; 2] {
        let view = &self.view;
        let mut position = [
            x / view.view_width.max(1) as f32 * 2.0 * view.internal_width - view.internal_width,
            (1.0 - y / view.view_height.max(1) as f32) * 2.0 * view.internal_height
                - view.internal_height,
        ];
        if include_translate {
            position[0] += view.translate_x;
            position[1] += view.translate_y;
        }
        position
    }

    /// Shift the pan offset so the domain point under `from` moves to `to`
    /// (both in window pixels).
    pub fn pan(&mut self, from: [f32; 2], to: [f32; 2]) {
        let a = self.cursor_to_domain(from[0], from[1], false);
        let b = self.cursor_to_domain(to[0], to[1], false);
        self.view.translate_x -= b[0] - a[0];
        self.view.translate_y -= b[1] - a[1];
    }

    /// Map a window pixel to a new particle's coordinates: the panned
    /// domain point for planar runs, the point on the slice plane for
    /// volume runs.
    #[must_use]
    pub fn cursor_position(&self, x: f32, y: f32) -> Vec<f32> {
        match self.run.dimensions {
            Dimensions::Planar => self.cursor_to_domain(x, y, true).to_vec(),
            Dimensions::Volume => {
                let view = &self.view;
                let ndc_x = x / view.view_width.max(1) as f32 * 2.0 - 1.0;
                let ndc_y = 1.0 - y / view.view_height.max(1) as f32 * 2.0;
                self.volume.slice_point(ndc_x, ndc_y).to_array().to_vec()
            }
        }
    }

    /// Symmetric range new random particle coordinates are drawn from.
    pub fn spawn_range(&self) -> (f32, f32) {
        let extent = match self.run.dimensions {
            Dimensions::Planar => self.view.internal_width * SPAWN_FRACTION,
            Dimensions::Volume => VOLUME_SPAWN_EXTENT,
        };
        (-extent, extent)
    }
}
