//! Standalone simulation window backed by winit.
//!
//! ```no_run
//! # use lenia_gpu::Viewer;
//! Viewer::builder()
//!     .with_preset("assets/presets/default.toml")
//!     .build()
//!     .run()
//!     .unwrap();
//! ```
//!
//! Controls: Space pauses, R respawns every particle, A adds one under
//! the cursor, `+`/`-` grow or shrink the population, O toggles the
//! off-screen path, S saves the current options as a preset, and
//! middle-drag pans the domain. Esc closes the window.
//!
//! V switches between planar and volume particles. In volume mode
//! middle-drag orbits the slice camera, the arrow keys move it across and
//! forward, and Page Up/Down move it vertically.

use std::path::PathBuf;
use std::sync::Arc;

use web_time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::{ElementState, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::error::SimError;
use crate::gpu::render_context::RenderContext;
use crate::options::{Dimensions, Options};
use crate::simulation::Simulation;
use crate::util::frame_timing::FrameTiming;

/// Particles added or removed per `+`/`-` press.
const POPULATION_STEP: usize = 10;
/// Where `S` writes the current options.
const SAVED_PRESET: &str = "assets/presets/saved.toml";
/// Domain units the volume camera moves per key press.
const CAMERA_STEP: f32 = 0.5;

// ── Builder ──────────────────────────────────────────────────────────────

/// Fluent builder for [`Viewer`].
pub struct ViewerBuilder {
    options: Option<Options>,
    preset: Option<PathBuf>,
    seed: Option<u64>,
    title: String,
}

impl ViewerBuilder {
    fn new() -> Self {
        Self {
            options: None,
            preset: None,
            seed: None,
            title: "Particle Lenia".into(),
        }
    }

    /// Start from `options` instead of the defaults.
    #[must_use]
    pub fn with_options(mut self, options: Options) -> Self {
        self.options = Some(options);
        self
    }

    /// Load the starting options from a TOML preset. Takes precedence
    /// over [`with_options`](Self::with_options); a preset that fails to
    /// load is logged and ignored.
    #[must_use]
    pub fn with_preset(mut self, path: impl Into<PathBuf>) -> Self {
        self.preset = Some(path.into());
        self
    }

    /// Fixed seed for particle placement.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the window title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Consume the builder and produce a [`Viewer`].
    #[must_use]
    pub fn build(self) -> Viewer {
        let mut options = self.options.unwrap_or_default();
        if let Some(path) = &self.preset {
            match Options::load(path) {
                Ok(loaded) => options = loaded,
                Err(e) => log::warn!("preset {}: {e}", path.display()),
            }
        }
        Viewer {
            options,
            seed: self.seed,
            title: self.title,
        }
    }
}

// ── Viewer ───────────────────────────────────────────────────────────────

/// A window running the simulation.
pub struct Viewer {
    options: Options,
    seed: Option<u64>,
    title: String,
}

impl Viewer {
    /// Start a new builder.
    #[must_use]
    pub fn builder() -> ViewerBuilder {
        ViewerBuilder::new()
    }

    /// Open the window and run the event loop. Blocks until the window is
    /// closed.
    ///
    /// # Errors
    ///
    /// The event loop could not be created or exited with an error.
    pub fn run(self) -> Result<(), SimError> {
        let event_loop = EventLoop::new().map_err(|e| SimError::Viewer(e.to_string()))?;
        event_loop.set_control_flow(ControlFlow::Poll);

        let simulation = self.seed.map_or_else(Simulation::new, Simulation::with_seed);
        let mut app = ViewerApp {
            window: None,
            context: None,
            simulation,
            options: self.options,
            title: self.title,
            timing: FrameTiming::new(0),
            last_title: Instant::now(),
            cursor: [0.0, 0.0],
            drag_from: None,
        };

        event_loop
            .run_app(&mut app)
            .map_err(|e| SimError::Viewer(e.to_string()))
    }
}

// ── Winit app ────────────────────────────────────────────────────────────

struct ViewerApp {
    window: Option<Arc<Window>>,
    context: Option<RenderContext>,
    simulation: Simulation,
    options: Options,
    title: String,
    timing: FrameTiming,
    last_title: Instant,
    cursor: [f32; 2],
    /// Cursor position where the current middle-drag started.
    drag_from: Option<[f32; 2]>,
}

impl ViewerApp {
    fn redraw(&mut self) {
        let Some(context) = &mut self.context else {
            return;
        };
        if let Err(e) = self.simulation.sync_population(context, &self.options) {
            log::error!("population change failed: {e}");
        }

        let started = Instant::now();
        match self
            .simulation
            .step(context, &self.options, self.options.run.steps_per_frame)
        {
            Ok(steps) => self.timing.record_steps(steps, started.elapsed()),
            Err(e) => log::error!("step failed: {e}"),
        }

        match self.simulation.display(context, &self.options) {
            Ok(()) => {}
            Err(SimError::Surface(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost)) => {
                let (width, height) = context.size();
                context.resize(width, height);
            }
            Err(e) => log::error!("display failed: {e}"),
        }
        self.timing.end_frame();

        if let Some(window) = &self.window {
            if self.last_title.elapsed() >= Duration::from_millis(250) {
                window.set_title(&format!(
                    "{} | {} particles | {}",
                    self.title,
                    self.simulation.particles().count(),
                    self.timing.summary()
                ));
                self.last_title = Instant::now();
            }
            window.request_redraw();
        }
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: &Key) {
        let Some(context) = &self.context else {
            return;
        };
        let result = match key {
            Key::Named(NamedKey::Escape) => {
                event_loop.exit();
                Ok(())
            }
            Key::Named(NamedKey::Space) => {
                self.options.run.paused = !self.options.run.paused;
                log::info!("paused: {}", self.options.run.paused);
                Ok(())
            }
            Key::Named(named) if self.options.run.dimensions == Dimensions::Volume => {
                let delta = match named {
                    NamedKey::ArrowLeft => Some([-CAMERA_STEP, 0.0, 0.0]),
                    NamedKey::ArrowRight => Some([CAMERA_STEP, 0.0, 0.0]),
                    NamedKey::ArrowUp => Some([0.0, 0.0, CAMERA_STEP]),
                    NamedKey::ArrowDown => Some([0.0, 0.0, -CAMERA_STEP]),
                    NamedKey::PageUp => Some([0.0, CAMERA_STEP, 0.0]),
                    NamedKey::PageDown => Some([0.0, -CAMERA_STEP, 0.0]),
                    _ => None,
                };
                if let Some(delta) = delta {
                    self.options.volume.move_camera(delta);
                }
                Ok(())
            }
            Key::Character(c) => match c.as_str() {
                "r" | "R" => self.simulation.reset(context, &self.options),
                "a" | "A" => {
                    let position = self.options.cursor_position(self.cursor[0], self.cursor[1]);
                    self.simulation
                        .add_particle(context, &mut self.options, &position)
                }
                "v" | "V" => {
                    self.options.run.dimensions = self.options.run.dimensions.toggled();
                    log::info!("dimensions: {:?}", self.options.run.dimensions);
                    self.simulation.init(context, &self.options)
                }
                "+" | "=" => {
                    self.options.run.num_particles += POPULATION_STEP;
                    Ok(())
                }
                "-" => {
                    self.options.run.num_particles =
                        self.options.run.num_particles.saturating_sub(POPULATION_STEP);
                    Ok(())
                }
                "o" | "O" => {
                    self.options.run.offscreen = !self.options.run.offscreen;
                    log::info!("off-screen path: {}", self.options.run.offscreen);
                    Ok(())
                }
                "s" | "S" => {
                    let saved = self.options.save(std::path::Path::new(SAVED_PRESET));
                    if saved.is_ok() {
                        log::info!("options saved to {SAVED_PRESET}");
                    }
                    saved
                }
                _ => Ok(()),
            },
            _ => Ok(()),
        };
        if let Err(e) = result {
            log::error!("{e}");
        }
    }
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attrs = Window::default_attributes()
            .with_title(&self.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.options.view.view_width,
                self.options.view.view_height,
            ));
        let window = match event_loop.create_window(attrs) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {e}");
                event_loop.exit();
                return;
            }
        };

        let inner = window.inner_size();
        let size = (inner.width.max(1), inner.height.max(1));
        let mut context = match pollster::block_on(RenderContext::new(window.clone(), size)) {
            Ok(c) => c,
            Err(e) => {
                log::error!("Failed to initialize GPU: {e}");
                event_loop.exit();
                return;
            }
        };

        // The window manager may not honor the requested size.
        let _ = self.options.apply_window_size(size.0, size.1);
        context.resize(size.0, size.1);
        if let Err(e) = self.simulation.init(&context, &self.options) {
            log::error!("Failed to seed particles: {e}");
            event_loop.exit();
            return;
        }

        window.request_redraw();
        self.window = Some(window);
        self.context = Some(context);
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(context) = &self.context {
            if let Err(e) = context.wait_idle() {
                log::warn!("device lost while draining: {e}");
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if matches!(event, WindowEvent::CloseRequested) {
            event_loop.exit();
            return;
        }
        if self.window.is_none() || self.context.is_none() {
            return;
        }

        match event {
            WindowEvent::Resized(size) => {
                if let Some(context) = &mut self.context {
                    self.simulation.resize_window(
                        context,
                        &mut self.options,
                        size.width.max(1),
                        size.height.max(1),
                    );
                }
            }

            WindowEvent::RedrawRequested => self.redraw(),

            WindowEvent::CursorMoved { position, .. } => {
                let cursor = [position.x as f32, position.y as f32];
                if let Some(from) = self.drag_from {
                    match self.options.run.dimensions {
                        Dimensions::Planar => self.options.pan(from, cursor),
                        Dimensions::Volume => {
                            self.options.volume.orbit(cursor[0] - from[0], cursor[1] - from[1]);
                        }
                    }
                    self.drag_from = Some(cursor);
                }
                self.cursor = cursor;
            }

            WindowEvent::MouseInput {
                button: MouseButton::Middle,
                state,
                ..
            } => {
                self.drag_from = (state == ElementState::Pressed).then_some(self.cursor);
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed && !event.repeat {
                    self.handle_key(event_loop, &event.logical_key);
                }
            }

            _ => (),
        }
    }
}
