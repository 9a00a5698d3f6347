//! Particle Lenia on top of the [`gpu`](crate::gpu) building blocks.
//!
//! [`Simulation`] owns the step kernel, the field renderer, the particle
//! [`DoubleBuffer`] and, in off-screen mode, an intermediate image that a
//! passthrough program copies to the window. It reads everything else from
//! the caller's [`Options`] on each call.
//!
//! Particles are planar or volumetric ([`Dimensions`]). Volume runs step
//! three coordinates per particle and draw the field on one slice plane
//! placed by [`VolumeOptions`](crate::options::VolumeOptions).

use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHashMap;

use crate::error::SimError;
use crate::gpu::buffer::Scalar;
use crate::gpu::compute::ComputeStage;
use crate::gpu::double_buffer::{self, DoubleBuffer, FillPolicy};
use crate::gpu::error::ResourceError;
use crate::gpu::image::{DeviceImage, PixelFormat};
use crate::gpu::program::{GpuProgram, ProgramStatus, UniformLocation};
use crate::gpu::render::{RenderStage, Viewport};
use crate::gpu::render_context::RenderContext;
use crate::gpu::template::ConstantBlock;
use crate::options::{Dimensions, Options};

/// Particle update kernel.
pub const STEP_KERNEL: &str =
    concat!(env!("CARGO_MANIFEST_DIR"), "/assets/shaders/particles/step.comp");
/// Field visualization kernel.
pub const FIELD_KERNEL: &str =
    concat!(env!("CARGO_MANIFEST_DIR"), "/assets/shaders/particles/field.frag");
/// Particle update kernel for volume runs.
pub const STEP_VOLUME_KERNEL: &str =
    concat!(env!("CARGO_MANIFEST_DIR"), "/assets/shaders/particles/step_volume.comp");
/// Field slice kernel for volume runs.
pub const FIELD_VOLUME_KERNEL: &str =
    concat!(env!("CARGO_MANIFEST_DIR"), "/assets/shaders/particles/field_volume.frag");

/// Invocations per workgroup of the step kernel.
pub const WORKGROUP_SIZE: u32 = 64;

/// Storage block holding the current positions.
pub const READ_BLOCK: &str = "ParticlesBuffer";
/// Storage block the step kernel writes.
pub const WRITE_BLOCK: &str = "ParticlesBufferUpdated";

/// Constants injected into both particle kernels.
#[must_use]
pub fn kernel_constants(dimensions: Dimensions) -> ConstantBlock {
    ConstantBlock::with_default_marker()
        .define("WORKGROUP_SIZE", WORKGROUP_SIZE as i32)
        .define("DIMENSIONS", dimensions.components() as i32)
}

/// Step and field kernel paths for `dimensions`.
#[must_use]
pub fn kernel_paths(dimensions: Dimensions) -> (&'static str, &'static str) {
    match dimensions {
        Dimensions::Planar => (STEP_KERNEL, FIELD_KERNEL),
        Dimensions::Volume => (STEP_VOLUME_KERNEL, FIELD_VOLUME_KERNEL),
    }
}

/// Workgroups needed to cover `count` particles.
pub fn workgroup_count(count: usize) -> u32 {
    (count as u32).div_ceil(WORKGROUP_SIZE)
}

/// Uniform locations resolved once per compile.
#[derive(Debug, Default)]
struct LocationCache {
    generation: u64,
    locations: FxHashMap<&'static str, Option<UniformLocation>>,
}

impl LocationCache {
    fn location(
        &mut self,
        program: &impl GpuProgram,
        name: &'static str,
    ) -> Option<UniformLocation> {
        let generation = program.state().generation();
        if generation != self.generation {
            self.locations.clear();
            self.generation = generation;
        }
        *self
            .locations
            .entry(name)
            .or_insert_with(|| program.get_location(name))
    }
}

/// Write the members shared by the step and field kernels.
fn bind_shared_params<P: GpuProgram>(
    program: &mut P,
    cache: &mut LocationCache,
    options: &Options,
    count: usize,
) {
    let view = &options.view;
    let run = &options.run;
    let floats: [(&'static str, f32); 16] = [
        ("view_width", view.view_width as f32),
        ("view_height", view.view_height as f32),
        ("internal_width", view.internal_width),
        ("internal_height", view.internal_height),
        ("w_k", options.kernel.w_k),
        ("mu_k", options.kernel.mu_k),
        ("sigma_k2", options.kernel.sigma_k2),
        ("mu_g", options.growth.mu_g),
        ("sigma_g2", options.growth.sigma_g2),
        ("c_rep", options.repulsion.c_rep),
        ("r_distance", options.repulsion.r_distance),
        ("h", run.h),
        ("h2", run.h2()),
        ("dt", run.dt),
        ("translate_x", view.translate_x),
        ("translate_y", view.translate_y),
    ];
    for (name, value) in floats {
        let location = cache.location(&*program, name);
        program.bind_uniform(location, &value);
    }
    let location = cache.location(&*program, "num_particles");
    program.bind_uniform(location, &(count as i32));
}

/// Slice camera members of the volume field kernel. Planar kernels have
/// none of them and the writes are skipped.
fn bind_volume_params(program: &mut RenderStage, cache: &mut LocationCache, options: &Options) {
    let volume = &options.volume;
    let location = cache.location(&*program, "rotation");
    program.bind_uniform(location, &volume.rotation());
    let location = cache.location(&*program, "translate");
    program.bind_uniform(location, &volume.translate);
    let location = cache.location(&*program, "scale");
    program.bind_uniform(location, &volume.scale);
    let location = cache.location(&*program, "depth");
    program.bind_uniform(location, &volume.depth);
}

/// GPU-resident Particle Lenia.
pub struct Simulation {
    dimensions: Dimensions,
    step: ComputeStage,
    field: RenderStage,
    passthrough: RenderStage,
    particles: DoubleBuffer,
    offscreen: Option<DeviceImage>,
    step_locations: LocationCache,
    field_locations: LocationCache,
    rng: StdRng,
}

impl Simulation {
    /// Simulation seeded from OS entropy.
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    /// Simulation with reproducible particle placement.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        let dimensions = Dimensions::default();
        let (step, field) = kernel_paths(dimensions);
        Self {
            dimensions,
            step: ComputeStage::new("Particle Step", step),
            field: RenderStage::fragment_only("Particle Field", field),
            passthrough: RenderStage::passthrough(),
            particles: DoubleBuffer::new("Particles", 0, dimensions.components()),
            offscreen: None,
            step_locations: LocationCache::default(),
            field_locations: LocationCache::default(),
            rng,
        }
    }

    /// Build the kernels for `options.run.dimensions`, size the viewports
    /// to the surface, and seed `options.run.num_particles` random
    /// particles. Calling it again starts over, which is how a change of
    /// dimensions takes effect.
    ///
    /// Compile failures are logged and leave the affected program broken;
    /// stepping or drawing with it is then skipped.
    ///
    /// # Errors
    ///
    /// The device was lost while draining earlier work, or seeding the
    /// particle buffers failed.
    pub fn init(&mut self, context: &RenderContext, options: &Options) -> Result<(), SimError> {
        context.wait_idle().map_err(ResourceError::from)?;
        let dimensions = options.run.dimensions;
        if dimensions != self.dimensions {
            let (step, field) = kernel_paths(dimensions);
            self.step = ComputeStage::new("Particle Step", step);
            self.field = RenderStage::fragment_only("Particle Field", field);
            self.particles = DoubleBuffer::new("Particles", 0, dimensions.components());
            self.step_locations = LocationCache::default();
            self.field_locations = LocationCache::default();
            self.dimensions = dimensions;
        }
        self.offscreen = None;

        let constants = kernel_constants(dimensions);
        if let Err(e) = self.step.load_and_compile(context, &constants) {
            log::error!("step kernel unavailable: {e}");
        }
        if let Err(e) = self.field.load_and_compile(context, &constants) {
            log::error!("field kernel unavailable: {e}");
        }
        if let Err(e) = self.passthrough.compile_plain(context) {
            log::error!("passthrough kernel unavailable: {e}");
        }
        self.field.init(context);
        self.passthrough.init(context);
        self.particles.init(context);
        self.reset(context, options)?;
        log::info!(
            "simulation ready: {} {:?} particles, step kernel {:?}",
            self.particles.count(),
            dimensions,
            self.step.status()
        );
        Ok(())
    }

    /// Advance up to `steps` generations. Returns how many ran: zero when
    /// paused, when there are no particles, or when the step kernel is not
    /// usable.
    ///
    /// # Errors
    ///
    /// Binding the particle buffers failed or the device was lost while
    /// waiting for a step.
    pub fn step(
        &mut self,
        context: &RenderContext,
        options: &Options,
        steps: u32,
    ) -> Result<u32, SimError> {
        let count = self.particles.count();
        if options.run.paused || count == 0 || !self.step.use_program(context) {
            return Ok(0);
        }
        let groups = workgroup_count(count);
        for done in 0..steps {
            self.particles
                .step_bindings(&mut self.step, READ_BLOCK, WRITE_BLOCK, false)?;
            bind_shared_params(&mut self.step, &mut self.step_locations, options, count);
            if !self.step.dispatch(context, groups, 1, 1) {
                log::warn!("step dispatch skipped after {done} step(s)");
                return Ok(done);
            }
            self.step.wait(context).map_err(ResourceError::from)?;
        }
        Ok(steps)
    }

    /// Draw the field to the window, directly or through the off-screen
    /// image when `options.run.offscreen` is set. A headless context has
    /// no window; the field is drawn into the off-screen image only.
    ///
    /// # Errors
    ///
    /// Binding failures, or the swapchain image could not be acquired.
    pub fn display(&mut self, context: &RenderContext, options: &Options) -> Result<(), SimError> {
        self.prepare_field(options)?;
        let windowed = context.has_surface();
        if windowed && !options.run.offscreen {
            self.offscreen = None;
            return Ok(self.field.render_to_window(context)?);
        }

        let (width, height) = context.size();
        let stale = self
            .offscreen
            .as_ref()
            .is_none_or(|image| (image.width(), image.height()) != (width, height));
        if stale {
            let mut image = DeviceImage::new("Field Offscreen", width, height, PixelFormat::RGBA8);
            image.init(context);
            self.offscreen = Some(image);
        }
        let Some(image) = &self.offscreen else {
            return Ok(());
        };
        if self.field.render_to_image(context, image) && windowed {
            self.passthrough.blit_to_window(context, image)?;
        }
        Ok(())
    }

    /// Draw the field into `target`. Returns `false` if nothing was drawn.
    ///
    /// # Errors
    ///
    /// Binding the particle buffer failed.
    pub fn display_to_image(
        &mut self,
        context: &RenderContext,
        options: &Options,
        target: &DeviceImage,
    ) -> Result<bool, SimError> {
        self.prepare_field(options)?;
        Ok(self.field.render_to_image(context, target))
    }

    /// Render the field at `width × height` and read it back as RGBA8
    /// rows, top row first.
    ///
    /// # Errors
    ///
    /// Binding or readback failures.
    pub fn capture(
        &mut self,
        context: &RenderContext,
        options: &Options,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, SimError> {
        let mut image = DeviceImage::new("Field Capture", width, height, PixelFormat::RGBA8);
        image.init(context);
        if !self.display_to_image(context, options, &image)? {
            log::warn!("capture: field program did not draw");
        }
        Ok(image.download::<u8>(context)?)
    }

    fn prepare_field(&mut self, options: &Options) -> Result<(), SimError> {
        if self.field.status() != ProgramStatus::Ready {
            return Ok(());
        }
        self.field
            .bind_buffer(READ_BLOCK, self.particles.source(), double_buffer::READ_POINT)?;
        let count = self.particles.count();
        let cache = &mut self.field_locations;
        bind_shared_params(&mut self.field, cache, options, count);

        let view = &options.view;
        let modes = [("render_1", view.render_1), ("render_2", view.render_2)];
        for (name, mode) in modes {
            let location = cache.location(&self.field, name);
            self.field.bind_uniform(location, &mode.code());
        }
        let colors = [
            ("background_color", view.background_color),
            ("color1", view.color_1),
            ("color2", view.color_2),
        ];
        for (name, color) in colors {
            let location = cache.location(&self.field, name);
            self.field.bind_uniform(location, &color);
        }
        bind_volume_params(&mut self.field, cache, options);
        Ok(())
    }

    /// Change the population to `new_count`, keeping the leading particles.
    ///
    /// # Errors
    ///
    /// Readback or upload failures; the old population is kept then.
    pub fn resize(
        &mut self,
        context: &RenderContext,
        new_count: usize,
        policy: &FillPolicy,
    ) -> Result<(), SimError> {
        self.particles
            .resize(context, new_count, policy, &mut self.rng)?;
        Ok(())
    }

    /// Replace every particle with `options.run.num_particles` fresh random
    /// positions inside [`Options::spawn_range`].
    ///
    /// # Errors
    ///
    /// Upload failures.
    pub fn reset(&mut self, context: &RenderContext, options: &Options) -> Result<(), SimError> {
        let (min, max) = options.spawn_range();
        let values = double_buffer::resize_values(
            &[],
            options.run.num_particles * self.dimensions.components(),
            &FillPolicy::Random { min, max },
            &mut self.rng,
        );
        self.particles.replace(context, &values)?;
        Ok(())
    }

    /// Append one particle at `position` (domain coordinates, one per
    /// component) and record the new count in `options`.
    ///
    /// # Errors
    ///
    /// `position` has the wrong number of coordinates, or readback or
    /// upload failed.
    pub fn add_particle(
        &mut self,
        context: &RenderContext,
        options: &mut Options,
        position: &[Scalar],
    ) -> Result<(), SimError> {
        let components = self.dimensions.components();
        if position.len() != components {
            return Err(ResourceError::LengthMismatch {
                label: "particle position".to_owned(),
                expected: components,
                actual: position.len(),
            }
            .into());
        }
        let count = self.particles.count() + 1;
        self.resize(context, count, &FillPolicy::Fixed(position.to_vec()))?;
        options.run.num_particles = count;
        Ok(())
    }

    /// Follow a change of `options.run.num_particles`: a full reset when
    /// `reset_on_change` is set, otherwise a resize with random fill.
    /// Returns `true` if the population changed.
    ///
    /// # Errors
    ///
    /// As for [`resize`](Self::resize) and [`reset`](Self::reset).
    pub fn sync_population(
        &mut self,
        context: &RenderContext,
        options: &Options,
    ) -> Result<bool, SimError> {
        let wanted = options.run.num_particles;
        if wanted == self.particles.count() {
            return Ok(false);
        }
        if options.run.reset_on_change {
            self.reset(context, options)?;
        } else {
            let (min, max) = options.spawn_range();
            self.resize(context, wanted, &FillPolicy::Random { min, max })?;
        }
        Ok(true)
    }

    /// Follow a window resize: reconfigure the surface, scale the domain,
    /// and resize the viewports. The off-screen image is recreated on the
    /// next display.
    pub fn resize_window(
        &mut self,
        context: &mut RenderContext,
        options: &mut Options,
        width: u32,
        height: u32,
    ) {
        if !options.apply_window_size(width, height) {
            return;
        }
        context.resize(width, height);
        let viewport = Viewport::sized(width, height);
        self.field.viewport().set(viewport);
        self.passthrough.viewport().set(viewport);
        self.offscreen = None;
        log::debug!("window resized to {width}x{height}");
    }

    /// Current particle positions, [`Dimensions::components`] scalars per
    /// particle.
    ///
    /// # Errors
    ///
    /// Readback failures.
    pub fn positions(&self, context: &RenderContext) -> Result<Vec<Scalar>, SimError> {
        Ok(self.particles.source().download(context)?)
    }

    /// Dimensions the kernels were last built for.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// The off-screen field image, once off-screen or headless display
    /// has run.
    #[must_use]
    pub fn offscreen_image(&self) -> Option<&DeviceImage> {
        self.offscreen.as_ref()
    }

    /// The particle buffers.
    pub fn particles(&self) -> &DoubleBuffer {
        &self.particles
    }

    /// The step program.
    pub fn step_stage(&self) -> &ComputeStage {
        &self.step
    }

    /// The field program.
    pub fn field_stage(&self) -> &RenderStage {
        &self.field
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::render::QUAD_VERTEX_SHADER;
    use crate::gpu::template::{splice_constants, Stage, DEFAULT_MARKER};

    #[test]
    fn workgroups_round_up() {
        assert_eq!(workgroup_count(0), 0);
        assert_eq!(workgroup_count(1), 1);
        assert_eq!(workgroup_count(64), 1);
        assert_eq!(workgroup_count(300), 5);
    }

    #[test]
    fn kernel_constants_follow_the_marker() {
        let block = kernel_constants(Dimensions::Planar);
        let text = block.as_str();
        assert!(text.starts_with(&format!("#define {DEFAULT_MARKER}")));
        assert!(text.contains("#define WORKGROUP_SIZE 64\n"));
        assert!(text.contains("#define DIMENSIONS 2\n"));
        assert!(kernel_constants(Dimensions::Volume)
            .as_str()
            .contains("#define DIMENSIONS 3\n"));

        let spliced = splice_constants("#version 450\nvoid main() {}\n", &block);
        assert!(spliced.starts_with("#version 450\n#define default_consts"));
    }

    #[test]
    fn location_cache_resolves_once_per_generation() {
        let mut step = ComputeStage::new("Step", STEP_KERNEL);
        let source = std::fs::read_to_string(STEP_KERNEL).unwrap();
        step.state_mut()
            .compile_sources(&[(Stage::Compute, source)], &kernel_constants(Dimensions::Planar))
            .unwrap();

        let mut cache = LocationCache::default();
        let dt = cache.location(&step, "dt");
        assert!(dt.is_some());
        assert_eq!(cache.location(&step, "dt"), dt);
        assert_eq!(cache.location(&step, "no_such_member"), None);
        assert_eq!(cache.generation, step.state().generation());
        assert_eq!(step.state().workgroup_size(), Some([64, 1, 1]));
    }

    #[test]
    fn shared_params_land_in_the_step_block() {
        let mut step = ComputeStage::new("Step", STEP_KERNEL);
        let source = std::fs::read_to_string(STEP_KERNEL).unwrap();
        step.state_mut()
            .compile_sources(&[(Stage::Compute, source)], &kernel_constants(Dimensions::Planar))
            .unwrap();

        let mut cache = LocationCache::default();
        let options = Options::default();
        bind_shared_params(&mut step, &mut cache, &options, 300);

        let count = step.get_location("num_particles").unwrap();
        let dt = step.get_location("dt").unwrap();
        let bytes = step.state().uniform_bytes(count.block).unwrap();
        let read = |offset: u32| -> [u8; 4] {
            let o = offset as usize;
            [bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]
        };
        assert_eq!(i32::from_le_bytes(read(count.offset)), 300);
        assert_eq!(f32::from_le_bytes(read(dt.offset)), 0.1);
    }

    #[test]
    fn field_kernel_compiles_with_both_stages() {
        let mut field = RenderStage::fragment_only("Field", FIELD_KERNEL);
        let sources = [
            (
                Stage::Vertex,
                std::fs::read_to_string(QUAD_VERTEX_SHADER).unwrap(),
            ),
            (
                Stage::Fragment,
                std::fs::read_to_string(FIELD_KERNEL).unwrap(),
            ),
        ];
        field
            .state_mut()
            .compile_sources(&sources, &kernel_constants(Dimensions::Planar))
            .unwrap();
        assert_eq!(field.status(), ProgramStatus::Ready);
        assert!(field.find_block_index(READ_BLOCK).is_some());
        assert!(field.get_location("color2").is_some());
        assert!(field.get_location("render_1").is_some());
    }

    fn volume_field() -> RenderStage {
        let mut field = RenderStage::fragment_only("Field", FIELD_VOLUME_KERNEL);
        let sources = [
            (
                Stage::Vertex,
                std::fs::read_to_string(QUAD_VERTEX_SHADER).unwrap(),
            ),
            (
                Stage::Fragment,
                std::fs::read_to_string(FIELD_VOLUME_KERNEL).unwrap(),
            ),
        ];
        field
            .state_mut()
            .compile_sources(&sources, &kernel_constants(Dimensions::Volume))
            .unwrap();
        field
    }

    #[test]
    fn volume_kernels_compile() {
        let mut step = ComputeStage::new("Step", STEP_VOLUME_KERNEL);
        let source = std::fs::read_to_string(STEP_VOLUME_KERNEL).unwrap();
        step.state_mut()
            .compile_sources(&[(Stage::Compute, source)], &kernel_constants(Dimensions::Volume))
            .unwrap();
        assert_eq!(step.status(), ProgramStatus::Ready);
        assert!(step.get_location("view_width").is_none());

        let field = volume_field();
        assert_eq!(field.status(), ProgramStatus::Ready);
        for name in ["rotation", "translate", "scale", "depth"] {
            assert!(field.get_location(name).is_some(), "missing {name}");
        }
        assert_eq!(kernel_paths(Dimensions::Volume), (STEP_VOLUME_KERNEL, FIELD_VOLUME_KERNEL));
    }

    #[test]
    fn slice_camera_lands_in_the_field_block() {
        let mut field = volume_field();
        let mut cache = LocationCache::default();
        let mut options = Options::default();
        options.volume.yaw = 90.0;
        options.volume.translate = [1.0, 2.0, 3.0];
        options.volume.depth = 7.5;
        bind_volume_params(&mut field, &mut cache, &options);

        let rotation = field.get_location("rotation").unwrap();
        let translate = field.get_location("translate").unwrap();
        let depth = field.get_location("depth").unwrap();
        let bytes = field.state().uniform_bytes(rotation.block).unwrap();
        let read = |offset: usize| -> f32 {
            f32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
        };

        let expected = options.volume.rotation().to_cols_array();
        let base = rotation.offset as usize;
        for column in 0..3 {
            for row in 0..3 {
                let stored = read(base + column * 16 + row * 4);
                assert_eq!(stored, expected[column * 3 + row], "column {column} row {row}");
            }
        }
        let t = translate.offset as usize;
        assert_eq!([read(t), read(t + 4), read(t + 8)], [1.0, 2.0, 3.0]);
        assert_eq!(read(depth.offset as usize), 7.5);
    }

    #[test]
    fn planar_field_ignores_the_slice_camera() {
        let mut field = RenderStage::fragment_only("Field", FIELD_KERNEL);
        let sources = [
            (
                Stage::Vertex,
                std::fs::read_to_string(QUAD_VERTEX_SHADER).unwrap(),
            ),
            (
                Stage::Fragment,
                std::fs::read_to_string(FIELD_KERNEL).unwrap(),
            ),
        ];
        field
            .state_mut()
            .compile_sources(&sources, &kernel_constants(Dimensions::Planar))
            .unwrap();
        let block = field.get_location("dt").unwrap().block;
        let before = field.state().uniform_bytes(block).unwrap().to_vec();
        bind_volume_params(&mut field, &mut LocationCache::default(), &Options::default());
        assert_eq!(field.state().uniform_bytes(block).unwrap(), &before[..]);
    }
}
