//! Headless GPU integration tests. Each test skips when the machine has no
//! compute-capable adapter.

use lenia_gpu::gpu::buffer::{BufferKind, DeviceBuffer};
use lenia_gpu::gpu::compute::ComputeStage;
use lenia_gpu::gpu::double_buffer::{DoubleBuffer, FillPolicy, Role};
use lenia_gpu::gpu::error::ResourceError;
use lenia_gpu::gpu::image::{Access, DeviceImage, PixelFormat};
use lenia_gpu::gpu::program::{GpuProgram, ProgramStatus};
use lenia_gpu::gpu::render::{RenderStage, Viewport};
use lenia_gpu::gpu::render_context::RenderContext;
use lenia_gpu::gpu::template::ConstantBlock;
use lenia_gpu::simulation::{self, Simulation, READ_BLOCK, WRITE_BLOCK};
use lenia_gpu::options::Dimensions;
use lenia_gpu::{Options, SimError};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn context() -> Option<RenderContext> {
    match pollster::block_on(RenderContext::headless(256, 256)) {
        Ok(context) => Some(context),
        Err(e) => {
            eprintln!("skipping: {e}");
            None
        }
    }
}

fn step_stage(context: &RenderContext) -> ComputeStage {
    let mut stage = ComputeStage::new("Step", simulation::STEP_KERNEL);
    stage
        .load_and_compile(context, &simulation::kernel_constants(Dimensions::Planar))
        .unwrap();
    stage
}

#[test]
fn buffer_download_returns_uploaded_data() {
    let Some(context) = context() else { return };
    for (count, components) in [(0, 2), (1, 1), (37, 2), (300, 4)] {
        let mut buffer = DeviceBuffer::new("roundtrip", count * components, BufferKind::Storage);
        buffer.init(&context);
        let data: Vec<f32> = (0..count * components).map(|i| i as f32 * 0.5 - 3.0).collect();
        buffer.upload(&context, &data).unwrap();
        assert_eq!(buffer.download(&context).unwrap(), data);
    }
}

#[test]
fn mismatched_upload_writes_nothing() {
    let Some(context) = context() else { return };
    let mut buffer = DeviceBuffer::new("strict", 4, BufferKind::Storage);
    buffer.init(&context);
    buffer.upload(&context, &[1.0, 2.0, 3.0, 4.0]).unwrap();
    assert!(buffer.upload(&context, &[9.0; 3]).is_err());
    assert_eq!(buffer.download(&context).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn image_download_returns_uploaded_pixels() {
    let Some(context) = context() else { return };
    let mut image = DeviceImage::new("pixels", 5, 3, PixelFormat::RGBA32F);
    image.init(&context);
    let pixels: Vec<f32> = (0..image.element_count()).map(|i| i as f32).collect();
    image.upload(&context, &pixels).unwrap();
    assert_eq!(image.download::<f32>(&context).unwrap(), pixels);
    assert!(image.download::<u8>(&context).is_err());
}

#[test]
fn seeded_buffers_hold_identical_data() {
    let Some(context) = context() else { return };
    let mut buffers = DoubleBuffer::new("pair", 50, 2);
    buffers.init(&context);
    let values: Vec<f32> = (0..100).map(|i| (i as f32).sin()).collect();
    buffers.seed(&context, &values).unwrap();
    let a = buffers.buffer_a().download(&context).unwrap();
    let b = buffers.buffer_b().download(&context).unwrap();
    assert_eq!(a, values);
    assert_eq!(a, b);
}

#[test]
fn resize_keeps_prefix_and_fills_the_rest() {
    let Some(context) = context() else { return };
    let mut rng = StdRng::seed_from_u64(1);
    let mut buffers = DoubleBuffer::new("pair", 3, 2);
    buffers.init(&context);
    let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    buffers.seed(&context, &values).unwrap();

    buffers
        .resize(&context, 5, &FillPolicy::Fixed(vec![7.0, 8.0]), &mut rng)
        .unwrap();
    assert_eq!(buffers.count(), 5);
    assert_eq!(buffers.role(), Role::AIsSource);
    let grown = buffers.source().download(&context).unwrap();
    assert_eq!(grown, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 7.0, 8.0]);
    assert_eq!(buffers.destination().download(&context).unwrap(), grown);

    buffers
        .resize(&context, 2, &FillPolicy::Fixed(Vec::new()), &mut rng)
        .unwrap();
    assert_eq!(buffers.source().download(&context).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn paused_bindings_keep_roles_and_unpaused_alternate() {
    let Some(context) = context() else { return };
    let mut stage = step_stage(&context);
    let mut buffers = DoubleBuffer::new("pair", 8, 2);
    buffers.init(&context);

    for _ in 0..3 {
        buffers
            .step_bindings(&mut stage, READ_BLOCK, WRITE_BLOCK, true)
            .unwrap();
        assert_eq!(buffers.role(), Role::AIsSource);
    }
    let roles: Vec<_> = (0..4)
        .map(|_| {
            buffers
                .step_bindings(&mut stage, READ_BLOCK, WRITE_BLOCK, false)
                .unwrap();
            buffers.role()
        })
        .collect();
    assert_eq!(
        roles,
        vec![Role::BIsSource, Role::AIsSource, Role::BIsSource, Role::AIsSource]
    );
}

#[test]
fn render_to_image_restores_the_viewport() {
    let Some(context) = context() else { return };
    let mut source = DeviceImage::new("source", 4, 4, PixelFormat::RGBA32F);
    source.init(&context);
    source.upload(&context, &[0.5_f32; 64]).unwrap();
    let mut target = DeviceImage::new("target", 128, 64, PixelFormat::RGBA8);
    target.init(&context);

    let mut blit = RenderStage::passthrough();
    blit.compile_plain(&context).unwrap();
    blit.init(&context);
    let before = Viewport {
        x: 3,
        y: 7,
        width: 900,
        height: 900,
    };
    blit.viewport().set(before);

    assert!(blit.blit_to_image(&context, &source, &target));
    let drawn = blit.last_draw().unwrap();
    assert_eq!(drawn.viewport, Viewport::sized(128, 64));
    assert_eq!(blit.viewport().get(), before);

    let pixels = target.download::<u8>(&context).unwrap();
    assert_eq!(pixels.len(), 128 * 64 * 4);
    assert!(pixels.chunks(4).all(|p| (127..=128).contains(&p[0])));
}

#[test]
fn repeated_draws_use_identical_parameters() {
    let Some(context) = context() else { return };
    let mut source = DeviceImage::new("source", 2, 2, PixelFormat::RGBA32F);
    source.init(&context);
    let mut target = DeviceImage::new("target", 32, 32, PixelFormat::RGBA8);
    target.init(&context);

    let mut blit = RenderStage::passthrough();
    blit.compile_plain(&context).unwrap();
    assert!(blit.blit_to_image(&context, &source, &target));
    let first = blit.last_draw();
    assert!(blit.blit_to_image(&context, &source, &target));
    assert_eq!(blit.last_draw(), first);
    assert_eq!(first.map(|d| d.index_count), Some(6));
}

#[test]
fn broken_program_skips_dispatch() {
    let Some(context) = context() else { return };
    let path = std::env::temp_dir().join(format!("lenia-broken-{}.comp", std::process::id()));
    std::fs::write(&path, "#version 450\nlayout(local_size_x = 1) in;\nvoid main() { nope; }\n")
        .unwrap();
    let mut stage = ComputeStage::new("Broken", &path);
    assert!(stage.load_and_compile(&context, &ConstantBlock::new()).is_err());
    assert_eq!(stage.status(), ProgramStatus::Broken);
    assert!(!stage.dispatch(&context, 1, 1, 1));
    stage.wait(&context).unwrap();
    let _ = std::fs::remove_file(&path);
}

#[test]
fn simulation_steps_and_edits_population() {
    let Some(context) = context() else { return };
    let mut options = Options::default();
    options.run.num_particles = 100;
    let mut sim = Simulation::with_seed(42);
    sim.init(&context, &options).unwrap();
    assert_eq!(sim.particles().count(), 100);

    let before = sim.positions(&context).unwrap();
    let (min, max) = options.spawn_range();
    assert!(before.iter().all(|v| (min..max).contains(v)));

    assert_eq!(sim.step(&context, &options, 5).unwrap(), 5);
    let after = sim.positions(&context).unwrap();
    assert_eq!(after.len(), before.len());
    assert!(after.iter().all(|v| v.is_finite()));
    assert_ne!(after, before);

    options.run.paused = true;
    assert_eq!(sim.step(&context, &options, 5).unwrap(), 0);
    assert_eq!(sim.positions(&context).unwrap(), after);
    options.run.paused = false;

    assert!(matches!(
        sim.add_particle(&context, &mut options, &[1.5, -2.5, 0.0]),
        Err(SimError::Resource(ResourceError::LengthMismatch { expected: 2, actual: 3, .. }))
    ));
    sim.add_particle(&context, &mut options, &[1.5, -2.5]).unwrap();
    assert_eq!(options.run.num_particles, 101);
    let grown = sim.positions(&context).unwrap();
    assert_eq!(&grown[..200], &after[..]);
    assert_eq!(&grown[200..], &[1.5, -2.5]);

    options.run.num_particles = 40;
    assert!(sim.sync_population(&context, &options).unwrap());
    assert_eq!(sim.particles().count(), 40);
    assert!(!sim.sync_population(&context, &options).unwrap());
}

#[test]
fn capture_reads_back_the_field() {
    let Some(context) = context() else { return };
    let options = Options::default();
    let mut sim = Simulation::with_seed(3);
    sim.init(&context, &options).unwrap();
    let pixels = sim.capture(&context, &options, 64, 48).unwrap();
    assert_eq!(pixels.len(), 64 * 48 * 4);
    assert!(pixels.chunks(4).all(|p| p[3] == 255));
}

#[test]
fn storage_image_takes_kernel_writes_at_a_moved_unit() {
    let Some(context) = context() else { return };
    let path = std::env::temp_dir().join(format!("lenia-store-{}.comp", std::process::id()));
    std::fs::write(
        &path,
        "#version 450
layout(local_size_x = 4, local_size_y = 4) in;
layout(r32f, binding = 0) writeonly uniform image2D result;
void main() {
    ivec2 p = ivec2(gl_GlobalInvocationID.xy);
    imageStore(result, p, vec4(float(p.x + p.y * 4), 0.0, 0.0, 0.0));
}
",
    )
    .unwrap();
    let mut stage = ComputeStage::new("Store", &path);
    stage
        .load_and_compile(&context, &ConstantBlock::new())
        .unwrap();
    let _ = std::fs::remove_file(&path);

    let mut wide = DeviceImage::new("wide", 4, 4, PixelFormat::RGBA32F);
    wide.init(&context);
    assert!(matches!(
        stage.bind_image("result", &wide, 3, Access::Write),
        Err(ResourceError::SlotMismatch { .. })
    ));

    let mut image = DeviceImage::new("result", 4, 4, PixelFormat::R32F);
    image.init(&context);
    stage.bind_image("result", &image, 3, Access::Write).unwrap();
    assert!(stage.dispatch(&context, 1, 1, 1));
    stage.wait(&context).unwrap();

    let expected: Vec<f32> = (0..16).map(|i| i as f32).collect();
    assert_eq!(image.download::<f32>(&context).unwrap(), expected);
}

#[test]
fn headless_display_draws_into_the_offscreen_image() {
    let Some(context) = context() else { return };
    assert!(!context.has_surface());
    let options = Options::default();
    let mut sim = Simulation::with_seed(5);
    sim.init(&context, &options).unwrap();
    assert!(sim.offscreen_image().is_none());

    sim.display(&context, &options).unwrap();
    context.wait_idle().unwrap();
    let image = sim.offscreen_image().unwrap();
    assert_eq!((image.width(), image.height()), context.size());
    let pixels = image.download::<u8>(&context).unwrap();
    assert!(pixels.chunks(4).all(|p| p[3] == 255));
}

#[test]
fn volume_run_steps_three_coordinates() {
    let Some(context) = context() else { return };
    let mut options = Options::load(std::path::Path::new(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/assets/presets/volume.toml"
    )))
    .unwrap();
    options.run.num_particles = 50;
    let mut sim = Simulation::with_seed(9);
    sim.init(&context, &options).unwrap();
    assert_eq!(sim.dimensions(), Dimensions::Volume);
    assert_eq!(sim.particles().components(), 3);

    let before = sim.positions(&context).unwrap();
    assert_eq!(before.len(), 150);
    assert!(before.iter().all(|v| (-10.0..10.0).contains(v)));
    assert_eq!(sim.step(&context, &options, 3).unwrap(), 0);

    options.run.paused = false;
    assert_eq!(sim.step(&context, &options, 3).unwrap(), 3);
    let after = sim.positions(&context).unwrap();
    assert!(after.iter().all(|v| v.is_finite()));
    assert_ne!(after, before);

    let point = options.cursor_position(128.0, 128.0);
    sim.add_particle(&context, &mut options, &point).unwrap();
    assert_eq!(&sim.positions(&context).unwrap()[150..], &point[..]);

    let pixels = sim.capture(&context, &options, 32, 32).unwrap();
    assert!(pixels.chunks(4).all(|p| p[3] == 255));

    options.run.dimensions = Dimensions::Planar;
    sim.init(&context, &options).unwrap();
    assert_eq!(sim.particles().components(), 2);
    assert_eq!(sim.positions(&context).unwrap().len(), 2 * options.run.num_particles);
}
