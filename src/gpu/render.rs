//! Full-screen quad programs drawn to the window or into a [`DeviceImage`].

use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use wgpu::util::DeviceExt;

use super::image::DeviceImage;
use super::pipeline_helpers;
use super::program::{GpuProgram, ProgramState};
use super::render_context::RenderContext;
use super::template::Stage;

/// Vertex kernel shared by every quad program.
pub const QUAD_VERTEX_SHADER: &str =
    concat!(env!("CARGO_MANIFEST_DIR"), "/assets/shaders/quad/passthrough.vert");
/// Fragment kernel that copies `texture1` to the output.
pub const PASSTHROUGH_FRAGMENT_SHADER: &str =
    concat!(env!("CARGO_MANIFEST_DIR"), "/assets/shaders/quad/passthrough.frag");

/// Name of the sampled texture in the passthrough kernel.
pub const PASSTHROUGH_TEXTURE: &str = "texture1";

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct QuadVertex {
    position: [f32; 3],
    color: [f32; 3],
    uv: [f32; 2],
}

impl QuadVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Corners in top-right, bottom-right, bottom-left, top-left order.
/// Texture coordinates put `(0, 0)` at the top-left of the output.
const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex {
        position: [1.0, 1.0, 0.0],
        color: [1.0, 0.0, 0.0],
        uv: [1.0, 0.0],
    },
    QuadVertex {
        position: [1.0, -1.0, 0.0],
        color: [0.0, 1.0, 0.0],
        uv: [1.0, 1.0],
    },
    QuadVertex {
        position: [-1.0, -1.0, 0.0],
        color: [0.0, 0.0, 1.0],
        uv: [0.0, 1.0],
    },
    QuadVertex {
        position: [-1.0, 1.0, 0.0],
        color: [1.0, 1.0, 0.0],
        uv: [0.0, 0.0],
    },
];

const QUAD_INDICES: [u32; 6] = [0, 1, 3, 1, 2, 3];

/// Pixel rectangle the quad is rasterized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Viewport {
    /// Viewport at the origin.
    pub const fn sized(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// The part of `self` inside a `width × height` target.
    fn clamped(self, width: u32, height: u32) -> Self {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Self {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
        }
    }
}

/// The active viewport of a render stage.
///
/// [`scoped`](Self::scoped) replaces it for the lifetime of the returned
/// guard and restores the previous value when the guard drops.
#[derive(Debug)]
pub struct ViewportState {
    current: Cell<Viewport>,
}

impl ViewportState {
    /// State starting at `viewport`.
    pub fn new(viewport: Viewport) -> Self {
        Self {
            current: Cell::new(viewport),
        }
    }

    /// Active viewport.
    pub fn get(&self) -> Viewport {
        self.current.get()
    }

    /// Replace the active viewport.
    pub fn set(&self, viewport: Viewport) {
        self.current.set(viewport);
    }

    /// Use `viewport` until the guard drops.
    pub fn scoped(&self, viewport: Viewport) -> ViewportGuard<'_> {
        let saved = self.current.replace(viewport);
        ViewportGuard { state: self, saved }
    }
}

/// Restores the saved viewport on drop.
#[derive(Debug)]
pub struct ViewportGuard<'a> {
    state: &'a ViewportState,
    saved: Viewport,
}

impl Drop for ViewportGuard<'_> {
    fn drop(&mut self) {
        self.state.current.set(self.saved);
    }
}

/// Parameters of the most recent draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRecord {
    /// Target format the pipeline was built for.
    pub format: wgpu::TextureFormat,
    /// Viewport the quad was rasterized into.
    pub viewport: Viewport,
    /// Indices drawn.
    pub index_count: u32,
    /// Program generation (compile and binding layout) drawn with.
    pub generation: u64,
}

struct QuadMesh {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
}

/// A vertex+fragment program that draws the full-screen quad.
///
/// Pipelines are built per target format on first use and rebuilt after
/// a recompile or a binding-point change.
pub struct RenderStage {
    state: ProgramState,
    quad: Option<QuadMesh>,
    layouts: Option<(u64, Vec<wgpu::BindGroupLayout>)>,
    pipelines: FxHashMap<wgpu::TextureFormat, wgpu::RenderPipeline>,
    viewport: Rc<ViewportState>,
    last_draw: Option<DrawRecord>,
}

impl RenderStage {
    /// Quad program over a vertex and a fragment kernel.
    pub fn new(
        label: &str,
        vertex: impl Into<PathBuf>,
        fragment: impl Into<PathBuf>,
    ) -> Self {
        Self {
            state: ProgramState::new(
                label,
                vec![(Stage::Vertex, vertex.into()), (Stage::Fragment, fragment.into())],
            ),
            quad: None,
            layouts: None,
            pipelines: FxHashMap::default(),
            viewport: Rc::new(ViewportState::new(Viewport::sized(1, 1))),
            last_draw: None,
        }
    }

    /// Fragment-only program: the shared quad vertex kernel plus
    /// `fragment`.
    pub fn fragment_only(label: &str, fragment: impl Into<PathBuf>) -> Self {
        Self::new(label, QUAD_VERTEX_SHADER, fragment)
    }

    /// Program that copies `texture1` to its output.
    pub fn passthrough() -> Self {
        Self::fragment_only("Passthrough", PASSTHROUGH_FRAGMENT_SHADER)
    }

    /// Create the quad buffers and size the viewport to the surface.
    pub fn init(&mut self, context: &RenderContext) {
        let (width, height) = context.size();
        self.viewport.set(Viewport::sized(width, height));
        self.ensure_quad(context);
    }

    fn ensure_quad(&mut self, context: &RenderContext) {
        if self.quad.is_some() {
            return;
        }
        let label = self.state.label();
        let vertices = context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label} Quad Vertices")),
                contents: bytemuck::cast_slice(&QUAD_VERTICES),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let indices = context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label} Quad Indices")),
                contents: bytemuck::cast_slice(&QUAD_INDICES),
                usage: wgpu::BufferUsages::INDEX,
            });
        self.quad = Some(QuadMesh { vertices, indices });
    }

    /// Active viewport state.
    pub fn viewport(&self) -> &ViewportState {
        &self.viewport
    }

    /// Parameters of the most recent successful draw.
    pub fn last_draw(&self) -> Option<DrawRecord> {
        self.last_draw
    }

    /// Draw the quad into `target` inside the active viewport. The target
    /// is whatever the caller supplies; `load` decides whether its
    /// previous contents are kept. Returns `false` if nothing was drawn.
    pub fn render(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        target_size: (u32, u32),
        format: wgpu::TextureFormat,
        load: wgpu::LoadOp<wgpu::Color>,
    ) -> bool {
        if !self.refresh_pipeline(context) {
            return false;
        }
        self.ensure_quad(context);
        let (Some(quad), Some((generation, layouts))) = (&self.quad, &self.layouts) else {
            return false;
        };
        let Some(bind_groups) = self.state.bind_groups(&context.device, layouts) else {
            return false;
        };
        if !self.pipelines.contains_key(&format) {
            let Some(pipeline) = build_pipeline(context, &self.state, layouts, format) else {
                return false;
            };
            let _ = self.pipelines.insert(format, pipeline);
        }
        let Some(pipeline) = self.pipelines.get(&format) else {
            return false;
        };
        let viewport = self.viewport.get().clamped(target_size.0, target_size.1);

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(self.state.label()),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            if viewport.width > 0 && viewport.height > 0 {
                pass.set_viewport(
                    viewport.x as f32,
                    viewport.y as f32,
                    viewport.width as f32,
                    viewport.height as f32,
                    0.0,
                    1.0,
                );
                pass.set_pipeline(pipeline);
                for (index, group) in (0u32..).zip(&bind_groups) {
                    pass.set_bind_group(index, group, &[]);
                }
                pass.set_vertex_buffer(0, quad.vertices.slice(..));
                pass.set_index_buffer(quad.indices.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..1);
            }
        }

        self.last_draw = Some(DrawRecord {
            format,
            viewport,
            index_count: QUAD_INDICES.len() as u32,
            generation: *generation,
        });
        true
    }

    /// Draw into the next swapchain image and present it.
    ///
    /// # Errors
    ///
    /// Surface acquisition failures; the caller decides whether to
    /// reconfigure.
    pub fn render_to_window(&mut self, context: &RenderContext) -> Result<(), wgpu::SurfaceError> {
        let frame = context.get_next_frame()?;
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = context.create_encoder(&format!("{} Window", self.state.label()));
        let _ = self.render(
            context,
            &mut encoder,
            &view,
            (frame.texture.width(), frame.texture.height()),
            context.format(),
            wgpu::LoadOp::Clear(wgpu::Color::BLACK),
        );
        let _ = context.submit(encoder);
        frame.present();
        Ok(())
    }

    /// Draw into `target`. The viewport is switched to the target's size
    /// for the draw and restored afterwards. Returns `false` if nothing
    /// was drawn.
    pub fn render_to_image(&mut self, context: &RenderContext, target: &DeviceImage) -> bool {
        let Ok(view) = target.view() else {
            log::warn!(
                "{}: render target '{}' is not initialized",
                self.state.label(),
                target.label()
            );
            return false;
        };
        let size = (target.width(), target.height());
        let mut encoder = context.create_encoder(&format!("{} Offscreen", self.state.label()));

        let viewport = Rc::clone(&self.viewport);
        let drawn = {
            let _restore = viewport.scoped(Viewport::sized(size.0, size.1));
            self.render(
                context,
                &mut encoder,
                view,
                size,
                target.format().texture_format(),
                wgpu::LoadOp::Load,
            )
        };

        let _ = context.submit(encoder);
        drawn
    }

    /// Passthrough helper: draw `source` to the window.
    ///
    /// # Errors
    ///
    /// Surface acquisition failures. Binding failures are logged and
    /// nothing is drawn.
    pub fn blit_to_window(
        &mut self,
        context: &RenderContext,
        source: &DeviceImage,
    ) -> Result<(), wgpu::SurfaceError> {
        if let Err(e) = self.bind_texture(PASSTHROUGH_TEXTURE, source, 0) {
            log::warn!("{e}");
            return Ok(());
        }
        self.render_to_window(context)
    }

    /// Passthrough helper: copy `source` into `target`.
    pub fn blit_to_image(
        &mut self,
        context: &RenderContext,
        source: &DeviceImage,
        target: &DeviceImage,
    ) -> bool {
        if let Err(e) = self.bind_texture(PASSTHROUGH_TEXTURE, source, 0) {
            log::warn!("{e}");
            return false;
        }
        self.render_to_image(context, target)
    }
}

impl GpuProgram for RenderStage {
    fn state(&self) -> &ProgramState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ProgramState {
        &mut self.state
    }

    fn refresh_pipeline(&mut self, context: &RenderContext) -> bool {
        if !self.state.prepare(context) {
            return false;
        }
        let generation = self.state.generation();
        if !matches!(&self.layouts, Some((built, _)) if *built == generation) {
            self.pipelines.clear();
            self.layouts = Some((generation, self.state.bind_group_layouts(&context.device)));
            log::debug!(
                "{}: render layouts rebuilt (generation {generation})",
                self.state.label()
            );
        }
        true
    }
}

fn build_pipeline(
    context: &RenderContext,
    state: &ProgramState,
    layouts: &[wgpu::BindGroupLayout],
    format: wgpu::TextureFormat,
) -> Option<wgpu::RenderPipeline> {
    let device = &context.device;
    let vertex = state.shader_module(device, Stage::Vertex)?;
    let fragment = state.shader_module(device, Stage::Fragment)?;
    let layout_refs: Vec<&wgpu::BindGroupLayout> = layouts.iter().collect();
    log::debug!("{}: render pipeline built for {format:?}", state.label());
    Some(pipeline_helpers::create_quad_pipeline(
        device,
        state.label(),
        &vertex,
        &fragment,
        QuadVertex::layout(),
        format,
        &layout_refs,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_layout_is_interleaved() {
        assert_eq!(size_of::<QuadVertex>(), 32);
        let offsets: Vec<_> = QuadVertex::ATTRIBUTES.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
    }

    #[test]
    fn quad_indices_cover_two_triangles() {
        assert_eq!(QUAD_INDICES.len(), 6);
        assert!(QUAD_INDICES.iter().all(|&i| (i as usize) < QUAD_VERTICES.len()));
        let top_left = QUAD_VERTICES[3];
        assert_eq!(top_left.position[..2], [-1.0, 1.0]);
        assert_eq!(top_left.uv, [0.0, 0.0]);
    }

    #[test]
    fn scoped_viewport_restores_on_drop() {
        let state = ViewportState::new(Viewport::sized(900, 900));
        {
            let _guard = state.scoped(Viewport::sized(128, 64));
            assert_eq!(state.get(), Viewport::sized(128, 64));
        }
        assert_eq!(state.get(), Viewport::sized(900, 900));
    }

    #[test]
    fn nested_scopes_unwind_in_order() {
        let state = ViewportState::new(Viewport::sized(10, 10));
        {
            let _outer = state.scoped(Viewport::sized(20, 20));
            {
                let _inner = state.scoped(Viewport::sized(30, 30));
                assert_eq!(state.get().width, 30);
            }
            assert_eq!(state.get().width, 20);
        }
        assert_eq!(state.get().width, 10);
    }

    #[test]
    fn viewport_clamps_to_target() {
        let vp = Viewport {
            x: 100,
            y: 0,
            width: 900,
            height: 900,
        };
        assert_eq!(
            vp.clamped(128, 64),
            Viewport {
                x: 100,
                y: 0,
                width: 28,
                height: 64
            }
        );
        assert_eq!(Viewport::sized(5, 5).clamped(10, 10), Viewport::sized(5, 5));
    }
}
