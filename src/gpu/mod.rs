//! GPU resource management.
//!
//! Device buffers and images, kernel templates with constant injection,
//! compute and full-screen render programs, and the double-buffered state
//! that ties a compute step to a render pass.

/// Structured `f32` device buffers.
pub mod buffer;
/// Compute programs and the dispatch/wait barrier.
pub mod compute;
/// Paired buffers with source/destination roles and resizing.
pub mod double_buffer;
/// Resource and binding errors.
pub mod error;
/// 2D device images.
pub mod image;
/// Bind group layout entries, samplers, and the quad pipeline.
pub mod pipeline_helpers;
/// Shared program state and the `GpuProgram` capability trait.
pub mod program;
/// Resource reflection over validated kernels.
pub mod reflect;
/// Full-screen quad render programs and viewport state.
pub mod render;
/// wgpu device, surface, and queue initialization.
pub mod render_context;
/// Kernel source loading and constant injection.
pub mod template;
