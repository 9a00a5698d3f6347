//! Compute programs: dispatch over a 3-D grid, then wait for the results.

use std::path::PathBuf;

use super::program::{GpuProgram, ProgramState};
use super::render_context::RenderContext;
use super::template::Stage;

struct ComputePipeline {
    generation: u64,
    pipeline: wgpu::ComputePipeline,
    layouts: Vec<wgpu::BindGroupLayout>,
}

/// A single-kernel compute program.
///
/// [`dispatch`](Self::dispatch) submits one compute pass; the submission
/// is ordered after everything submitted before it on the same queue.
/// [`wait`](Self::wait) blocks the calling thread until that pass has
/// finished and its writes are visible to later binds and readbacks.
pub struct ComputeStage {
    state: ProgramState,
    pipeline: Option<ComputePipeline>,
    in_flight: Option<wgpu::SubmissionIndex>,
}

impl ComputeStage {
    /// Compute program reading its kernel from `path` at compile time.
    pub fn new(label: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            state: ProgramState::new(label, vec![(Stage::Compute, path.into())]),
            pipeline: None,
            in_flight: None,
        }
    }

    /// Kernel `local_size` once compiled.
    pub fn workgroup_size(&self) -> Option<[u32; 3]> {
        self.state.workgroup_size()
    }

    /// Run the kernel over an `x × y × z` grid of workgroups. Returns
    /// `false` without submitting when the program is broken or a slot has
    /// nothing bound.
    pub fn dispatch(&mut self, context: &RenderContext, x: u32, y: u32, z: u32) -> bool {
        if !self.refresh_pipeline(context) {
            return false;
        }
        let Some(cache) = &self.pipeline else {
            return false;
        };
        let Some(bind_groups) = self.state.bind_groups(&context.device, &cache.layouts) else {
            return false;
        };

        let mut encoder = context.create_encoder(&format!("{} Dispatch", self.state.label()));
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(self.state.label()),
                timestamp_writes: None,
            });
            pass.set_pipeline(&cache.pipeline);
            for (index, group) in (0u32..).zip(&bind_groups) {
                pass.set_bind_group(index, group, &[]);
            }
            pass.dispatch_workgroups(x, y, z);
        }
        self.in_flight = Some(context.submit(encoder));
        true
    }

    /// Block until the last dispatch has completed. A no-op when nothing
    /// is in flight.
    ///
    /// # Errors
    ///
    /// Returns [`wgpu::PollError`] if the device was lost while waiting.
    pub fn wait(&mut self, context: &RenderContext) -> Result<(), wgpu::PollError> {
        if let Some(index) = self.in_flight.take() {
            let _ = context
                .device
                .poll(wgpu::PollType::WaitForSubmissionIndex(index))?;
        }
        Ok(())
    }
}

impl GpuProgram for ComputeStage {
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
        if self
            .pipeline
            .as_ref()
            .is_some_and(|p| p.generation == generation)
        {
            return true;
        }

        let device = &context.device;
        let Some(module) = self.state.shader_module(device, Stage::Compute) else {
            return false;
        };
        let layouts = self.state.bind_group_layouts(device);
        let layout_refs: Vec<&wgpu::BindGroupLayout> = layouts.iter().collect();
        let label = self.state.label();
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&format!("{label} Pipeline Layout")),
            bind_group_layouts: &layout_refs,
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(&format!("{label} Pipeline")),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });
        log::debug!("{label}: compute pipeline built (generation {generation})");

        self.pipeline = Some(ComputePipeline {
            generation,
            pipeline,
            layouts,
        });
        true
    }
}
