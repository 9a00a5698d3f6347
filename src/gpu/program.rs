//! Shared program machinery for compute and render stages.
//!
//! [`ProgramState`] holds what both variants need: the kernel sources, the
//! validated naga modules, reflected resource [slots](Slot), CPU staging
//! for uniform blocks, and whatever the caller attached to each slot.
//! [`GpuProgram`] is the capability set both stages expose; its provided
//! methods delegate to the state so the variants only supply pipeline
//! construction.

use std::borrow::Cow;
use std::cell::Cell;
use std::path::PathBuf;

use super::buffer::{BufferBinding, BufferKind, DeviceBuffer};
use super::error::ResourceError;
use super::image::{Access, DeviceImage, ImageBinding, ImageUse};
use super::pipeline_helpers;
use super::reflect::{self, Slot, SlotKind, UniformType};
use super::render_context::RenderContext;
use super::template::{self, CompileError, ConstantBlock, Stage};

/// Compile state of a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramStatus {
    /// `load_and_compile` has not run yet.
    Uncompiled,
    /// Every stage parsed and validated.
    Ready,
    /// A stage failed; dispatches and draws are skipped.
    Broken,
}

/// A pre-resolved uniform member: which block, where in it, and its type.
/// Stays valid until the program is recompiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformLocation {
    /// Slot index of the owning uniform block.
    pub block: usize,
    /// Byte offset inside the block.
    pub offset: u32,
    /// Declared member type.
    pub ty: UniformType,
}

/// Target of a uniform write: a member name looked up on every call, or a
/// location resolved once with [`GpuProgram::get_location`].
#[derive(Debug, Clone, Copy)]
pub enum UniformRef<'a> {
    /// Member name.
    Name(&'a str),
    /// Resolved location; `None` (unknown name) makes the write a no-op.
    Location(Option<UniformLocation>),
}

impl<'a> From<&'a str> for UniformRef<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl From<UniformLocation> for UniformRef<'_> {
    fn from(location: UniformLocation) -> Self {
        Self::Location(Some(location))
    }
}

impl From<Option<UniformLocation>> for UniformRef<'_> {
    fn from(location: Option<UniformLocation>) -> Self {
        Self::Location(location)
    }
}

/// A resource slot addressed by block/variable name or by index from
/// [`GpuProgram::find_block_index`].
#[derive(Debug, Clone, Copy)]
pub enum BlockRef<'a> {
    /// Block, instance, or variable name.
    Name(&'a str),
    /// Slot index.
    Index(usize),
}

impl<'a> From<&'a str> for BlockRef<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl From<usize> for BlockRef<'_> {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// Host values that can be written into a uniform block member.
pub trait UniformValue {
    /// Value kind, for diagnostics.
    const KIND: &'static str;

    /// Encode into `block` at `offset` if `ty` accepts this kind. Returns
    /// `false` (writing nothing) otherwise.
    fn write(&self, ty: UniformType, block: &mut [u8], offset: usize) -> bool;
}

fn put(block: &mut [u8], offset: usize, bytes: &[u8]) -> bool {
    match block.get_mut(offset..offset + bytes.len()) {
        Some(dst) => {
            dst.copy_from_slice(bytes);
            true
        }
        None => false,
    }
}

/// Writes consecutive columns of `rows` floats, one column per 16 bytes.
fn put_columns(block: &mut [u8], offset: usize, values: &[f32], rows: usize) -> bool {
    values
        .chunks_exact(rows)
        .enumerate()
        .all(|(i, column)| put(block, offset + i * 16, bytemuck::cast_slice(column)))
}

impl UniformValue for bool {
    const KIND: &'static str = "bool";

    fn write(&self, ty: UniformType, block: &mut [u8], offset: usize) -> bool {
        match ty {
            UniformType::Int | UniformType::Uint => {
                put(block, offset, &u32::from(*self).to_ne_bytes())
            }
            _ => false,
        }
    }
}

macro_rules! uniform_pod {
    ($($ty:ty => $kind:literal, $uniform:ident, |$v:ident| $bytes:expr;)*) => {
        $(impl UniformValue for $ty {
            const KIND: &'static str = $kind;

            fn write(&self, ty: UniformType, block: &mut [u8], offset: usize) -> bool {
                let $v = self;
                ty == UniformType::$uniform && put(block, offset, bytemuck::cast_slice($bytes))
            }
        })*
    };
}

uniform_pod! {
    i32 => "int", Int, |v| std::slice::from_ref(v);
    u32 => "uint", Uint, |v| std::slice::from_ref(v);
    f32 => "float", Float, |v| std::slice::from_ref(v);
    [f32; 2] => "vec2", Vec2, |v| v.as_slice();
    [f32; 3] => "vec3", Vec3, |v| v.as_slice();
    [f32; 4] => "vec4", Vec4, |v| v.as_slice();
    [f32; 16] => "mat4", Mat4, |v| v.as_slice();
    glam::Vec2 => "vec2", Vec2, |v| &v.to_array();
    glam::Vec3 => "vec3", Vec3, |v| &v.to_array();
    glam::Vec4 => "vec4", Vec4, |v| &v.to_array();
    glam::Mat4 => "mat4", Mat4, |v| &v.to_cols_array();
}

impl UniformValue for [f32; 9] {
    const KIND: &'static str = "mat3";

    fn write(&self, ty: UniformType, block: &mut [u8], offset: usize) -> bool {
        ty == UniformType::Mat3 && put_columns(block, offset, self, 3)
    }
}

impl UniformValue for glam::Mat3 {
    const KIND: &'static str = "mat3";

    fn write(&self, ty: UniformType, block: &mut [u8], offset: usize) -> bool {
        self.to_cols_array().write(ty, block, offset)
    }
}

impl UniformValue for [f32] {
    const KIND: &'static str = "float[]";

    fn write(&self, ty: UniformType, block: &mut [u8], offset: usize) -> bool {
        let UniformType::FloatArray { len, stride } = ty else {
            return false;
        };
        self.iter()
            .take(len as usize)
            .enumerate()
            .all(|(i, v)| put(block, offset + i * stride as usize, &v.to_ne_bytes()))
    }
}

/// CPU copy of one uniform block, flushed before each dispatch or draw.
#[derive(Debug)]
struct UniformStaging {
    bytes: Vec<u8>,
    buffer: Option<wgpu::Buffer>,
    dirty: bool,
}

/// What the caller attached to a slot.
#[derive(Debug, Clone)]
enum Attachment {
    Buffer(wgpu::Buffer),
    View(wgpu::TextureView),
}

/// State shared by every program variant. See the module docs.
#[derive(Debug)]
pub struct ProgramState {
    label: String,
    sources: Vec<(Stage, PathBuf)>,
    status: ProgramStatus,
    modules: Vec<(Stage, naga::Module)>,
    slots: Vec<Slot>,
    attached: Vec<Option<Attachment>>,
    staging: Vec<Option<UniformStaging>>,
    sampler: Option<wgpu::Sampler>,
    generation: u64,
    warned_broken: Cell<bool>,
    warned_unbound: Cell<bool>,
}

impl ProgramState {
    /// Program over the given stage sources; nothing is read yet.
    pub fn new(label: &str, sources: Vec<(Stage, PathBuf)>) -> Self {
        Self {
            label: label.to_owned(),
            sources,
            status: ProgramStatus::Uncompiled,
            modules: Vec::new(),
            slots: Vec::new(),
            attached: Vec::new(),
            staging: Vec::new(),
            sampler: None,
            generation: 0,
            warned_broken: Cell::new(false),
            warned_unbound: Cell::new(false),
        }
    }

    /// Read every stage from disk, inject `constants`, compile, and create
    /// the program-owned device objects.
    ///
    /// # Errors
    ///
    /// The first stage that fails to parse or validate. The diagnostic is
    /// already logged and the program is left [`Broken`](ProgramStatus::Broken).
    pub fn load_and_compile(
        &mut self,
        context: &RenderContext,
        constants: &ConstantBlock,
    ) -> Result<(), CompileError> {
        let sources: Vec<(Stage, String)> = self
            .sources
            .iter()
            .map(|(stage, path)| (*stage, template::load_source(path)))
            .collect();
        self.compile_sources(&sources, constants)?;
        self.create_device_objects(context);
        Ok(())
    }

    /// Compile in-memory stage sources. Needs no device; uniform staging
    /// is available immediately, device objects are created on first use.
    ///
    /// # Errors
    ///
    /// As for [`load_and_compile`](Self::load_and_compile).
    pub fn compile_sources(
        &mut self,
        sources: &[(Stage, String)],
        constants: &ConstantBlock,
    ) -> Result<(), CompileError> {
        self.modules.clear();
        self.slots.clear();
        self.attached.clear();
        self.staging.clear();
        self.generation += 1;
        self.warned_broken.set(false);

        let mut modules = Vec::with_capacity(sources.len());
        for (stage, source) in sources {
            let spliced = template::splice_constants(source, constants);
            match template::compile_source(&self.label, *stage, &spliced) {
                Ok(module) => modules.push((*stage, module)),
                Err(e) => {
                    self.status = ProgramStatus::Broken;
                    return Err(e);
                }
            }
        }

        for (stage, module) in &modules {
            reflect::merge(&mut self.slots, reflect::reflect(module, *stage));
        }
        self.attached = vec![None; self.slots.len()];
        self.staging = self
            .slots
            .iter()
            .map(|slot| match slot.kind {
                SlotKind::UniformBlock { size } => Some(UniformStaging {
                    bytes: vec![0; size as usize],
                    buffer: None,
                    dirty: true,
                }),
                _ => None,
            })
            .collect();
        self.modules = modules;
        self.status = ProgramStatus::Ready;
        log::debug!(
            "{}: compiled {} stage(s), {} resource slot(s)",
            self.label,
            self.modules.len(),
            self.slots.len()
        );
        Ok(())
    }

    /// Current compile state.
    pub fn status(&self) -> ProgramStatus {
        self.status
    }

    /// Program label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Reflected resource slots.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Bumped by every compile and every binding-point change. Cached
    /// pipelines built for an older generation are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// `local_size` of the compute entry point, if there is one.
    pub fn workgroup_size(&self) -> Option<[u32; 3]> {
        self.modules
            .iter()
            .filter(|(stage, _)| *stage == Stage::Compute)
            .find_map(|(_, module)| module.entry_points.first())
            .map(|entry| entry.workgroup_size)
    }

    /// Resolve a uniform member. `None` for unknown names.
    pub fn get_location(&self, name: &str) -> Option<UniformLocation> {
        self.slots.iter().enumerate().find_map(|(block, slot)| {
            if !matches!(slot.kind, SlotKind::UniformBlock { .. }) {
                return None;
            }
            slot.field(name).map(|field| UniformLocation {
                block,
                offset: field.offset,
                ty: field.ty,
            })
        })
    }

    /// Write `value` into the staging copy. A `None` location is ignored;
    /// a kind mismatch is logged and ignored.
    pub fn write_uniform<V: UniformValue + ?Sized>(
        &mut self,
        location: Option<UniformLocation>,
        value: &V,
    ) {
        let Some(location) = location else {
            return;
        };
        let Some(Some(staging)) = self.staging.get_mut(location.block) else {
            return;
        };
        if value.write(location.ty, &mut staging.bytes, location.offset as usize) {
            staging.dirty = true;
        } else {
            log::warn!(
                "{}: cannot write {} into {:?} uniform at offset {}",
                self.label,
                V::KIND,
                location.ty,
                location.offset
            );
        }
    }

    /// Staged bytes of the uniform block at `block`.
    pub fn uniform_bytes(&self, block: usize) -> Option<&[u8]> {
        self.staging
            .get(block)
            .and_then(Option::as_ref)
            .map(|s| s.bytes.as_slice())
    }

    /// Index of the storage or uniform block called `name`.
    pub fn find_block_index(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.kind.is_block() && s.matches(name))
    }

    /// Index of any slot (block, texture, image, or sampler) called `name`.
    pub fn find_slot(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.matches(name))
    }

    /// Attach a buffer to a block. If the buffer's binding point differs
    /// from the block's, the block is moved to that point first, so both
    /// always agree.
    ///
    /// # Errors
    ///
    /// Unknown block, a uniform buffer offered to a storage block (or the
    /// reverse), or a point already taken by another slot.
    pub fn attach_buffer(
        &mut self,
        block: BlockRef<'_>,
        binding: BufferBinding,
    ) -> Result<(), ResourceError> {
        let index = self.resolve(block, |kind| kind.is_block())?;
        let expected = match self.slots[index].kind {
            SlotKind::UniformBlock { .. } => BufferKind::Uniform,
            _ => BufferKind::Storage,
        };
        if binding.kind != expected {
            return Err(self.kind_mismatch(index, format!("{:?} buffer", binding.kind)));
        }
        self.repoint(index, binding.point)?;
        self.attach(index, Attachment::Buffer(binding.buffer));
        Ok(())
    }

    /// Attach an image to a texture or storage-image slot, moving the slot
    /// to the image's unit if needed.
    ///
    /// # Errors
    ///
    /// Unknown slot, sampled/storage use not matching the declaration, a
    /// storage format that differs from the declared one, or a point
    /// already taken.
    pub fn attach_image(
        &mut self,
        slot: BlockRef<'_>,
        image: ImageBinding,
    ) -> Result<(), ResourceError> {
        let index = self.resolve(slot, |kind| {
            matches!(
                kind,
                SlotKind::SampledImage { .. } | SlotKind::StorageImage { .. }
            )
        })?;
        let compatible = match (self.slots[index].kind, image.usage) {
            (SlotKind::SampledImage { .. }, ImageUse::Sampled) => true,
            (SlotKind::StorageImage { format, access }, ImageUse::Storage(requested)) => {
                if requested.storage_access() != access {
                    log::debug!(
                        "{}: '{}' declares {access:?}, binding requested {requested:?}",
                        self.label,
                        self.slots[index].display_name()
                    );
                }
                format == image.format.texture_format()
            }
            _ => false,
        };
        if !compatible {
            return Err(self.kind_mismatch(index, format!("{:?} image", image.format)));
        }
        self.repoint(index, image.unit)?;
        self.attach(index, Attachment::View(image.view));
        Ok(())
    }

    /// Flush dirty uniform staging to the device. Returns `false` (after a
    /// one-time warning) when the program cannot run.
    pub fn prepare(&mut self, context: &RenderContext) -> bool {
        if self.status != ProgramStatus::Ready {
            if !self.warned_broken.replace(true) {
                log::warn!(
                    "{}: program is {:?}; skipping dispatch/draw",
                    self.label,
                    self.status
                );
            }
            return false;
        }
        self.create_device_objects(context);
        for staging in self.staging.iter_mut().flatten() {
            if let (true, Some(buffer)) = (staging.dirty, &staging.buffer) {
                context.queue.write_buffer(buffer, 0, &staging.bytes);
                staging.dirty = false;
            }
        }
        true
    }

    /// Device module for `stage` as currently bound.
    pub(crate) fn shader_module(
        &self,
        device: &wgpu::Device,
        stage: Stage,
    ) -> Option<wgpu::ShaderModule> {
        let (_, module) = self.modules.iter().find(|(s, _)| *s == stage)?;
        Some(device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("{} {}", self.label, stage.name())),
            source: wgpu::ShaderSource::Naga(Cow::Owned(module.clone())),
        }))
    }

    /// One layout per bind group `0..=max_group`.
    pub(crate) fn bind_group_layouts(&self, device: &wgpu::Device) -> Vec<wgpu::BindGroupLayout> {
        (0..self.group_count())
            .map(|group| {
                let entries: Vec<_> = self
                    .slots
                    .iter()
                    .filter(|s| s.group == group)
                    .map(Slot::layout_entry)
                    .collect();
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(&format!("{} Group {group} Layout", self.label)),
                    entries: &entries,
                })
            })
            .collect()
    }

    /// Bind groups for the current attachments, or `None` (after a
    /// warning) if some slot has nothing attached.
    pub(crate) fn bind_groups(
        &self,
        device: &wgpu::Device,
        layouts: &[wgpu::BindGroupLayout],
    ) -> Option<Vec<wgpu::BindGroup>> {
        let mut groups = Vec::with_capacity(layouts.len());
        for (group, layout) in (0u32..).zip(layouts) {
            let mut entries = Vec::new();
            for (index, slot) in self.slots.iter().enumerate() {
                if slot.group != group {
                    continue;
                }
                let Some(resource) = self.resource(index) else {
                    if !self.warned_unbound.replace(true) {
                        log::warn!(
                            "{}: nothing bound to '{}' (binding {}); skipping",
                            self.label,
                            slot.display_name(),
                            slot.binding
                        );
                    }
                    return None;
                };
                entries.push(wgpu::BindGroupEntry {
                    binding: slot.binding,
                    resource,
                });
            }
            groups.push(device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("{} Group {group}", self.label)),
                layout,
                entries: &entries,
            }));
        }
        Some(groups)
    }

    fn resource(&self, index: usize) -> Option<wgpu::BindingResource<'_>> {
        match (&self.attached[index], self.slots[index].kind) {
            (Some(Attachment::Buffer(buffer)), _) => Some(buffer.as_entire_binding()),
            (Some(Attachment::View(view)), _) => Some(wgpu::BindingResource::TextureView(view)),
            (None, SlotKind::UniformBlock { .. }) => self.staging[index]
                .as_ref()
                .and_then(|s| s.buffer.as_ref())
                .map(wgpu::Buffer::as_entire_binding),
            (None, SlotKind::Sampler) => {
                self.sampler.as_ref().map(wgpu::BindingResource::Sampler)
            }
            (None, _) => None,
        }
    }

    fn group_count(&self) -> u32 {
        self.slots.iter().map(|s| s.group + 1).max().unwrap_or(0)
    }

    fn create_device_objects(&mut self, context: &RenderContext) {
        for (slot, staging) in self.slots.iter().zip(self.staging.iter_mut()) {
            let Some(staging) = staging else {
                continue;
            };
            if staging.buffer.is_none() {
                staging.buffer = Some(context.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("{} {}", self.label, slot.display_name())),
                    size: (staging.bytes.len() as u64).max(16),
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                }));
                staging.dirty = true;
            }
        }
        if self.sampler.is_none() && self.slots.iter().any(|s| s.kind == SlotKind::Sampler) {
            self.sampler = Some(pipeline_helpers::nearest_sampler(
                &context.device,
                &format!("{} Sampler", self.label),
            ));
        }
    }

    fn resolve(
        &self,
        slot: BlockRef<'_>,
        accepts: impl Fn(SlotKind) -> bool,
    ) -> Result<usize, ResourceError> {
        let index = match slot {
            BlockRef::Name(name) => self
                .slots
                .iter()
                .position(|s| accepts(s.kind) && s.matches(name)),
            BlockRef::Index(i) => self.slots.get(i).filter(|s| accepts(s.kind)).map(|_| i),
        };
        index.ok_or_else(|| ResourceError::UnknownSlot {
            program: self.label.clone(),
            name: match slot {
                BlockRef::Name(name) => name.to_owned(),
                BlockRef::Index(i) => format!("#{i}"),
            },
        })
    }

    fn kind_mismatch(&self, index: usize, offered: String) -> ResourceError {
        ResourceError::SlotMismatch {
            program: self.label.clone(),
            slot: self.slots[index].display_name().to_owned(),
            offered,
        }
    }

    fn attach(&mut self, index: usize, attachment: Attachment) {
        self.attached[index] = Some(attachment);
        self.warned_unbound.set(false);
    }

    /// Move slot `index` to binding `point` in every stage module.
    fn repoint(&mut self, index: usize, point: u32) -> Result<(), ResourceError> {
        let (group, current) = (self.slots[index].group, self.slots[index].binding);
        if current == point {
            return Ok(());
        }
        if let Some(holder) = self
            .slots
            .iter()
            .find(|s| s.group == group && s.binding == point)
        {
            return Err(ResourceError::BindingConflict {
                program: self.label.clone(),
                slot: self.slots[index].display_name().to_owned(),
                point,
                holder: holder.display_name().to_owned(),
            });
        }
        for (_, module) in &mut self.modules {
            let _ = reflect::set_binding(module, group, current, point);
        }
        self.slots[index].binding = point;
        self.generation += 1;
        log::debug!(
            "{}: '{}' moved from binding {current} to {point}",
            self.label,
            self.slots[index].display_name()
        );
        Ok(())
    }
}

/// Capabilities shared by compute and render programs.
///
/// Implementors provide access to their [`ProgramState`] and build their
/// own pipeline in [`refresh_pipeline`](Self::refresh_pipeline); everything
/// else is provided.
pub trait GpuProgram {
    /// Shared state.
    fn state(&self) -> &ProgramState;

    /// Shared state, mutably.
    fn state_mut(&mut self) -> &mut ProgramState;

    /// (Re)build the device pipeline if the program changed since it was
    /// last built. Returns `false` if the program cannot run.
    fn refresh_pipeline(&mut self, context: &RenderContext) -> bool;

    /// Load, inject `constants` after each stage's first line, and compile.
    ///
    /// # Errors
    ///
    /// See [`ProgramState::load_and_compile`].
    fn load_and_compile(
        &mut self,
        context: &RenderContext,
        constants: &ConstantBlock,
    ) -> Result<(), CompileError> {
        self.state_mut().load_and_compile(context, constants)
    }

    /// Compile without injected constants.
    ///
    /// # Errors
    ///
    /// See [`ProgramState::load_and_compile`].
    fn compile_plain(&mut self, context: &RenderContext) -> Result<(), CompileError> {
        self.load_and_compile(context, &ConstantBlock::new())
    }

    /// Make the program current: the pipeline is brought up to date with
    /// the latest compile and binding points.
    fn use_program(&mut self, context: &RenderContext) -> bool {
        self.refresh_pipeline(context)
    }

    /// Current compile state.
    fn status(&self) -> ProgramStatus {
        self.state().status()
    }

    /// Resolve a uniform member once for reuse across frames.
    fn get_location(&self, name: &str) -> Option<UniformLocation> {
        self.state().get_location(name)
    }

    /// Write a uniform by name or by pre-resolved location. Both forms
    /// behave identically; unknown names are a silent no-op.
    fn bind_uniform<'a, V: UniformValue + ?Sized>(
        &mut self,
        target: impl Into<UniformRef<'a>>,
        value: &V,
    ) {
        let location = match target.into() {
            UniformRef::Name(name) => self.state().get_location(name),
            UniformRef::Location(location) => location,
        };
        self.state_mut().write_uniform(location, value);
    }

    /// Index of the storage or uniform block called `name`.
    fn find_block_index(&self, name: &str) -> Option<usize> {
        self.state().find_block_index(name)
    }

    /// Bind `buffer` at `point` and point `block` at the same binding.
    ///
    /// # Errors
    ///
    /// Uninitialized buffer, unknown block, or a conflicting binding.
    fn bind_buffer<'a>(
        &mut self,
        block: impl Into<BlockRef<'a>>,
        buffer: &DeviceBuffer,
        point: u32,
    ) -> Result<(), ResourceError> {
        let binding = buffer.bind(point)?;
        self.state_mut().attach_buffer(block.into(), binding)
    }

    /// Attach `image` for sampling at texture unit `unit`.
    ///
    /// # Errors
    ///
    /// Uninitialized image, unknown slot, or a conflicting binding.
    fn bind_texture<'a>(
        &mut self,
        slot: impl Into<BlockRef<'a>>,
        image: &DeviceImage,
        unit: u32,
    ) -> Result<(), ResourceError> {
        let binding = image.bind_sample(unit)?;
        self.state_mut().attach_image(slot.into(), binding)
    }

    /// Attach `image` for random access at image unit `unit`.
    ///
    /// # Errors
    ///
    /// Uninitialized image, unknown slot, declared format differing from
    /// the image's, or a conflicting binding.
    fn bind_image<'a>(
        &mut self,
        slot: impl Into<BlockRef<'a>>,
        image: &DeviceImage,
        unit: u32,
        access: Access,
    ) -> Result<(), ResourceError> {
        let binding = image.bind_image(unit, access)?;
        self.state_mut().attach_image(slot.into(), binding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KERNEL: &str = "#version 450
layout(local_size_x = 1) in;
layout(std430, binding = 0) readonly buffer ParticlesBuffer { float particles[]; };
layout(std430, binding = 1) buffer ParticlesBufferUpdated { float particles_updated[]; };
layout(std140, binding = 2) uniform Params {
    float dt;
    int num_particles;
    vec4 color;
    mat3 basis;
    float weights[3];
};
void main() {
    uint i = gl_GlobalInvocationID.x;
    particles_updated[i] = particles[i] * dt + color.x + basis[1].y + weights[2] + float(num_particles);
}
";

    fn compiled() -> ProgramState {
        let mut state = ProgramState::new("test", Vec::new());
        let result = state.compile_sources(
            &[(Stage::Compute, KERNEL.to_owned())],
            &ConstantBlock::new(),
        );
        assert!(result.is_ok(), "{:?}", result.err());
        state
    }

    fn floats(bytes: &[u8], offset: usize, count: usize) -> Vec<f32> {
        bytemuck::cast_slice::<u8, f32>(&bytes[offset..offset + count * 4]).to_vec()
    }

    #[test]
    fn name_and_location_writes_agree() {
        let mut by_name = compiled();
        let mut by_location = compiled();
        let location = by_location.get_location("dt");

        let dt = by_name.get_location("dt");
        by_name.write_uniform(dt, &0.25f32);
        by_location.write_uniform(location, &0.25f32);

        let block = location.map(|l| l.block).unwrap_or_default();
        assert_eq!(by_name.uniform_bytes(block), by_location.uniform_bytes(block));
        assert_eq!(
            by_name.uniform_bytes(block).map(|b| floats(b, 0, 1)),
            Some(vec![0.25])
        );
    }

    #[test]
    fn unknown_name_is_a_no_op() {
        let mut state = compiled();
        assert!(state.get_location("nope").is_none());
        let before = state.uniform_bytes(2).map(<[u8]>::to_vec);
        state.write_uniform(None, &1.0f32);
        assert_eq!(state.uniform_bytes(2).map(<[u8]>::to_vec), before);
    }

    #[test]
    fn int_member_takes_bool_but_not_float() {
        let mut state = compiled();
        let location = state.get_location("num_particles");
        state.write_uniform(location, &1.5f32);
        state.write_uniform(location, &true);
        let offset = location.map_or(0, |l| l.offset as usize);
        let bytes = state.uniform_bytes(2).map(|b| b[offset..offset + 4].to_vec());
        assert_eq!(bytes, Some(1i32.to_ne_bytes().to_vec()));
    }

    #[test]
    fn mat3_columns_use_vec4_stride() {
        let mut state = compiled();
        let location = state.get_location("basis");
        state.write_uniform(location, &glam::Mat3::from_cols_array(&[
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0,
        ]));
        let offset = location.map_or(0, |l| l.offset as usize);
        let Some(bytes) = state.uniform_bytes(2) else {
            panic!("Params staging missing");
        };
        assert_eq!(floats(bytes, offset, 3), vec![1.0, 2.0, 3.0]);
        assert_eq!(floats(bytes, offset + 16, 3), vec![4.0, 5.0, 6.0]);
        assert_eq!(floats(bytes, offset + 32, 3), vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn float_arrays_clamp_to_declared_length() {
        let mut state = compiled();
        let location = state.get_location("weights");
        state.write_uniform(location, [1.0f32, 2.0, 3.0, 4.0, 5.0].as_slice());
        let offset = location.map_or(0, |l| l.offset as usize);
        let Some(bytes) = state.uniform_bytes(2) else {
            panic!("Params staging missing");
        };
        assert_eq!(floats(bytes, offset, 1), vec![1.0]);
        assert_eq!(floats(bytes, offset + 16, 1), vec![2.0]);
        assert_eq!(floats(bytes, offset + 32, 1), vec![3.0]);
    }

    #[test]
    fn vec4_uniform_from_array() {
        let mut state = compiled();
        let location = state.get_location("color");
        state.write_uniform(location, &[0.1f32, 0.2, 0.3, 1.0]);
        let offset = location.map_or(0, |l| l.offset as usize);
        assert_eq!(
            state.uniform_bytes(2).map(|b| floats(b, offset, 4)),
            Some(vec![0.1, 0.2, 0.3, 1.0])
        );
    }

    #[test]
    fn blocks_resolve_by_name() {
        let state = compiled();
        assert_eq!(state.find_block_index("ParticlesBuffer"), Some(0));
        assert_eq!(state.find_block_index("ParticlesBufferUpdated"), Some(1));
        assert_eq!(state.find_block_index("Params"), Some(2));
        assert!(state.find_block_index("Missing").is_none());
    }

    #[test]
    fn repointing_bumps_generation_and_rejects_conflicts() {
        let mut state = compiled();
        let before = state.generation();
        assert!(state.repoint(0, 7).is_ok());
        assert_eq!(state.slots()[0].binding, 7);
        assert_eq!(state.generation(), before + 1);
        assert!(state.repoint(0, 7).is_ok());
        assert_eq!(state.generation(), before + 1);
        assert!(matches!(
            state.repoint(0, 1),
            Err(ResourceError::BindingConflict { point: 1, .. })
        ));
    }

    #[test]
    fn broken_source_marks_program_broken() {
        let mut state = ProgramState::new("broken", Vec::new());
        let result = state.compile_sources(
            &[(Stage::Compute, "#version 450\nvoid main() { undefined_call(); }\n".to_owned())],
            &ConstantBlock::new(),
        );
        assert!(result.is_err());
        assert_eq!(state.status(), ProgramStatus::Broken);
        assert!(state.slots().is_empty());
    }
}
