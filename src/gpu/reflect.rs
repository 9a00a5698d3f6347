//! Resource reflection over validated naga modules.
//!
//! Every bound global of a kernel becomes a [`Slot`]: storage blocks,
//! uniform blocks (with their std140 member layout), sampled textures,
//! storage images, and samplers.

use super::pipeline_helpers;
use super::template::Stage;

/// Binding family of a reflected resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// `buffer` block.
    StorageBuffer {
        /// Declared `readonly`.
        read_only: bool,
    },
    /// `uniform` block of `size` bytes.
    UniformBlock {
        /// Block size in bytes (std140).
        size: u32,
    },
    /// `texture2D` / `utexture2D` / `itexture2D`.
    SampledImage {
        /// Sample type matching the texture's scalar kind.
        sample_type: wgpu::TextureSampleType,
    },
    /// `image2D` with a format qualifier.
    StorageImage {
        /// Declared format.
        format: wgpu::TextureFormat,
        /// Declared access (`readonly`, `writeonly`, or neither).
        access: wgpu::StorageTextureAccess,
    },
    /// `sampler`.
    Sampler,
}

impl SlotKind {
    /// `true` for slots a caller attaches a [`DeviceBuffer`] to.
    ///
    /// [`DeviceBuffer`]: super::buffer::DeviceBuffer
    pub fn is_block(self) -> bool {
        matches!(self, Self::StorageBuffer { .. } | Self::UniformBlock { .. })
    }
}

/// Value type of one uniform block member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformType {
    /// `int`.
    Int,
    /// `uint`.
    Uint,
    /// `float`.
    Float,
    /// `vec2`.
    Vec2,
    /// `vec3`.
    Vec3,
    /// `vec4`.
    Vec4,
    /// `mat3`, three columns with a 16-byte stride.
    Mat3,
    /// `mat4`.
    Mat4,
    /// `float name[len]` with the declared element stride.
    FloatArray {
        /// Declared element count.
        len: u32,
        /// Bytes between consecutive elements.
        stride: u32,
    },
    /// Anything the host cannot write directly (nested structs, etc.).
    Other,
}

/// One member of a reflected uniform block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformField {
    /// Member name.
    pub name: String,
    /// Byte offset inside the block.
    pub offset: u32,
    /// Member type.
    pub ty: UniformType,
}

/// A reflected resource binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    /// Instance name, empty for anonymous blocks.
    pub instance: String,
    /// Block (type) name; for opaque handles, the variable name.
    pub block: String,
    /// Bind group (GLSL `set`, default 0).
    pub group: u32,
    /// Binding point inside the group.
    pub binding: u32,
    /// Binding family.
    pub kind: SlotKind,
    /// Stages that declare this slot.
    pub visibility: wgpu::ShaderStages,
    /// Uniform block members; empty for other kinds.
    pub fields: Vec<UniformField>,
}

impl Slot {
    /// `true` if `name` is this slot's block or instance name.
    pub fn matches(&self, name: &str) -> bool {
        !name.is_empty() && (self.block == name || self.instance == name)
    }

    /// Uniform member named `name`, either bare or qualified by the
    /// instance or block name (`params.dt`).
    pub fn field(&self, name: &str) -> Option<&UniformField> {
        let bare = match name.split_once('.') {
            Some((prefix, member)) if self.matches(prefix) => member,
            _ => name,
        };
        self.fields.iter().find(|f| f.name == bare)
    }

    /// Human-readable name for logs.
    pub fn display_name(&self) -> &str {
        if self.block.is_empty() {
            &self.instance
        } else {
            &self.block
        }
    }

    pub(crate) fn layout_entry(&self) -> wgpu::BindGroupLayoutEntry {
        let (b, vis) = (self.binding, self.visibility);
        match self.kind {
            SlotKind::StorageBuffer { read_only } => {
                pipeline_helpers::storage_buffer(b, vis, read_only)
            }
            SlotKind::UniformBlock { size } => {
                pipeline_helpers::uniform_buffer(b, vis, u64::from(size))
            }
            SlotKind::SampledImage { sample_type } => {
                pipeline_helpers::texture_2d(b, vis, sample_type)
            }
            SlotKind::StorageImage { format, access } => {
                pipeline_helpers::storage_texture_2d(b, vis, format, access)
            }
            SlotKind::Sampler => pipeline_helpers::non_filtering_sampler(b, vis),
        }
    }
}

/// All bound globals of `module`, tagged with `stage`'s visibility.
pub fn reflect(module: &naga::Module, stage: Stage) -> Vec<Slot> {
    let mut slots = Vec::new();
    for (_, global) in module.global_variables.iter() {
        let Some(binding) = &global.binding else {
            continue;
        };
        let ty = &module.types[global.ty];
        let instance = global.name.clone().unwrap_or_default();
        let block = ty.name.clone().unwrap_or_default();

        let (kind, fields) = match (global.space, &ty.inner) {
            (naga::AddressSpace::Storage { access }, _) => (
                SlotKind::StorageBuffer {
                    read_only: !access.contains(naga::StorageAccess::STORE),
                },
                Vec::new(),
            ),
            (naga::AddressSpace::Uniform, inner) => {
                (SlotKind::UniformBlock { size: inner.size(module.to_ctx()) }, uniform_fields(module, inner))
            }
            (naga::AddressSpace::Handle, inner) => match handle_kind(inner) {
                Some(kind) => (kind, Vec::new()),
                None => {
                    log::warn!(
                        "{} kernel: unsupported resource '{}' at binding {}",
                        stage.name(),
                        instance,
                        binding.binding
                    );
                    continue;
                }
            },
            _ => continue,
        };

        // Opaque handles have no block name; key them by variable name.
        let block = if block.is_empty() && !kind.is_block() {
            instance.clone()
        } else {
            block
        };

        slots.push(Slot {
            instance,
            block,
            group: binding.group,
            binding: binding.binding,
            kind,
            visibility: stage.visibility(),
            fields,
        });
    }
    slots
}

/// Fold `other` into `slots`: the same group and binding seen from another
/// stage widens the visibility instead of adding a slot.
pub fn merge(slots: &mut Vec<Slot>, other: Vec<Slot>) {
    for slot in other {
        match slots
            .iter_mut()
            .find(|s| s.group == slot.group && s.binding == slot.binding)
        {
            Some(existing) => existing.visibility |= slot.visibility,
            None => slots.push(slot),
        }
    }
}

/// Move the global at `group`/`from` to binding `to`. Returns `false` if the
/// module has no such global.
pub(crate) fn set_binding(module: &mut naga::Module, group: u32, from: u32, to: u32) -> bool {
    let mut found = false;
    for (_, global) in module.global_variables.iter_mut() {
        if let Some(binding) = &mut global.binding {
            if binding.group == group && binding.binding == from {
                binding.binding = to;
                found = true;
            }
        }
    }
    found
}

fn handle_kind(inner: &naga::TypeInner) -> Option<SlotKind> {
    match *inner {
        naga::TypeInner::Image {
            dim: naga::ImageDimension::D2,
            arrayed: false,
            class,
        } => match class {
            naga::ImageClass::Sampled { kind, multi: false } => Some(SlotKind::SampledImage {
                sample_type: sample_type(kind),
            }),
            naga::ImageClass::Storage { format, access } => Some(SlotKind::StorageImage {
                format: storage_format(format)?,
                access: storage_access(access),
            }),
            _ => None,
        },
        naga::TypeInner::Sampler { comparison: false } => Some(SlotKind::Sampler),
        _ => None,
    }
}

fn sample_type(kind: naga::ScalarKind) -> wgpu::TextureSampleType {
    match kind {
        naga::ScalarKind::Sint => wgpu::TextureSampleType::Sint,
        naga::ScalarKind::Uint => wgpu::TextureSampleType::Uint,
        // 32-bit float images are not filterable on every adapter.
        _ => wgpu::TextureSampleType::Float { filterable: false },
    }
}

fn storage_access(access: naga::StorageAccess) -> wgpu::StorageTextureAccess {
    let load = access.contains(naga::StorageAccess::LOAD);
    let store = access.contains(naga::StorageAccess::STORE);
    match (load, store) {
        (true, false) => wgpu::StorageTextureAccess::ReadOnly,
        (false, true) => wgpu::StorageTextureAccess::WriteOnly,
        _ => wgpu::StorageTextureAccess::ReadWrite,
    }
}

/// Device format for a GLSL image format qualifier.
pub fn storage_format(format: naga::StorageFormat) -> Option<wgpu::TextureFormat> {
    use naga::StorageFormat as S;
    use wgpu::TextureFormat as F;
    Some(match format {
        S::R32Float => F::R32Float,
        S::R32Uint => F::R32Uint,
        S::R32Sint => F::R32Sint,
        S::Rg32Float => F::Rg32Float,
        S::Rg32Uint => F::Rg32Uint,
        S::Rg32Sint => F::Rg32Sint,
        S::Rgba32Float => F::Rgba32Float,
        S::Rgba32Uint => F::Rgba32Uint,
        S::Rgba32Sint => F::Rgba32Sint,
        S::Rgba8Unorm => F::Rgba8Unorm,
        S::Rgba16Float => F::Rgba16Float,
        _ => return None,
    })
}

fn uniform_fields(module: &naga::Module, inner: &naga::TypeInner) -> Vec<UniformField> {
    let naga::TypeInner::Struct { members, .. } = inner else {
        return Vec::new();
    };
    members
        .iter()
        .filter_map(|m| {
            Some(UniformField {
                name: m.name.clone()?,
                offset: m.offset,
                ty: uniform_type(module, &module.types[m.ty].inner),
            })
        })
        .collect()
}

fn uniform_type(module: &naga::Module, inner: &naga::TypeInner) -> UniformType {
    use naga::{ScalarKind as K, TypeInner as T, VectorSize as V};
    match *inner {
        T::Scalar(s) => match s.kind {
            K::Sint => UniformType::Int,
            K::Uint => UniformType::Uint,
            K::Float => UniformType::Float,
            _ => UniformType::Other,
        },
        T::Vector { size, scalar } if scalar.kind == K::Float => match size {
            V::Bi => UniformType::Vec2,
            V::Tri => UniformType::Vec3,
            V::Quad => UniformType::Vec4,
        },
        T::Matrix {
            columns: V::Tri,
            rows: V::Tri,
            ..
        } => UniformType::Mat3,
        T::Matrix {
            columns: V::Quad,
            rows: V::Quad,
            ..
        } => UniformType::Mat4,
        T::Array {
            base,
            size: naga::ArraySize::Constant(len),
            stride,
        } if matches!(
            module.types[base].inner,
            T::Scalar(naga::Scalar { kind: K::Float, .. })
        ) =>
        {
            UniformType::FloatArray {
                len: len.get(),
                stride,
            }
        }
        _ => UniformType::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::template::{compile_source, Stage};

    const PARAMS_KERNEL: &str = "#version 450
layout(local_size_x = 1) in;
layout(std430, binding = 0) readonly buffer ParticlesBuffer { float particles[]; };
layout(std430, binding = 1) buffer ParticlesBufferUpdated { float particles_updated[]; };
layout(std140, binding = 2) uniform Params {
    float dt;
    int num_particles;
    vec3 tint;
    vec4 color;
    mat3 basis;
    float weights[4];
};
void main() {
    uint i = gl_GlobalInvocationID.x;
    particles_updated[i] = particles[i] * dt * weights[1] + color.x + tint.y + basis[0].x + float(num_particles);
}
";

    const IMAGE_KERNEL: &str = "#version 450
layout(local_size_x = 8, local_size_y = 8) in;
layout(rgba32f, binding = 0) uniform readonly image2D src_image;
layout(r32f, binding = 1) uniform writeonly image2D dst_image;
void main() {
    ivec2 p = ivec2(gl_GlobalInvocationID.xy);
    imageStore(dst_image, p, vec4(imageLoad(src_image, p).x));
}
";

    fn slots_of(source: &str) -> Vec<Slot> {
        match compile_source("test", Stage::Compute, source) {
            Ok(module) => reflect(&module, Stage::Compute),
            Err(e) => panic!("{e}"),
        }
    }

    #[test]
    fn storage_blocks_reflect_by_block_name() {
        let slots = slots_of(PARAMS_KERNEL);
        let read = slots.iter().find(|s| s.matches("ParticlesBuffer"));
        let write = slots.iter().find(|s| s.matches("ParticlesBufferUpdated"));
        assert_eq!(read.map(|s| (s.binding, s.kind)), Some((0, SlotKind::StorageBuffer { read_only: true })));
        assert_eq!(write.map(|s| (s.binding, s.kind)), Some((1, SlotKind::StorageBuffer { read_only: false })));
    }

    #[test]
    fn uniform_members_follow_std140() {
        let slots = slots_of(PARAMS_KERNEL);
        let Some(params) = slots.iter().find(|s| s.matches("Params")) else {
            panic!("Params block not reflected");
        };
        let offset = |name: &str| params.field(name).map(|f| (f.offset, f.ty));
        assert_eq!(offset("dt"), Some((0, UniformType::Float)));
        assert_eq!(offset("num_particles"), Some((4, UniformType::Int)));
        assert_eq!(offset("tint"), Some((16, UniformType::Vec3)));
        assert_eq!(offset("color"), Some((32, UniformType::Vec4)));
        assert_eq!(offset("basis"), Some((48, UniformType::Mat3)));
        assert_eq!(
            offset("weights"),
            Some((96, UniformType::FloatArray { len: 4, stride: 16 }))
        );
        assert_eq!(offset("Params.dt"), Some((0, UniformType::Float)));
        assert!(params.field("missing").is_none());
    }

    #[test]
    fn storage_images_keep_declared_format_and_access() {
        let slots = slots_of(IMAGE_KERNEL);
        let kinds: Vec<_> = slots.iter().map(|s| (s.block.as_str(), s.kind)).collect();
        assert!(kinds.contains(&(
            "src_image",
            SlotKind::StorageImage {
                format: wgpu::TextureFormat::Rgba32Float,
                access: wgpu::StorageTextureAccess::ReadOnly,
            }
        )));
        assert!(kinds.contains(&(
            "dst_image",
            SlotKind::StorageImage {
                format: wgpu::TextureFormat::R32Float,
                access: wgpu::StorageTextureAccess::WriteOnly,
            }
        )));
    }

    #[test]
    fn merging_widens_visibility() {
        let slots = slots_of(PARAMS_KERNEL);
        let mut merged = slots.clone();
        let fragment: Vec<Slot> = slots
            .into_iter()
            .map(|s| Slot {
                visibility: wgpu::ShaderStages::FRAGMENT,
                ..s
            })
            .collect();
        merge(&mut merged, fragment);
        assert_eq!(merged.len(), 3);
        assert!(merged
            .iter()
            .all(|s| s.visibility == wgpu::ShaderStages::COMPUTE | wgpu::ShaderStages::FRAGMENT));
    }

    #[test]
    fn rebinding_moves_the_global() {
        let Ok(mut module) = compile_source("test", Stage::Compute, PARAMS_KERNEL) else {
            panic!("kernel failed to compile");
        };
        assert!(set_binding(&mut module, 0, 0, 5));
        assert!(!set_binding(&mut module, 0, 0, 6));
        let slots = reflect(&module, Stage::Compute);
        assert!(slots.iter().any(|s| s.matches("ParticlesBuffer") && s.binding == 5));
    }
}
